//! Static table of portals and the mapper that serves each of them.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::ConfigError;
use crate::mapper::{CensusMapper, CommandMapper};

/// Group id shared by every email-only portal.
pub const EMAIL_GROUP_ID: &str = "EMAIL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalKind {
    /// Produces its own output file, which is read back and stored.
    FileGenerating,
    /// Part of the email group; success means the shared mapper ran.
    EmailOnly,
}

/// One registry entry.
pub struct PortalMapping {
    pub canonical: String,
    /// Invocation group. File portals are their own group; email portals
    /// all share [`EMAIL_GROUP_ID`].
    pub group: String,
    pub mapper: Arc<dyn CensusMapper>,
    pub output_dir: PathBuf,
    pub output_file: String,
    pub kind: PortalKind,
    pub external_generation: bool,
}

impl PortalMapping {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file)
    }

    /// Whether one invocation per request serves every portal of the group.
    pub fn is_shared(&self) -> bool {
        self.kind == PortalKind::EmailOnly
    }
}

impl std::fmt::Debug for PortalMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalMapping")
            .field("canonical", &self.canonical)
            .field("group", &self.group)
            .field("mapper", &self.mapper.name())
            .field("output_dir", &self.output_dir)
            .field("output_file", &self.output_file)
            .field("kind", &self.kind)
            .field("external_generation", &self.external_generation)
            .finish()
    }
}

/// Immutable after construction; shared by reference for the process lifetime.
#[derive(Debug, Default)]
pub struct PortalRegistry {
    entries: BTreeMap<String, Arc<PortalMapping>>,
}

impl PortalRegistry {
    pub fn builder() -> PortalRegistryBuilder {
        PortalRegistryBuilder::default()
    }

    /// Builds the registry from the `portals` and `email` config sections,
    /// backing every entry with a [`CommandMapper`].
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        for portal in &config.portals {
            let mapper = CommandMapper::new(
                portal.id.to_lowercase(),
                &portal.command,
                portal.accepts_auxiliary_data,
            )
            .map_err(|e| ConfigError::InvalidPortal {
                id: portal.id.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.file_portal(
                &portal.id,
                Arc::new(mapper),
                &portal.output_dir,
                &portal.output_file,
                portal.external_generation,
            );
        }

        if let Some(email) = &config.email {
            let mapper = CommandMapper::new("email", &email.command, false).map_err(|e| {
                ConfigError::InvalidPortal {
                    id: EMAIL_GROUP_ID.to_string(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.email_group(
                &email.portals,
                Arc::new(mapper),
                &email.output_dir,
                &email.output_file,
            );
        }

        builder.build()
    }

    pub fn get(&self, canonical: &str) -> Option<&Arc<PortalMapping>> {
        self.entries.get(canonical)
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.entries.contains_key(canonical)
    }

    pub fn is_email_portal(&self, canonical: &str) -> bool {
        self.get(canonical)
            .map(|m| m.kind == PortalKind::EmailOnly)
            .unwrap_or(false)
    }

    /// Registered canonical ids, sorted.
    pub fn known_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Every distinct output directory, in id order.
    pub fn output_dirs(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.entries
            .values()
            .filter(|m| seen.insert(m.output_dir.clone()))
            .map(|m| m.output_dir.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct PortalRegistryBuilder {
    mappings: Vec<PortalMapping>,
}

impl PortalRegistryBuilder {
    pub fn file_portal(
        mut self,
        id: &str,
        mapper: Arc<dyn CensusMapper>,
        output_dir: impl AsRef<Path>,
        output_file: &str,
        external_generation: bool,
    ) -> Self {
        let canonical = id.trim().to_uppercase();
        self.mappings.push(PortalMapping {
            group: canonical.clone(),
            canonical,
            mapper,
            output_dir: output_dir.as_ref().to_path_buf(),
            output_file: output_file.to_string(),
            kind: PortalKind::FileGenerating,
            external_generation,
        });
        self
    }

    /// Registers every id of the email group against one shared mapper.
    pub fn email_group<S: AsRef<str>>(
        mut self,
        ids: &[S],
        mapper: Arc<dyn CensusMapper>,
        output_dir: impl AsRef<Path>,
        output_file: &str,
    ) -> Self {
        for id in ids {
            self.mappings.push(PortalMapping {
                canonical: id.as_ref().trim().to_uppercase(),
                group: EMAIL_GROUP_ID.to_string(),
                mapper: Arc::clone(&mapper),
                output_dir: output_dir.as_ref().to_path_buf(),
                output_file: output_file.to_string(),
                kind: PortalKind::EmailOnly,
                external_generation: false,
            });
        }
        self
    }

    pub fn build(self) -> Result<PortalRegistry, ConfigError> {
        let mut entries = BTreeMap::new();
        for mapping in self.mappings {
            if mapping.canonical.is_empty() {
                return Err(ConfigError::Validation {
                    message: "portal id must not be empty".to_string(),
                });
            }
            let id = mapping.canonical.clone();
            if entries.insert(id.clone(), Arc::new(mapping)).is_some() {
                return Err(ConfigError::InvalidPortal {
                    id,
                    reason: "registered more than once".to_string(),
                });
            }
        }

        log::debug!("Portal registry built with {} entries", entries.len());
        Ok(PortalRegistry { entries })
    }
}
