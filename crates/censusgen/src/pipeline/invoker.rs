//! Runs the mappers of one request, portal by portal.
//!
//! Every portal is isolated: whatever goes wrong with one of them becomes a
//! failed outcome for that portal only, and processing moves on to the next
//! requested name.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{info_span, Instrument};

use crate::error::WorkspaceError;
use crate::mapper::{MapperContext, DEFAULT_PROCESSING_ID};
use crate::pipeline::outcome::{FailureReason, OutcomeState, PortalOutcome, RequestReport};
use crate::portal::{PortalKind, PortalMapping, PortalRegistry, PortalResolver, Resolution};
use crate::request::AuxiliaryData;
use crate::store::UploadStore;
use crate::workspace::{await_stable, list_directory, read_artifact, StabilitySettings};

#[derive(Debug, Clone)]
pub struct InvokerSettings {
    pub mapper_timeout: Duration,
    pub stability: StabilitySettings,
    pub staging_dir: PathBuf,
}

/// Result of one shared-group invocation, reused by later group members.
type GroupResult = Result<(), FailureReason>;

pub struct MappingInvoker {
    registry: Arc<PortalRegistry>,
    resolver: Arc<PortalResolver>,
    store: Arc<dyn UploadStore>,
    settings: InvokerSettings,
}

impl MappingInvoker {
    pub fn new(
        registry: Arc<PortalRegistry>,
        resolver: Arc<PortalResolver>,
        store: Arc<dyn UploadStore>,
        settings: InvokerSettings,
    ) -> Self {
        Self {
            registry,
            resolver,
            store,
            settings,
        }
    }

    pub fn registry(&self) -> &PortalRegistry {
        &self.registry
    }

    /// Processes every requested portal in order and returns the finalized report.
    ///
    /// Shared (email) groups run at most once per call; file portals run once
    /// per occurrence in `portals`.
    pub async fn run(
        &self,
        upload_id: i64,
        portals: &[String],
        auxiliary: &AuxiliaryData,
    ) -> RequestReport {
        let mut report = RequestReport::new(portals);
        let mut group_runs: HashMap<String, GroupResult> = HashMap::new();

        for (index, name) in portals.iter().enumerate() {
            let span = info_span!(
                "portal",
                upload_id,
                index,
                portal = %name,
                canonical = tracing::field::Empty
            );
            let outcome = self
                .process_portal(upload_id, name, auxiliary, &mut group_runs)
                .instrument(span)
                .await;

            if let OutcomeState::Failed(reason) = &outcome.state {
                log::error!("Portal '{}' failed: {}", name, reason);
                self.record_failure(upload_id, name, reason);
            }
            report.record(index, outcome);
        }

        report.finalize();
        report
    }

    async fn process_portal(
        &self,
        upload_id: i64,
        name: &str,
        auxiliary: &AuxiliaryData,
        group_runs: &mut HashMap<String, GroupResult>,
    ) -> PortalOutcome {
        let canonical = match self.resolver.classify(Some(name)) {
            Resolution::Canonical(id) => {
                tracing::Span::current().record("canonical", id.as_str());
                id
            }
            Resolution::Unimplemented(id) => {
                log::warn!("Portal '{}' is {}, which has no mapper implemented", name, id);
                return PortalOutcome::failed(name, None, FailureReason::NotImplemented);
            }
            Resolution::Unknown => {
                log::warn!("Portal '{}' not recognized", name);
                return PortalOutcome::failed(name, None, FailureReason::NotRecognized);
            }
        };

        let Some(mapping) = self.registry.get(&canonical).cloned() else {
            log::warn!("No mapper registered for portal '{}' ({})", name, canonical);
            return PortalOutcome::failed(name, Some(&canonical), FailureReason::NoMapper);
        };

        let invocation = if mapping.is_shared() {
            match group_runs.get(&mapping.group) {
                Some(previous) => {
                    log::info!(
                        "Mapper '{}' already ran for group {}; reusing its result for '{}'",
                        mapping.mapper.name(),
                        mapping.group,
                        name
                    );
                    previous.clone()
                }
                None => {
                    let result = self.invoke(&mapping, auxiliary).await;
                    group_runs.insert(mapping.group.clone(), result.clone());
                    result
                }
            }
        } else {
            self.invoke(&mapping, auxiliary).await
        };

        if let Err(reason) = invocation {
            return PortalOutcome::failed(name, Some(&canonical), reason);
        }

        match mapping.kind {
            PortalKind::EmailOnly => {
                self.attach_shared_output(upload_id, name, &mapping).await;
                PortalOutcome::completed(name, &canonical)
            }
            PortalKind::FileGenerating => {
                match self.collect_artifact(upload_id, name, &mapping).await {
                    Ok(()) => PortalOutcome::completed(name, &canonical),
                    Err(reason) => PortalOutcome::failed(name, Some(&canonical), reason),
                }
            }
        }
    }

    /// Runs one mapper, bounded by the configured timeout. Panics are
    /// turned into failures.
    async fn invoke(&self, mapping: &PortalMapping, auxiliary: &AuxiliaryData) -> GroupResult {
        let mapper = &mapping.mapper;
        let ctx = MapperContext {
            processing_id: DEFAULT_PROCESSING_ID,
            auxiliary: mapper.accepts_auxiliary_data().then_some(auxiliary),
            staging_dir: &self.settings.staging_dir,
            output_dir: &mapping.output_dir,
            output_file: &mapping.output_file,
        };

        log::info!("Running mapper '{}' for {}", mapper.name(), mapping.canonical);
        let started = std::time::Instant::now();

        let guarded = AssertUnwindSafe(mapper.run(&ctx)).catch_unwind();
        let result = match tokio::time::timeout(self.settings.mapper_timeout, guarded).await {
            Err(_) => Err(FailureReason::MapperTimeout(self.settings.mapper_timeout)),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                log::error!("Mapper '{}' panicked: {}", mapper.name(), message);
                Err(FailureReason::MapperError(format!("panicked: {}", message)))
            }
            Ok(Ok(Err(e))) => {
                log::error!(
                    "Mapper '{}' failed: {}",
                    mapper.name(),
                    error_chain(&e)
                );
                Err(FailureReason::MapperError(e.to_string()))
            }
            Ok(Ok(Ok(()))) => Ok(()),
        };

        log::debug!(
            "Mapper '{}' finished in {:.1}s",
            mapper.name(),
            started.elapsed().as_secs_f64()
        );
        result
    }

    /// Verifies, reads and stores the output file of a file-generating portal.
    async fn collect_artifact(
        &self,
        upload_id: i64,
        name: &str,
        mapping: &PortalMapping,
    ) -> Result<(), FailureReason> {
        let path = mapping.output_path();

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            log::error!(
                "Expected output for '{}' not found at {}; directory holds {:?}",
                name,
                path.display(),
                list_directory(&mapping.output_dir)
            );
            return Err(FailureReason::OutputNotGenerated);
        }

        if mapping.external_generation {
            match await_stable(&path, &self.settings.stability).await {
                Ok(()) => {}
                Err(WorkspaceError::OutputMissing(_)) => {
                    return Err(FailureReason::OutputNotGenerated);
                }
                Err(e) => log::warn!("{}; reading it anyway", e),
            }
        }

        let bytes = read_artifact(&path, &self.settings.stability)
            .await
            .map_err(|e| match e {
                WorkspaceError::OutputEmpty(_) => FailureReason::OutputEmpty,
                WorkspaceError::OutputMissing(_) => FailureReason::OutputNotGenerated,
                other => {
                    log::error!("{}", error_chain(&other));
                    FailureReason::OutputLocked
                }
            })?;

        self.store
            .insert_artifact(upload_id, name, &bytes)
            .map_err(|e| {
                log::error!("Storing output for '{}' failed: {}", name, error_chain(&e));
                FailureReason::InsertFailed(e.to_string())
            })?;

        log::info!("Stored {} ({} bytes) for '{}'", mapping.output_file, bytes.len(), name);
        Ok(())
    }

    /// Email portals complete without a file of their own; when the shared
    /// template was written, it is attached to the portal anyway.
    async fn attach_shared_output(&self, upload_id: i64, name: &str, mapping: &PortalMapping) {
        let path = mapping.output_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => {
                log::debug!("No shared output to attach for '{}'", name);
                return;
            }
        };

        if let Err(e) = self.store.insert_artifact(upload_id, name, &bytes) {
            log::warn!("Could not attach shared output for '{}': {}", name, e);
        }
    }

    fn record_failure(&self, upload_id: i64, name: &str, reason: &FailureReason) {
        if let Err(e) = self
            .store
            .insert_failed_artifact(upload_id, name, &reason.to_string())
        {
            log::warn!("Could not record failure of '{}': {}", name, e);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Formats an error with its sources, skipping causes whose text the
/// message already carries.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
