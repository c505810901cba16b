use std::collections::HashSet;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use walkdir::WalkDir;

use crate::error::WorkspaceError;

/// Name under which most mappers find the input workbook.
pub const INPUT_FILE_NAME: &str = "Census_Input.xlsx";
/// Copy for mappers that look for a `Medical_` prefix.
pub const MEDICAL_INPUT_FILE_NAME: &str = "Medical_Census_Input.xlsx";
/// Copy for the email-group mapper, which expects the template's own name.
pub const EMAIL_INPUT_FILE_NAME: &str = "CensusData-TEMPLATE_Common with Nationality.xlsx";

/// Result of one clearing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearSummary {
    pub removed: usize,
    pub failed: usize,
}

/// Paths of the staged input copies.
#[derive(Debug, Clone)]
pub struct StagedInput {
    pub primary: PathBuf,
    pub medical_copy: PathBuf,
    pub email_copy: PathBuf,
    pub size: usize,
}

/// Owns the shared staging directory and every portal output directory.
#[derive(Debug, Clone)]
pub struct WorkspacePreparer {
    staging_dir: PathBuf,
    tracked_dirs: Vec<PathBuf>,
}

impl WorkspacePreparer {
    /// `output_dirs` are cleared along with the staging directory; duplicates are ignored.
    pub fn new<P, I, Q>(staging_dir: P, output_dirs: I) -> Self
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = Q>,
        Q: AsRef<Path>,
    {
        let staging_dir = staging_dir.as_ref().to_path_buf();
        let mut seen = HashSet::new();
        let tracked_dirs = std::iter::once(staging_dir.clone())
            .chain(output_dirs.into_iter().map(|d| d.as_ref().to_path_buf()))
            .filter(|d| seen.insert(d.clone()))
            .collect();

        Self {
            staging_dir,
            tracked_dirs,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn tracked_dirs(&self) -> &[PathBuf] {
        &self.tracked_dirs
    }

    pub fn ensure_directories(&self) -> Result<(), WorkspaceError> {
        for dir in &self.tracked_dirs {
            std::fs::create_dir_all(dir).map_err(|e| WorkspaceError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Removes every file below the tracked directories, keeping the
    /// directories themselves. Missing directories are skipped and removal
    /// failures are logged, so this never fails.
    pub fn clear(&self) -> ClearSummary {
        let mut summary = ClearSummary::default();

        for dir in &self.tracked_dirs {
            if !dir.is_dir() {
                log::debug!("Skipping clear of missing directory {}", dir.display());
                continue;
            }

            for entry in WalkDir::new(dir)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| !e.file_type().is_dir())
            {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => summary.removed += 1,
                    Err(e) => {
                        summary.failed += 1;
                        log::warn!("Failed to remove {}: {}", entry.path().display(), e);
                    }
                }
            }
        }

        if summary.removed > 0 || summary.failed > 0 {
            log::info!(
                "Cleared workspace: {} files removed, {} failed",
                summary.removed,
                summary.failed
            );
        }
        summary
    }

    /// Decodes the uploaded workbook and writes it under all three input names.
    pub fn stage_input(&self, census_file_b64: &str) -> Result<StagedInput, WorkspaceError> {
        let bytes = decode_census_file(census_file_b64)?;

        std::fs::create_dir_all(&self.staging_dir).map_err(|e| {
            WorkspaceError::CreateDirectory {
                path: self.staging_dir.clone(),
                source: e,
            }
        })?;

        let primary = self.staging_dir.join(INPUT_FILE_NAME);
        std::fs::write(&primary, &bytes).map_err(|e| WorkspaceError::WriteFile {
            path: primary.clone(),
            source: e,
        })?;

        let medical_copy = self.staging_dir.join(MEDICAL_INPUT_FILE_NAME);
        let email_copy = self.staging_dir.join(EMAIL_INPUT_FILE_NAME);
        for copy in [&medical_copy, &email_copy] {
            std::fs::copy(&primary, copy).map_err(|e| WorkspaceError::CopyFile {
                from: primary.clone(),
                to: copy.clone(),
                source: e,
            })?;
        }

        log::info!(
            "Staged census input ({} bytes) in {}",
            bytes.len(),
            self.staging_dir.display()
        );

        Ok(StagedInput {
            primary,
            medical_copy,
            email_copy,
            size: bytes.len(),
        })
    }
}

/// Decodes a base64 payload, tolerating embedded whitespace and a `data:` URI prefix.
pub fn decode_census_file(encoded: &str) -> Result<Vec<u8>, WorkspaceError> {
    let payload = match encoded.find(";base64,") {
        Some(pos) if encoded.trim_start().starts_with("data:") => &encoded[pos + 8..],
        _ => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    let bytes = base64::engine::general_purpose::STANDARD.decode(compact.as_bytes())?;
    if bytes.is_empty() {
        return Err(WorkspaceError::EmptyInput);
    }
    Ok(bytes)
}

/// File names directly inside `dir`, sorted. Used for diagnostics.
pub fn list_directory(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
