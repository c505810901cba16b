//! Waiting for generated files to settle, and reading them back.
//!
//! Files written by an external spreadsheet application may still be
//! growing or locked when the mapper returns. [`await_stable`] polls size
//! and mtime until they stop changing; [`read_artifact`] retries reads
//! that fail transiently.

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::config::StabilityConfig;
use crate::error::WorkspaceError;

#[derive(Debug, Clone)]
pub struct StabilitySettings {
    pub poll_interval: Duration,
    pub quiet_polls: u32,
    pub max_polls: u32,
    pub read_attempts: u32,
    pub read_retry_delay: Duration,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self::from(&StabilityConfig::default())
    }
}

impl From<&StabilityConfig> for StabilitySettings {
    fn from(config: &StabilityConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            quiet_polls: config.quiet_polls.max(1),
            max_polls: config.max_polls.max(1),
            read_attempts: config.read_attempts.max(1),
            read_retry_delay: Duration::from_millis(config.read_retry_delay_ms),
        }
    }
}

type Observation = (u64, Option<SystemTime>);

async fn observe(path: &Path) -> Option<Observation> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .map(|m| (m.len(), m.modified().ok()))
}

/// Polls `path` until its size and mtime are unchanged for `quiet_polls`
/// consecutive observations. Gives up after `max_polls` observations.
pub async fn await_stable(
    path: &Path,
    settings: &StabilitySettings,
) -> Result<(), WorkspaceError> {
    let mut previous: Option<Observation> = None;
    let mut quiet = 0u32;

    for poll in 1..=settings.max_polls {
        let current = observe(path).await;

        match (&previous, &current) {
            (Some(prev), Some(cur)) if prev == cur => quiet += 1,
            _ => quiet = 0,
        }

        if current.is_some() && quiet >= settings.quiet_polls {
            log::debug!("{} stable after {} polls", path.display(), poll);
            return Ok(());
        }

        previous = current;
        tokio::time::sleep(settings.poll_interval).await;
    }

    if previous.is_none() {
        return Err(WorkspaceError::OutputMissing(path.to_path_buf()));
    }

    Err(WorkspaceError::Unstable {
        path: path.to_path_buf(),
        polls: settings.max_polls,
    })
}

/// Reads a generated file, retrying up to `read_attempts` times.
///
/// An empty file fails immediately; a file that stays unreadable is
/// reported as locked.
pub async fn read_artifact(
    path: &Path,
    settings: &StabilitySettings,
) -> Result<Vec<u8>, WorkspaceError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| WorkspaceError::OutputMissing(path.to_path_buf()))?;
    if metadata.len() == 0 {
        return Err(WorkspaceError::OutputEmpty(path.to_path_buf()));
    }

    let mut last_error = None;
    for attempt in 1..=settings.read_attempts {
        match tokio::fs::read(path).await {
            Ok(bytes) if bytes.is_empty() => {
                return Err(WorkspaceError::OutputEmpty(path.to_path_buf()));
            }
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                log::warn!(
                    "Read attempt {}/{} for {} failed: {}",
                    attempt,
                    settings.read_attempts,
                    path.display(),
                    e
                );
                last_error = Some(e);
                if attempt < settings.read_attempts {
                    tokio::time::sleep(settings.read_retry_delay).await;
                }
            }
        }
    }

    log::error!(
        "Giving up on {} (size {} bytes, modified {:?})",
        path.display(),
        metadata.len(),
        metadata.modified().ok()
    );

    Err(WorkspaceError::OutputLocked {
        path: path.to_path_buf(),
        source: last_error
            .unwrap_or_else(|| std::io::Error::other("no read attempt was made")),
    })
}
