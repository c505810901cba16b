//! The polling loop that drives uploads through the pipeline.
//!
//! One request is processed start to finish before the next one is fetched:
//!
//! ```text
//! loop {
//!     1. Clear the staging and output directories
//!     2. Fetch the oldest pending upload (none => sleep idle interval)
//!     3. Mark it Processing, stage the input, parse the portal list
//!     4. Run every requested portal's mapper
//!     5. Write the terminal status once, then sleep the cooldown interval
//! }
//! ```
//!
//! Anything escaping a request (store failures, panics) is caught here. The
//! upload is marked `Failed` if possible and the loop backs off before
//! polling again.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{info_span, Instrument};

use crate::config::{Config, PollingConfig};
use crate::error::CensusError;
use crate::pipeline::{InvokerSettings, MappingInvoker, RequestReport};
use crate::portal::{PortalRegistry, PortalResolver};
use crate::request::{AuxiliaryData, UploadRequest, UploadStatus};
use crate::store::UploadStore;
use crate::workspace::{StabilitySettings, WorkspacePreparer};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Pause when no upload is pending.
    pub idle: Duration,
    /// Pause after a finished upload.
    pub cooldown: Duration,
    /// Pause after a crashed iteration.
    pub error_backoff: Duration,
}

impl From<&PollingConfig> for WorkerSettings {
    fn from(config: &PollingConfig) -> Self {
        Self {
            idle: Duration::from_secs(config.idle_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
            error_backoff: Duration::from_secs(config.error_backoff_secs),
        }
    }
}

/// What one loop iteration did.
#[derive(Debug)]
pub enum PollOutcome {
    Idle,
    Finished {
        upload_id: i64,
        status: UploadStatus,
        report: RequestReport,
    },
    Crashed {
        upload_id: Option<i64>,
        error: String,
    },
}

pub struct CensusWorker {
    preparer: WorkspacePreparer,
    invoker: MappingInvoker,
    store: Arc<dyn UploadStore>,
    settings: WorkerSettings,
}

impl CensusWorker {
    pub fn new(
        preparer: WorkspacePreparer,
        invoker: MappingInvoker,
        store: Arc<dyn UploadStore>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            preparer,
            invoker,
            store,
            settings,
        }
    }

    /// Builds the registry, resolver and workspace described by `config`
    /// and creates every directory the worker writes to.
    pub fn from_config(config: &Config, store: Arc<dyn UploadStore>) -> Result<Self, CensusError> {
        let registry = PortalRegistry::from_config(config)?;
        let resolver = PortalResolver::from_config(config, &registry);

        let preparer = WorkspacePreparer::new(
            &config.paths.staging_dir,
            registry
                .output_dirs()
                .into_iter()
                .chain(config.paths.extra_clear_dirs.iter().cloned()),
        );
        preparer.ensure_directories()?;

        log::info!(
            "Registered {} portals; clearing {} directories before each upload",
            registry.len(),
            preparer.tracked_dirs().len()
        );

        let invoker = MappingInvoker::new(
            Arc::new(registry),
            Arc::new(resolver),
            Arc::clone(&store),
            InvokerSettings {
                mapper_timeout: config.mapper.timeout(),
                stability: StabilitySettings::from(&config.stability),
                staging_dir: config.paths.staging_dir.clone(),
            },
        );

        Ok(Self::new(
            preparer,
            invoker,
            store,
            WorkerSettings::from(&config.polling),
        ))
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Runs until `shutdown` is set. Never returns early on request failures.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        log::info!("Census worker started");

        while !shutdown.load(Ordering::Relaxed) {
            let pause = match self.process_next().await {
                PollOutcome::Idle => {
                    log::debug!("No pending uploads");
                    self.settings.idle
                }
                PollOutcome::Finished { .. } => self.settings.cooldown,
                PollOutcome::Crashed { .. } => self.settings.error_backoff,
            };
            sleep_unless_shutdown(pause, &shutdown).await;
        }

        log::info!("Census worker stopped");
    }

    /// Performs one iteration of the loop.
    pub async fn process_next(&self) -> PollOutcome {
        self.preparer.clear();
        tokio::task::yield_now().await;

        let request = match self.store.fetch_next_pending() {
            Ok(Some(request)) => request,
            Ok(None) => return PollOutcome::Idle,
            Err(e) => {
                log::error!("Fetching the next pending upload failed: {}", e);
                return PollOutcome::Crashed {
                    upload_id: None,
                    error: e.to_string(),
                };
            }
        };

        let upload_id = request.id;
        let span = info_span!("request", upload_id);
        let guarded = AssertUnwindSafe(self.process_request(request).instrument(span));

        let error = match guarded.catch_unwind().await {
            Ok(Ok(report)) => {
                return PollOutcome::Finished {
                    upload_id,
                    status: report.final_status(),
                    report,
                };
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic while processing upload".to_string()),
        };

        log::error!("Upload {} crashed: {}", upload_id, error);
        if let Err(e) = self.store.update_status(upload_id, UploadStatus::Failed) {
            log::error!("Could not mark upload {} as failed: {}", upload_id, e);
        }

        PollOutcome::Crashed {
            upload_id: Some(upload_id),
            error,
        }
    }

    async fn process_request(&self, request: UploadRequest) -> Result<RequestReport, CensusError> {
        let upload_id = request.id;
        log::info!("Processing upload {}", upload_id);

        if !self.store.update_status(upload_id, UploadStatus::Processing)? {
            log::warn!("Upload {} vanished before it could be marked processing", upload_id);
        }

        if let Err(e) = self.preparer.stage_input(&request.census_file) {
            log::error!("Upload {} has an unusable census file: {}", upload_id, e);
            let requested = request.portal_names().unwrap_or_default();
            return self.finish(upload_id, RequestReport::aborted(&requested, e.to_string()));
        }

        let portals = match request.portal_names() {
            Ok(portals) => portals,
            Err(e) => {
                log::error!("Upload {} has an unusable portal list: {}", upload_id, e);
                return self.finish(upload_id, RequestReport::aborted(&[], e.to_string()));
            }
        };

        let (auxiliary, auxiliary_error) = match request.auxiliary_data() {
            Ok(auxiliary) => (auxiliary, None),
            Err(e) => {
                log::warn!("Ignoring auxiliary data of upload {}: {}", upload_id, e);
                (AuxiliaryData::default(), Some(e.to_string()))
            }
        };
        if let Some(date) = auxiliary.effective_date() {
            log::info!("Effective date: {}", date);
        }

        log::info!("Requested portals: {:?}", portals);
        let mut report = self.invoker.run(upload_id, &portals, &auxiliary).await;
        if let Some(error) = auxiliary_error {
            report.record_error(error);
        }
        self.finish(upload_id, report)
    }

    fn finish(&self, upload_id: i64, report: RequestReport) -> Result<RequestReport, CensusError> {
        let status = report.final_status();
        log::info!("Upload {} is {} ({})", upload_id, status, report.summary());
        for outcome in report.failed() {
            log::info!(
                "  {} failed: {}",
                outcome.portal_name,
                outcome.reason().unwrap_or_default()
            );
        }

        self.store.update_status(upload_id, status)?;
        Ok(report)
    }
}

async fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && !shutdown.load(Ordering::Relaxed) {
        let slice = remaining.min(SLEEP_SLICE);
        tokio::time::sleep(slice).await;
        remaining -= slice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseError};
    use crate::error::{MapperError, StoreError};
    use crate::mapper::{CensusMapper, FnMapper, OwnedContext};
    use crate::portal::AliasTable;
    use crate::store::SqliteUploadStore;
    use base64::Engine as _;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn worker(tmp: &TempDir, store: Arc<dyn UploadStore>) -> CensusWorker {
        let writer: Arc<dyn CensusMapper> =
            Arc::new(FnMapper::new("adnic", |ctx: OwnedContext| async move {
                std::fs::write(ctx.output_path(), b"generated")
                    .map_err(|e| MapperError::Failed(e.to_string()))
            }));
        let out = tmp.path().join("adnic");
        let registry = PortalRegistry::builder()
            .file_portal("ADNIC", writer, &out, "MemberUpload.xlsx", false)
            .build()
            .unwrap();
        let resolver = PortalResolver::new(AliasTable::builtin(), registry.known_ids(), ["DNI"]);
        let staging = tmp.path().join("attachments");
        let preparer = WorkspacePreparer::new(&staging, [&out]);
        preparer.ensure_directories().unwrap();

        let invoker = MappingInvoker::new(
            Arc::new(registry),
            Arc::new(resolver),
            Arc::clone(&store),
            InvokerSettings {
                mapper_timeout: Duration::from_secs(5),
                stability: StabilitySettings::default(),
                staging_dir: staging,
            },
        );
        CensusWorker::new(
            preparer,
            invoker,
            store,
            WorkerSettings {
                idle: Duration::from_millis(10),
                cooldown: Duration::from_millis(10),
                error_backoff: Duration::from_millis(10),
            },
        )
    }

    /// Store that fails `fetch_next_pending` or the first `Processing` write on demand.
    struct FlakyStore {
        inner: SqliteUploadStore,
        fail_fetch: AtomicBool,
        fail_processing: AtomicBool,
        writes: Mutex<Vec<UploadStatus>>,
    }

    impl FlakyStore {
        fn new(inner: SqliteUploadStore) -> Self {
            Self {
                inner,
                fail_fetch: AtomicBool::new(false),
                fail_processing: AtomicBool::new(false),
                writes: Mutex::new(Vec::new()),
            }
        }

        fn writes(&self) -> Vec<UploadStatus> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl UploadStore for FlakyStore {
        fn fetch_next_pending(&self) -> Result<Option<UploadRequest>, StoreError> {
            if self.fail_fetch.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Database(DatabaseError::Poisoned));
            }
            self.inner.fetch_next_pending()
        }

        fn update_status(&self, id: i64, status: UploadStatus) -> Result<bool, StoreError> {
            self.writes.lock().unwrap().push(status);
            if status == UploadStatus::Processing
                && self.fail_processing.swap(false, Ordering::SeqCst)
            {
                return Err(StoreError::Database(DatabaseError::Poisoned));
            }
            self.inner.update_status(id, status)
        }

        fn insert_artifact(
            &self,
            upload_id: i64,
            portal: &str,
            content: &[u8],
        ) -> Result<(), StoreError> {
            self.inner.insert_artifact(upload_id, portal, content)
        }

        fn insert_failed_artifact(
            &self,
            upload_id: i64,
            portal: &str,
            reason: &str,
        ) -> Result<(), StoreError> {
            self.inner.insert_failed_artifact(upload_id, portal, reason)
        }

        fn update_artifact_status(
            &self,
            upload_id: i64,
            portal: &str,
            status: UploadStatus,
            log: &str,
        ) -> Result<bool, StoreError> {
            self.inner
                .update_artifact_status(upload_id, portal, status, log)
        }
    }

    fn census() -> String {
        base64::engine::general_purpose::STANDARD.encode(b"PK\x03\x04census")
    }

    fn store() -> Arc<SqliteUploadStore> {
        Arc::new(SqliteUploadStore::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_settings_from_polling_config() {
        let settings = WorkerSettings::from(&PollingConfig::default());
        assert_eq!(settings.idle, Duration::from_secs(10));
        assert_eq!(settings.cooldown, Duration::from_secs(5));
        assert_eq!(settings.error_backoff, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_idle_when_nothing_pending() {
        let tmp = TempDir::new().unwrap();
        let worker = worker(&tmp, store());
        assert!(matches!(worker.process_next().await, PollOutcome::Idle));
    }

    #[tokio::test]
    async fn test_processes_oldest_upload() {
        let tmp = TempDir::new().unwrap();
        let store = store();
        let id = store
            .enqueue_upload(&census(), r#"["ADNIC","Dubai National Insurance"]"#, None)
            .unwrap();
        let worker = worker(&tmp, Arc::clone(&store) as Arc<dyn UploadStore>);

        match worker.process_next().await {
            PollOutcome::Finished {
                upload_id,
                status,
                report,
            } => {
                assert_eq!(upload_id, id);
                assert_eq!(status, UploadStatus::Partial);
                assert_eq!(
                    report.failed()[0].reason().as_deref(),
                    Some("not recognized: mapper not implemented")
                );
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let stored = store.find_upload(id).unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Partial);
        assert!(matches!(worker.process_next().await, PollOutcome::Idle));
    }

    #[tokio::test]
    async fn test_bad_portal_list_fails_request() {
        let tmp = TempDir::new().unwrap();
        let store = store();
        let id = store.enqueue_upload(&census(), "ADNIC,DAMAN", None).unwrap();
        let worker = worker(&tmp, Arc::clone(&store) as Arc<dyn UploadStore>);

        let outcome = worker.process_next().await;
        assert!(matches!(
            outcome,
            PollOutcome::Finished {
                status: UploadStatus::Failed,
                ..
            }
        ));
        assert_eq!(
            store.find_upload(id).unwrap().unwrap().status,
            UploadStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_store_failure_mid_request_marks_failed_and_recovers() {
        let tmp = TempDir::new().unwrap();
        let flaky = Arc::new(FlakyStore::new(SqliteUploadStore::new(
            Database::open_in_memory().unwrap(),
        )));
        flaky.fail_processing.store(true, Ordering::SeqCst);
        let id = flaky
            .inner
            .enqueue_upload(&census(), r#"["ADNIC"]"#, None)
            .unwrap();
        let worker = worker(&tmp, Arc::clone(&flaky) as Arc<dyn UploadStore>);

        match worker.process_next().await {
            PollOutcome::Crashed { upload_id, error } => {
                assert_eq!(upload_id, Some(id));
                assert!(!error.is_empty());
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(
            flaky.writes(),
            vec![UploadStatus::Processing, UploadStatus::Failed]
        );
        assert_eq!(
            flaky.inner.find_upload(id).unwrap().unwrap().status,
            UploadStatus::Failed
        );
        assert!(flaky.inner.artifacts_for(id).unwrap().is_empty());
        assert!(matches!(worker.process_next().await, PollOutcome::Idle));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_contained() {
        let tmp = TempDir::new().unwrap();
        let flaky = Arc::new(FlakyStore::new(SqliteUploadStore::new(
            Database::open_in_memory().unwrap(),
        )));
        flaky.fail_fetch.store(true, Ordering::SeqCst);
        let id = flaky
            .inner
            .enqueue_upload(&census(), r#"["ADNIC"]"#, None)
            .unwrap();
        let worker = worker(&tmp, Arc::clone(&flaky) as Arc<dyn UploadStore>);

        assert!(matches!(
            worker.process_next().await,
            PollOutcome::Crashed {
                upload_id: None,
                ..
            }
        ));
        assert!(flaky.writes().is_empty());

        match worker.process_next().await {
            PollOutcome::Finished {
                upload_id, status, ..
            } => {
                assert_eq!(upload_id, id);
                assert_eq!(status, UploadStatus::Completed);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let store = store();
        let id = store.enqueue_upload(&census(), r#"["ADNIC"]"#, None).unwrap();
        let worker = Arc::new(worker(&tmp, Arc::clone(&store) as Arc<dyn UploadStore>));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let worker = Arc::clone(&worker);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { worker.run(shutdown).await })
        };

        for _ in 0..100 {
            if store.find_upload(id).unwrap().unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            store.find_upload(id).unwrap().unwrap().status,
            UploadStatus::Completed
        );
    }
}
