//! Test harness for isolated request-loop runs.
//!
//! The `TestHarness` owns a temporary workspace (staging and per-portal
//! output directories), an in-memory SQLite store and a registry of fake
//! mappers whose invocations are counted.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use tempfile::TempDir;

use censusgen::config::default_unimplemented;
use censusgen::db::artifact_repo::ArtifactRow;
use censusgen::db::Database;
use censusgen::mapper::OwnedContext;
use censusgen::pipeline::{InvokerSettings, MappingInvoker};
use censusgen::portal::{AliasTable, PortalRegistry, PortalRegistryBuilder};
use censusgen::worker::WorkerSettings;
use censusgen::workspace::{StabilitySettings, WorkspacePreparer};
use censusgen::{
    CensusMapper, CensusWorker, FnMapper, MapperError, PortalResolver, SqliteUploadStore,
    UploadStatus, UploadStore,
};

/// What a fake mapper does when invoked.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Writes these bytes to the expected output file.
    Write(Vec<u8>),
    /// Returns an error with this message.
    Fail(String),
    /// Succeeds without writing anything.
    NoOutput,
    /// Panics.
    Panic,
}

/// Base64 of a small stand-in workbook.
pub fn census_b64() -> String {
    base64::engine::general_purpose::STANDARD.encode(b"PK\x03\x04census workbook")
}

/// Isolated environment for running the worker end to end.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory the census input is staged into.
    pub staging_dir: PathBuf,
    /// Parent of every portal output directory.
    pub output_root: PathBuf,
    pub store: Arc<SqliteUploadStore>,
    builder: PortalRegistryBuilder,
    calls: HashMap<String, Arc<AtomicUsize>>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let staging_dir = temp_dir.path().join("attachments");
        let output_root = temp_dir.path().join("generated");
        let db = Database::open_in_memory().expect("Failed to open in-memory database");

        Self {
            temp_dir,
            staging_dir,
            output_root,
            store: Arc::new(SqliteUploadStore::new(db)),
            builder: PortalRegistry::builder(),
            calls: HashMap::new(),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn output_dir(&self, id: &str) -> PathBuf {
        self.output_root.join(id.to_lowercase())
    }

    /// Registers a file-generating portal whose mapper follows `behavior`.
    pub fn file_portal(mut self, id: &str, output_file: &str, behavior: Behavior) -> Self {
        let mapper = self.fake_mapper(id, behavior);
        let dir = self.output_dir(id);
        self.builder = self.builder.file_portal(id, mapper, dir, output_file, false);
        self
    }

    /// Registers the email group with one shared mapper, counted under `"EMAIL"`.
    pub fn email_group(mut self, ids: &[&str], behavior: Behavior) -> Self {
        let mapper = self.fake_mapper("EMAIL", behavior);
        let dir = self.output_dir("email");
        self.builder = self
            .builder
            .email_group(ids, mapper, dir, "Lifecare_Census Template.xlsx");
        self
    }

    /// Number of times the mapper registered under `id` ran.
    pub fn calls(&self, id: &str) -> usize {
        self.calls
            .get(id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Builds a worker over everything registered so far.
    pub fn worker(&mut self) -> CensusWorker {
        let registry = std::mem::take(&mut self.builder)
            .build()
            .expect("Failed to build registry");
        let resolver =
            PortalResolver::new(AliasTable::builtin(), registry.known_ids(), default_unimplemented());
        let preparer = WorkspacePreparer::new(&self.staging_dir, registry.output_dirs());
        preparer
            .ensure_directories()
            .expect("Failed to create workspace directories");

        let store: Arc<dyn UploadStore> = self.store.clone();
        let invoker = MappingInvoker::new(
            Arc::new(registry),
            Arc::new(resolver),
            Arc::clone(&store),
            InvokerSettings {
                mapper_timeout: Duration::from_secs(10),
                stability: StabilitySettings {
                    poll_interval: Duration::from_millis(5),
                    quiet_polls: 1,
                    max_polls: 10,
                    read_attempts: 2,
                    read_retry_delay: Duration::from_millis(5),
                },
                staging_dir: self.staging_dir.clone(),
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

    /// Enqueues an upload with a valid census file.
    pub fn enqueue(&self, portals_json: &str) -> i64 {
        self.enqueue_raw(&census_b64(), portals_json, None)
    }

    pub fn enqueue_raw(&self, census: &str, portals_json: &str, other_data: Option<&str>) -> i64 {
        self.store
            .enqueue_upload(census, portals_json, other_data)
            .expect("Failed to enqueue upload")
    }

    pub fn status(&self, upload_id: i64) -> UploadStatus {
        self.store
            .find_upload(upload_id)
            .expect("Failed to load upload")
            .expect("Upload not found")
            .status
    }

    pub fn artifacts(&self, upload_id: i64) -> Vec<ArtifactRow> {
        self.store
            .artifacts_for(upload_id)
            .expect("Failed to list artifacts")
    }

    fn fake_mapper(&mut self, key: &str, behavior: Behavior) -> Arc<dyn CensusMapper> {
        let calls = Arc::clone(self.calls.entry(key.to_string()).or_default());
        Arc::new(FnMapper::new(key.to_lowercase(), move |ctx: OwnedContext| {
            let calls = Arc::clone(&calls);
            let behavior = behavior.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                match behavior {
                    Behavior::Write(bytes) => std::fs::create_dir_all(&ctx.output_dir)
                        .and_then(|_| std::fs::write(ctx.output_path(), bytes))
                        .map_err(|e| MapperError::Failed(e.to_string())),
                    Behavior::Fail(message) => Err(MapperError::Failed(message)),
                    Behavior::NoOutput => Ok(()),
                    Behavior::Panic => panic!("mapper blew up"),
                }
            }
        }))
    }
}
