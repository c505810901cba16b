//! Upload store gateway.
//!
//! The worker talks to persistence only through [`UploadStore`], so tests
//! can swap in fakes and the request loop never touches SQL directly.
//! [`SqliteUploadStore`] is the shipped implementation.

use base64::Engine as _;
use chrono::Utc;
use serde_json::Value;

use crate::db::artifact_repo::{self, ArtifactRow};
use crate::db::upload_repo::{self, NewUpload, UploadRow};
use crate::db::Database;
use crate::error::StoreError;
use crate::request::{UploadRequest, UploadStatus};

/// Operations the request loop needs from the persistence layer.
pub trait UploadStore: Send + Sync {
    /// Returns the oldest upload whose status is `Pending`.
    fn fetch_next_pending(&self) -> Result<Option<UploadRequest>, StoreError>;

    /// Overwrites the status of an upload. Returns `false` if no such row exists.
    fn update_status(&self, id: i64, status: UploadStatus) -> Result<bool, StoreError>;

    /// Encodes and stores one generated portal file.
    fn insert_artifact(&self, upload_id: i64, portal: &str, content: &[u8])
        -> Result<(), StoreError>;

    /// Records a portal that produced no file, with the failure reason as log.
    fn insert_failed_artifact(
        &self,
        upload_id: i64,
        portal: &str,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// Updates status and log of the artifact rows for `(upload_id, portal)`.
    /// Returns `false` if there were none.
    fn update_artifact_status(
        &self,
        upload_id: i64,
        portal: &str,
        status: UploadStatus,
        log: &str,
    ) -> Result<bool, StoreError>;
}

/// SQLite-backed store over the `census_uploads` and `census_portal_excels` tables.
#[derive(Clone)]
pub struct SqliteUploadStore {
    db: Database,
}

impl SqliteUploadStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts a new `Pending` upload and returns its id.
    pub fn enqueue_upload(
        &self,
        census_file_b64: &str,
        portals_json: &str,
        other_data_json: Option<&str>,
    ) -> Result<i64, StoreError> {
        let id = upload_repo::insert(
            &self.db,
            &NewUpload {
                census_file: census_file_b64.to_string(),
                portals: portals_json.to_string(),
                other_data: other_data_json.map(str::to_string),
                status: UploadStatus::Pending.to_string(),
                created_at: now(),
            },
        )?;
        log::debug!("Enqueued upload {}", id);
        Ok(id)
    }

    /// Loads an upload by id, whatever its status.
    pub fn find_upload(&self, id: i64) -> Result<Option<UploadRequest>, StoreError> {
        upload_repo::find_by_id(&self.db, id)?
            .map(to_request)
            .transpose()
    }

    /// Lists the artifact rows of an upload in insertion order.
    pub fn artifacts_for(&self, upload_id: i64) -> Result<Vec<ArtifactRow>, StoreError> {
        Ok(artifact_repo::list_by_upload(&self.db, upload_id)?)
    }

    pub fn count_with_status(&self, status: UploadStatus) -> Result<u64, StoreError> {
        Ok(upload_repo::count_by_status(&self.db, status.as_str())?)
    }

    fn insert_row(
        &self,
        upload_id: i64,
        portal: &str,
        census: String,
        status: UploadStatus,
        log: String,
    ) -> Result<(), StoreError> {
        let timestamp = now();
        artifact_repo::insert(
            &self.db,
            &ArtifactRow {
                id: uuid::Uuid::new_v4().to_string(),
                upload_id,
                portal: portal.to_string(),
                census,
                status: status.to_string(),
                log: Some(log),
                created_at: timestamp.clone(),
                updated_at: timestamp,
            },
        )?;
        Ok(())
    }
}

impl UploadStore for SqliteUploadStore {
    fn fetch_next_pending(&self) -> Result<Option<UploadRequest>, StoreError> {
        upload_repo::find_oldest_by_status(&self.db, UploadStatus::Pending.as_str())?
            .map(to_request)
            .transpose()
    }

    fn update_status(&self, id: i64, status: UploadStatus) -> Result<bool, StoreError> {
        let updated = upload_repo::update_status(&self.db, id, status.as_str(), &now())?;
        if !updated {
            log::warn!("Status update to {} touched no row for upload {}", status, id);
        }
        Ok(updated)
    }

    fn insert_artifact(
        &self,
        upload_id: i64,
        portal: &str,
        content: &[u8],
    ) -> Result<(), StoreError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        self.insert_row(
            upload_id,
            portal,
            encoded,
            UploadStatus::Completed,
            format!("generated {} bytes", content.len()),
        )
    }

    fn insert_failed_artifact(
        &self,
        upload_id: i64,
        portal: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.insert_row(
            upload_id,
            portal,
            String::new(),
            UploadStatus::Failed,
            reason.to_string(),
        )
    }

    fn update_artifact_status(
        &self,
        upload_id: i64,
        portal: &str,
        status: UploadStatus,
        log: &str,
    ) -> Result<bool, StoreError> {
        let changed = artifact_repo::update_status_and_log(
            &self.db,
            upload_id,
            portal,
            status.as_str(),
            log,
            &now(),
        )?;
        Ok(changed > 0)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn to_request(row: UploadRow) -> Result<UploadRequest, StoreError> {
    let status = row
        .status
        .parse::<UploadStatus>()
        .map_err(|e| StoreError::InvalidRow {
            id: row.id,
            reason: e.to_string(),
        })?;

    Ok(UploadRequest {
        id: row.id,
        census_file: row.census_file,
        portals: Value::String(row.portals),
        other_data: row.other_data.map(Value::String).unwrap_or(Value::Null),
        status,
    })
}
