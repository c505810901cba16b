//! Upload repository: queries on the `census_uploads` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw upload row from the database.
#[derive(Debug, Clone)]
pub struct UploadRow {
    pub id: i64,
    /// Base64-encoded census workbook.
    pub census_file: String,
    /// JSON array of requested portal names, as stored.
    pub portals: String,
    /// JSON object with auxiliary fields, as stored.
    pub other_data: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl UploadRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            census_file: row.get("census_file")?,
            portals: row.get("portals")?,
            other_data: row.get("other_data")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields supplied when a new upload is enqueued.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub census_file: String,
    pub portals: String,
    pub other_data: Option<String>,
    pub status: String,
    pub created_at: String,
}

/// Inserts a new upload row and returns its id.
pub fn insert(db: &Database, upload: &NewUpload) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO census_uploads (census_file, portals, other_data, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                upload.census_file,
                upload.portals,
                upload.other_data,
                upload.status,
                upload.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds an upload by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<UploadRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM census_uploads WHERE id = ?1",
                params![id],
                UploadRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Returns the oldest upload with the given status, if any.
pub fn find_oldest_by_status(
    db: &Database,
    status: &str,
) -> Result<Option<UploadRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM census_uploads WHERE status = ?1
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                params![status],
                UploadRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Counts uploads with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM census_uploads WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Updates only the status and updated_at of an upload.
/// Returns `false` when no row has the given id.
pub fn update_status(
    db: &Database,
    id: i64,
    status: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE census_uploads SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, updated_at],
        )?;
        Ok(changed > 0)
    })
}
