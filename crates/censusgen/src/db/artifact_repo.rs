//! Artifact repository: queries on the `census_portal_excels` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A generated (or failed) portal spreadsheet row.
#[derive(Debug, Clone)]
pub struct ArtifactRow {
    pub id: String,
    pub upload_id: i64,
    /// Portal name as it was requested.
    pub portal: String,
    /// Base64-encoded workbook; empty for failed portals.
    pub census: String,
    pub status: String,
    pub log: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ArtifactRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            upload_id: row.get("upload_id")?,
            portal: row.get("portal")?,
            census: row.get("census")?,
            status: row.get("status")?,
            log: row.get("log")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new artifact row.
pub fn insert(db: &Database, artifact: &ArtifactRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO census_portal_excels (id, upload_id, portal, census, status, log,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                artifact.id,
                artifact.upload_id,
                artifact.portal,
                artifact.census,
                artifact.status,
                artifact.log,
                artifact.created_at,
                artifact.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Updates status and log of every artifact row for `(upload_id, portal)`.
/// Returns the number of rows touched.
pub fn update_status_and_log(
    db: &Database,
    upload_id: i64,
    portal: &str,
    status: &str,
    log: &str,
    updated_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE census_portal_excels SET status = ?3, log = ?4, updated_at = ?5
             WHERE upload_id = ?1 AND portal = ?2",
            params![upload_id, portal, status, log, updated_at],
        )?;
        Ok(changed)
    })
}

/// Lists all artifacts of an upload in insertion order.
pub fn list_by_upload(db: &Database, upload_id: i64) -> Result<Vec<ArtifactRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM census_portal_excels WHERE upload_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![upload_id], ArtifactRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
