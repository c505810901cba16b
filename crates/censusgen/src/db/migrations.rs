//! Ordered schema steps, recorded in `schema_history`.
//!
//! Each step runs in its own transaction together with its history row.
//! Column additions are skipped when the column is already there, so a
//! database whose tables were created by the intake side can be adopted.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

enum Step {
    Sql(&'static str),
    AddColumn {
        table: &'static str,
        column: &'static str,
        sql: &'static str,
    },
}

const STEPS: &[(u32, &str, Step)] = &[
    (
        1,
        "census_uploads",
        Step::Sql(include_str!("sql/001_create_census_uploads.sql")),
    ),
    (
        2,
        "census_portal_excels",
        Step::Sql(include_str!("sql/002_create_census_portal_excels.sql")),
    ),
    (
        3,
        "census_portal_excels.log",
        Step::AddColumn {
            table: "census_portal_excels",
            column: "log",
            sql: include_str!("sql/003_add_log_to_portal_excels.sql"),
        },
    ),
];

/// Applies every step newer than the recorded schema version.
pub fn apply(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_history (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );",
    )?;

    let applied = schema_version(conn)?;

    for (version, name, step) in STEPS.iter().filter(|(v, _, _)| *v > applied) {
        let failed = |source| DatabaseError::Migration {
            version: *version,
            name: *name,
            source,
        };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        match step {
            Step::Sql(sql) => tx.execute_batch(sql).map_err(failed)?,
            Step::AddColumn { table, column, sql } => {
                if has_column(&tx, table, column)? {
                    log::debug!("{}.{} already present", table, column);
                } else {
                    tx.execute_batch(sql).map_err(failed)?;
                }
            }
        }
        tx.execute(
            "INSERT INTO schema_history (version, name) VALUES (?1, ?2)",
            params![version, name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        log::info!("Applied schema step {} ({})", version, name);
    }

    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_history",
        [],
        |row| row.get(0),
    )?)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let mut stmt = conn.prepare("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")?;
    Ok(stmt.exists(params![table, column])?)
}
