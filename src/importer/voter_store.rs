//! SQLite row importer for voter-roll uploads.
//!
//! Each chunk commits in its own transaction. Rows upsert on
//! `(version_id, voter_number)`, so retried or overlapping chunks never
//! duplicate voters. Malformed rows are rejected individually with a
//! row-scoped message; the rest of the chunk still commits.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rusqlite::Connection;
use tracing::info;

use crate::error::AppError;
use crate::importer::coordinator::{ChunkOutcome, RowImporter};
use crate::storage::database::{configure_connection, current_timestamp, Database};

/// Required header columns for a voter-roll upload.
pub const REQUIRED_VOTER_COLUMNS: &[&str] = &["voter_number", "full_name"];

/// `RowImporter` backed by the application database.
#[derive(Clone)]
pub struct SqliteVoterImporter {
    db: Arc<Database>,
}

impl SqliteVoterImporter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Imports one chunk of raw voter rows into a version.
    pub async fn import_rows(
        &self,
        version_id: i64,
        header_map: &HashMap<String, usize>,
        rows: &[Vec<String>],
        start_offset: u64,
        first_chunk: bool,
    ) -> Result<ChunkOutcome, AppError> {
        let db_path = self.db.db_path().clone();
        let header_map = header_map.clone();
        let rows = rows.to_vec();
        let timestamp = current_timestamp();

        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;

            // Whole-dataset precondition: only the first chunk verifies the
            // target version still exists; later chunks skip it.
            if first_chunk {
                let exists: bool = conn
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM voter_versions WHERE id = ?1)",
                        [version_id],
                        |row| row.get(0),
                    )
                    .map_err(|e| AppError::Internal(format!("Failed to check version: {e}")))?;

                if !exists {
                    return Err(AppError::NotFound(format!("voter version {version_id}")));
                }
            }

            let col = |name: &str| header_map.get(name).copied();
            let voter_number_col = col("voter_number");
            let full_name_col = col("full_name");
            let address_col = col("address");
            let locality_col = col("locality");

            let tx = conn
                .transaction()
                .map_err(|e| AppError::Internal(format!("Failed to start transaction: {e}")))?;

            let mut imported: u64 = 0;
            let mut errors: Vec<String> = Vec::new();

            for (i, row) in rows.iter().enumerate() {
                let row_number = start_offset + i as u64 + 1;

                let field = |index: Option<usize>| -> Option<&str> {
                    index
                        .and_then(|idx| row.get(idx))
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                };

                let Some(voter_number) = field(voter_number_col) else {
                    errors.push(format!("row {row_number}: missing voter number"));
                    continue;
                };
                let Some(full_name) = field(full_name_col) else {
                    errors.push(format!("row {row_number}: missing full name"));
                    continue;
                };
                let address = field(address_col);
                let locality = field(locality_col);

                let result = tx.execute(
                    r#"
                    INSERT INTO voters
                        (version_id, voter_number, full_name, address, locality, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                    ON CONFLICT(version_id, voter_number) DO UPDATE SET
                        full_name = excluded.full_name,
                        address = excluded.address,
                        locality = excluded.locality,
                        updated_at = excluded.updated_at
                    "#,
                    rusqlite::params![version_id, voter_number, full_name, address, locality, timestamp],
                );

                match result {
                    Ok(_) => imported += 1,
                    Err(e) => errors.push(format!("row {row_number}: {e}")),
                }
            }

            tx.commit()
                .map_err(|e| AppError::Internal(format!("Failed to commit chunk: {e}")))?;

            info!(
                "[IMPORT] Chunk at offset {} committed: {} imported, {} rejected",
                start_offset,
                imported,
                errors.len()
            );

            Ok::<_, AppError>(ChunkOutcome { imported, errors })
        })
        .await
        .map_err(|e| AppError::Internal(format!("Import chunk task failed: {e}")))?
    }
}

impl RowImporter for SqliteVoterImporter {
    fn import_chunk<'a>(
        &'a self,
        scope_ref: i64,
        header_map: &'a HashMap<String, usize>,
        rows: &'a [Vec<String>],
        start_offset: u64,
        first_chunk: bool,
    ) -> Pin<Box<dyn Future<Output = Result<ChunkOutcome, AppError>> + Send + 'a>> {
        Box::pin(self.import_rows(scope_ref, header_map, rows, start_offset, first_chunk))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
