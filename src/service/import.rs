//! Caller-facing import entry point.
//!
//! Parses uploaded CSV text and drives the chunked coordinator against the
//! SQLite row importer. Returns the aggregated summary; per-chunk progress
//! is surfaced through the callback.

use crate::error::AppError;
use crate::importer::{
    parse_dataset, run_import, ImportProgress, ImportSummary, SqliteVoterImporter,
    REQUIRED_VOTER_COLUMNS,
};
use crate::state::AppState;

/// Imports a voter-roll CSV into a version.
///
/// # Errors
///
/// - `AppError::CsvInvalid` - unparsable text or a required column missing
/// - `AppError::NotFound` - the target version does not exist
pub async fn import_voter_roll<F>(
    state: &AppState,
    version_id: i64,
    csv_text: &str,
    on_progress: F,
) -> Result<ImportSummary, AppError>
where
    F: FnMut(ImportProgress),
{
    let dataset = parse_dataset(csv_text)?;
    let importer = SqliteVoterImporter::new(state.db.clone());

    run_import(
        &importer,
        version_id,
        &dataset,
        REQUIRED_VOTER_COLUMNS,
        &state.config.import,
        on_progress,
    )
    .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
