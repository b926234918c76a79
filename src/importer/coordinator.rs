//! Chunked import coordination.
//!
//! Splits a parsed dataset into fixed-size chunks, submits each chunk to a
//! transactional row importer, retries failed chunks with exponential
//! backoff, and aggregates per-row errors and overall progress. One bad
//! chunk never aborts the run; it contributes a single range-scoped error
//! line and the next chunk proceeds.
//!
//! The coordinator is a plain async function over an injected `RowImporter`
//! capability, so it is callable from the CLI, a server endpoint, or a test
//! harness identically.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ImportConfig;
use crate::error::AppError;
use crate::importer::dataset::Dataset;

// ─────────────────────────────────────────────────────────────────────────────
// Contracts
// ─────────────────────────────────────────────────────────────────────────────

/// Result of importing one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkOutcome {
    /// Rows persisted (inserted or upserted) by this chunk.
    pub imported: u64,
    /// Row-scoped error messages for rows the importer rejected.
    pub errors: Vec<String>,
}

/// Trait for the transactional row importer, allowing test fakes.
///
/// Implementations must be safely callable with overlapping row ranges
/// across retries: a retried chunk upserts rather than duplicating.
pub trait RowImporter: Send + Sync {
    /// Imports one chunk of raw rows.
    ///
    /// `start_offset` is the 0-based index of the chunk's first data row,
    /// used for row numbering in error messages. Only the first chunk of a
    /// run carries `first_chunk = true`; later chunks skip the dataset-wide
    /// precondition check for throughput.
    fn import_chunk<'a>(
        &'a self,
        scope_ref: i64,
        header_map: &'a HashMap<String, usize>,
        rows: &'a [Vec<String>],
        start_offset: u64,
        first_chunk: bool,
    ) -> Pin<Box<dyn Future<Output = Result<ChunkOutcome, AppError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Progress snapshot exposed to the caller after every chunk.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ImportProgress {
    pub processed_rows: u64,
    pub total_rows: u64,
}

impl ImportProgress {
    /// Whole-number percentage, 100 for an empty dataset.
    pub fn percent(&self) -> u64 {
        if self.total_rows == 0 {
            100
        } else {
            self.processed_rows * 100 / self.total_rows
        }
    }
}

/// Final result of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    /// Total rows persisted across all chunks.
    pub imported: u64,
    /// First `max_errors` messages across chunk failures and row rejections.
    pub errors: Vec<String>,
    /// Total errors encountered, including those beyond the message cap.
    pub error_count: u64,
    pub total_rows: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Runs a chunked import of `dataset` through `importer`.
///
/// # Errors
///
/// Returns `CsvInvalid` when a required column is missing (before any row
/// is sent) and `NotFound` when the first chunk's precondition check
/// reports the target scope gone. Chunk-level failures after retries are
/// absorbed into the summary's error list instead.
pub async fn run_import<I, F>(
    importer: &I,
    scope_ref: i64,
    dataset: &Dataset,
    required_columns: &[&str],
    config: &ImportConfig,
    mut on_progress: F,
) -> Result<ImportSummary, AppError>
where
    I: RowImporter + ?Sized,
    F: FnMut(ImportProgress),
{
    let missing = dataset.missing_columns(required_columns);
    if !missing.is_empty() {
        return Err(AppError::CsvInvalid(format!(
            "Missing required column(s): {}",
            missing.join(", ")
        )));
    }

    let total_rows = dataset.total_rows();
    let chunk_size = config.chunk_size.max(1);
    let chunk_count = dataset.rows.chunks(chunk_size).count();

    info!(
        "[IMPORT] Starting run for scope {}: {} rows in {} chunks of {}",
        scope_ref, total_rows, chunk_count, chunk_size
    );

    let mut imported: u64 = 0;
    let mut processed_rows: u64 = 0;
    let mut errors: Vec<String> = Vec::new();
    let mut error_count: u64 = 0;

    for (chunk_index, rows) in dataset.rows.chunks(chunk_size).enumerate() {
        let first_chunk = chunk_index == 0;
        let start_offset = (chunk_index * chunk_size) as u64;

        match import_chunk_with_retry(
            importer,
            scope_ref,
            &dataset.header_map,
            rows,
            start_offset,
            first_chunk,
            config,
        )
        .await
        {
            Ok(outcome) => {
                imported += outcome.imported;
                error_count += outcome.errors.len() as u64;
                for message in outcome.errors {
                    push_bounded(&mut errors, message, config.max_errors);
                }
            }
            Err(AppError::NotFound(what)) if first_chunk => {
                // The precondition check found the target scope gone; later
                // chunks would import into nothing, so the whole run aborts.
                return Err(AppError::NotFound(what));
            }
            Err(e) => {
                warn!(
                    "[IMPORT] Chunk {} (rows {}-{}) failed after {} attempts: {}",
                    chunk_index + 1,
                    start_offset + 1,
                    start_offset + rows.len() as u64,
                    config.max_attempts,
                    e
                );
                error_count += 1;
                push_bounded(
                    &mut errors,
                    format!(
                        "rows {}-{}: import failed after {} attempts: {e}",
                        start_offset + 1,
                        start_offset + rows.len() as u64,
                        config.max_attempts
                    ),
                    config.max_errors,
                );
            }
        }

        processed_rows += rows.len() as u64;
        // Progress is recomputed after every chunk and surfaced before the
        // next chunk starts so the caller can render a live percentage.
        on_progress(ImportProgress {
            processed_rows,
            total_rows,
        });

        let more_chunks_remain = processed_rows < total_rows;
        if more_chunks_remain && !config.inter_chunk_delay().is_zero() {
            tokio::time::sleep(config.inter_chunk_delay()).await;
        }
    }

    info!(
        "[IMPORT] Run complete for scope {}: {} imported, {} error(s)",
        scope_ref, imported, error_count
    );

    Ok(ImportSummary {
        imported,
        errors,
        error_count,
        total_rows,
    })
}

/// Submits one chunk, retrying with exponential backoff.
async fn import_chunk_with_retry<I>(
    importer: &I,
    scope_ref: i64,
    header_map: &HashMap<String, usize>,
    rows: &[Vec<String>],
    start_offset: u64,
    first_chunk: bool,
    config: &ImportConfig,
) -> Result<ChunkOutcome, AppError>
where
    I: RowImporter + ?Sized,
{
    let mut attempt = 1;
    loop {
        match importer
            .import_chunk(scope_ref, header_map, rows, start_offset, first_chunk)
            .await
        {
            Ok(outcome) => return Ok(outcome),
            // A missing scope will not reappear on retry.
            Err(e @ AppError::NotFound(_)) => return Err(e),
            Err(e) if attempt < config.max_attempts => {
                let delay = config.backoff_for_attempt(attempt);
                warn!(
                    "[IMPORT] Chunk at offset {} attempt {}/{} failed ({}), retrying in {:?}",
                    start_offset, attempt, config.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Appends a message unless the cap is already reached.
fn push_bounded(errors: &mut Vec<String>, message: String, max_errors: usize) {
    if errors.len() < max_errors {
        errors.push(message);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
