//! Caller-facing geocoding job operations.
//!
//! `start` and `resume` spawn the scan as a background task and return
//! immediately; `pause` signals the in-flight scan; `get_latest` is a pure
//! query. Callers poll `get_latest` to observe progress; counters update
//! per record, so polling every second or two is plenty.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;
use crate::geocode::engine::ScanEngine;
use crate::geocode::Geocoder;
use crate::state::AppState;
use crate::storage::jobs::{self, GeocodingJobRow, JobScope, JobStatus};
use crate::storage::SqliteRecordStore;

/// Starts a new geocoding job for the scope and spawns its scan.
///
/// Does not block until completion. Fails with `JobConflict` when an
/// active job already exists for the scope.
pub async fn start_geocoding_job<G>(
    state: &Arc<AppState>,
    geocoder: Arc<G>,
    scope: JobScope,
    force_regeocode: Option<bool>,
    created_by: &str,
) -> Result<GeocodingJobRow, AppError>
where
    G: Geocoder + 'static,
{
    let engine = build_engine(state, geocoder);
    let job = engine.start(scope, force_regeocode, created_by).await?;

    spawn_scan(state, engine, job.id).await;

    Ok(job)
}

/// Asks a running job to pause after its in-flight record.
///
/// The scan task persists `paused` with counters reflecting the records
/// fully processed so far. Fails with `InvalidJobState` unless the job is
/// running.
pub async fn pause_geocoding_job(state: &Arc<AppState>, job_id: i64) -> Result<(), AppError> {
    let job = jobs::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("geocoding job {job_id}")))?;

    if job.status != JobStatus::Running {
        return Err(AppError::InvalidJobState {
            expected: "running",
            actual: job.status.as_str().to_string(),
        });
    }

    let token = state
        .pause_signals
        .get(job_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no active scan for job {job_id}")))?;

    token.cancel();
    info!("[JOB] Pause requested for job {}", job_id);

    Ok(())
}

/// Resumes a paused job from its persisted checkpoint and spawns the scan.
///
/// Does not block until completion. Fails with `InvalidJobState` unless
/// the job is paused.
pub async fn resume_geocoding_job<G>(
    state: &Arc<AppState>,
    geocoder: Arc<G>,
    job_id: i64,
) -> Result<GeocodingJobRow, AppError>
where
    G: Geocoder + 'static,
{
    let job = jobs::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("geocoding job {job_id}")))?;

    if job.status != JobStatus::Paused {
        return Err(AppError::InvalidJobState {
            expected: "paused",
            actual: job.status.as_str().to_string(),
        });
    }

    info!(
        "[JOB] Resuming job {} from {}/{} records",
        job_id, job.processed_records, job.total_records
    );

    let engine = build_engine(state, geocoder);
    spawn_scan(state, engine, job_id).await;

    Ok(job)
}

/// Returns the most recently created job for the scope, regardless of
/// status. Callers use this to decide between a progress view, an
/// offer-to-resume control, or a start button.
pub async fn get_latest_geocoding_job(
    state: &AppState,
    scope: JobScope,
) -> Result<Option<GeocodingJobRow>, AppError> {
    jobs::latest_job_for_scope(&state.db, scope).await
}

fn build_engine<G>(state: &Arc<AppState>, geocoder: Arc<G>) -> ScanEngine<SqliteRecordStore, G>
where
    G: Geocoder + 'static,
{
    ScanEngine::new(
        state.db.clone(),
        Arc::new(SqliteRecordStore::new(state.db.clone())),
        geocoder,
        state.config.geocode.clone(),
    )
}

/// Registers a pause token and runs the scan in a background task.
async fn spawn_scan<G>(state: &Arc<AppState>, engine: ScanEngine<SqliteRecordStore, G>, job_id: i64)
where
    G: Geocoder + 'static,
{
    let token = CancellationToken::new();
    state.pause_signals.insert(job_id, token.clone()).await;

    let state = state.clone();
    tokio::spawn(async move {
        match engine.run(job_id, token).await {
            Ok(job) => info!(
                "[JOB] Scan task for job {} ended in state {}",
                job_id,
                job.status.as_str()
            ),
            Err(e) => warn!("[JOB] Scan task for job {} errored: {}", job_id, e),
        }
        state.pause_signals.remove(job_id).await;
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
