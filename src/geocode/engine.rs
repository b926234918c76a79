//! Resumable batch geocoding engine.
//!
//! Scans all records in a scope, attempts to geocode each, and keeps the
//! aggregate counters checkpointed so that pausing and resuming never
//! reprocesses a completed record and never loses progress. Processing is
//! strictly sequential within one job: that caps the request rate against
//! the external geocoder and keeps the checkpoint a simple "first N in
//! stable order" offset.
//!
//! The durable checkpoint is the persisted `processed_records` counter,
//! not any in-memory cursor, so a paused job can resume on a different
//! process.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GeocodeConfig;
use crate::error::AppError;
use crate::geocode::{GeoRecord, GeocodeOutcome, Geocoder, RecordSource};
use crate::storage::jobs::{
    self, GeocodingJobRow, JobProgress, JobScope, JobStatus,
};
use crate::storage::Database;

// ─────────────────────────────────────────────────────────────────────────────
// Per-record outcome
// ─────────────────────────────────────────────────────────────────────────────

/// How one record fared, from the counter bookkeeping's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    /// No geocodable address, or already geocoded and not forced.
    Skipped,
    /// Coordinates resolved and saved.
    Geocoded,
    /// Definitive failure (address not found, provider rejected it).
    Failed,
    /// Failure after exhausting transient retries; feeds the streak that
    /// escalates a systemic outage to a job failure.
    FailedTransient,
}

// ─────────────────────────────────────────────────────────────────────────────
// ScanEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Drives geocoding jobs over an injected record source and geocoder.
pub struct ScanEngine<S, G>
where
    S: RecordSource + 'static,
    G: Geocoder + 'static,
{
    db: Arc<Database>,
    source: Arc<S>,
    geocoder: Arc<G>,
    config: GeocodeConfig,
}

impl<S, G> ScanEngine<S, G>
where
    S: RecordSource + 'static,
    G: Geocoder + 'static,
{
    pub fn new(db: Arc<Database>, source: Arc<S>, geocoder: Arc<G>, config: GeocodeConfig) -> Self {
        Self {
            db,
            source,
            geocoder,
            config,
        }
    }

    /// Creates a new pending job for the scope.
    ///
    /// `total_records` is computed once here and never recomputed mid-run,
    /// so percentage-complete stays stable for the life of the job even if
    /// the underlying record set changes. Fails with `JobConflict` when an
    /// active job already exists for the scope.
    pub async fn start(
        &self,
        scope: JobScope,
        force_regeocode: Option<bool>,
        created_by: &str,
    ) -> Result<GeocodingJobRow, AppError> {
        let total = self.source.count(scope).await?;
        let force = force_regeocode.unwrap_or(self.config.force_regeocode);

        let job = jobs::create_job(&self.db, scope, total, force, created_by).await?;

        info!(
            "[JOB] Created geocoding job {} for scope {} ({} records)",
            job.id, scope, total
        );

        Ok(job)
    }

    /// Runs a job until it completes, fails, or observes a pause request.
    ///
    /// Valid for jobs in `pending` (fresh start) or `paused` (resumption);
    /// resumption continues from the persisted `processed_records`
    /// checkpoint rather than rescanning from zero. The cancellation token
    /// is checked between records, never mid-record, so pausing stops
    /// after the in-flight record is fully accounted for.
    pub async fn run(
        &self,
        job_id: i64,
        pause: CancellationToken,
    ) -> Result<GeocodingJobRow, AppError> {
        let job = jobs::get_job(&self.db, job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("geocoding job {job_id}")))?;

        match job.status {
            JobStatus::Pending | JobStatus::Paused => {
                jobs::transition_status(&self.db, job_id, job.status, JobStatus::Running, None)
                    .await?;
            }
            other => {
                return Err(AppError::InvalidJobState {
                    expected: "pending or paused",
                    actual: other.as_str().to_string(),
                });
            }
        }

        info!(
            "[JOB] Job {} running over scope {} from offset {}",
            job_id, job.scope, job.processed_records
        );

        match self.scan(&job, &pause).await {
            Ok(()) => {}
            Err(e) => {
                // Unrecoverable infrastructure failure: record the reason and
                // leave the already-persisted counters untouched.
                warn!("[JOB] Job {} aborted: {}", job_id, e);
                jobs::transition_status(
                    &self.db,
                    job_id,
                    JobStatus::Running,
                    JobStatus::Failed,
                    Some(e.to_string()),
                )
                .await?;
            }
        }

        jobs::get_job(&self.db, job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("geocoding job {job_id}")))
    }

    /// The scan loop proper. Persists every transition it makes; an `Err`
    /// return means an unrecoverable failure the caller records.
    async fn scan(&self, job: &GeocodingJobRow, pause: &CancellationToken) -> Result<(), AppError> {
        let scope = job.scope;
        let total = job.total_records;
        let mut progress = JobProgress::from(job);
        let mut transient_streak: u32 = 0;

        'pages: while progress.processed < total {
            if pause.is_cancelled() {
                break 'pages;
            }

            let remaining = total - progress.processed;
            let limit = (self.config.scan_page_size as u64).min(remaining) as u32;
            let page = self.source.page(scope, progress.processed, limit).await?;

            if page.is_empty() {
                // The record set shrank under the job; nothing left to scan.
                break;
            }

            for record in page {
                if pause.is_cancelled() {
                    break 'pages;
                }

                let outcome = self.process_record(scope, &record, job.force_regeocode).await?;

                match outcome {
                    RecordOutcome::Skipped => {
                        progress.skipped += 1;
                        transient_streak = 0;
                    }
                    RecordOutcome::Geocoded => {
                        progress.geocoded += 1;
                        transient_streak = 0;
                    }
                    RecordOutcome::Failed => {
                        progress.failed += 1;
                        transient_streak = 0;
                    }
                    RecordOutcome::FailedTransient => {
                        progress.failed += 1;
                        transient_streak += 1;
                    }
                }
                progress.processed += 1;

                // All four counters in one write: a crash between records
                // cannot break processed = geocoded + failed + skipped.
                jobs::update_progress(&self.db, job.id, progress).await?;

                if transient_streak >= self.config.transient_streak_limit {
                    // A streak this long is a systemic outage, not a run of
                    // unfindable addresses.
                    return Err(AppError::JobFailed {
                        job_id: job.id,
                        message: format!(
                            "geocoder unavailable: {transient_streak} consecutive records failed with transient errors"
                        ),
                    });
                }
            }
        }

        if pause.is_cancelled() && progress.processed < total {
            jobs::transition_status(&self.db, job.id, JobStatus::Running, JobStatus::Paused, None)
                .await?;
            info!(
                "[JOB] Job {} paused at {}/{} records",
                job.id, progress.processed, total
            );
        } else {
            jobs::transition_status(
                &self.db,
                job.id,
                JobStatus::Running,
                JobStatus::Completed,
                None,
            )
            .await?;
            info!(
                "[JOB] Job {} completed: {} geocoded, {} failed, {} skipped",
                job.id, progress.geocoded, progress.failed, progress.skipped
            );
        }

        Ok(())
    }

    /// Processes a single record.
    ///
    /// Transient geocoder failures are retried here with backoff before
    /// counting against the record; an `Err` return is reserved for record
    /// store failures, which abort the job.
    async fn process_record(
        &self,
        scope: JobScope,
        record: &GeoRecord,
        force_regeocode: bool,
    ) -> Result<RecordOutcome, AppError> {
        let Some(address) = record.address.as_deref() else {
            return Ok(RecordOutcome::Skipped);
        };

        if record.has_coordinates && !force_regeocode {
            return Ok(RecordOutcome::Skipped);
        }

        let mut attempt = 1;
        loop {
            match self.geocoder.geocode(address).await {
                Ok(GeocodeOutcome::Found(coords)) => {
                    self.source.save_coordinates(scope, record.id, coords).await?;
                    return Ok(RecordOutcome::Geocoded);
                }
                // A definitive miss is not retried within the same job run.
                Ok(GeocodeOutcome::NotFound) => return Ok(RecordOutcome::Failed),
                Err(e) if e.is_transient() => {
                    if attempt >= self.config.record_retry_attempts {
                        return Ok(RecordOutcome::FailedTransient);
                    }
                    let delay = self.config.backoff_for_attempt(attempt);
                    warn!(
                        "[JOB] Transient geocoder failure for record {} (attempt {}/{}), retrying in {:?}: {}",
                        record.id, attempt, self.config.record_retry_attempts, delay, e
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!("[JOB] Geocoder rejected record {}: {}", record.id, e);
                    return Ok(RecordOutcome::Failed);
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::geocode::Coordinates;

    // ─────────────────────────────────────────────────────────────────────────
    // Fakes
    // ─────────────────────────────────────────────────────────────────────────

    /// In-memory record source with a stable ordering and a page-call log.
    struct FakeSource {
        records: Mutex<Vec<GeoRecord>>,
        saved: Mutex<HashMap<i64, Coordinates>>,
        page_calls: Mutex<Vec<(u64, u32)>>,
        fail_pages_after: Option<u64>,
    }

    impl FakeSource {
        fn new(records: Vec<GeoRecord>) -> Self {
            Self {
                records: Mutex::new(records),
                saved: Mutex::new(HashMap::new()),
                page_calls: Mutex::new(Vec::new()),
                fail_pages_after: None,
            }
        }

        fn failing_pages_after(mut self, offset: u64) -> Self {
            self.fail_pages_after = Some(offset);
            self
        }

        fn saved(&self) -> HashMap<i64, Coordinates> {
            self.saved.lock().unwrap().clone()
        }

        fn page_calls(&self) -> Vec<(u64, u32)> {
            self.page_calls.lock().unwrap().clone()
        }
    }

    impl RecordSource for FakeSource {
        fn count<'a>(
            &'a self,
            _scope: JobScope,
        ) -> Pin<Box<dyn Future<Output = Result<u64, AppError>> + Send + 'a>> {
            Box::pin(async move { Ok(self.records.lock().unwrap().len() as u64) })
        }

        fn page<'a>(
            &'a self,
            _scope: JobScope,
            offset: u64,
            limit: u32,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<GeoRecord>, AppError>> + Send + 'a>> {
            Box::pin(async move {
                if let Some(fail_after) = self.fail_pages_after {
                    if offset >= fail_after {
                        return Err(AppError::Internal("record source unreachable".into()));
                    }
                }
                self.page_calls.lock().unwrap().push((offset, limit));
                let records = self.records.lock().unwrap();
                let saved = self.saved.lock().unwrap();
                Ok(records
                    .iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .map(|r| GeoRecord {
                        id: r.id,
                        address: r.address.clone(),
                        has_coordinates: r.has_coordinates || saved.contains_key(&r.id),
                    })
                    .collect())
            })
        }

        fn save_coordinates<'a>(
            &'a self,
            _scope: JobScope,
            record_id: i64,
            coords: Coordinates,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.saved.lock().unwrap().insert(record_id, coords);
                Ok(())
            })
        }
    }

    /// Scripted geocoder keyed by address.
    ///
    /// `transient_for(addr, n)` makes the first `n` calls for that address
    /// fail transiently; `not_found(addr)` makes it a definitive miss;
    /// everything else resolves to fixed coordinates. Optionally cancels a
    /// token once a given total call count is reached.
    struct FakeGeocoder {
        not_found: Vec<String>,
        transient: Mutex<HashMap<String, u32>>,
        always_transient: bool,
        calls: Mutex<HashMap<String, u32>>,
        total_calls: AtomicU64,
        cancel_after: Option<(u64, CancellationToken)>,
    }

    impl FakeGeocoder {
        fn new() -> Self {
            Self {
                not_found: Vec::new(),
                transient: Mutex::new(HashMap::new()),
                always_transient: false,
                calls: Mutex::new(HashMap::new()),
                total_calls: AtomicU64::new(0),
                cancel_after: None,
            }
        }

        fn not_found(mut self, address: &str) -> Self {
            self.not_found.push(address.to_string());
            self
        }

        fn transient_for(self, address: &str, failures: u32) -> Self {
            self.transient
                .lock()
                .unwrap()
                .insert(address.to_string(), failures);
            self
        }

        fn always_transient(mut self) -> Self {
            self.always_transient = true;
            self
        }

        fn cancelling_after(mut self, calls: u64, token: CancellationToken) -> Self {
            self.cancel_after = Some((calls, token));
            self
        }

        fn calls_for(&self, address: &str) -> u32 {
            self.calls.lock().unwrap().get(address).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> u64 {
            self.total_calls.load(Ordering::SeqCst)
        }
    }

    impl Geocoder for FakeGeocoder {
        fn geocode<'a>(
            &'a self,
            address: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<GeocodeOutcome, AppError>> + Send + 'a>> {
            Box::pin(async move {
                *self
                    .calls
                    .lock()
                    .unwrap()
                    .entry(address.to_string())
                    .or_insert(0) += 1;
                let total = self.total_calls.fetch_add(1, Ordering::SeqCst) + 1;

                if let Some((after, token)) = &self.cancel_after {
                    if total >= *after {
                        token.cancel();
                    }
                }

                if self.always_transient {
                    return Err(AppError::ConnectionFailed("simulated outage".into()));
                }

                {
                    let mut transient = self.transient.lock().unwrap();
                    if let Some(remaining) = transient.get_mut(address) {
                        if *remaining > 0 {
                            *remaining -= 1;
                            return Err(AppError::RateLimited {
                                retry_after_secs: None,
                            });
                        }
                    }
                }

                if self.not_found.iter().any(|a| a == address) {
                    return Ok(GeocodeOutcome::NotFound);
                }

                Ok(GeocodeOutcome::Found(Coordinates {
                    lat: 51.5,
                    lng: -0.12,
                }))
            })
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn record(id: i64, address: Option<&str>, has_coordinates: bool) -> GeoRecord {
        GeoRecord {
            id,
            address: address.map(|s| s.to_string()),
            has_coordinates,
        }
    }

    /// N geocodable records with unique addresses, ids 1..=n.
    fn geocodable_records(n: usize) -> Vec<GeoRecord> {
        (1..=n as i64)
            .map(|i| record(i, Some(&format!("{} High St", i)), false))
            .collect()
    }

    fn fast_config() -> GeocodeConfig {
        GeocodeConfig {
            scan_page_size: 50,
            record_retry_attempts: 3,
            record_retry_base_delay_ms: 0,
            transient_streak_limit: 10,
            force_regeocode: false,
        }
    }

    async fn test_engine(
        source: FakeSource,
        geocoder: FakeGeocoder,
        config: GeocodeConfig,
    ) -> (TempDir, Arc<Database>, ScanEngine<FakeSource, FakeGeocoder>) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Arc::new(
            Database::init(temp_dir.path().join("test.db"))
                .await
                .expect("Failed to init DB"),
        );
        let engine = ScanEngine::new(db.clone(), Arc::new(source), Arc::new(geocoder), config);
        (temp_dir, db, engine)
    }

    fn assert_invariant(job: &GeocodingJobRow) {
        assert_eq!(
            job.processed_records,
            job.geocoded_count + job.failed_count + job.skipped_count,
            "processed must equal geocoded + failed + skipped"
        );
        assert!(job.processed_records <= job.total_records);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Full runs
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn full_run_classifies_records_and_completes() {
        // 1: geocodable, 2: no address, 3: already geocoded, 4: not found.
        let records = vec![
            record(1, Some("1 High St"), false),
            record(2, None, false),
            record(3, Some("3 High St"), true),
            record(4, Some("4 Nowhere Lane"), false),
        ];
        let geocoder = FakeGeocoder::new().not_found("4 Nowhere Lane");
        let (_tmp, _db, engine) = test_engine(FakeSource::new(records), geocoder, fast_config()).await;

        let job = engine
            .start(JobScope::VoterVersion(1), None, "op")
            .await
            .unwrap();
        assert_eq!(job.total_records, 4);

        let finished = engine.run(job.id, CancellationToken::new()).await.unwrap();

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.processed_records, 4);
        assert_eq!(finished.geocoded_count, 1);
        assert_eq!(finished.skipped_count, 2);
        assert_eq!(finished.failed_count, 1);
        assert!(finished.completed_at.is_some());
        assert!(finished.error_message.is_none());
        assert_invariant(&finished);

        // Only the geocoded record received coordinates.
        assert_eq!(engine.source.saved().len(), 1);
        assert!(engine.source.saved().contains_key(&1));
    }

    #[tokio::test]
    async fn force_regeocode_reprocesses_already_geocoded_records() {
        let records = vec![
            record(1, Some("1 High St"), true),
            record(2, Some("2 High St"), true),
        ];
        let (_tmp, _db, engine) =
            test_engine(FakeSource::new(records), FakeGeocoder::new(), fast_config()).await;

        let job = engine
            .start(JobScope::VoterVersion(1), Some(true), "op")
            .await
            .unwrap();
        assert!(job.force_regeocode);

        let finished = engine.run(job.id, CancellationToken::new()).await.unwrap();
        assert_eq!(finished.geocoded_count, 2);
        assert_eq!(finished.skipped_count, 0);
        assert_invariant(&finished);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_a_record() {
        let records = vec![record(1, Some("1 High St"), false)];
        let geocoder = FakeGeocoder::new().transient_for("1 High St", 2);
        let (_tmp, _db, engine) = test_engine(FakeSource::new(records), geocoder, fast_config()).await;

        let job = engine
            .start(JobScope::VoterVersion(1), None, "op")
            .await
            .unwrap();
        let finished = engine.run(job.id, CancellationToken::new()).await.unwrap();

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.geocoded_count, 1);
        assert_eq!(finished.failed_count, 0);
        assert_eq!(engine.geocoder.calls_for("1 High St"), 3);
    }

    #[tokio::test]
    async fn exhausted_transient_retries_count_the_record_as_failed() {
        let records = vec![
            record(1, Some("1 High St"), false),
            record(2, Some("2 High St"), false),
        ];
        // Record 1 never stops failing transiently; record 2 is fine. The
        // streak resets on record 2, so the job still completes.
        let geocoder = FakeGeocoder::new().transient_for("1 High St", u32::MAX);
        let (_tmp, _db, engine) = test_engine(FakeSource::new(records), geocoder, fast_config()).await;

        let job = engine
            .start(JobScope::VoterVersion(1), None, "op")
            .await
            .unwrap();
        let finished = engine.run(job.id, CancellationToken::new()).await.unwrap();

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.failed_count, 1);
        assert_eq!(finished.geocoded_count, 1);
        assert_eq!(engine.geocoder.calls_for("1 High St"), 3, "Bounded retries");
        assert_invariant(&finished);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pause / resume
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pause_stops_between_records_and_resume_continues_exactly_once_each() {
        let records = geocodable_records(20);
        let pause = CancellationToken::new();
        // Cancel while the 8th record is in flight; it must still complete.
        let geocoder = FakeGeocoder::new().cancelling_after(8, pause.clone());
        let (_tmp, db, engine) = test_engine(FakeSource::new(records), geocoder, fast_config()).await;

        let job = engine
            .start(JobScope::VoterVersion(1), None, "op")
            .await
            .unwrap();
        let paused = engine.run(job.id, pause).await.unwrap();

        assert_eq!(paused.status, JobStatus::Paused);
        assert_eq!(
            paused.processed_records, 8,
            "The in-flight record finishes; nothing after it starts"
        );
        assert_eq!(paused.geocoded_count, 8);
        assert_invariant(&paused);

        // Resume with a fresh token and let it run to completion.
        let finished = engine.run(job.id, CancellationToken::new()).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.processed_records, 20);
        assert_eq!(finished.geocoded_count, 20);
        assert_invariant(&finished);

        // Exactly once each: no address was geocoded twice, and the resumed
        // scan asked for records starting at the checkpoint.
        for i in 1..=20 {
            assert_eq!(
                engine.geocoder.calls_for(&format!("{} High St", i)),
                1,
                "Record {} must be processed exactly once",
                i
            );
        }
        assert_eq!(engine.geocoder.total_calls(), 20);
        let calls = engine.source.page_calls();
        assert!(
            calls.contains(&(8, 12)),
            "Resume must page from the checkpoint, got {:?}",
            calls
        );

        // The durable row reflects the same story.
        let row = jobs::get_job(&db, job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn resume_preserves_previously_accumulated_counters() {
        // A job paused at 400/1000 with 380 geocoded, 15 failed, 5 skipped;
        // the remaining 600 records all geocode cleanly.
        let mut records = geocodable_records(1000);
        for r in records.iter_mut().take(400) {
            // Already-processed prefix; the resumed scan never sees these.
            r.has_coordinates = true;
        }
        let (_tmp, db, engine) =
            test_engine(FakeSource::new(records), FakeGeocoder::new(), fast_config()).await;

        let job = jobs::create_job(&db, JobScope::VoterVersion(1), 1000, false, "op")
            .await
            .unwrap();
        jobs::transition_status(&db, job.id, JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap();
        jobs::update_progress(
            &db,
            job.id,
            JobProgress {
                processed: 400,
                geocoded: 380,
                failed: 15,
                skipped: 5,
            },
        )
        .await
        .unwrap();
        jobs::transition_status(&db, job.id, JobStatus::Running, JobStatus::Paused, None)
            .await
            .unwrap();

        let finished = engine.run(job.id, CancellationToken::new()).await.unwrap();

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.processed_records, 1000);
        assert_eq!(finished.geocoded_count, 380 + 600);
        assert_eq!(finished.failed_count, 15);
        assert_eq!(finished.skipped_count, 5);
        assert_invariant(&finished);

        // The resumed scan started at the checkpoint, not zero.
        assert_eq!(engine.source.page_calls().first(), Some(&(400, 50)));
    }

    #[tokio::test]
    async fn run_rejects_jobs_in_terminal_or_running_state() {
        let (_tmp, db, engine) = test_engine(
            FakeSource::new(geocodable_records(1)),
            FakeGeocoder::new(),
            fast_config(),
        )
        .await;

        let job = engine
            .start(JobScope::VoterVersion(1), None, "op")
            .await
            .unwrap();
        let finished = engine.run(job.id, CancellationToken::new()).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);

        let err = engine
            .run(job.id, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AppError::InvalidJobState { actual, .. } => assert_eq!(actual, "completed"),
            e => panic!("Expected InvalidJobState, got {:?}", e),
        }

        // Unknown job id.
        let err = engine.run(9999, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let _ = db;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failure escalation
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn consecutive_transient_failures_escalate_to_job_failure() {
        let records = geocodable_records(50);
        let geocoder = FakeGeocoder::new().always_transient();
        let (_tmp, _db, engine) = test_engine(FakeSource::new(records), geocoder, fast_config()).await;

        let job = engine
            .start(JobScope::VoterVersion(1), None, "op")
            .await
            .unwrap();
        let failed = engine.run(job.id, CancellationToken::new()).await.unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed
            .error_message
            .as_deref()
            .unwrap()
            .contains("consecutive"));
        // Advancing stops at the escalation point.
        assert_eq!(failed.processed_records, 10);
        assert_eq!(failed.failed_count, 10);
        assert!(failed.completed_at.is_some());
        assert_invariant(&failed);

        // Each of the 10 records burned its full retry budget.
        assert_eq!(engine.geocoder.total_calls(), 30);
    }

    #[tokio::test]
    async fn record_source_failure_fails_the_job_with_a_reason() {
        let records = geocodable_records(100);
        let source = FakeSource::new(records).failing_pages_after(50);
        let (_tmp, _db, engine) = test_engine(source, FakeGeocoder::new(), fast_config()).await;

        let job = engine
            .start(JobScope::VoterVersion(1), None, "op")
            .await
            .unwrap();
        let failed = engine.run(job.id, CancellationToken::new()).await.unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed
            .error_message
            .as_deref()
            .unwrap()
            .contains("unreachable"));
        assert_eq!(failed.processed_records, 50, "Committed progress survives");
        assert_invariant(&failed);
    }

    #[tokio::test]
    async fn start_rejects_second_active_job_for_scope() {
        let (_tmp, _db, engine) = test_engine(
            FakeSource::new(geocodable_records(5)),
            FakeGeocoder::new(),
            fast_config(),
        )
        .await;

        engine
            .start(JobScope::ParliamentSet, None, "op")
            .await
            .unwrap();
        let err = engine
            .start(JobScope::ParliamentSet, None, "op")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::JobConflict { .. }));
    }

    #[tokio::test]
    async fn empty_scope_completes_immediately() {
        let (_tmp, _db, engine) = test_engine(
            FakeSource::new(Vec::new()),
            FakeGeocoder::new(),
            fast_config(),
        )
        .await;

        let job = engine
            .start(JobScope::LocalitySet, None, "op")
            .await
            .unwrap();
        assert_eq!(job.total_records, 0);

        let finished = engine.run(job.id, CancellationToken::new()).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.processed_records, 0);
    }
}
