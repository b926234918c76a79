//! Geocoding job persistence for SQLite.
//!
//! One row per invocation of the batch engine against one scope. Rows are
//! the durable checkpoint: counters are written atomically so a resumed job
//! continues exactly where the last fully processed record left off. Jobs
//! are never deleted by the engine; a finished job is superseded by a newer
//! row for the same scope.

use std::fmt;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::database::{configure_connection, current_timestamp, Database};

// ─────────────────────────────────────────────────────────────────────────────
// JobScope
// ─────────────────────────────────────────────────────────────────────────────

/// The bounded set of records a single geocoding job operates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum JobScope {
    /// One voter-roll version.
    VoterVersion(i64),
    /// The global set of parliament constituencies.
    ParliamentSet,
    /// The global set of localities.
    LocalitySet,
}

impl JobScope {
    /// Converts the scope kind to its string representation for database storage.
    pub fn kind_str(&self) -> &'static str {
        match self {
            JobScope::VoterVersion(_) => "voter_version",
            JobScope::ParliamentSet => "parliament_set",
            JobScope::LocalitySet => "locality_set",
        }
    }

    /// Returns the scope reference (voter-roll version id), if any.
    pub fn ref_id(&self) -> Option<i64> {
        match self {
            JobScope::VoterVersion(id) => Some(*id),
            JobScope::ParliamentSet | JobScope::LocalitySet => None,
        }
    }

    /// Reconstructs a scope from its stored parts.
    pub fn from_parts(kind: &str, ref_id: Option<i64>) -> Result<Self, AppError> {
        match (kind, ref_id) {
            ("voter_version", Some(id)) => Ok(JobScope::VoterVersion(id)),
            ("parliament_set", _) => Ok(JobScope::ParliamentSet),
            ("locality_set", _) => Ok(JobScope::LocalitySet),
            _ => Err(AppError::Internal(format!(
                "Invalid job scope: {kind}/{ref_id:?}"
            ))),
        }
    }
}

impl fmt::Display for JobScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ref_id() {
            Some(id) => write!(f, "{}:{}", self.kind_str(), id),
            None => write!(f, "{}", self.kind_str()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobStatus
// ─────────────────────────────────────────────────────────────────────────────

/// State of a geocoding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet claimed by the engine.
    Pending,
    /// The engine is consuming records.
    Running,
    /// Stopped after its last fully processed record; resumable.
    Paused,
    /// Scan reached the end of the record set.
    Completed,
    /// Aborted by an unrecoverable error.
    Failed,
}

impl JobStatus {
    /// Converts the status to its string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parses a string into a JobStatus.
    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(AppError::Internal(format!("Unknown job status: {other}"))),
        }
    }

    /// Returns true if the job can no longer transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns true if the job counts against the one-active-job-per-scope
    /// invariant.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// A geocoding job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingJobRow {
    pub id: i64,
    pub scope: JobScope,
    pub status: JobStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub geocoded_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub force_regeocode: bool,
    pub error_message: Option<String>,
    pub created_by: String,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Aggregate counters persisted together after each processed record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub processed: u64,
    pub geocoded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl JobProgress {
    /// True when the outcome counters sum to the processed count.
    pub fn is_consistent(&self) -> bool {
        self.processed == self.geocoded + self.failed + self.skipped
    }
}

impl From<&GeocodingJobRow> for JobProgress {
    fn from(row: &GeocodingJobRow) -> Self {
        Self {
            processed: row.processed_records,
            geocoded: row.geocoded_count,
            failed: row.failed_count,
            skipped: row.skipped_count,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Functions
// ─────────────────────────────────────────────────────────────────────────────

const JOB_COLUMNS: &str = "id, scope_kind, scope_ref, status, total_records, processed_records, \
     geocoded_count, failed_count, skipped_count, force_regeocode, error_message, \
     created_by, started_at, completed_at, created_at, updated_at";

fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GeocodingJobRow> {
    let kind: String = row.get(1)?;
    let ref_id: Option<i64> = row.get(2)?;
    let status_str: String = row.get(3)?;

    let scope = JobScope::from_parts(&kind, ref_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status = JobStatus::from_str(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(GeocodingJobRow {
        id: row.get(0)?,
        scope,
        status,
        total_records: row.get::<_, i64>(4)? as u64,
        processed_records: row.get::<_, i64>(5)? as u64,
        geocoded_count: row.get::<_, i64>(6)? as u64,
        failed_count: row.get::<_, i64>(7)? as u64,
        skipped_count: row.get::<_, i64>(8)? as u64,
        force_regeocode: row.get::<_, i32>(9)? != 0,
        error_message: row.get(10)?,
        created_by: row.get(11)?,
        started_at: row.get(12)?,
        completed_at: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

/// Creates a new pending job for the scope.
///
/// The active-job check and the insert run in one transaction so two
/// concurrent starters cannot both slip past the check. Fails with
/// `JobConflict` when a pending, running, or paused job already exists for
/// the same scope; no row is created in that case.
pub async fn create_job(
    db: &Database,
    scope: JobScope,
    total_records: u64,
    force_regeocode: bool,
    created_by: &str,
) -> Result<GeocodingJobRow, AppError> {
    let db_path = db.db_path().clone();
    let created_by = created_by.to_string();
    let timestamp = current_timestamp();

    tokio::task::spawn_blocking(move || {
        let mut conn = Connection::open(&db_path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

        configure_connection(&conn)?;

        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {e}")))?;

        let active_exists: bool = tx
            .query_row(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM geocoding_jobs
                    WHERE scope_kind = ?1 AND scope_ref IS ?2 AND status IN (?3, ?4, ?5)
                )
                "#,
                rusqlite::params![
                    scope.kind_str(),
                    scope.ref_id(),
                    JobStatus::Pending.as_str(),
                    JobStatus::Running.as_str(),
                    JobStatus::Paused.as_str(),
                ],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Internal(format!("Failed to check active jobs: {e}")))?;

        if active_exists {
            return Err(AppError::JobConflict {
                scope: scope.to_string(),
            });
        }

        tx.execute(
            r#"
            INSERT INTO geocoding_jobs
                (scope_kind, scope_ref, status, total_records, force_regeocode,
                 created_by, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
            rusqlite::params![
                scope.kind_str(),
                scope.ref_id(),
                JobStatus::Pending.as_str(),
                total_records as i64,
                force_regeocode as i32,
                created_by,
                timestamp,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to insert job: {e}")))?;

        let job_id = tx.last_insert_rowid();

        let job = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM geocoding_jobs WHERE id = ?1"),
                [job_id],
                map_job_row,
            )
            .map_err(|e| AppError::Internal(format!("Failed to read back job: {e}")))?;

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit job insert: {e}")))?;

        Ok::<_, AppError>(job)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Create job task failed: {e}")))?
}

/// Gets a job by ID.
pub async fn get_job(db: &Database, job_id: i64) -> Result<Option<GeocodingJobRow>, AppError> {
    let db_path = db.db_path().clone();

    tokio::task::spawn_blocking(move || {
        let conn = Connection::open(&db_path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

        configure_connection(&conn)?;

        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM geocoding_jobs WHERE id = ?1"),
                [job_id],
                map_job_row,
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to query job: {e}")))?;

        Ok::<_, AppError>(job)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Get job task failed: {e}")))?
}

/// Gets the most recently created job for a scope, regardless of status.
///
/// Callers use this to decide between showing progress, offering resume,
/// or offering a fresh start. Pure query; holds no in-memory state.
pub async fn latest_job_for_scope(
    db: &Database,
    scope: JobScope,
) -> Result<Option<GeocodingJobRow>, AppError> {
    let db_path = db.db_path().clone();

    tokio::task::spawn_blocking(move || {
        let conn = Connection::open(&db_path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

        configure_connection(&conn)?;

        let job = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {JOB_COLUMNS} FROM geocoding_jobs
                    WHERE scope_kind = ?1 AND scope_ref IS ?2
                    ORDER BY created_at DESC, id DESC
                    LIMIT 1
                    "#
                ),
                rusqlite::params![scope.kind_str(), scope.ref_id()],
                map_job_row,
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to query latest job: {e}")))?;

        Ok::<_, AppError>(job)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Latest job task failed: {e}")))?
}

/// Persists all four progress counters in a single UPDATE.
///
/// One statement keeps the `processed = geocoded + failed + skipped`
/// invariant intact across crashes between records.
pub async fn update_progress(
    db: &Database,
    job_id: i64,
    progress: JobProgress,
) -> Result<(), AppError> {
    debug_assert!(progress.is_consistent());

    let db_path = db.db_path().clone();
    let updated_at = current_timestamp();

    tokio::task::spawn_blocking(move || {
        let conn = Connection::open(&db_path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

        configure_connection(&conn)?;

        let changed = conn
            .execute(
                r#"
                UPDATE geocoding_jobs
                SET processed_records = ?1, geocoded_count = ?2, failed_count = ?3,
                    skipped_count = ?4, updated_at = ?5
                WHERE id = ?6
                "#,
                rusqlite::params![
                    progress.processed as i64,
                    progress.geocoded as i64,
                    progress.failed as i64,
                    progress.skipped as i64,
                    updated_at,
                    job_id,
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update progress: {e}")))?;

        if changed == 0 {
            return Err(AppError::NotFound(format!("geocoding job {job_id}")));
        }

        Ok::<_, AppError>(())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Update progress task failed: {e}")))?
}

/// Transitions a job's status, guarded by the expected current status.
///
/// The guard lives in the UPDATE's WHERE clause so a concurrent transition
/// cannot race past it. On mismatch the actual status is read back and
/// reported as `InvalidJobState`.
pub async fn transition_status(
    db: &Database,
    job_id: i64,
    expected: JobStatus,
    new_status: JobStatus,
    error_message: Option<String>,
) -> Result<(), AppError> {
    let db_path = db.db_path().clone();
    let timestamp = current_timestamp();

    tokio::task::spawn_blocking(move || {
        let conn = Connection::open(&db_path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

        configure_connection(&conn)?;

        // started_at is stamped on the first transition into running;
        // completed_at only on terminal states.
        let changed = conn
            .execute(
                r#"
                UPDATE geocoding_jobs
                SET status = ?1,
                    error_message = ?2,
                    started_at = CASE WHEN ?1 = 'running' THEN COALESCE(started_at, ?3)
                                      ELSE started_at END,
                    completed_at = CASE WHEN ?1 IN ('completed', 'failed') THEN ?3
                                        ELSE completed_at END,
                    updated_at = ?3
                WHERE id = ?4 AND status = ?5
                "#,
                rusqlite::params![
                    new_status.as_str(),
                    error_message,
                    timestamp,
                    job_id,
                    expected.as_str(),
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to transition job: {e}")))?;

        if changed == 0 {
            let actual: Option<String> = conn
                .query_row(
                    "SELECT status FROM geocoding_jobs WHERE id = ?1",
                    [job_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| AppError::Internal(format!("Failed to read job status: {e}")))?;

            return match actual {
                Some(actual) => Err(AppError::InvalidJobState {
                    expected: expected.as_str(),
                    actual,
                }),
                None => Err(AppError::NotFound(format!("geocoding job {job_id}"))),
            };
        }

        Ok::<_, AppError>(())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Transition status task failed: {e}")))?
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
