use serde::Serialize;
use thiserror::Error;

/// Machine-readable error body for API consumers.
///
/// The service surface returns errors as `{kind, message}` so callers can
/// branch on `kind` without parsing human-readable text.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Import ────────────────────────────────────────────────────────────────
    #[error("Invalid CSV: {0}")]
    CsvInvalid(String),

    // ── Jobs ──────────────────────────────────────────────────────────────────
    #[error("An active geocoding job already exists for scope {scope}")]
    JobConflict { scope: String },

    #[error("Job is {actual}, expected {expected}")]
    InvalidJobState {
        expected: &'static str,
        actual: String,
    },

    #[error("Geocoding job {job_id} failed: {message}")]
    JobFailed { job_id: i64, message: String },

    // ── Geocoder ──────────────────────────────────────────────────────────────
    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Geocoder error: {0}")]
    GeocoderError(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Generic ───────────────────────────────────────────────────────────────
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable kind tag for the serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::CsvInvalid(_) => "csv_invalid",
            AppError::JobConflict { .. } => "job_conflict",
            AppError::InvalidJobState { .. } => "invalid_job_state",
            AppError::JobFailed { .. } => "job_failed",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::GeocoderError(_) => "geocoder_error",
            AppError::ConnectionFailed(_) => "connection_failed",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal",
        }
    }

    /// True for failures worth retrying at the call site (rate limits and
    /// transport errors). Everything else is a definitive answer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited { .. } | AppError::ConnectionFailed(_)
        )
    }

    /// Converts the error into its serializable body.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_body().serialize(serializer)
    }
}
