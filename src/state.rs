//! Shared application state.
//!
//! All durable state lives in the database; this struct only carries the
//! handle, the pipeline configuration, and the in-process pause signals for
//! scans currently running here.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::storage::Database;

/// Storage for pause tokens, keyed by job id.
///
/// A token exists only while a scan task for that job is running in this
/// process. Cancelling it asks the scan to stop after its in-flight record.
pub struct PauseSignals {
    tokens: Mutex<HashMap<i64, CancellationToken>>,
}

impl PauseSignals {
    /// Creates a new empty signal store.
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a token for the given job.
    pub async fn insert(&self, job_id: i64, token: CancellationToken) {
        let mut guard = self.tokens.lock().await;
        guard.insert(job_id, token);
    }

    /// Gets and clones the token for the given job.
    pub async fn get(&self, job_id: i64) -> Option<CancellationToken> {
        let guard = self.tokens.lock().await;
        guard.get(&job_id).cloned()
    }

    /// Removes the token for the given job.
    pub async fn remove(&self, job_id: i64) {
        let mut guard = self.tokens.lock().await;
        guard.remove(&job_id);
    }
}

impl Default for PauseSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state shared across the service surface.
pub struct AppState {
    /// Database handle for persistent storage.
    pub db: Arc<Database>,
    /// Pipeline tuning configuration.
    pub config: PipelineConfig,
    /// Pause signals for scans running in this process.
    pub pause_signals: PauseSignals,
}

impl AppState {
    /// Creates a new AppState with the given database and configuration.
    pub fn new(db: Database, config: PipelineConfig) -> Self {
        Self {
            db: Arc::new(db),
            config,
            pause_signals: PauseSignals::new(),
        }
    }
}
