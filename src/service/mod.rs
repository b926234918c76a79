//! Caller-facing operations.
//!
//! The operator surface of the pipeline: non-blocking job control plus the
//! import entry point. Framework-free; callable from a CLI, a server
//! endpoint, or a test harness identically.

pub mod geocoding;
pub mod import;

pub use geocoding::{
    get_latest_geocoding_job, pause_geocoding_job, resume_geocoding_job, start_geocoding_job,
};
pub use import::import_voter_roll;
