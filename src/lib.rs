//! Bulk voter-roll ingestion and resumable geocoding pipeline.
//!
//! Two cooperating components:
//!
//! - The **chunked import coordinator** loads arbitrarily large voter-roll
//!   CSV uploads in bounded chunks with per-chunk retry, surfacing partial
//!   progress and partial failure without ever letting one bad chunk abort
//!   the run.
//! - The **resumable batch job engine** scans a record scope (a voter-roll
//!   version, or the global parliament/locality sets), geocodes each
//!   record through an injected provider, and checkpoints its counters so
//!   jobs can pause and resume without reprocessing or losing progress.
//!
//! All durable state is SQLite rows; the engine holds no global in-memory
//! state, so any process can serve status queries.

pub mod config;
pub mod error;
pub mod geocode;
pub mod importer;
pub mod service;
pub mod state;
pub mod storage;
