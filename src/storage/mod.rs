//! Storage module for the local SQLite database: schema migrations, voter
//! and scope tables, geocoding job rows, and the record-store view used by
//! the scan loop.

pub(crate) mod database;
pub mod jobs;
pub mod records;

pub use database::{Database, VoterVersion};
pub use records::SqliteRecordStore;
