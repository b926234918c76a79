//! Chunked voter-roll import: dataset parsing, the split/retry/aggregate
//! coordinator, and the SQLite row importer it drives.

pub mod coordinator;
pub mod dataset;
pub mod voter_store;

pub use coordinator::{run_import, ChunkOutcome, ImportProgress, ImportSummary, RowImporter};
pub use dataset::{parse_dataset, Dataset};
pub use voter_store::{SqliteVoterImporter, REQUIRED_VOTER_COLUMNS};
