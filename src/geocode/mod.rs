//! Geocoding subsystem: the address lookup client and the resumable batch
//! job engine that drives it over a record scope.

pub mod client;
pub mod engine;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::jobs::JobScope;

/// Resolved coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Definitive answer from a geocoder lookup.
///
/// Transient failures (rate limits, transport errors) are `Err` values so
/// the engine can distinguish "retry" from "this address resolves to
/// nothing".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeocodeOutcome {
    Found(Coordinates),
    NotFound,
}

/// A record as seen by the scan loop: its identity, the text to geocode,
/// and whether coordinates are already present.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
    pub id: i64,
    pub address: Option<String>,
    pub has_coordinates: bool,
}

/// Trait for address lookup, allowing test fakes.
pub trait Geocoder: Send + Sync {
    /// Resolves an address to coordinates.
    ///
    /// `Ok(NotFound)` is a definitive miss; `Err` with a transient error
    /// (rate limit, network) is retryable.
    fn geocode<'a>(
        &'a self,
        address: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<GeocodeOutcome, AppError>> + Send + 'a>>;
}

/// Trait over the record store scanned by a geocoding job.
///
/// Implementations must expose a stable ordering so that
/// `offset = processed_records` always resumes at the correct next record.
pub trait RecordSource: Send + Sync {
    /// Counts the records in a scope.
    fn count<'a>(
        &'a self,
        scope: JobScope,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AppError>> + Send + 'a>>;

    /// Fetches one page of records in the scope's stable ordering.
    fn page<'a>(
        &'a self,
        scope: JobScope,
        offset: u64,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GeoRecord>, AppError>> + Send + 'a>>;

    /// Writes resolved coordinates back to a record.
    fn save_coordinates<'a>(
        &'a self,
        scope: JobScope,
        record_id: i64,
        coords: Coordinates,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}
