//! HTTP client for a forward-geocoding search endpoint.
//!
//! Speaks the common JSON search contract: `GET /search?q=...&format=json`
//! returning an array of hits with string `lat`/`lon` fields. An empty
//! array is a definitive miss; HTTP 429 and transport failures surface as
//! transient errors the scan loop may retry.
//!
//! # Privacy
//!
//! Addresses are never logged. Only the HTTP method, path, and status code
//! appear in log output.

use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::geocode::{Coordinates, GeocodeOutcome, Geocoder};

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// One hit in the search response. Coordinates arrive as strings.
#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// GeocodeClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the external geocoding provider.
#[derive(Clone)]
pub struct GeocodeClient {
    /// Shared HTTP client.
    client: Arc<Client>,
    /// Base URL of the geocoding service.
    base_url: Url,
}

impl GeocodeClient {
    /// Creates a new geocoding client.
    pub fn new(client: Arc<Client>, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// Resolves an address to coordinates.
    ///
    /// # Errors
    ///
    /// - `AppError::RateLimited` - provider returned HTTP 429
    /// - `AppError::ConnectionFailed` - transport-level failure
    /// - `AppError::GeocoderError` - provider-side error or malformed response
    pub async fn search(&self, address: &str) -> Result<GeocodeOutcome, AppError> {
        let mut url = self
            .base_url
            .join("search")
            .map_err(|e| AppError::Internal(format!("Failed to build search URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("q", address)
            .append_pair("format", "json")
            .append_pair("limit", "1");

        info!("[GEOCODE] GET /search");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Geocoder request failed: {e}")))?;

        let status = response.status();
        info!("[GEOCODE] GET /search -> {}", status.as_u16());

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(AppError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            return Err(AppError::GeocoderError(format!(
                "HTTP {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let hits: Vec<SearchHit> = response
            .json()
            .await
            .map_err(|e| AppError::GeocoderError(format!("Failed to parse response: {e}")))?;

        let Some(hit) = hits.first() else {
            return Ok(GeocodeOutcome::NotFound);
        };

        let lat: f64 = hit
            .lat
            .parse()
            .map_err(|e| AppError::GeocoderError(format!("Invalid latitude in response: {e}")))?;
        let lng: f64 = hit
            .lon
            .parse()
            .map_err(|e| AppError::GeocoderError(format!("Invalid longitude in response: {e}")))?;

        Ok(GeocodeOutcome::Found(Coordinates { lat, lng }))
    }
}

impl Geocoder for GeocodeClient {
    fn geocode<'a>(
        &'a self,
        address: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<GeocodeOutcome, AppError>> + Send + 'a>,
    > {
        Box::pin(self.search(address))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
