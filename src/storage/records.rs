//! Record-store access for the geocoding scan.
//!
//! Implements `RecordSource` over the SQLite tables. Every scope pages in
//! `ORDER BY id ASC` so the persisted `processed_records` checkpoint always
//! lands on the correct next record after a resume.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rusqlite::Connection;

use crate::error::AppError;
use crate::geocode::{Coordinates, GeoRecord, RecordSource};
use crate::storage::database::{configure_connection, current_timestamp, Database};
use crate::storage::jobs::JobScope;

/// `RecordSource` backed by the application database.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<Database>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Counts records in the scope.
    pub async fn count_records(&self, scope: JobScope) -> Result<u64, AppError> {
        let db_path = self.db.db_path().clone();

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;

            let count: i64 = match scope {
                JobScope::VoterVersion(version_id) => conn
                    .query_row(
                        "SELECT COUNT(*) FROM voters WHERE version_id = ?1",
                        [version_id],
                        |row| row.get(0),
                    )
                    .map_err(|e| AppError::Internal(format!("Failed to count voters: {e}")))?,
                JobScope::ParliamentSet => conn
                    .query_row("SELECT COUNT(*) FROM parliaments", [], |row| row.get(0))
                    .map_err(|e| AppError::Internal(format!("Failed to count parliaments: {e}")))?,
                JobScope::LocalitySet => conn
                    .query_row("SELECT COUNT(*) FROM localities", [], |row| row.get(0))
                    .map_err(|e| AppError::Internal(format!("Failed to count localities: {e}")))?,
            };

            Ok::<_, AppError>(count as u64)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Count records task failed: {e}")))?
    }

    /// Fetches one page of records in stable id order.
    ///
    /// For voters and parliaments the geocodable text is the address column;
    /// localities carry no postal address, so their name stands in.
    pub async fn page_records(
        &self,
        scope: JobScope,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<GeoRecord>, AppError> {
        let db_path = self.db.db_path().clone();

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;

            let (sql, version_param) = match scope {
                JobScope::VoterVersion(version_id) => (
                    r#"
                    SELECT id, address, lat IS NOT NULL AND lng IS NOT NULL
                    FROM voters
                    WHERE version_id = ?3
                    ORDER BY id ASC
                    LIMIT ?1 OFFSET ?2
                    "#,
                    Some(version_id),
                ),
                JobScope::ParliamentSet => (
                    r#"
                    SELECT id, address, lat IS NOT NULL AND lng IS NOT NULL
                    FROM parliaments
                    ORDER BY id ASC
                    LIMIT ?1 OFFSET ?2
                    "#,
                    None,
                ),
                JobScope::LocalitySet => (
                    r#"
                    SELECT id, name, lat IS NOT NULL AND lng IS NOT NULL
                    FROM localities
                    ORDER BY id ASC
                    LIMIT ?1 OFFSET ?2
                    "#,
                    None,
                ),
            };

            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| AppError::Internal(format!("Failed to prepare page query: {e}")))?;

            let map_row = |row: &rusqlite::Row<'_>| {
                let address: Option<String> = row.get(1)?;
                Ok(GeoRecord {
                    id: row.get(0)?,
                    address: address.filter(|a| !a.trim().is_empty()),
                    has_coordinates: row.get::<_, i32>(2)? != 0,
                })
            };

            let records = match version_param {
                Some(version_id) => stmt
                    .query_map(
                        rusqlite::params![limit as i64, offset as i64, version_id],
                        map_row,
                    )
                    .map_err(|e| AppError::Internal(format!("Failed to query records: {e}")))?
                    .collect::<Result<Vec<_>, _>>(),
                None => stmt
                    .query_map(rusqlite::params![limit as i64, offset as i64], map_row)
                    .map_err(|e| AppError::Internal(format!("Failed to query records: {e}")))?
                    .collect::<Result<Vec<_>, _>>(),
            }
            .map_err(|e| AppError::Internal(format!("Failed to collect records: {e}")))?;

            Ok::<_, AppError>(records)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Page records task failed: {e}")))?
    }

    /// Writes resolved coordinates to a record.
    pub async fn write_coordinates(
        &self,
        scope: JobScope,
        record_id: i64,
        coords: Coordinates,
    ) -> Result<(), AppError> {
        let db_path = self.db.db_path().clone();
        let updated_at = current_timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;

            let changed = match scope {
                JobScope::VoterVersion(_) => conn
                    .execute(
                        "UPDATE voters SET lat = ?1, lng = ?2, updated_at = ?3 WHERE id = ?4",
                        rusqlite::params![coords.lat, coords.lng, updated_at, record_id],
                    )
                    .map_err(|e| AppError::Internal(format!("Failed to update voter: {e}")))?,
                JobScope::ParliamentSet => conn
                    .execute(
                        "UPDATE parliaments SET lat = ?1, lng = ?2 WHERE id = ?3",
                        rusqlite::params![coords.lat, coords.lng, record_id],
                    )
                    .map_err(|e| AppError::Internal(format!("Failed to update parliament: {e}")))?,
                JobScope::LocalitySet => conn
                    .execute(
                        "UPDATE localities SET lat = ?1, lng = ?2 WHERE id = ?3",
                        rusqlite::params![coords.lat, coords.lng, record_id],
                    )
                    .map_err(|e| AppError::Internal(format!("Failed to update locality: {e}")))?,
            };

            if changed == 0 {
                return Err(AppError::NotFound(format!(
                    "record {record_id} in scope {scope}"
                )));
            }

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Write coordinates task failed: {e}")))?
    }
}

impl RecordSource for SqliteRecordStore {
    fn count<'a>(
        &'a self,
        scope: JobScope,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AppError>> + Send + 'a>> {
        Box::pin(self.count_records(scope))
    }

    fn page<'a>(
        &'a self,
        scope: JobScope,
        offset: u64,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GeoRecord>, AppError>> + Send + 'a>> {
        Box::pin(self.page_records(scope, offset, limit))
    }

    fn save_coordinates<'a>(
        &'a self,
        scope: JobScope,
        record_id: i64,
        coords: Coordinates,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.write_coordinates(scope, record_id, coords))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, Arc<Database>, SqliteRecordStore) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Arc::new(
            Database::init(temp_dir.path().join("test.db"))
                .await
                .expect("Failed to init DB"),
        );
        let store = SqliteRecordStore::new(db.clone());
        (temp_dir, db, store)
    }

    /// Seeds voters directly; lat/lng set for ids where `geocoded(n)` is true.
    fn seed_voters(
        db: &Database,
        version_id: i64,
        count: usize,
        geocoded: impl Fn(usize) -> bool,
        blank_address: impl Fn(usize) -> bool,
    ) {
        let conn = Connection::open(db.db_path()).expect("open");
        for i in 0..count {
            let (lat, lng) = if geocoded(i) {
                (Some(51.0 + i as f64), Some(-0.1))
            } else {
                (None, None)
            };
            let address = if blank_address(i) {
                None
            } else {
                Some(format!("{} High Street", i + 1))
            };
            conn.execute(
                r#"
                INSERT INTO voters
                    (version_id, voter_number, full_name, address, locality, lat, lng, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, 'Riverside', ?5, ?6, 0, 0)
                "#,
                rusqlite::params![
                    version_id,
                    format!("VN{:05}", i),
                    format!("Voter {}", i),
                    address,
                    lat,
                    lng
                ],
            )
            .expect("insert voter");
        }
    }

    #[tokio::test]
    async fn count_is_scoped_to_version() {
        let (_tmp, db, store) = test_store().await;
        seed_voters(&db, 1, 5, |_| false, |_| false);
        seed_voters(&db, 2, 3, |_| false, |_| false);

        assert_eq!(
            store.count_records(JobScope::VoterVersion(1)).await.unwrap(),
            5
        );
        assert_eq!(
            store.count_records(JobScope::VoterVersion(2)).await.unwrap(),
            3
        );
        assert_eq!(
            store.count_records(JobScope::VoterVersion(3)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn paging_is_stable_and_contiguous() {
        let (_tmp, db, store) = test_store().await;
        seed_voters(&db, 1, 10, |_| false, |_| false);

        let first = store
            .page_records(JobScope::VoterVersion(1), 0, 4)
            .await
            .unwrap();
        let second = store
            .page_records(JobScope::VoterVersion(1), 4, 4)
            .await
            .unwrap();
        let third = store
            .page_records(JobScope::VoterVersion(1), 8, 4)
            .await
            .unwrap();

        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
        assert_eq!(third.len(), 2);

        // No overlap, no gaps, ascending ids.
        let ids: Vec<i64> = first
            .iter()
            .chain(second.iter())
            .chain(third.iter())
            .map(|r| r.id)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted, "Pages must be strictly ordered and disjoint");
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn blank_addresses_and_coordinates_are_reported() {
        let (_tmp, db, store) = test_store().await;
        seed_voters(&db, 1, 4, |i| i == 0, |i| i == 1);

        let page = store
            .page_records(JobScope::VoterVersion(1), 0, 10)
            .await
            .unwrap();

        assert!(page[0].has_coordinates);
        assert!(page[1].address.is_none(), "Blank address surfaces as None");
        assert!(!page[1].has_coordinates);
        assert!(page[2].address.is_some());
    }

    #[tokio::test]
    async fn locality_scope_uses_name_as_geocodable_text() {
        let (_tmp, db, store) = test_store().await;
        db.insert_locality("Riverside", Some("North")).await.unwrap();
        db.insert_locality("Hillcrest", None).await.unwrap();

        assert_eq!(store.count_records(JobScope::LocalitySet).await.unwrap(), 2);

        let page = store
            .page_records(JobScope::LocalitySet, 0, 10)
            .await
            .unwrap();
        assert_eq!(page[0].address.as_deref(), Some("Riverside"));
        assert_eq!(page[1].address.as_deref(), Some("Hillcrest"));
    }

    #[tokio::test]
    async fn write_coordinates_round_trips() {
        let (_tmp, db, store) = test_store().await;
        let parliament_id = db.insert_parliament("North Ward", Some("12 Assembly Rd")).await.unwrap();

        let coords = Coordinates {
            lat: 51.5074,
            lng: -0.1278,
        };
        store
            .write_coordinates(JobScope::ParliamentSet, parliament_id, coords)
            .await
            .unwrap();

        let page = store
            .page_records(JobScope::ParliamentSet, 0, 10)
            .await
            .unwrap();
        assert!(page[0].has_coordinates);
    }

    #[tokio::test]
    async fn write_coordinates_to_missing_record_is_not_found() {
        let (_tmp, _db, store) = test_store().await;
        let err = store
            .write_coordinates(
                JobScope::LocalitySet,
                12345,
                Coordinates { lat: 0.0, lng: 0.0 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
