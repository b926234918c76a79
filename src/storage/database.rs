//! SQLite database module with schema migrations.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::error::AppError;

/// Current schema version. Increment when adding new migrations.
const SCHEMA_VERSION: i32 = 2;

/// V1 schema: voter-roll versions, voters, and the global scope tables.
const V1_SCHEMA: &str = r#"
-- Voter-roll upload generations
CREATE TABLE IF NOT EXISTS voter_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- Voter records, one row per voter per version
CREATE TABLE IF NOT EXISTS voters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_id INTEGER NOT NULL,
    voter_number TEXT NOT NULL,
    full_name TEXT NOT NULL,
    address TEXT,
    locality TEXT,
    lat REAL,
    lng REAL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(version_id, voter_number)
);

CREATE INDEX IF NOT EXISTS idx_voters_version_id ON voters(version_id);

-- Parliament constituencies (global scope)
CREATE TABLE IF NOT EXISTS parliaments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    address TEXT,
    lat REAL,
    lng REAL
);

-- Localities (global scope)
CREATE TABLE IF NOT EXISTS localities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    district TEXT,
    lat REAL,
    lng REAL
);
"#;

/// V2 migration: adds the geocoding_jobs table.
const V2_MIGRATION: &str = r#"
-- Geocoding jobs, one row per invocation of the batch engine
CREATE TABLE IF NOT EXISTS geocoding_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope_kind TEXT NOT NULL,
    scope_ref INTEGER,
    status TEXT NOT NULL,
    total_records INTEGER NOT NULL DEFAULT 0,
    processed_records INTEGER NOT NULL DEFAULT 0,
    geocoded_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    force_regeocode INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_by TEXT NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_geocoding_jobs_scope ON geocoding_jobs(scope_kind, scope_ref);
CREATE INDEX IF NOT EXISTS idx_geocoding_jobs_status ON geocoding_jobs(status);
"#;

/// Voter-roll version model.
#[derive(Debug, Clone)]
pub struct VoterVersion {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

/// SQLite database handle.
#[derive(Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Initializes the database at the given path.
    /// Creates parent directories if needed, opens the SQLite file, and runs migrations.
    pub async fn init(db_path: PathBuf) -> Result<Self, AppError> {
        let path = db_path.clone();

        tokio::task::spawn_blocking(move || {
            // Create parent directory if needed
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Internal(format!("Failed to create database directory: {e}"))
                })?;
            }

            let mut conn = Connection::open(&path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;
            run_migrations(&mut conn)?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Database init task failed: {e}")))??;

        Ok(Self { db_path })
    }

    /// Returns the database path for use by other storage modules.
    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Simple health check: executes SELECT 1.
    pub async fn health_check(&self) -> Result<(), AppError> {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;

            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| AppError::Internal(format!("Health check failed: {e}")))?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Health check task failed: {e}")))??;

        Ok(())
    }

    /// Creates a new voter-roll version and returns it.
    pub async fn create_voter_version(&self, name: &str) -> Result<VoterVersion, AppError> {
        let db_path = self.db_path.clone();
        let name = name.to_string();
        let created_at = current_timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;

            conn.execute(
                "INSERT INTO voter_versions (name, created_at) VALUES (?1, ?2)",
                rusqlite::params![name, created_at],
            )
            .map_err(|e| AppError::Internal(format!("Failed to insert voter version: {e}")))?;

            let id = conn.last_insert_rowid();

            Ok::<_, AppError>(VoterVersion {
                id,
                name,
                created_at,
            })
        })
        .await
        .map_err(|e| AppError::Internal(format!("Create voter version task failed: {e}")))?
    }

    /// Gets a voter-roll version by ID.
    pub async fn get_voter_version(&self, id: i64) -> Result<Option<VoterVersion>, AppError> {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;

            let version = conn
                .query_row(
                    "SELECT id, name, created_at FROM voter_versions WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(VoterVersion {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    },
                )
                .optional()
                .map_err(|e| AppError::Internal(format!("Failed to query voter version: {e}")))?;

            Ok::<_, AppError>(version)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Get voter version task failed: {e}")))?
    }

    /// Inserts a parliament constituency. Returns its row ID.
    pub async fn insert_parliament(
        &self,
        name: &str,
        address: Option<&str>,
    ) -> Result<i64, AppError> {
        let db_path = self.db_path.clone();
        let name = name.to_string();
        let address = address.map(|s| s.to_string());

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;

            conn.execute(
                "INSERT INTO parliaments (name, address) VALUES (?1, ?2)",
                rusqlite::params![name, address],
            )
            .map_err(|e| AppError::Internal(format!("Failed to insert parliament: {e}")))?;

            Ok::<_, AppError>(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Insert parliament task failed: {e}")))?
    }

    /// Inserts a locality. Returns its row ID.
    pub async fn insert_locality(
        &self,
        name: &str,
        district: Option<&str>,
    ) -> Result<i64, AppError> {
        let db_path = self.db_path.clone();
        let name = name.to_string();
        let district = district.map(|s| s.to_string());

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| AppError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;

            conn.execute(
                "INSERT INTO localities (name, district) VALUES (?1, ?2)",
                rusqlite::params![name, district],
            )
            .map_err(|e| AppError::Internal(format!("Failed to insert locality: {e}")))?;

            Ok::<_, AppError>(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Insert locality task failed: {e}")))?
    }
}

/// Configures connection with busy timeout and WAL mode.
pub(crate) fn configure_connection(conn: &Connection) -> Result<(), AppError> {
    conn.busy_timeout(Duration::from_secs(10))
        .map_err(|e| AppError::Internal(format!("Failed to set busy timeout: {e}")))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Internal(format!("Failed to set WAL mode: {e}")))?;

    Ok(())
}

/// Returns current unix timestamp in seconds.
pub(crate) fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Runs database migrations using PRAGMA user_version.
fn run_migrations(conn: &mut Connection) -> Result<(), AppError> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| AppError::Internal(format!("Failed to get schema version: {e}")))?;

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    // Run migrations in a transaction
    let tx = conn
        .transaction()
        .map_err(|e| AppError::Internal(format!("Failed to start migration transaction: {e}")))?;

    if current_version < 1 {
        tx.execute_batch(V1_SCHEMA)
            .map_err(|e| AppError::Internal(format!("V1 migration failed: {e}")))?;
    }

    if current_version < 2 {
        tx.execute_batch(V2_MIGRATION)
            .map_err(|e| AppError::Internal(format!("V2 migration failed: {e}")))?;
    }

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| AppError::Internal(format!("Failed to update schema version: {e}")))?;

    tx.commit()
        .map_err(|e| AppError::Internal(format!("Failed to commit migration: {e}")))?;

    Ok(())
}
