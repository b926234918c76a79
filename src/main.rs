//! Command-line entry point for the ingestion and geocoding pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use muster::config::PipelineConfig;
use muster::error::AppError;
use muster::geocode::client::GeocodeClient;
use muster::geocode::engine::ScanEngine;
use muster::service::import_voter_roll;
use muster::state::AppState;
use muster::storage::jobs::{self, JobScope, JobStatus};
use muster::storage::{Database, SqliteRecordStore};

#[derive(Parser)]
#[command(name = "muster", about = "Voter-roll ingestion and geocoding pipeline")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, default_value = "muster.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a voter-roll CSV into a new version.
    Import {
        /// Name for the new voter-roll version.
        #[arg(long)]
        version_name: String,
        /// Path to the CSV file.
        csv: PathBuf,
    },
    /// Run a geocoding job over a scope. Resumes a paused job if one
    /// exists; Ctrl-C pauses instead of aborting.
    Geocode {
        #[arg(long, value_enum)]
        scope: ScopeKind,
        /// Voter-roll version id (required for voter-version scope).
        #[arg(long)]
        version: Option<i64>,
        /// Re-geocode records that already hold coordinates.
        #[arg(long)]
        force: bool,
        /// Base URL of the geocoding service.
        #[arg(long, default_value = "https://nominatim.openstreetmap.org/")]
        geocoder_url: Url,
    },
    /// Show the latest geocoding job for a scope.
    Status {
        #[arg(long, value_enum)]
        scope: ScopeKind,
        #[arg(long)]
        version: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeKind {
    VoterVersion,
    ParliamentSet,
    LocalitySet,
}

fn build_scope(kind: ScopeKind, version: Option<i64>) -> Result<JobScope, AppError> {
    match kind {
        ScopeKind::VoterVersion => version.map(JobScope::VoterVersion).ok_or_else(|| {
            AppError::Internal("--version is required for voter-version scope".to_string())
        }),
        ScopeKind::ParliamentSet => Ok(JobScope::ParliamentSet),
        ScopeKind::LocalitySet => Ok(JobScope::LocalitySet),
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let db = Database::init(cli.db.clone()).await?;
    let state = Arc::new(AppState::new(db, PipelineConfig::default()));

    match cli.command {
        Command::Import { version_name, csv } => {
            let text = tokio::fs::read_to_string(&csv)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to read {}: {e}", csv.display())))?;

            let version = state.db.create_voter_version(&version_name).await?;
            info!("Created voter version {} ({})", version.id, version.name);

            let summary = import_voter_roll(&state, version.id, &text, |p| {
                println!("{}/{} rows ({}%)", p.processed_rows, p.total_rows, p.percent());
            })
            .await?;

            println!(
                "Imported {} of {} rows into version {}",
                summary.imported, summary.total_rows, version.id
            );
            if summary.error_count > 0 {
                println!(
                    "{} error(s) (first {} shown):",
                    summary.error_count,
                    summary.errors.len()
                );
                for error in &summary.errors {
                    println!("  {error}");
                }
            }
        }

        Command::Geocode {
            scope,
            version,
            force,
            geocoder_url,
        } => {
            let scope = build_scope(scope, version)?;
            let geocoder = Arc::new(GeocodeClient::new(Arc::new(Client::new()), geocoder_url));
            let engine = ScanEngine::new(
                state.db.clone(),
                Arc::new(SqliteRecordStore::new(state.db.clone())),
                geocoder,
                state.config.geocode.clone(),
            );

            // Pick up a paused job for the scope before starting a new one.
            let job = match jobs::latest_job_for_scope(&state.db, scope).await? {
                Some(job) if job.status == JobStatus::Paused => {
                    println!(
                        "Resuming job {} from {}/{} records",
                        job.id, job.processed_records, job.total_records
                    );
                    job
                }
                _ => engine.start(scope, Some(force), "cli").await?,
            };

            let pause = CancellationToken::new();
            let pause_on_interrupt = pause.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!("Interrupt received, pausing after the current record...");
                    pause_on_interrupt.cancel();
                }
            });

            let finished = engine.run(job.id, pause).await?;
            println!(
                "Job {} {}: {}/{} processed ({} geocoded, {} failed, {} skipped)",
                finished.id,
                finished.status.as_str(),
                finished.processed_records,
                finished.total_records,
                finished.geocoded_count,
                finished.failed_count,
                finished.skipped_count
            );
            if let Some(message) = &finished.error_message {
                println!("Failure reason: {message}");
            }
        }

        Command::Status { scope, version } => {
            let scope = build_scope(scope, version)?;
            match jobs::latest_job_for_scope(&state.db, scope).await? {
                Some(job) => {
                    let json = serde_json::to_string_pretty(&job)
                        .map_err(|e| AppError::Internal(format!("Failed to render job: {e}")))?;
                    println!("{json}");
                }
                None => println!("No geocoding job for scope {scope}"),
            }
        }
    }

    Ok(())
}
