//! CLI definitions using clap.

use std::num::NonZeroU32;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use tracing::info;

use crate::config::{
    default_source_db_path, default_store_root, AppConfig, SourceBackend, SourceConfig,
    StoreBackend, StoreConfig, SyncConfig, DEFAULT_CONTAINER, DEFAULT_DAYS_BACK,
    DEFAULT_DAYS_PER_BATCH, DEFAULT_KEY, DEFAULT_TABLE,
};
use crate::models::DedupPolicy;
use crate::source::TableId;
use crate::storage::ObjectLocation;
use crate::sync::{Clock, PinnedClock, SyncOutcome, SyncProcedure, UtcClock};


/// Keep a CSV of daily Ethereum transaction counts up to date.
///
/// Every setting has a default and can be overridden by flag or environment
/// variable.
#[derive(Debug, Parser)]
#[command(name = "ets")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Bucket (or local container directory) holding the dataset
    #[arg(long, env = "GCS_BUCKET", default_value = DEFAULT_CONTAINER)]
    bucket: String,

    /// Object key of the dataset
    #[arg(long, env = "CSV_BLOB", default_value = DEFAULT_KEY)]
    blob: String,

    /// Days of history to fetch when no dataset exists yet
    #[arg(long, env = "DAYS_BACK", default_value_t = DEFAULT_DAYS_BACK)]
    days_back: u32,

    /// Maximum days covered by one query
    #[arg(long, env = "DAYS_PER_BATCH", default_value_t = NonZeroU32::new(DEFAULT_DAYS_PER_BATCH).unwrap_or(NonZeroU32::MIN))]
    days_per_batch: NonZeroU32,

    /// Source table as project.dataset.table
    #[arg(long, env = "BQ_TABLE", default_value = DEFAULT_TABLE)]
    table: TableId,

    /// Which row wins when a fetched day is already stored
    #[arg(long, env = "DEDUP_POLICY", value_enum, default_value_t = DedupPolicy::KeepFirst)]
    dedup: DedupPolicy,

    /// Where the dataset is stored
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::Gcs)]
    store: StoreBackend,

    /// Root directory for the local store backend
    #[arg(long, env = "STORE_ROOT")]
    store_root: Option<PathBuf>,

    /// Override the GCS API endpoint (e.g. an emulator)
    #[arg(long, env = "GCS_ENDPOINT")]
    gcs_endpoint: Option<String>,

    /// Where daily counts are queried from
    #[arg(long, env = "SOURCE_BACKEND", value_enum, default_value_t = SourceBackend::Bigquery)]
    source: SourceBackend,

    /// Project billed for BigQuery jobs
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    /// SQLite database for the sqlite source backend
    #[arg(long, env = "SOURCE_DB")]
    source_db: Option<PathBuf>,

    /// OAuth access token for GCS and BigQuery
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Treat this UTC date (YYYY-MM-DD) as today
    #[arg(long, hide = true)]
    today: Option<NaiveDate>,
}


impl Cli {
    /// Resolve flags and environment into the run configuration.
    pub fn into_config(self) -> AppConfig {
        AppConfig {
            sync: SyncConfig {
                location: ObjectLocation::new(self.bucket, self.blob),
                days_back: self.days_back,
                days_per_batch: self.days_per_batch,
                dedup: self.dedup,
            },
            store: StoreConfig {
                backend: self.store,
                root: self.store_root.unwrap_or_else(default_store_root),
                gcs_endpoint: self.gcs_endpoint,
                access_token: self.access_token.clone(),
            },
            source: SourceConfig {
                backend: self.source,
                table: self.table,
                billing_project: self.project,
                access_token: self.access_token,
                db_path: self.source_db.unwrap_or_else(default_source_db_path),
            },
            today: self.today,
        }
    }
}


/// Run one sync and return the status line.
pub fn sync(config: &AppConfig) -> Result<SyncOutcome> {
    let store = config.store.open()?;
    let source = config.source.open()?;

    info!(
        location = %config.sync.location,
        store = ?config.store.backend,
        source = ?config.source.backend,
        table = %config.source.table,
        "starting sync"
    );

    let clock: Box<dyn Clock> = match config.today {
        Some(day) => Box::new(PinnedClock(day)),
        None => Box::new(UtcClock),
    };

    let outcome = SyncProcedure::new(&config.sync, store.as_ref(), source.as_ref(), clock.as_ref())
        .run()
        .with_context(|| format!("Sync of {} failed", config.sync.location))?;

    if let SyncOutcome::Updated { total_rows, through, .. } = &outcome {
        info!(new_rows = outcome.new_rows(), total_rows, %through, "dataset written");
    } else {
        info!(location = %config.sync.location, "store left untouched");
    }

    Ok(outcome)
}


/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.into_config();

    let outcome = sync(&config)?;
    println!("{outcome}");

    Ok(())
}
