//! Run settings, defaults, and backend construction.

use std::num::NonZeroU32;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::ValueEnum;

use crate::models::DedupPolicy;
use crate::source::{AnalyticsSource, BigQuerySource, SqliteSource, TableId};
use crate::storage::{ColdStore, FsStore, GcsStore, ObjectLocation};


/// Bucket (or local container directory) holding the dataset.
pub const DEFAULT_CONTAINER: &str = "crypto-data-bucket-xyz";

/// Object key of the dataset inside the container.
pub const DEFAULT_KEY: &str = "onchain_data/eth_daily_tx_count.csv";

/// Lookback window on a cold start, in days.
pub const DEFAULT_DAYS_BACK: u32 = 30;

/// Widest date span requested in one query.
pub const DEFAULT_DAYS_PER_BATCH: u32 = 7;

/// Warehouse table holding one row per transaction.
pub const DEFAULT_TABLE: &str =
    "bigquery-public-data.goog_blockchain_ethereum_mainnet_us.transactions";


/// Get the default root directory for the local store backend.
pub fn default_store_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".eth-tx-sync")
        .join("store")
}


/// Get the default SQLite database for the local source backend.
pub fn default_source_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".eth-tx-sync")
        .join("transactions.db")
}


/// Missing or inconsistent settings detected before a run starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{backend} backend needs an access token (set GOOGLE_OAUTH_ACCESS_TOKEN)")]
    MissingToken { backend: &'static str },

    #[error("bigquery backend needs a billing project (set GOOGLE_CLOUD_PROJECT)")]
    MissingProject,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Google Cloud Storage bucket
    Gcs,
    /// Directory tree on local disk
    Local,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceBackend {
    /// BigQuery `jobs.query` API
    Bigquery,
    /// Local SQLite export
    Sqlite,
}


/// Settings that drive the sync procedure itself.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub location: ObjectLocation,
    pub days_back: u32,
    pub days_per_batch: NonZeroU32,
    pub dedup: DedupPolicy,
}


impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            location: ObjectLocation::new(DEFAULT_CONTAINER, DEFAULT_KEY),
            days_back: DEFAULT_DAYS_BACK,
            days_per_batch: NonZeroU32::new(DEFAULT_DAYS_PER_BATCH).unwrap_or(NonZeroU32::MIN),
            dedup: DedupPolicy::default(),
        }
    }
}


#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub root: PathBuf,
    pub gcs_endpoint: Option<String>,
    pub access_token: Option<String>,
}


impl StoreConfig {
    /// Build the configured store.
    pub fn open(&self) -> Result<Box<dyn ColdStore>> {
        match self.backend {
            StoreBackend::Local => Ok(Box::new(FsStore::new(&self.root))),
            StoreBackend::Gcs => {
                let token = self
                    .access_token
                    .clone()
                    .ok_or(ConfigError::MissingToken { backend: "gcs" })?;
                let store = match &self.gcs_endpoint {
                    Some(endpoint) => GcsStore::with_endpoint(endpoint, token),
                    None => GcsStore::new(token),
                }
                .context("Failed to create GCS client")?;
                Ok(Box::new(store))
            }
        }
    }
}


#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub backend: SourceBackend,
    pub table: TableId,
    pub billing_project: Option<String>,
    pub access_token: Option<String>,
    pub db_path: PathBuf,
}


impl SourceConfig {
    /// Build the configured source.
    pub fn open(&self) -> Result<Box<dyn AnalyticsSource>> {
        match self.backend {
            SourceBackend::Sqlite => {
                let source = SqliteSource::open(&self.db_path, self.table.table())
                    .with_context(|| {
                        format!("Failed to open source database: {}", self.db_path.display())
                    })?;
                Ok(Box::new(source))
            }
            SourceBackend::Bigquery => {
                let token = self
                    .access_token
                    .clone()
                    .ok_or(ConfigError::MissingToken { backend: "bigquery" })?;
                let project = self
                    .billing_project
                    .clone()
                    .ok_or(ConfigError::MissingProject)?;
                let source = BigQuerySource::new(self.table.clone(), project, token)
                    .context("Failed to create BigQuery client")?;
                Ok(Box::new(source))
            }
        }
    }
}


/// Everything resolved from flags and environment at process start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub source: SourceConfig,
    /// Run as of this UTC date instead of the wall clock.
    pub today: Option<NaiveDate>,
}
