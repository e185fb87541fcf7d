//! Analytical sources that aggregate transactions per day.

mod bigquery;
mod sqlite;
mod table;

use chrono::NaiveDate;

use crate::models::DailyCountRow;

pub use bigquery::BigQuerySource;
pub use sqlite::SqliteSource;
#[allow(unused_imports)]
pub use table::{TableId, TableIdError};


/// Errors raised while querying an [`AnalyticsSource`].
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("query service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("query response could not be decoded: {0}")]
    Json(#[from] serde_json::Error),

    #[error("query returned a malformed row at index {index}: {reason}")]
    InvalidRow { index: usize, reason: String },

    #[error("invalid query endpoint {endpoint:?}: {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("query job reported errors: {0}")]
    Job(String),

    #[error("SQLite query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
}


/// A queryable source of daily transaction counts.
pub trait AnalyticsSource {
    /// Per-day counts for `start <= day <= end`, ascending by day.
    ///
    /// Days with no transactions are simply absent from the result.
    fn query(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyCountRow>, QueryError>;
}
