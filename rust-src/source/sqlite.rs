//! Local SQLite backend.
//!
//! Aggregates a `block_timestamp` column the same way the warehouse query
//! does, which makes it usable for offline runs against an exported table.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags};
use tracing::debug;

use super::{AnalyticsSource, QueryError};
use crate::models::DailyCountRow;


/// Transactions table in a SQLite database file.
#[derive(Debug)]
pub struct SqliteSource {
    conn: Connection,
    path: PathBuf,
    table: String,
}


impl SqliteSource {
    /// Open `db_path` read-only. `table` must already be validated as a bare
    /// identifier (see [`super::TableId::table`]).
    pub fn open(db_path: &Path, table: &str) -> Result<Self, QueryError> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Ok(Self {
            conn,
            path: db_path.to_path_buf(),
            table: table.to_string(),
        })
    }

    fn daily_count_sql(&self) -> String {
        format!(
            "SELECT date(block_timestamp) AS day, COUNT(*) AS tx_count
             FROM \"{}\"
             WHERE date(block_timestamp) BETWEEN ?1 AND ?2
             GROUP BY day
             ORDER BY day",
            self.table
        )
    }
}


impl AnalyticsSource for SqliteSource {
    fn query(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyCountRow>, QueryError> {
        debug!(db = %self.path.display(), %start, %end, "querying SQLite");

        let mut stmt = self.conn.prepare(&self.daily_count_sql())?;
        let raw: Vec<(String, i64)> = stmt
            .query_map(
                params![start.format("%Y-%m-%d").to_string(), end.format("%Y-%m-%d").to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<_, _>>()?;

        raw.into_iter()
            .enumerate()
            .map(|(index, (day, count))| -> Result<DailyCountRow, QueryError> {
                let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|e| {
                    QueryError::InvalidRow {
                        index,
                        reason: format!("bad day {day:?}: {e}"),
                    }
                })?;
                let tx_count = u64::try_from(count).map_err(|_| QueryError::InvalidRow {
                    index,
                    reason: format!("negative tx_count {count}"),
                })?;
                Ok(DailyCountRow::new(day, tx_count))
            })
            .collect()
    }
}
