//! Daily transaction count rows and the sorted, de-duplicated dataset.

use std::fmt;

use chrono::{Duration, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};


/// Transaction count for a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCountRow {
    pub day: NaiveDate,
    pub tx_count: u64,
}


impl DailyCountRow {
    pub fn new(day: NaiveDate, tx_count: u64) -> Self {
        Self { day, tx_count }
    }
}


/// Which row survives when two rows share a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DedupPolicy {
    /// The earliest row in concatenation order wins (stored data beats fetched data).
    #[default]
    KeepFirst,
    /// The latest row in concatenation order wins (fetched data beats stored data).
    KeepLast,
}


/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}


impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of days covered, counting both ends.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}


impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}


/// Outcome of merging fetched rows into a stored dataset.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub dataset: Dataset,
    /// Days that appeared more than once before de-duplication.
    pub collisions: Vec<NaiveDate>,
}


/// A series of daily rows.
///
/// Days are unique and strictly ascending. Every constructor normalizes its
/// input, so a `Dataset` value always satisfies both properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    rows: Vec<DailyCountRow>,
}


impl Dataset {
    /// Build a dataset from rows in arbitrary order.
    pub fn from_rows(rows: Vec<DailyCountRow>, policy: DedupPolicy) -> Self {
        normalize(rows, policy).0
    }

    /// Concatenate `new_rows` after the stored rows, then de-duplicate and sort.
    ///
    /// With no stored dataset the result is just the normalized fetched rows.
    pub fn merge(
        existing: Option<&Dataset>,
        new_rows: &[DailyCountRow],
        policy: DedupPolicy,
    ) -> MergeReport {
        let mut all = Vec::with_capacity(
            existing.map_or(0, |d| d.len()) + new_rows.len(),
        );
        if let Some(existing) = existing {
            all.extend_from_slice(&existing.rows);
        }
        all.extend_from_slice(new_rows);

        let (dataset, collisions) = normalize(all, policy);
        MergeReport { dataset, collisions }
    }

    pub fn rows(&self) -> &[DailyCountRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.day)
    }

    /// Most recent day present, if any.
    pub fn last_day(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.day)
    }

    /// Day after the last stored one, where an incremental fetch resumes.
    pub fn resume_day(&self) -> Option<NaiveDate> {
        self.last_day().map(|d| d + Duration::days(1))
    }

    pub fn total_tx_count(&self) -> u64 {
        self.rows.iter().map(|r| r.tx_count).sum()
    }
}


/// Stable sort by day, then collapse runs of equal days according to `policy`.
fn normalize(mut rows: Vec<DailyCountRow>, policy: DedupPolicy) -> (Dataset, Vec<NaiveDate>) {
    rows.sort_by_key(|r| r.day);

    let mut out: Vec<DailyCountRow> = Vec::with_capacity(rows.len());
    let mut collisions = Vec::new();

    for row in rows {
        match out.last_mut() {
            Some(prev) if prev.day == row.day => {
                if collisions.last() != Some(&row.day) {
                    collisions.push(row.day);
                }
                if policy == DedupPolicy::KeepLast {
                    *prev = row;
                }
            }
            _ => out.push(row),
        }
    }

    (Dataset { rows: out }, collisions)
}
