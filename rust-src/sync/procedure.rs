//! The read → gap → fetch → merge → write procedure.

use std::fmt;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::batch::{fetch_start, plan_batches};
use crate::config::SyncConfig;
use crate::data::{decode_dataset, encode_dataset, CodecError, CSV_CONTENT_TYPE};
use crate::models::{DailyCountRow, Dataset, DateRange};
use crate::source::{AnalyticsSource, QueryError};
use crate::storage::{ColdStore, ObjectLocation, StoreError};


/// Source of "today" as a UTC calendar date.
pub trait Clock {
    fn today(&self) -> NaiveDate;
}


/// Wall clock, truncated to the UTC date.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtcClock;


impl Clock for UtcClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}


/// A fixed date, for replaying a run as of a given day.
#[derive(Debug, Clone, Copy)]
pub struct PinnedClock(pub NaiveDate);


impl Clock for PinnedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}


/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The stored series already reaches today. Nothing was queried.
    AlreadyCurrent,
    /// Every batch came back empty. Nothing was written.
    NoNewData { batches: usize },
    /// The merged series was written back.
    Updated {
        /// Rows returned by the batch queries, before merging.
        new_rows: usize,
        /// Rows in the dataset as written.
        total_rows: usize,
        through: NaiveDate,
    },
}


impl SyncOutcome {
    pub fn new_rows(&self) -> usize {
        match self {
            SyncOutcome::Updated { new_rows, .. } => *new_rows,
            _ => 0,
        }
    }
}


impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::AlreadyCurrent | SyncOutcome::NoNewData { .. } => {
                write!(f, "No update needed.")
            }
            SyncOutcome::Updated { new_rows, .. } => {
                write!(f, "Update completed. New rows: {new_rows}.")
            }
        }
    }
}


/// Why a run failed. Nothing is written unless every batch succeeded.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to read {location}: {source}")]
    StoreRead {
        location: ObjectLocation,
        source: StoreError,
    },

    #[error("stored dataset at {location} is unreadable: {source}")]
    Decode {
        location: ObjectLocation,
        source: CodecError,
    },

    #[error("query for {range} failed: {source}")]
    QueryFailed {
        range: DateRange,
        source: QueryError,
    },

    #[error("failed to encode dataset: {0}")]
    Encode(#[source] CodecError),

    #[error("failed to write {location}: {source}")]
    StoreWrite {
        location: ObjectLocation,
        source: StoreError,
    },
}


/// One sync run over a store location.
pub struct SyncProcedure<'a> {
    config: &'a SyncConfig,
    store: &'a dyn ColdStore,
    source: &'a dyn AnalyticsSource,
    clock: &'a dyn Clock,
}


impl<'a> SyncProcedure<'a> {
    pub fn new(
        config: &'a SyncConfig,
        store: &'a dyn ColdStore,
        source: &'a dyn AnalyticsSource,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            config,
            store,
            source,
            clock,
        }
    }

    /// Bring the stored series up to today.
    pub fn run(&self) -> Result<SyncOutcome, SyncError> {
        let existing = self.load()?;

        let today = self.clock.today();
        let start = fetch_start(existing.as_ref(), today, self.config.days_back);
        if start > today {
            info!("No new data to fetch.");
            return Ok(SyncOutcome::AlreadyCurrent);
        }

        let batches = plan_batches(start, today, self.config.days_per_batch);
        let new_rows = self.fetch(&batches)?;
        if new_rows.is_empty() {
            info!("No new data found.");
            return Ok(SyncOutcome::NoNewData {
                batches: batches.len(),
            });
        }

        let report = Dataset::merge(existing.as_ref(), &new_rows, self.config.dedup);
        if !report.collisions.is_empty() {
            warn!(
                days = ?report.collisions,
                policy = ?self.config.dedup,
                "dropped duplicate rows while merging"
            );
        }

        self.persist(&report.dataset)?;

        info!(
            first_day = ?report.dataset.first_day(),
            total_rows = report.dataset.len(),
            total_tx = report.dataset.total_tx_count(),
            "Updated data up to {today}. New rows: {}.",
            new_rows.len()
        );

        Ok(SyncOutcome::Updated {
            new_rows: new_rows.len(),
            total_rows: report.dataset.len(),
            through: today,
        })
    }

    /// Load the stored dataset, or `None` when no object exists yet.
    pub fn load(&self) -> Result<Option<Dataset>, SyncError> {
        let ObjectLocation { container, key } = &self.config.location;
        let read_err = |source| SyncError::StoreRead {
            location: self.config.location.clone(),
            source,
        };

        if !self.store.exists(container, key).map_err(read_err)? {
            debug!(location = %self.config.location, "no stored dataset");
            return Ok(None);
        }

        let bytes = match self.store.read(container, key) {
            Ok(bytes) => bytes,
            // Removed between the existence check and the read.
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(read_err(e)),
        };

        let dataset = decode_dataset(&bytes, self.config.dedup).map_err(|source| {
            SyncError::Decode {
                location: self.config.location.clone(),
                source,
            }
        })?;
        debug!(
            location = %self.config.location,
            rows = dataset.len(),
            last_day = ?dataset.last_day(),
            "loaded stored dataset"
        );

        Ok(Some(dataset))
    }

    /// Query every batch in order. The first failure aborts the run.
    fn fetch(&self, batches: &[DateRange]) -> Result<Vec<DailyCountRow>, SyncError> {
        let mut new_rows = Vec::new();

        for range in batches {
            info!(days = range.days(), "Fetching batch: {range}");
            let rows = self
                .source
                .query(range.start, range.end)
                .map_err(|source| SyncError::QueryFailed {
                    range: *range,
                    source,
                })?;

            if rows.is_empty() {
                debug!(%range, "batch returned no rows");
                continue;
            }

            let outside = rows.iter().filter(|r| !range.contains(r.day)).count();
            if outside > 0 {
                warn!(%range, outside, "source returned rows outside the requested range");
            }
            new_rows.extend(rows);
        }

        Ok(new_rows)
    }

    fn persist(&self, dataset: &Dataset) -> Result<(), SyncError> {
        let ObjectLocation { container, key } = &self.config.location;
        let bytes = encode_dataset(dataset).map_err(SyncError::Encode)?;

        self.store
            .write(container, key, &bytes, CSV_CONTENT_TYPE)
            .map_err(|source| SyncError::StoreWrite {
                location: self.config.location.clone(),
                source,
            })
    }
}


#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::{BTreeMap, HashMap};
    use std::num::NonZeroU32;

    use chrono::{Datelike, Duration};

    use super::*;
    use crate::models::DedupPolicy;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[derive(Default)]
    struct MemoryStore {
        objects: RefCell<HashMap<(String, String), (Vec<u8>, String)>>,
        writes: Cell<usize>,
        fail_reads: bool,
        fail_writes: bool,
    }

    impl MemoryStore {
        fn with_csv(config: &SyncConfig, csv: &str) -> Self {
            let store = Self::default();
            store.objects.borrow_mut().insert(
                (config.location.container.clone(), config.location.key.clone()),
                (csv.as_bytes().to_vec(), CSV_CONTENT_TYPE.to_string()),
            );
            store
        }

        fn object(&self, config: &SyncConfig) -> Option<(Vec<u8>, String)> {
            self.objects
                .borrow()
                .get(&(config.location.container.clone(), config.location.key.clone()))
                .cloned()
        }

        fn dataset(&self, config: &SyncConfig) -> Dataset {
            let (bytes, _) = self.object(config).unwrap();
            decode_dataset(&bytes, DedupPolicy::KeepFirst).unwrap()
        }

        fn io_error() -> StoreError {
            StoreError::Io {
                path: "memory".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"),
            }
        }
    }

    impl ColdStore for MemoryStore {
        fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError> {
            if self.fail_reads {
                return Err(Self::io_error());
            }
            Ok(self
                .objects
                .borrow()
                .contains_key(&(container.to_string(), key.to_string())))
        }

        fn read(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
            self.objects
                .borrow()
                .get(&(container.to_string(), key.to_string()))
                .map(|(bytes, _)| bytes.clone())
                .ok_or_else(|| StoreError::NotFound {
                    container: container.to_string(),
                    key: key.to_string(),
                })
        }

        fn write(
            &self,
            container: &str,
            key: &str,
            bytes: &[u8],
            content_type: &str,
        ) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(Self::io_error());
            }
            self.writes.set(self.writes.get() + 1);
            self.objects.borrow_mut().insert(
                (container.to_string(), key.to_string()),
                (bytes.to_vec(), content_type.to_string()),
            );
            Ok(())
        }
    }

    /// Serves counts from a fixed table and records every requested range.
    #[derive(Default)]
    struct ScriptedSource {
        counts: BTreeMap<NaiveDate, u64>,
        calls: RefCell<Vec<(NaiveDate, NaiveDate)>>,
        fail_on_call: Option<usize>,
    }

    impl ScriptedSource {
        fn with_days(from: NaiveDate, to: NaiveDate) -> Self {
            let mut counts = BTreeMap::new();
            let mut day = from;
            while day <= to {
                counts.insert(day, 1_000_000 + day.ordinal() as u64);
                day += Duration::days(1);
            }
            Self {
                counts,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(NaiveDate, NaiveDate)> {
            self.calls.borrow().clone()
        }
    }

    impl AnalyticsSource for ScriptedSource {
        fn query(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyCountRow>, QueryError> {
            let call = self.calls.borrow().len();
            self.calls.borrow_mut().push((start, end));
            if self.fail_on_call == Some(call) {
                return Err(QueryError::Status {
                    status: 503,
                    body: "backend unavailable".to_string(),
                });
            }
            Ok(self
                .counts
                .range(start..=end)
                .map(|(day, n)| DailyCountRow::new(*day, *n))
                .collect())
        }
    }

    fn config(days_back: u32, days_per_batch: u32) -> SyncConfig {
        SyncConfig {
            days_back,
            days_per_batch: NonZeroU32::new(days_per_batch).unwrap(),
            ..SyncConfig::default()
        }
    }

    fn assert_sorted_unique(dataset: &Dataset) {
        assert!(dataset.rows().windows(2).all(|w| w[0].day < w[1].day));
    }

    const FIVE_DAYS: &str = "day,tx_count\n\
        2024-01-01,100\n2024-01-02,200\n2024-01-03,300\n2024-01-04,400\n2024-01-05,500\n";

    #[test]
    fn test_resume_after_stored_days() {
        let config = config(30, 7);
        let store = MemoryStore::with_csv(&config, FIVE_DAYS);
        let source = ScriptedSource::with_days(d("2024-01-01"), d("2024-01-10"));
        let clock = PinnedClock(d("2024-01-10"));

        let outcome = SyncProcedure::new(&config, &store, &source, &clock).run().unwrap();

        assert_eq!(source.calls(), vec![(d("2024-01-06"), d("2024-01-10"))]);
        assert_eq!(outcome.to_string(), "Update completed. New rows: 5.");
        assert_eq!(outcome.new_rows(), 5);

        let dataset = store.dataset(&config);
        assert_eq!(dataset.len(), 10);
        assert_eq!(dataset.first_day(), Some(d("2024-01-01")));
        assert_eq!(dataset.last_day(), Some(d("2024-01-10")));
        assert_eq!(dataset.rows()[0].tx_count, 100);
        assert_sorted_unique(&dataset);

        let (_, content_type) = store.object(&config).unwrap();
        assert_eq!(content_type, "text/csv");
    }

    #[test]
    fn test_cold_start_fetches_window_in_batches() {
        let config = config(30, 7);
        let store = MemoryStore::default();
        let source = ScriptedSource::with_days(d("2023-12-01"), d("2024-02-01"));
        let today = d("2024-02-01");
        let clock = PinnedClock(today);

        let outcome = SyncProcedure::new(&config, &store, &source, &clock).run().unwrap();

        assert_eq!(
            source.calls(),
            vec![
                (d("2024-01-02"), d("2024-01-08")),
                (d("2024-01-09"), d("2024-01-15")),
                (d("2024-01-16"), d("2024-01-22")),
                (d("2024-01-23"), d("2024-01-29")),
                (d("2024-01-30"), d("2024-02-01")),
            ]
        );
        assert_eq!(outcome.new_rows(), 31);

        let dataset = store.dataset(&config);
        assert!(dataset.first_day().unwrap() >= today - Duration::days(30));
        assert_eq!(dataset.last_day(), Some(today));
        assert_sorted_unique(&dataset);
    }

    #[test]
    fn test_current_dataset_is_noop() {
        let config = config(30, 7);
        let store = MemoryStore::with_csv(&config, FIVE_DAYS);
        let source = ScriptedSource::with_days(d("2024-01-01"), d("2024-01-05"));
        let clock = PinnedClock(d("2024-01-05"));

        let outcome = SyncProcedure::new(&config, &store, &source, &clock).run().unwrap();

        assert_eq!(outcome, SyncOutcome::AlreadyCurrent);
        assert_eq!(outcome.to_string(), "No update needed.");
        assert!(source.calls().is_empty());
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let config = config(30, 7);
        let store = MemoryStore::default();
        let source = ScriptedSource::with_days(d("2024-01-01"), d("2024-02-01"));
        let clock = PinnedClock(d("2024-02-01"));
        let procedure = SyncProcedure::new(&config, &store, &source, &clock);

        assert!(matches!(procedure.run().unwrap(), SyncOutcome::Updated { .. }));
        let first = store.object(&config).unwrap();
        let calls_after_first = source.calls().len();

        let second = procedure.run().unwrap();
        assert_eq!(second.to_string(), "No update needed.");
        assert_eq!(store.writes.get(), 1);
        assert_eq!(source.calls().len(), calls_after_first);
        assert_eq!(store.object(&config).unwrap(), first);
    }

    #[test]
    fn test_gap_with_missing_source_days() {
        let config = config(30, 7);
        let store = MemoryStore::with_csv(&config, FIVE_DAYS);
        let mut source = ScriptedSource::with_days(d("2024-01-06"), d("2024-01-20"));
        source.counts.remove(&d("2024-01-09"));
        source.counts.remove(&d("2024-01-15"));
        let clock = PinnedClock(d("2024-01-20"));

        let outcome = SyncProcedure::new(&config, &store, &source, &clock).run().unwrap();
        assert_eq!(outcome.new_rows(), 13);

        let dataset = store.dataset(&config);
        let days: Vec<_> = dataset.rows().iter().map(|r| r.day).collect();
        let mut day = d("2024-01-06");
        while day <= d("2024-01-20") {
            let expected = source.counts.contains_key(&day);
            assert_eq!(days.contains(&day), expected, "day {day}");
            day += Duration::days(1);
        }
        assert_sorted_unique(&dataset);
    }

    #[test]
    fn test_all_batches_empty_writes_nothing() {
        let config = config(30, 7);
        let store = MemoryStore::with_csv(&config, FIVE_DAYS);
        let source = ScriptedSource::default();
        let clock = PinnedClock(d("2024-01-20"));

        let outcome = SyncProcedure::new(&config, &store, &source, &clock).run().unwrap();

        assert_eq!(outcome, SyncOutcome::NoNewData { batches: 3 });
        assert_eq!(outcome.to_string(), "No update needed.");
        assert_eq!(source.calls().len(), 3);
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn test_query_failure_discards_earlier_batches() {
        let config = config(30, 7);
        let store = MemoryStore::with_csv(&config, FIVE_DAYS);
        let source = ScriptedSource {
            fail_on_call: Some(1),
            ..ScriptedSource::with_days(d("2024-01-06"), d("2024-01-20"))
        };
        let clock = PinnedClock(d("2024-01-20"));

        let err = SyncProcedure::new(&config, &store, &source, &clock).run().unwrap_err();

        match err {
            SyncError::QueryFailed { range, .. } => {
                assert_eq!(range, DateRange::new(d("2024-01-13"), d("2024-01-19")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(source.calls().len(), 2);
        assert_eq!(store.writes.get(), 0);
        assert_eq!(store.object(&config).unwrap().0, FIVE_DAYS.as_bytes());
    }

    #[test]
    fn test_store_read_failure_stops_before_querying() {
        let config = config(30, 7);
        let store = MemoryStore {
            fail_reads: true,
            ..Default::default()
        };
        let source = ScriptedSource::with_days(d("2024-01-01"), d("2024-01-10"));
        let clock = PinnedClock(d("2024-01-10"));

        let err = SyncProcedure::new(&config, &store, &source, &clock).run().unwrap_err();

        assert!(matches!(err, SyncError::StoreRead { .. }));
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_store_write_failure_is_reported() {
        let config = config(30, 7);
        let store = MemoryStore {
            fail_writes: true,
            ..Default::default()
        };
        let source = ScriptedSource::with_days(d("2024-01-01"), d("2024-01-10"));
        let clock = PinnedClock(d("2024-01-10"));

        let err = SyncProcedure::new(&config, &store, &source, &clock).run().unwrap_err();
        assert!(matches!(err, SyncError::StoreWrite { .. }));
        assert!(err.to_string().contains("onchain_data/eth_daily_tx_count.csv"));
    }

    #[test]
    fn test_corrupt_stored_dataset_fails() {
        let config = config(30, 7);
        let store = MemoryStore::with_csv(&config, "day,tx_count\nnot-a-date,1\n");
        let source = ScriptedSource::default();
        let clock = PinnedClock(d("2024-01-10"));

        let err = SyncProcedure::new(&config, &store, &source, &clock).run().unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_present_but_empty_dataset_uses_window() {
        let config = config(3, 7);
        let store = MemoryStore::with_csv(&config, "day,tx_count\n");
        let source = ScriptedSource::with_days(d("2024-01-01"), d("2024-01-10"));
        let clock = PinnedClock(d("2024-01-10"));

        let procedure = SyncProcedure::new(&config, &store, &source, &clock);
        assert_eq!(procedure.load().unwrap(), Some(Dataset::default()));

        procedure.run().unwrap();
        assert_eq!(source.calls(), vec![(d("2024-01-07"), d("2024-01-10"))]);
    }

    /// Returns the same day twice per batch, as a re-aggregating source might.
    struct DoubledSource;

    impl AnalyticsSource for DoubledSource {
        fn query(&self, start: NaiveDate, _end: NaiveDate) -> Result<Vec<DailyCountRow>, QueryError> {
            Ok(vec![DailyCountRow::new(start, 1), DailyCountRow::new(start, 2)])
        }
    }

    #[test]
    fn test_duplicate_days_follow_policy() {
        let clock = PinnedClock(d("2024-01-06"));

        let first = config(30, 7);
        let store = MemoryStore::with_csv(&first, FIVE_DAYS);
        let outcome = SyncProcedure::new(&first, &store, &DoubledSource, &clock).run().unwrap();
        // Reported count is rows fetched, not rows added.
        assert_eq!(outcome.new_rows(), 2);
        let dataset = store.dataset(&first);
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.rows()[5].tx_count, 1);

        let last = SyncConfig {
            dedup: DedupPolicy::KeepLast,
            ..config(30, 7)
        };
        let store = MemoryStore::with_csv(&last, FIVE_DAYS);
        SyncProcedure::new(&last, &store, &DoubledSource, &clock).run().unwrap();
        assert_eq!(store.dataset(&last).rows()[5].tx_count, 2);
    }

    /// Re-aggregates the last stored day alongside the requested one.
    struct RestatingSource;

    impl AnalyticsSource for RestatingSource {
        fn query(&self, _start: NaiveDate, _end: NaiveDate) -> Result<Vec<DailyCountRow>, QueryError> {
            Ok(vec![
                DailyCountRow::new(d("2024-01-05"), 999),
                DailyCountRow::new(d("2024-01-06"), 600),
            ])
        }
    }

    #[test]
    fn test_restated_stored_day_follows_policy() {
        let clock = PinnedClock(d("2024-01-06"));

        let first = config(30, 7);
        let store = MemoryStore::with_csv(&first, FIVE_DAYS);
        let outcome = SyncProcedure::new(&first, &store, &RestatingSource, &clock).run().unwrap();
        assert_eq!(outcome.to_string(), "Update completed. New rows: 2.");
        let dataset = store.dataset(&first);
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.rows()[4], DailyCountRow::new(d("2024-01-05"), 500));
        assert_eq!(dataset.rows()[5], DailyCountRow::new(d("2024-01-06"), 600));

        let last = SyncConfig {
            dedup: DedupPolicy::KeepLast,
            ..config(30, 7)
        };
        let store = MemoryStore::with_csv(&last, FIVE_DAYS);
        let outcome = SyncProcedure::new(&last, &store, &RestatingSource, &clock).run().unwrap();
        assert_eq!(outcome.to_string(), "Update completed. New rows: 2.");
        let dataset = store.dataset(&last);
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.rows()[4], DailyCountRow::new(d("2024-01-05"), 999));
        assert_sorted_unique(&dataset);
    }
}
