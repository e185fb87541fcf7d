//! Domain models for the daily transaction count series.

mod daily_count;

#[allow(unused_imports)]
pub use daily_count::{DailyCountRow, Dataset, DateRange, DedupPolicy, MergeReport};
