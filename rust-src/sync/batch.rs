//! Gap computation and batch planning.

use std::num::NonZeroU32;

use chrono::{Days, NaiveDate};

use crate::models::{Dataset, DateRange};


/// First day that still needs fetching.
///
/// Resumes the day after the last stored day; with nothing stored, starts
/// `days_back` days before `today`, clamped to the earliest representable date.
pub fn fetch_start(existing: Option<&Dataset>, today: NaiveDate, days_back: u32) -> NaiveDate {
    existing.and_then(Dataset::resume_day).unwrap_or_else(|| {
        today
            .checked_sub_days(Days::new(u64::from(days_back)))
            .unwrap_or(NaiveDate::MIN)
    })
}


/// Split `[start, today]` into consecutive ranges of at most `days_per_batch`
/// days. The last range is truncated at `today`. Empty when `start > today`.
pub fn plan_batches(start: NaiveDate, today: NaiveDate, days_per_batch: NonZeroU32) -> Vec<DateRange> {
    let span = Days::new(u64::from(days_per_batch.get()) - 1);
    let mut batches = Vec::new();

    let mut batch_start = start;
    while batch_start <= today {
        let batch_end = batch_start
            .checked_add_days(span)
            .map_or(today, |end| end.min(today));
        batches.push(DateRange::new(batch_start, batch_end));
        match batch_end.succ_opt() {
            Some(next) => batch_start = next,
            None => break,
        }
    }

    batches
}
