//! Incremental sync of the daily series from a source into cold storage.

mod batch;
mod procedure;

#[allow(unused_imports)]
pub use batch::{fetch_start, plan_batches};
#[allow(unused_imports)]
pub use procedure::{Clock, PinnedClock, SyncError, SyncOutcome, SyncProcedure, UtcClock};
