//! Full-mailbox sync engine
//!
//! Lists every remote id, fetches content in bounded batches and stores it
//! encrypted with conflict-skip writes, so a run can be repeated safely.

mod cancel;
mod collector;
mod coordinator;
mod fetcher;
mod job;
mod persister;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::CancelToken;
pub use collector::{IdCollection, collect_all_ids};
pub use coordinator::{
    CancelOutcome, StartSyncError, SyncCoordinator, SyncReport, SyncStarted, SyncStatus,
};
pub use fetcher::{
    BatchFetch, ContentFetcher, FetchError, FetchOutcome, FetchStrategy, ParallelFetch,
    SequentialFetch, SkipReason,
};
pub use job::{ProgressMath, ProgressSnapshot, SyncJob, SyncPhase};
pub use persister::{BatchPersister, PersistStats};
pub use registry::JobRegistry;
