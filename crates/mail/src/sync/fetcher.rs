//! Content retrieval for one batch of message ids
//!
//! Two strategies share one interface: [`ParallelFetch`] fans the batch out
//! over a bounded worker pool, [`SequentialFetch`] walks it one id at a time.
//! [`ContentFetcher`] runs the first and drops to the second when the
//! parallel attempt fails as a whole.

use log::{debug, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::config::SyncOptions;
use crate::gmail::{MailTransport, TransportError, normalize_message};
use crate::models::{FetchedMessage, MessageId};

/// Why an id produced no message
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The content request failed
    Transport(TransportError),
    /// The response arrived but lacked required fields
    Malformed(String),
    /// Decoding the response panicked
    Panicked,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Transport(e) => write!(f, "{}", e),
            SkipReason::Malformed(msg) => write!(f, "malformed: {}", msg),
            SkipReason::Panicked => f.write_str("worker panicked"),
        }
    }
}

/// Per-id result of a batch fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Decoded(FetchedMessage),
    Skipped { id: MessageId, reason: SkipReason },
}

impl FetchOutcome {
    pub fn id(&self) -> &MessageId {
        match self {
            FetchOutcome::Decoded(msg) => &msg.id,
            FetchOutcome::Skipped { id, .. } => id,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, FetchOutcome::Decoded(_))
    }
}

/// Failure of a strategy as a whole
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Credentials were rejected; the run cannot continue
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Nothing decoded and the provider or network looks unhealthy
    #[error("Systemic fetch failure: {0}")]
    Systemic(String),

    #[error("Worker pool failure: {0}")]
    WorkerPool(String),
}

/// A way of turning a batch of ids into per-id outcomes
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch every id in `ids`; output order need not match input order
    fn fetch(
        &self,
        transport: &dyn MailTransport,
        ids: &[MessageId],
    ) -> Result<Vec<FetchOutcome>, FetchError>;
}

/// Fetch and decode a single message
fn fetch_one(transport: &dyn MailTransport, id: &MessageId) -> FetchOutcome {
    let gmail_msg = match transport.get_message(id) {
        Ok(msg) => msg,
        Err(e) => {
            return FetchOutcome::Skipped {
                id: id.clone(),
                reason: SkipReason::Transport(e),
            };
        }
    };

    match normalize_message(gmail_msg) {
        Ok(msg) => FetchOutcome::Decoded(msg),
        Err(e) => FetchOutcome::Skipped {
            id: id.clone(),
            reason: SkipReason::Malformed(e.to_string()),
        },
    }
}

fn fetch_one_guarded(transport: &dyn MailTransport, id: &MessageId) -> Option<FetchOutcome> {
    catch_unwind(AssertUnwindSafe(|| fetch_one(transport, id))).ok()
}

/// Authentication failures abort the batch in every strategy
fn check_unauthorized(outcomes: &[FetchOutcome]) -> Result<(), FetchError> {
    for outcome in outcomes {
        if let FetchOutcome::Skipped {
            reason: SkipReason::Transport(TransportError::Unauthorized(msg)),
            ..
        } = outcome
        {
            return Err(FetchError::Unauthorized(msg.clone()));
        }
    }
    Ok(())
}

/// Bounded fan-out over a dedicated rayon pool
pub struct ParallelFetch {
    pool: Result<ThreadPool, String>,
}

impl ParallelFetch {
    /// Build a pool with `concurrency` workers
    ///
    /// A pool that fails to build is reported on every `fetch` call so the
    /// fallback strategy takes over.
    pub fn new(concurrency: usize) -> Self {
        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("mail-fetch-{}", i))
            .build()
            .map_err(|e| e.to_string());

        if let Err(e) = &pool {
            warn!("[FETCH] Could not build fetch pool: {}", e);
        }

        Self { pool }
    }
}

impl FetchStrategy for ParallelFetch {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn fetch(
        &self,
        transport: &dyn MailTransport,
        ids: &[MessageId],
    ) -> Result<Vec<FetchOutcome>, FetchError> {
        let pool = self
            .pool
            .as_ref()
            .map_err(|e| FetchError::WorkerPool(e.clone()))?;

        let results: Vec<Option<FetchOutcome>> = pool.install(|| {
            ids.par_iter()
                .map(|id| fetch_one_guarded(transport, id))
                .collect()
        });

        let outcomes: Vec<FetchOutcome> = results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| FetchError::WorkerPool("fetch worker panicked".to_string()))?;

        check_unauthorized(&outcomes)?;

        let decoded = outcomes.iter().filter(|o| o.is_decoded()).count();
        if decoded == 0 {
            let systemic = outcomes.iter().find_map(|o| match o {
                FetchOutcome::Skipped {
                    reason: SkipReason::Transport(e),
                    ..
                } if e.is_systemic() => Some(e),
                _ => None,
            });
            if let Some(e) = systemic {
                return Err(FetchError::Systemic(e.to_string()));
            }
        }

        Ok(outcomes)
    }
}

/// One id at a time, skipping whatever fails
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialFetch;

impl FetchStrategy for SequentialFetch {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn fetch(
        &self,
        transport: &dyn MailTransport,
        ids: &[MessageId],
    ) -> Result<Vec<FetchOutcome>, FetchError> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = fetch_one_guarded(transport, id).unwrap_or_else(|| {
                FetchOutcome::Skipped {
                    id: id.clone(),
                    reason: SkipReason::Panicked,
                }
            });

            if let FetchOutcome::Skipped {
                reason: SkipReason::Transport(TransportError::Unauthorized(msg)),
                ..
            } = &outcome
            {
                return Err(FetchError::Unauthorized(msg.clone()));
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Outcomes of one batch plus how they were obtained
#[derive(Debug, Default)]
pub struct BatchFetch {
    pub outcomes: Vec<FetchOutcome>,
    pub used_fallback: bool,
}

impl BatchFetch {
    pub fn decoded(&self) -> impl Iterator<Item = &FetchedMessage> {
        self.outcomes.iter().filter_map(|o| match o {
            FetchOutcome::Decoded(msg) => Some(msg),
            FetchOutcome::Skipped { .. } => None,
        })
    }

    pub fn into_decoded(self) -> Vec<FetchedMessage> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o {
                FetchOutcome::Decoded(msg) => Some(msg),
                FetchOutcome::Skipped { .. } => None,
            })
            .collect()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_decoded()).count()
    }
}

/// Primary strategy with a fallback for when it fails outright
pub struct ContentFetcher {
    primary: Box<dyn FetchStrategy>,
    fallback: Box<dyn FetchStrategy>,
}

impl ContentFetcher {
    /// Parallel fetch sized by `fetch_concurrency`, falling back to sequential
    pub fn new(options: &SyncOptions) -> Self {
        Self::with_strategies(
            Box::new(ParallelFetch::new(options.fetch_concurrency)),
            Box::new(SequentialFetch),
        )
    }

    pub fn with_strategies(
        primary: Box<dyn FetchStrategy>,
        fallback: Box<dyn FetchStrategy>,
    ) -> Self {
        Self { primary, fallback }
    }

    /// Fetch one batch
    ///
    /// Only an authentication failure is returned as an error. Individual
    /// ids that fail are reported as [`FetchOutcome::Skipped`].
    pub fn fetch_batch(
        &self,
        transport: &dyn MailTransport,
        ids: &[MessageId],
    ) -> Result<BatchFetch, FetchError> {
        if ids.is_empty() {
            return Ok(BatchFetch::default());
        }

        let (outcomes, used_fallback) = match self.primary.fetch(transport, ids) {
            Ok(outcomes) => (outcomes, false),
            Err(FetchError::Unauthorized(msg)) => return Err(FetchError::Unauthorized(msg)),
            Err(e) => {
                warn!(
                    "[FETCH] {} fetch of {} ids failed ({}), retrying {}",
                    self.primary.name(),
                    ids.len(),
                    e,
                    self.fallback.name()
                );
                (self.fallback.fetch(transport, ids)?, true)
            }
        };

        for outcome in &outcomes {
            if let FetchOutcome::Skipped { id, reason } = outcome {
                warn!("[FETCH] Dropping message {}: {}", id, reason);
            }
        }

        let batch = BatchFetch {
            outcomes,
            used_fallback,
        };
        debug!(
            "[FETCH] Batch of {}: {} decoded, {} dropped",
            ids.len(),
            batch.outcomes.len() - batch.skipped_count(),
            batch.skipped_count()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{ScriptedTransport, ids};

    /// A strategy that always fails as a whole
    struct Broken;

    impl FetchStrategy for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn fetch(
            &self,
            _transport: &dyn MailTransport,
            _ids: &[MessageId],
        ) -> Result<Vec<FetchOutcome>, FetchError> {
            Err(FetchError::WorkerPool("pool gone".into()))
        }
    }

    #[test]
    fn test_parallel_fetch_decodes_all() {
        let transport = ScriptedTransport::with_messages(25);
        let fetcher = ContentFetcher::new(&SyncOptions::default());

        let batch = fetcher.fetch_batch(&transport, &ids(0..25)).unwrap();
        assert!(!batch.used_fallback);
        assert_eq!(batch.outcomes.len(), 25);
        assert_eq!(batch.decoded().count(), 25);
        assert_eq!(transport.get_calls(), 25);
    }

    #[test]
    fn test_bad_ids_are_skipped_not_fatal() {
        let transport = ScriptedTransport::with_messages(10)
            .fail_message("m0003", TransportError::NotFound(MessageId::new("m0003")))
            .malformed_message("m0007");
        let fetcher = ContentFetcher::new(&SyncOptions::default());

        let batch = fetcher.fetch_batch(&transport, &ids(0..10)).unwrap();
        assert!(!batch.used_fallback);
        assert_eq!(batch.decoded().count(), 8);
        assert_eq!(batch.skipped_count(), 2);

        let mut skipped: Vec<_> = batch
            .outcomes
            .iter()
            .filter(|o| !o.is_decoded())
            .map(|o| o.id().as_str().to_string())
            .collect();
        skipped.sort();
        assert_eq!(skipped, vec!["m0003", "m0007"]);
    }

    #[test]
    fn test_systemic_failure_triggers_sequential_fallback() {
        // Every call fails until the first 5 attempts are used up, so the
        // parallel pass of 5 decodes nothing and the sequential pass succeeds
        let transport = ScriptedTransport::with_messages(5).fail_first_gets(5);
        let fetcher = ContentFetcher::new(&SyncOptions::default());

        let batch = fetcher.fetch_batch(&transport, &ids(0..5)).unwrap();
        assert!(batch.used_fallback);
        assert_eq!(batch.decoded().count(), 5);
        assert_eq!(transport.get_calls(), 10);
    }

    #[test]
    fn test_partial_systemic_failure_does_not_fall_back() {
        let transport = ScriptedTransport::with_messages(4).fail_message(
            "m0001",
            TransportError::Http { status: 503 },
        );
        let fetcher = ContentFetcher::new(&SyncOptions::default());

        let batch = fetcher.fetch_batch(&transport, &ids(0..4)).unwrap();
        assert!(!batch.used_fallback);
        assert_eq!(batch.decoded().count(), 3);
    }

    #[test]
    fn test_fallback_returns_subset_without_raising() {
        let transport = ScriptedTransport::with_messages(6)
            .fail_message("m0002", TransportError::Network("reset".into()))
            .malformed_message("m0004");
        let fetcher = ContentFetcher::with_strategies(Box::new(Broken), Box::new(SequentialFetch));

        let batch = fetcher.fetch_batch(&transport, &ids(0..6)).unwrap();
        assert!(batch.used_fallback);
        assert_eq!(batch.outcomes.len(), 6);
        assert_eq!(batch.decoded().count(), 4);
    }

    #[test]
    fn test_unauthorized_is_fatal_in_parallel() {
        let transport = ScriptedTransport::with_messages(5)
            .fail_message("m0002", TransportError::Unauthorized("expired".into()));
        let fetcher = ContentFetcher::new(&SyncOptions::default());

        let err = fetcher.fetch_batch(&transport, &ids(0..5)).unwrap_err();
        assert!(matches!(err, FetchError::Unauthorized(_)));
    }

    #[test]
    fn test_unauthorized_is_fatal_in_fallback() {
        let transport = ScriptedTransport::with_messages(5)
            .fail_message("m0002", TransportError::Unauthorized("expired".into()));
        let fetcher = ContentFetcher::with_strategies(Box::new(Broken), Box::new(SequentialFetch));

        let err = fetcher.fetch_batch(&transport, &ids(0..5)).unwrap_err();
        assert!(matches!(err, FetchError::Unauthorized(_)));
        // Sequential stops at the first rejected id
        assert_eq!(transport.get_calls(), 3);
    }

    #[test]
    fn test_panicking_worker_falls_back() {
        let transport = ScriptedTransport::with_messages(3).panic_on("m0001");
        let fetcher = ContentFetcher::new(&SyncOptions::default());

        let batch = fetcher.fetch_batch(&transport, &ids(0..3)).unwrap();
        assert!(batch.used_fallback);
        assert_eq!(batch.decoded().count(), 2);
        assert!(batch.outcomes.iter().any(|o| matches!(
            o,
            FetchOutcome::Skipped {
                reason: SkipReason::Panicked,
                ..
            }
        )));
    }

    #[test]
    fn test_empty_batch() {
        let transport = ScriptedTransport::with_messages(0);
        let fetcher = ContentFetcher::new(&SyncOptions::default());
        let batch = fetcher.fetch_batch(&transport, &[]).unwrap();
        assert!(batch.outcomes.is_empty());
        assert_eq!(transport.get_calls(), 0);
    }
}
