//! In-memory state of one active sync run

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;

use super::CancelToken;

/// Lifecycle of a sync run
///
/// `Idle -> Collecting -> Fetching -> Finalizing -> Completed`, with
/// `Failed` and `Cancelled` reachable from any non-terminal phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Collecting,
    Fetching,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl SyncPhase {
    const ALL: [SyncPhase; 7] = [
        SyncPhase::Idle,
        SyncPhase::Collecting,
        SyncPhase::Fetching,
        SyncPhase::Finalizing,
        SyncPhase::Completed,
        SyncPhase::Failed,
        SyncPhase::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Collecting => "collecting",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Completed => "completed",
            SyncPhase::Failed => "failed",
            SyncPhase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncPhase::Completed | SyncPhase::Failed | SyncPhase::Cancelled
        )
    }

    fn index(self) -> u8 {
        Self::ALL.iter().position(|p| *p == self).unwrap_or(0) as u8
    }

    fn from_index(index: u8) -> Self {
        Self::ALL
            .get(index as usize)
            .copied()
            .unwrap_or(SyncPhase::Idle)
    }
}

/// Live progress of an active run, as reported to status polls
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub in_progress: bool,
    pub phase: SyncPhase,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub total_messages: usize,
    pub processed_messages: usize,
    pub remaining_messages: usize,
    /// Whole percent, 0..=100
    pub progress: u8,
    pub messages_per_second: f64,
    pub estimated_seconds_remaining: u64,
}

/// Derived progress figures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressMath {
    pub remaining: usize,
    pub percent: u8,
    pub per_second: f64,
    pub eta_seconds: u64,
}

impl ProgressMath {
    /// Compute percent, throughput and ETA from raw counters
    ///
    /// Percent is `min(100, floor(processed / total * 100))`, or 0 when the
    /// total is 0. ETA is `remaining / throughput`, or 0 without throughput.
    pub fn compute(processed: usize, total: usize, elapsed_secs: f64) -> Self {
        let remaining = total.saturating_sub(processed);

        let percent = if total == 0 {
            0
        } else {
            ((processed as f64 / total as f64) * 100.0).floor().min(100.0) as u8
        };

        let per_second = if elapsed_secs > 0.0 {
            processed as f64 / elapsed_secs
        } else {
            0.0
        };

        let eta_seconds = if per_second > 0.0 {
            (remaining as f64 / per_second).round() as u64
        } else {
            0
        };

        Self {
            remaining,
            percent,
            per_second,
            eta_seconds,
        }
    }
}

/// An active sync run for one user
///
/// Owned by the run's background thread; status polls only read it and
/// cancel requests only flip its token.
#[derive(Debug)]
pub struct SyncJob {
    user_id: i64,
    cancel: CancelToken,
    phase: AtomicU8,
    processed: AtomicUsize,
    total: AtomicUsize,
    start_time: DateTime<Utc>,
    started: Instant,
    last_update: Mutex<DateTime<Utc>>,
}

impl SyncJob {
    pub fn new(user_id: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            cancel: CancelToken::new(),
            phase: AtomicU8::new(SyncPhase::Idle.index()),
            processed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            start_time: now,
            started: Instant::now(),
            last_update: Mutex::new(now),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn phase(&self) -> SyncPhase {
        SyncPhase::from_index(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: SyncPhase) {
        self.phase.store(phase.index(), Ordering::SeqCst);
        self.touch();
    }

    /// Fix the number of ids to process once listing is done
    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.touch();
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    /// Count a finished batch of `batch_len` ids, returning the new total
    pub fn record_batch(&self, batch_len: usize) -> usize {
        let processed = self.processed.fetch_add(batch_len, Ordering::SeqCst) + batch_len;
        self.touch();
        processed
    }

    fn touch(&self) {
        let mut last = self.last_update.lock().unwrap_or_else(|e| e.into_inner());
        *last = Utc::now();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started.elapsed().as_secs_f64();
        let processed = self.processed();
        let total = self.total();
        let math = ProgressMath::compute(processed, total, elapsed);
        let last_update_time = *self.last_update.lock().unwrap_or_else(|e| e.into_inner());

        ProgressSnapshot {
            in_progress: true,
            phase: self.phase(),
            start_time: self.start_time,
            last_update_time,
            elapsed_seconds: elapsed as u64,
            total_messages: total,
            processed_messages: processed,
            remaining_messages: math.remaining,
            progress: math.percent,
            messages_per_second: math.per_second,
            estimated_seconds_remaining: math.eta_seconds,
        }
    }
}
