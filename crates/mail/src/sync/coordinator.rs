//! Full-mailbox sync coordinator
//!
//! Owns the lifecycle of one user's run: single-flight registration, the
//! collect / fetch / persist pipeline on a background thread, live progress,
//! cancellation and the final checkpoint write.

use anyhow::{Context, Result};
use log::{error, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::{
    BatchPersister, ContentFetcher, JobRegistry, ProgressSnapshot, SyncJob, SyncPhase,
    collect_all_ids,
};
use crate::config::SyncOptions;
use crate::crypto::FieldEncryptor;
use crate::gmail::MailTransport;
use crate::models::SyncCheckpoint;
use crate::storage::MailStore;

/// Error returned by [`SyncCoordinator::start_sync`]
#[derive(Debug, thiserror::Error)]
pub enum StartSyncError {
    /// A run is already active for this user
    #[error("A sync is already in progress")]
    Conflict(ProgressSnapshot),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    #[error("Failed to spawn sync thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// An accepted run
#[derive(Debug)]
pub struct SyncStarted {
    /// Snapshot taken right after registration
    pub status: ProgressSnapshot,
    /// Joins the background thread; dropping it detaches the run
    pub handle: JoinHandle<SyncReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

/// Answer to a status poll
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    /// A run is active
    Running(ProgressSnapshot),
    /// No run is active; the durable checkpoint describes the last one
    Idle(SyncCheckpoint),
    NeverSynced,
}

/// Statistics for one finished run
#[derive(Debug, Default, Clone)]
pub struct SyncReport {
    pub user_id: i64,
    /// Ids returned by the listing walk
    pub ids_listed: usize,
    pub pages: usize,
    /// Ids whose batch completed
    pub processed: usize,
    pub decoded: usize,
    /// Ids that produced no message
    pub dropped: usize,
    /// Messages newly stored
    pub stored: usize,
    /// Messages skipped because they were already stored
    pub already_present: usize,
    pub batches: usize,
    pub transactions: usize,
    /// Batches that needed the sequential fallback
    pub fallbacks: usize,
    pub history_id: Option<String>,
    pub phase: SyncPhase,
    /// Phases entered, in order, ending with `phase`
    pub phases: Vec<SyncPhase>,
    pub duration_ms: u64,
}

/// Coordinates full-sync runs for all users
pub struct SyncCoordinator {
    store: Arc<dyn MailStore>,
    encryptor: Arc<dyn FieldEncryptor>,
    registry: Arc<JobRegistry>,
    options: SyncOptions,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn MailStore>,
        encryptor: Arc<dyn FieldEncryptor>,
        registry: Arc<JobRegistry>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            encryptor,
            registry,
            options: options.sanitized(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Start a full sync for `user_id` in the background
    ///
    /// Returns as soon as the job is registered and the checkpoint marks the
    /// run as in progress. A second call while a run is active returns
    /// [`StartSyncError::Conflict`] without touching the active run.
    pub fn start_sync(
        &self,
        user_id: i64,
        transport: Arc<dyn MailTransport>,
    ) -> Result<SyncStarted, StartSyncError> {
        let job = self
            .registry
            .try_register(user_id)
            .map_err(|existing| StartSyncError::Conflict(existing.snapshot()))?;

        if let Err(e) = self.mark_started(user_id) {
            self.registry.remove(&job);
            return Err(e.into());
        }

        job.set_phase(SyncPhase::Collecting);
        let status = job.snapshot();
        info!("[SYNC] Starting full sync for user {}", user_id);

        let run = SyncRun {
            guard: JobGuard {
                job: job.clone(),
                registry: self.registry.clone(),
                store: self.store.clone(),
                finished: false,
            },
            transport,
            fetcher: ContentFetcher::new(&self.options),
            persister: BatchPersister::new(
                self.store.clone(),
                self.encryptor.clone(),
                self.options.store_chunk_size,
            ),
            options: self.options.clone(),
        };

        // On spawn failure the closure is dropped, and the guard with it
        let handle = thread::Builder::new()
            .name(format!("full-sync-{}", user_id))
            .spawn(move || run.run())
            .map_err(StartSyncError::Spawn)?;

        Ok(SyncStarted { status, handle })
    }

    fn mark_started(&self, user_id: i64) -> Result<()> {
        let checkpoint = self
            .store
            .get_checkpoint(user_id)?
            .unwrap_or_else(|| SyncCheckpoint::new(user_id))
            .started();
        self.store
            .save_checkpoint(&checkpoint)
            .context("Failed to mark sync as started")
    }

    /// Signal cancellation to the active run, if any
    ///
    /// Does not wait for the run to stop; the batch in flight completes first.
    pub fn cancel_sync(&self, user_id: i64) -> CancelOutcome {
        match self.registry.get(user_id) {
            Some(job) => {
                job.cancel_token().cancel();
                info!("[SYNC] Cancellation requested for user {}", user_id);
                CancelOutcome::Cancelled
            }
            None => CancelOutcome::NotFound,
        }
    }

    /// Live snapshot if a run is active, else the durable checkpoint
    pub fn get_status(&self, user_id: i64) -> Result<SyncStatus> {
        if let Some(job) = self.registry.get(user_id) {
            return Ok(SyncStatus::Running(job.snapshot()));
        }
        Ok(match self.store.get_checkpoint(user_id)? {
            Some(checkpoint) => SyncStatus::Idle(checkpoint),
            None => SyncStatus::NeverSynced,
        })
    }

    pub fn is_running(&self, user_id: i64) -> bool {
        self.registry.is_active(user_id)
    }
}

/// Deregisters the job and reconciles the checkpoint exactly once
///
/// `finish` is the normal path. If the run unwinds or never starts, `Drop`
/// records it as failed.
struct JobGuard {
    job: Arc<SyncJob>,
    registry: Arc<JobRegistry>,
    store: Arc<dyn MailStore>,
    finished: bool,
}

impl JobGuard {
    /// Write the final checkpoint, then deregister
    ///
    /// Returns the terminal phase, which is `Failed` if the checkpoint could
    /// not be written.
    fn finish(&mut self, phase: SyncPhase, history_id: Option<String>) -> SyncPhase {
        self.finished = true;
        let touch_sync_time = phase != SyncPhase::Failed;

        let phase = match self.reconcile(history_id, touch_sync_time) {
            Ok(()) => phase,
            Err(e) => {
                error!(
                    "[SYNC] Failed to write checkpoint for user {}: {:#}",
                    self.job.user_id(),
                    e
                );
                SyncPhase::Failed
            }
        };

        self.job.set_phase(phase);
        self.registry.remove(&self.job);
        phase
    }

    fn reconcile(&self, history_id: Option<String>, touch_sync_time: bool) -> Result<()> {
        let user_id = self.job.user_id();
        let checkpoint = self
            .store
            .get_checkpoint(user_id)?
            .unwrap_or_else(|| SyncCheckpoint::new(user_id))
            .finished(history_id, touch_sync_time);
        self.store.save_checkpoint(&checkpoint)
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        error!(
            "[SYNC] Run for user {} ended abnormally, cleaning up",
            self.job.user_id()
        );
        self.finish(SyncPhase::Failed, None);
    }
}

/// Everything one background run needs
struct SyncRun {
    guard: JobGuard,
    transport: Arc<dyn MailTransport>,
    fetcher: ContentFetcher,
    persister: BatchPersister,
    options: SyncOptions,
}

/// How the pipeline ended when it did not fail
struct PipelineEnd {
    cancelled: bool,
}

impl SyncRun {
    fn run(mut self) -> SyncReport {
        let start = Instant::now();
        let user_id = self.guard.job.user_id();
        let mut report = SyncReport {
            user_id,
            phases: vec![SyncPhase::Collecting],
            ..Default::default()
        };

        let (phase, history_id) = match self.execute(&mut report) {
            Ok(end) if end.cancelled => (SyncPhase::Cancelled, report.history_id.clone()),
            Ok(_) => (SyncPhase::Completed, report.history_id.clone()),
            Err(e) => {
                error!("[SYNC] Full sync failed for user {}: {:#}", user_id, e);
                (SyncPhase::Failed, None)
            }
        };

        report.phase = self.guard.finish(phase, history_id);
        report.phases.push(report.phase);
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "[SYNC] Full sync {} for user {}: {}/{} processed, {} stored, {} already present, {} dropped, {} fallbacks in {}ms",
            report.phase.as_str(),
            user_id,
            report.processed,
            report.ids_listed,
            report.stored,
            report.already_present,
            report.dropped,
            report.fallbacks,
            report.duration_ms
        );
        report
    }

    fn execute(&self, report: &mut SyncReport) -> Result<PipelineEnd> {
        let job = self.guard.job.clone();
        let user_id = job.user_id();
        let cancel = job.cancel_token().clone();
        let transport = self.transport.as_ref();

        // Phase 1: list every id
        let collection = collect_all_ids(transport, self.options.page_size, &cancel)
            .context("Failed to list message ids")?;
        report.ids_listed = collection.ids.len();
        report.pages = collection.pages;
        info!(
            "[SYNC] Listed {} ids for user {} in {} pages",
            report.ids_listed, user_id, report.pages
        );

        // Newest first, so a cancelled run keeps the most recent mail
        let mut ids = collection.ids;
        ids.reverse();
        job.set_total(ids.len());

        // Phase 2: fetch and persist batch by batch. A listing cut short by
        // cancellation still passes through here and stops at the first check.
        self.enter(report, SyncPhase::Fetching);
        let batch_count = ids.len().div_ceil(self.options.fetch_batch_size);
        let mut cancelled = collection.cancelled;
        let mut latch_open = true;

        for (index, batch) in ids.chunks(self.options.fetch_batch_size).enumerate() {
            if cancelled || cancel.is_cancelled() {
                info!(
                    "[SYNC] Cancelled for user {} after {} of {} batches",
                    user_id, index, batch_count
                );
                cancelled = true;
                break;
            }

            let fetched = self
                .fetcher
                .fetch_batch(transport, batch)
                .with_context(|| format!("Failed to fetch batch {}", index + 1))?;

            if fetched.used_fallback {
                report.fallbacks += 1;
            }
            report.dropped += fetched.skipped_count();

            let messages = fetched.into_decoded();
            report.decoded += messages.len();

            // Only the first batch that decodes anything may supply it
            if latch_open && !messages.is_empty() {
                latch_open = false;
                report.history_id = messages.iter().find_map(|m| m.history_id.clone());
            }

            let stats = self.persister.persist(user_id, &messages)?;
            report.stored += stats.inserted;
            report.already_present += stats.existing;
            report.transactions += stats.transactions;
            report.batches += 1;
            report.processed = job.record_batch(batch.len());

            info!(
                "[SYNC] User {}: batch {}/{} done, {}/{} processed",
                user_id,
                index + 1,
                batch_count,
                report.processed,
                ids.len()
            );

            if index + 1 < batch_count && self.options.batch_pause_ms > 0 {
                thread::sleep(self.options.batch_pause());
            }
        }

        // Phase 3
        self.enter(report, SyncPhase::Finalizing);
        Ok(PipelineEnd { cancelled })
    }

    fn enter(&self, report: &mut SyncReport, phase: SyncPhase) {
        self.guard.job.set_phase(phase);
        report.phases.push(phase);
    }
}
