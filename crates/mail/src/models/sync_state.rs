//! Durable per-user sync checkpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tracks full-sync state for one user
///
/// One row per user, created on the first sync request and never deleted by
/// the sync subsystem. `history_id` is only evidence that a full sync has
/// completed at least once; it is not used to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub user_id: i64,
    /// Gmail historyId latched by the last run that produced one
    pub history_id: Option<String>,
    /// Whether a run is currently active (or was when the process died)
    pub sync_in_progress: bool,
    /// When a run last finished without failing
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl SyncCheckpoint {
    /// A fresh checkpoint for a user who has never synced
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            history_id: None,
            sync_in_progress: false,
            last_sync_time: None,
        }
    }

    /// Mark a run as started
    pub fn started(mut self) -> Self {
        self.sync_in_progress = true;
        self
    }

    /// Mark a run as finished
    ///
    /// A latched history id replaces the stored one; `None` leaves it as-is.
    /// `last_sync_time` advances only when `touch_sync_time` is set, so a
    /// failed run leaves a stale timestamp behind.
    pub fn finished(mut self, history_id: Option<String>, touch_sync_time: bool) -> Self {
        self.sync_in_progress = false;
        if let Some(history_id) = history_id {
            self.history_id = Some(history_id);
        }
        if touch_sync_time {
            self.last_sync_time = Some(Utc::now());
        }
        self
    }

    /// Whether any run has ever completed for this user
    pub fn has_completed_sync(&self) -> bool {
        self.history_id.is_some()
    }
}
