//! Registry of active sync jobs, at most one per user

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::SyncJob;

/// Concurrency-safe map of active jobs keyed by user id
///
/// Registration is the only way a run can start, so "one run per user"
/// holds as long as every registered job is eventually removed.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<i64, Arc<SyncJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic elsewhere must not lock every user out of syncing
    fn jobs(&self) -> MutexGuard<'_, HashMap<i64, Arc<SyncJob>>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new job for `user_id`
    ///
    /// Returns `Err` with the already-active job if there is one.
    pub fn try_register(&self, user_id: i64) -> Result<Arc<SyncJob>, Arc<SyncJob>> {
        let mut jobs = self.jobs();
        if let Some(existing) = jobs.get(&user_id) {
            return Err(existing.clone());
        }
        let job = Arc::new(SyncJob::new(user_id));
        jobs.insert(user_id, job.clone());
        Ok(job)
    }

    pub fn get(&self, user_id: i64) -> Option<Arc<SyncJob>> {
        self.jobs().get(&user_id).cloned()
    }

    /// Remove `job` if it is still the registered job for its user
    pub fn remove(&self, job: &Arc<SyncJob>) -> bool {
        let mut jobs = self.jobs();
        match jobs.get(&job.user_id()) {
            Some(current) if Arc::ptr_eq(current, job) => {
                jobs.remove(&job.user_id());
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, user_id: i64) -> bool {
        self.jobs().contains_key(&user_id)
    }

    pub fn active_count(&self) -> usize {
        self.jobs().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_job_per_user() {
        let registry = JobRegistry::new();
        let job = registry.try_register(1).unwrap();

        let existing = registry.try_register(1).unwrap_err();
        assert!(Arc::ptr_eq(&job, &existing));
        assert_eq!(registry.active_count(), 1);

        // Other users are independent
        assert!(registry.try_register(2).is_ok());
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_remove_then_register_again() {
        let registry = JobRegistry::new();
        let job = registry.try_register(1).unwrap();
        assert!(registry.remove(&job));
        assert!(!registry.is_active(1));
        assert!(!registry.remove(&job));
        assert!(registry.try_register(1).is_ok());
    }

    #[test]
    fn test_stale_job_does_not_remove_newer_one() {
        let registry = JobRegistry::new();
        let old = registry.try_register(1).unwrap();
        registry.remove(&old);
        let new = registry.try_register(1).unwrap();

        assert!(!registry.remove(&old));
        assert!(Arc::ptr_eq(&registry.get(1).unwrap(), &new));
    }
}
