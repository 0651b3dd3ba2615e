//! Ordered job list with change notifications.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use super::{BackgroundJob, JobEvent, JobPatch};

/// Newest-first list of jobs.
///
/// Updates are keyed by id, so interleaved writers from independent jobs
/// commute. Jobs that reached a terminal state ignore further updates.
pub struct JobRegistry {
    jobs: RwLock<Vec<BackgroundJob>>,
    events: broadcast::Sender<JobEvent>,
}

impl JobRegistry {
    /// Creates an empty registry whose event channel holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            jobs: RwLock::new(Vec::new()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<BackgroundJob>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<BackgroundJob>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Inserts a job at the front. Returns false if the id is already taken.
    pub fn create(&self, job: BackgroundJob) -> bool {
        {
            let mut jobs = self.write();
            if jobs.iter().any(|j| j.id == job.id) {
                log::warn!("Job {} already registered, ignoring duplicate", job.id);
                return false;
            }
            jobs.insert(0, job.clone());
        }
        let _ = self.events.send(JobEvent::Created { job });
        true
    }

    /// Applies a partial update. Returns false for unknown or finished jobs.
    pub fn update(&self, id: &str, patch: JobPatch) -> bool {
        self.update_with(id, move |_| patch)
    }

    /// Applies an update computed from the job's current state, under the
    /// registry lock.
    pub fn update_with<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&BackgroundJob) -> JobPatch,
    {
        let updated = {
            let mut jobs = self.write();
            let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
                log::debug!("Update for unknown job {} ignored", id);
                return false;
            };
            if job.status.is_terminal() {
                log::debug!("Update for finished job {} ignored", id);
                return false;
            }
            let patch = f(job);
            job.apply(patch);
            job.clone()
        };
        let _ = self.events.send(JobEvent::Updated { job: updated });
        true
    }

    /// Removes a job. Returns false when it was not present.
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut jobs = self.write();
            let before = jobs.len();
            jobs.retain(|j| j.id != id);
            jobs.len() != before
        };
        if removed {
            let _ = self.events.send(JobEvent::Removed { id: id.to_string() });
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<BackgroundJob> {
        self.read().iter().find(|j| j.id == id).cloned()
    }

    /// All jobs, newest first.
    pub fn snapshot(&self) -> Vec<BackgroundJob> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(100)
    }
}
