//! In-memory job registry, the single synchronization point for job state.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RegistryError;
use crate::job::{Job, JobStatus};
use crate::registry::events::{JobEvent, JobEventBroadcaster, JobEventKind};

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub uploaded: usize,
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.uploaded + self.queued + self.running + self.done + self.error
    }
}

/// Concurrent map `id -> Job`.
///
/// Uses `std::sync::RwLock`; the lock is never held across an `.await`.
/// Mutations run against a copy of the record and are committed only when the
/// mutator succeeds, so a rejected check-and-set leaves the job untouched.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
    events: JobEventBroadcaster,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_broadcaster(JobEventBroadcaster::default())
    }

    pub fn with_broadcaster(events: JobEventBroadcaster) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Job>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Inserts a new job. Fails if the id is already registered.
    pub fn create(&self, job: Job) -> Result<(), RegistryError> {
        let event = {
            let mut jobs = self.write();
            if jobs.contains_key(&job.id) {
                return Err(RegistryError::DuplicateId(job.id));
            }
            let event = JobEvent::from_job(JobEventKind::Created, &job);
            jobs.insert(job.id.clone(), job);
            event
        };
        self.events.send(event);
        Ok(())
    }

    /// Returns a snapshot of the job.
    pub fn get(&self, id: &str) -> Result<Job, RegistryError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Applies `mutator` atomically with respect to other mutations of any job.
    ///
    /// The mutator works on a copy; an `Err` discards the copy. While the job
    /// stays queued or running its progress never goes backwards: a lower value
    /// is replaced by the previous one.
    pub fn update<T, E, F>(&self, id: &str, mutator: F) -> Result<T, E>
    where
        F: FnOnce(&mut Job) -> Result<T, E>,
        E: From<RegistryError>,
    {
        let (value, event) = {
            let mut jobs = self.write();
            let current = jobs
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

            let mut next = current.clone();
            let value = mutator(&mut next)?;

            if next.progress < current.progress && next.status != JobStatus::Error {
                log::debug!(
                    "Refusing progress regression for job {}: {} -> {}",
                    id,
                    current.progress,
                    next.progress
                );
                next.progress = current.progress;
            }

            let changed = next.status != current.status
                || next.progress != current.progress
                || next.error != current.error;
            let event = changed.then(|| JobEvent::from_job(JobEventKind::Updated, &next));

            *current = next;
            (value, event)
        };

        if let Some(event) = event {
            self.events.send(event);
        }
        Ok(value)
    }

    /// Removes the job if present. Returns whether a record was removed.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.write().remove(id);
        match removed {
            Some(job) => {
                self.events
                    .send(JobEvent::from_job(JobEventKind::Removed, &job));
                true
            }
            None => false,
        }
    }

    /// Removes and returns the job only if `predicate` holds, checked under
    /// the same write lock as the removal.
    pub fn remove_if<F>(&self, id: &str, predicate: F) -> Option<Job>
    where
        F: FnOnce(&Job) -> bool,
    {
        let removed = {
            let mut jobs = self.write();
            match jobs.get(id) {
                Some(job) if predicate(job) => jobs.remove(id),
                _ => None,
            }
        };
        if let Some(job) = &removed {
            self.events
                .send(JobEvent::from_job(JobEventKind::Removed, job));
        }
        removed
    }

    /// Ids of jobs created strictly before `cutoff`.
    pub fn list_older_than(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.read()
            .values()
            .filter(|job| job.created_at < cutoff)
            .map(|job| job.id.clone())
            .collect()
    }

    pub fn counts(&self) -> JobCounts {
        let jobs = self.read();
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Uploaded => counts.uploaded += 1,
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Done => counts.done += 1,
                JobStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
