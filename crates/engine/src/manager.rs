// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory job state machine.
//!
//! The authoritative map from id to [`Job`] is the source of truth; four
//! derived indices (FIFO pending list, in-flight set, completed set, dead
//! set) mirror it. Every job appears in exactly one index, consistent with
//! its status. All preconditions are checked; violations come back as typed
//! errors, never panics.

use grit_core::{Job, JobStatus};
use grit_storage::{SnapshotData, SCHEMA_VERSION};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Errors from state machine preconditions
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("duplicate job: {0}")]
    DuplicateJob(String),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("illegal transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("unsupported snapshot schema version {found} (supported: {supported})")]
    IncompatibleSchema { found: u32, supported: u32 },
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Per-status job counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub dead: usize,
    pub total: usize,
}

#[derive(Default)]
struct ManagerState {
    jobs: HashMap<String, Job>,
    pending: VecDeque<String>,
    in_flight: HashSet<String>,
    completed: HashSet<String>,
    dead: HashSet<String>,
}

impl ManagerState {
    /// Drop `id` from every index (before re-filing under a new status).
    fn unindex(&mut self, id: &str) {
        self.pending.retain(|p| p != id);
        self.in_flight.remove(id);
        self.completed.remove(id);
        self.dead.remove(id);
    }
}

/// Shared-memory job state machine guarded by a single reader/writer lock.
///
/// Observers take the lock in shared mode, mutators in exclusive mode; no
/// operation suspends while holding it.
#[derive(Default)]
pub struct JobManager {
    state: RwLock<ManagerState>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new job: status Pending, stamped at `now_ms`, appended to
    /// the pending tail. Fails with [`ManagerError::DuplicateJob`] if the
    /// id already exists.
    pub fn enqueue(&self, mut job: Job, now_ms: u64) -> Result<(), ManagerError> {
        let mut state = self.state.write();
        if state.jobs.contains_key(&job.id) {
            return Err(ManagerError::DuplicateJob(job.id));
        }

        job.status = JobStatus::Pending;
        job.deadline_ms = None;
        job.worker_id = None;
        job.created_at_ms = now_ms;
        job.updated_at_ms = now_ms;

        state.pending.push_back(job.id.clone());
        state.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Remove and return the head of the pending list.
    ///
    /// The job's status stays Pending; the caller must transition it (or
    /// give it back via [`JobManager::restore_pending`]).
    pub fn pop_pending(&self) -> Option<Job> {
        let mut state = self.state.write();
        let id = state.pending.pop_front()?;
        state.jobs.get(&id).cloned()
    }

    /// Return a popped-but-undispatched job to the head of the pending
    /// list. Used when the WAL append for a dispatch fails after the pop.
    pub fn restore_pending(&self, id: &str) {
        let mut state = self.state.write();
        let is_pending = state
            .jobs
            .get(id)
            .map(|job| job.status == JobStatus::Pending)
            .unwrap_or(false);
        if is_pending && !state.pending.iter().any(|p| p == id) {
            state.pending.push_front(id.to_string());
        }
    }

    /// Pending → InFlight with the given deadline.
    pub fn mark_in_flight(
        &self,
        id: &str,
        deadline_ms: u64,
        worker_id: Option<String>,
        now_ms: u64,
    ) -> Result<(), ManagerError> {
        let mut state = self.state.write();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| ManagerError::JobNotFound(id.to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(ManagerError::IllegalTransition {
                id: id.to_string(),
                from: job.status,
                to: JobStatus::InFlight,
            });
        }

        job.status = JobStatus::InFlight;
        job.deadline_ms = Some(deadline_ms);
        job.worker_id = worker_id;
        job.updated_at_ms = now_ms;

        state.unindex(id);
        state.in_flight.insert(id.to_string());
        Ok(())
    }

    /// InFlight → Completed.
    pub fn mark_completed(&self, id: &str, now_ms: u64) -> Result<(), ManagerError> {
        let mut state = self.state.write();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| ManagerError::JobNotFound(id.to_string()))?;
        if job.status != JobStatus::InFlight {
            return Err(ManagerError::IllegalTransition {
                id: id.to_string(),
                from: job.status,
                to: JobStatus::Completed,
            });
        }

        job.status = JobStatus::Completed;
        job.deadline_ms = None;
        job.worker_id = None;
        job.updated_at_ms = now_ms;

        state.unindex(id);
        state.completed.insert(id.to_string());
        Ok(())
    }

    /// InFlight → Pending, incrementing the attempt counter.
    pub fn requeue(&self, id: &str, now_ms: u64) -> Result<(), ManagerError> {
        let mut state = self.state.write();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| ManagerError::JobNotFound(id.to_string()))?;
        if job.status != JobStatus::InFlight {
            return Err(ManagerError::IllegalTransition {
                id: id.to_string(),
                from: job.status,
                to: JobStatus::Pending,
            });
        }

        job.status = JobStatus::Pending;
        job.attempt += 1;
        job.deadline_ms = None;
        job.worker_id = None;
        job.updated_at_ms = now_ms;

        state.unindex(id);
        state.pending.push_back(id.to_string());
        Ok(())
    }

    /// Any non-terminal status → Dead.
    pub fn mark_dead(&self, id: &str, now_ms: u64) -> Result<(), ManagerError> {
        let mut state = self.state.write();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| ManagerError::JobNotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Err(ManagerError::IllegalTransition {
                id: id.to_string(),
                from: job.status,
                to: JobStatus::Dead,
            });
        }

        job.status = JobStatus::Dead;
        job.deadline_ms = None;
        job.worker_id = None;
        job.updated_at_ms = now_ms;

        state.unindex(id);
        state.dead.insert(id.to_string());
        Ok(())
    }

    /// In-flight jobs whose deadline has passed (strictly before `now_ms`).
    pub fn get_expired_jobs(&self, now_ms: u64) -> Vec<String> {
        let state = self.state.read();
        let mut expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|id| {
                state
                    .jobs
                    .get(*id)
                    .and_then(|job| job.deadline_ms)
                    .is_some_and(|deadline| deadline < now_ms)
            })
            .cloned()
            .collect();
        expired.sort();
        expired
    }

    /// Snapshot of the current in-flight set (recovery requeues these).
    pub fn in_flight_jobs(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<String> = state.in_flight.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Deep-copy the authoritative map into schema-versioned snapshot data.
    pub fn snapshot(&self, last_seq: u64) -> SnapshotData {
        let state = self.state.read();
        SnapshotData::new(state.jobs.clone(), last_seq)
    }

    /// Replace the authoritative map and rebuild all four indices from job
    /// status. The snapshot does not record queue order, so pending jobs
    /// are refiled by `(created_at_ms, id)` for a deterministic FIFO.
    pub fn restore(&self, data: SnapshotData) -> Result<(), ManagerError> {
        if data.schema_ver != SCHEMA_VERSION {
            return Err(ManagerError::IncompatibleSchema {
                found: data.schema_ver,
                supported: SCHEMA_VERSION,
            });
        }

        let mut rebuilt = ManagerState {
            jobs: data.jobs,
            ..ManagerState::default()
        };

        let mut pending: Vec<(u64, String)> = Vec::new();
        for (id, job) in &rebuilt.jobs {
            match job.status {
                JobStatus::Pending => pending.push((job.created_at_ms, id.clone())),
                JobStatus::InFlight => {
                    rebuilt.in_flight.insert(id.clone());
                }
                JobStatus::Completed => {
                    rebuilt.completed.insert(id.clone());
                }
                JobStatus::Dead => {
                    rebuilt.dead.insert(id.clone());
                }
            }
        }
        pending.sort();
        rebuilt.pending = pending.into_iter().map(|(_, id)| id).collect();

        *self.state.write() = rebuilt;
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().jobs.contains_key(id)
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.state.read().jobs.get(id).cloned()
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.state.read().completed.contains(id)
    }

    pub fn is_dead(&self, id: &str) -> bool {
        self.state.read().dead.contains(id)
    }

    pub fn stats(&self) -> Stats {
        let state = self.state.read();
        Stats {
            pending: state.pending.len(),
            in_flight: state.in_flight.len(),
            completed: state.completed.len(),
            dead: state.dead.len(),
            total: state.jobs.len(),
        }
    }

    /// Verify the structural invariants; call at quiescent points.
    ///
    /// Checks that every job is filed in exactly one index matching its
    /// status, that every indexed id exists, and that `deadline_ms` is set
    /// iff the job is in flight.
    pub fn validate(&self) -> Result<(), ManagerError> {
        let state = self.state.read();

        let mut pending_seen = HashSet::new();
        for id in &state.pending {
            if !pending_seen.insert(id.clone()) {
                return Err(ManagerError::InvariantViolation(format!(
                    "job {id} queued twice in pending list"
                )));
            }
        }

        for set_name in ["pending", "in_flight", "completed", "dead"] {
            let ids: Vec<&String> = match set_name {
                "pending" => state.pending.iter().collect(),
                "in_flight" => state.in_flight.iter().collect(),
                "completed" => state.completed.iter().collect(),
                _ => state.dead.iter().collect(),
            };
            for id in ids {
                if !state.jobs.contains_key(id) {
                    return Err(ManagerError::InvariantViolation(format!(
                        "index {set_name} references unknown job {id}"
                    )));
                }
            }
        }

        for (id, job) in &state.jobs {
            let memberships = [
                pending_seen.contains(id),
                state.in_flight.contains(id),
                state.completed.contains(id),
                state.dead.contains(id),
            ]
            .iter()
            .filter(|m| **m)
            .count();
            if memberships != 1 {
                return Err(ManagerError::InvariantViolation(format!(
                    "job {id} appears in {memberships} indices"
                )));
            }

            let indexed_ok = match job.status {
                JobStatus::Pending => pending_seen.contains(id),
                JobStatus::InFlight => state.in_flight.contains(id),
                JobStatus::Completed => state.completed.contains(id),
                JobStatus::Dead => state.dead.contains(id),
            };
            if !indexed_ok {
                return Err(ManagerError::InvariantViolation(format!(
                    "job {id} status {} does not match its index",
                    job.status
                )));
            }

            if (job.status == JobStatus::InFlight) != job.deadline_ms.is_some() {
                return Err(ManagerError::InvariantViolation(format!(
                    "job {id} deadline is inconsistent with status {}",
                    job.status
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
