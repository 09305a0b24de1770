// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable job record and status state machine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Opaque job payload: a string-keyed map of arbitrary JSON values.
///
/// The queue never inspects it; it is carried through the snapshot and
/// handed to the worker unchanged.
pub type Payload = Map<String, Value>;

/// Status of a job within the queue.
///
/// Legal transitions: Pending → InFlight (dispatch), InFlight → Completed
/// (ack), InFlight → Pending (retry/timeout), any non-terminal → Dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the FIFO queue for dispatch
    Pending,
    /// Handed to a worker, running under a deadline
    InFlight,
    /// Acknowledged successfully (terminal)
    Completed,
    /// Retry bound exhausted (terminal)
    Dead,
}

impl JobStatus {
    /// Terminal states are observable but never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Dead)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InFlight => write!(f, "in_flight"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Dead => write!(f, "dead"),
        }
    }
}

/// A durable job record.
///
/// `deadline_ms` and `worker_id` are set only while the job is in flight;
/// both are cleared on every exit from [`JobStatus::InFlight`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Stable key chosen by the submitter; duplicates are an enqueue error
    pub id: String,
    #[serde(default)]
    pub payload: Payload,
    pub status: JobStatus,
    /// Number of failed or timed-out attempts so far (non-decreasing)
    #[serde(default)]
    pub attempt: u32,
    /// Per-attempt execution bound in milliseconds
    pub timeout_ms: u64,
    /// Wall-clock expiry of the current attempt (epoch ms); set iff in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Executor that holds the current attempt, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub created_at_ms: u64,
    /// Stamped on every mutation
    pub updated_at_ms: u64,
}

impl Job {
    /// Create a pending job stamped at `now_ms`.
    pub fn new(id: impl Into<String>, payload: Payload, timeout_ms: u64, now_ms: u64) -> Self {
        Self {
            id: id.into(),
            payload,
            status: JobStatus::Pending,
            attempt: 0,
            timeout_ms,
            deadline_ms: None,
            worker_id: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
