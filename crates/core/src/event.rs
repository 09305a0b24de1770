// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL event records with CRC32 integrity checksums.
//!
//! Each entry is one line of JSON:
//! `{"seq":N,"type":"ENQUEUE","job_id":"...","timestamp":MS,"checksum":C}`
//!
//! The checksum covers `type ∥ job_id ∥ seq` (ASCII decimal seq) and
//! deliberately excludes the timestamp so that replay verification is
//! time-invariant. ENQUEUE events additionally embed the full job record;
//! without it a job that was enqueued and WAL-durable but never snapshotted
//! could not be reconstructed on recovery.

use crate::job::Job;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of state change a WAL event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Job accepted into the queue (carries the full job record)
    Enqueue,
    /// Job handed to a worker under a fresh deadline
    Dispatch,
    /// Worker reported success
    Ack,
    /// Worker reported failure; job returns to pending
    Retry,
    /// Deadline sweep expired the attempt; job returns to pending
    Timeout,
    /// Retry bound exhausted; job is quarantined
    Dead,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Enqueue => "ENQUEUE",
            EventKind::Dispatch => "DISPATCH",
            EventKind::Ack => "ACK",
            EventKind::Retry => "RETRY",
            EventKind::Timeout => "TIMEOUT",
            EventKind::Dead => "DEAD",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable WAL record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEvent {
    /// Monotone sequence number within the current WAL generation
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub job_id: String,
    /// Wall-clock time of the append (epoch ms); not checksummed
    pub timestamp: i64,
    /// CRC32-IEEE over `kind ∥ job_id ∥ seq`
    pub checksum: u32,
    /// Full job record, present on ENQUEUE only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
}

impl WalEvent {
    /// Build an event with its checksum computed.
    pub fn new(seq: u64, kind: EventKind, job_id: impl Into<String>, timestamp: i64) -> Self {
        let job_id = job_id.into();
        let checksum = Self::compute_checksum(kind, &job_id, seq);
        Self {
            seq,
            kind,
            job_id,
            timestamp,
            checksum,
            job: None,
        }
    }

    /// Attach the full job record (ENQUEUE events).
    pub fn with_job(mut self, job: Job) -> Self {
        self.job = Some(job);
        self
    }

    /// CRC32-IEEE over the ASCII concatenation `kind ∥ job_id ∥ seq`.
    pub fn compute_checksum(kind: EventKind, job_id: &str, seq: u64) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(job_id.as_bytes());
        hasher.update(seq.to_string().as_bytes());
        hasher.finalize()
    }

    /// Recompute the checksum and compare against the stored value.
    pub fn verify_checksum(&self) -> bool {
        Self::compute_checksum(self.kind, &self.job_id, self.seq) == self.checksum
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
