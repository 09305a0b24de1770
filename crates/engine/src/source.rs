// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pull-based job source for remote and distributed workers.
//!
//! A [`JobSource`] hands out pending jobs and accepts acknowledgements,
//! driving the same WAL-ahead state machine as local dispatch. The
//! [`Controller`] implements it directly; a network transport only has to
//! delegate. [`PullWorker`] is the consuming side: a loop that polls,
//! executes under the job's deadline, and acknowledges.

use crate::controller::{Controller, ControllerError};
use crate::pool::{Task, TaskRunner};
use async_trait::async_trait;
use grit_core::Job;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Remote acknowledgement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Completed,
    Failed,
}

/// Source of dispatchable jobs with the controller's transition contract.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Pop up to `max_jobs` pending jobs, marking each in flight.
    async fn poll(&self, max_jobs: usize) -> Result<Vec<Job>, ControllerError>;

    /// Report an execution outcome (ACK / RETRY / DEAD transitions).
    async fn acknowledge(
        &self,
        job_id: &str,
        status: AckStatus,
        error: Option<String>,
    ) -> Result<(), ControllerError>;
}

#[async_trait]
impl JobSource for Controller {
    async fn poll(&self, max_jobs: usize) -> Result<Vec<Job>, ControllerError> {
        Controller::poll(self, max_jobs).await
    }

    async fn acknowledge(
        &self,
        job_id: &str,
        status: AckStatus,
        error: Option<String>,
    ) -> Result<(), ControllerError> {
        Controller::acknowledge(self, job_id, status == AckStatus::Completed, error).await
    }
}

/// Pull-mode worker: polls a [`JobSource`] instead of a local task channel.
///
/// Lifecycle and result contract match the in-process pool: each job runs
/// under its own deadline, failures are acknowledged as data, and stop
/// finishes the current batch before exiting.
pub struct PullWorker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PullWorker {
    /// Spawn a worker polling `source` in batches of `batch_size`, sleeping
    /// `poll_interval` when the queue is empty.
    pub fn spawn(
        source: Arc<dyn JobSource>,
        runner: Arc<dyn TaskRunner>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(pull_loop(
            source,
            runner,
            batch_size.max(1),
            poll_interval,
            stop_rx,
        ));
        Self { stop_tx, handle }
    }

    /// Signal shutdown and wait for the current batch to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

async fn pull_loop(
    source: Arc<dyn JobSource>,
    runner: Arc<dyn TaskRunner>,
    batch_size: usize,
    poll_interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            debug!("pull worker stopping");
            return;
        }

        let jobs = match source.poll(batch_size).await {
            Ok(jobs) => jobs,
            Err(ControllerError::Stopped) => {
                debug!("source stopped; pull worker exiting");
                return;
            }
            Err(e) => {
                warn!(error = %e, "poll failed");
                Vec::new()
            }
        };

        if jobs.is_empty() {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("pull worker stopping");
                    return;
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
            continue;
        }

        for job in jobs {
            let task = Task {
                id: job.id.clone(),
                payload: job.payload.clone(),
                timeout: Duration::from_millis(job.timeout_ms),
            };
            let outcome = tokio::time::timeout(task.timeout, runner.run(&task)).await;
            let (status, error) = match outcome {
                Ok(Ok(())) => (AckStatus::Completed, None),
                Ok(Err(message)) => (AckStatus::Failed, Some(message)),
                Err(_) => (AckStatus::Failed, Some("deadline exceeded".to_string())),
            };
            if let Err(e) = source.acknowledge(&job.id, status, error).await {
                warn!(job_id = %job.id, error = %e, "acknowledge failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
