// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded-concurrency worker pool.
//!
//! Executors share a bounded task channel and emit completions on a result
//! channel in arrival order. Every task runs under a deadline equal to its
//! timeout. The pool owns both channels; the controller must not close
//! them. Shutdown goes through [`WorkerPool::stop`], which drains
//! outstanding tasks before the result channel closes.

use async_trait::async_trait;
use grit_core::Payload;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Errors from pool operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Submit after stop; benign during shutdown
    #[error("worker pool is closed")]
    Closed,
}

/// A unit of work handed to an executor.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub payload: Payload,
    /// Deadline for this execution attempt
    pub timeout: Duration,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub job_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Executor body run for each task, under the task's deadline.
///
/// Replacing the runner is a contractual no-op for the rest of the engine:
/// only success/failure and duration are observed.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task) -> Result<(), String>;
}

/// Placeholder executor that simulates work.
///
/// Sleeps a bounded random delay and fails occasionally so the queue has
/// observable dynamics. Payload keys override the simulation: `sleep_ms`
/// (number) fixes the delay, `fail` (bool) forces the outcome.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRunner;

#[async_trait]
impl TaskRunner for SimulatedRunner {
    async fn run(&self, task: &Task) -> Result<(), String> {
        let sleep_ms = task
            .payload
            .get("sleep_ms")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| fastrand::u64(10..150));
        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

        let fail = task
            .payload
            .get("fail")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| fastrand::u8(0..10) == 0);
        if fail {
            Err("simulated failure".to_string())
        } else {
            Ok(())
        }
    }
}

/// Bounded set of executors consuming tasks, producing results.
pub struct WorkerPool {
    task_tx: Mutex<Option<mpsc::Sender<Task>>>,
    result_rx: Mutex<Option<mpsc::Receiver<TaskResult>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Launch `worker_count` executors running `runner`.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(worker_count: usize, runner: Arc<dyn TaskRunner>) -> Self {
        let capacity = worker_count.max(1) * 2;
        let (task_tx, task_rx) = mpsc::channel::<Task>(capacity);
        let (result_tx, result_rx) = mpsc::channel::<TaskResult>(capacity);

        let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));
        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&task_rx),
                    result_tx.clone(),
                    Arc::clone(&runner),
                ))
            })
            .collect();

        Self {
            task_tx: Mutex::new(Some(task_tx)),
            result_rx: Mutex::new(Some(result_rx)),
            workers: Mutex::new(workers),
        }
    }

    /// Offer a task to the shared task channel.
    ///
    /// Blocks while the channel is full; returns [`PoolError::Closed`]
    /// after [`WorkerPool::stop`].
    pub async fn submit(&self, task: Task) -> Result<(), PoolError> {
        let tx = self.task_tx.lock().clone();
        let Some(tx) = tx else {
            return Err(PoolError::Closed);
        };
        tx.send(task).await.map_err(|_| PoolError::Closed)
    }

    /// Take the result receiver; yields results in arrival order and closes
    /// after [`WorkerPool::stop`] once outstanding tasks have drained.
    /// Returns `None` on the second call.
    pub fn take_results(&self) -> Option<mpsc::Receiver<TaskResult>> {
        self.result_rx.lock().take()
    }

    /// Signal shutdown, drain outstanding tasks, and wait for executors.
    ///
    /// The result channel closes once the last executor exits.
    pub async fn stop(&self) {
        // Closing intake lets workers drain the queue and observe the
        // closed channel.
        let tx = self.task_tx.lock().take();
        drop(tx);

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    task_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    result_tx: mpsc::Sender<TaskResult>,
    runner: Arc<dyn TaskRunner>,
) {
    loop {
        // Hold the receiver lock only while waiting; other workers can
        // receive while this one executes.
        let task = {
            let mut rx = task_rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            break;
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(task.timeout, runner.run(&task)).await;
        let result = match outcome {
            Ok(Ok(())) => TaskResult {
                job_id: task.id,
                success: true,
                error: None,
                duration: started.elapsed(),
            },
            Ok(Err(message)) => TaskResult {
                job_id: task.id,
                success: false,
                error: Some(message),
                duration: started.elapsed(),
            },
            Err(_) => TaskResult {
                job_id: task.id,
                success: false,
                error: Some("deadline exceeded".to_string()),
                duration: started.elapsed(),
            },
        };

        if result_tx.send(result).await.is_err() {
            // Controller dropped the result receiver; nothing to report to.
            break;
        }
    }

    debug!(worker_id, "worker exited");
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
