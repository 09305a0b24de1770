// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller: single source of ordering for durability-affecting ops.
//!
//! Every user-visible state change is WAL-appended before the in-memory
//! mutation, under one commit mutex. Four background loops drive the queue:
//!
//! - dispatch: pops pending jobs and submits them to the pool
//! - result: consumes pool completions (ack / retry / dead)
//! - timeout: sweeps expired in-flight jobs
//! - snapshot: periodically checkpoints state and rotates the WAL
//!
//! Startup recovers state from snapshot + WAL replay, then requeues every
//! job still in flight: its previous executor is gone, so "was running at
//! the moment of crash" becomes "will be re-executed" (at-least-once).

use crate::manager::{JobManager, ManagerError, Stats};
use crate::metrics::{metric, MetricsSink, NoopMetrics};
use crate::pool::{PoolError, SimulatedRunner, Task, TaskResult, TaskRunner, WorkerPool};
use grit_core::{Clock, EventKind, Job, JobStatus, Payload, SystemClock, WalEvent};
use grit_storage::{SnapshotError, SnapshotManager, Wal, WalError, WalOptions};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors surfaced by controller operations
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("state error: {0}")]
    Manager(#[from] ManagerError),
    #[error("controller is stopped")]
    Stopped,
}

/// Configuration for a controller instance.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Pool size
    pub worker_count: usize,
    /// Default per-dispatch deadline for jobs without their own timeout
    pub task_timeout: Duration,
    /// Snapshot cadence
    pub snapshot_interval: Duration,
    /// Cap on attempts before a job is declared dead
    pub max_retry: u32,
    pub wal_path: PathBuf,
    pub snapshot_path: PathBuf,
    /// Max WAL batch size before a forced flush
    pub wal_buffer_size: usize,
    /// Max WAL batch wait before flush
    pub wal_flush_interval: Duration,
    /// Set true when serving remote workers via `poll`; the local dispatch
    /// loop is not started so polling is the sole source of dispatch
    pub disable_dispatch_loop: bool,
    /// Dispatch loop cadence (it also wakes immediately on enqueue/retry)
    pub dispatch_interval: Duration,
    /// Timeout sweep cadence
    pub timeout_sweep_interval: Duration,
    /// Snapshot backups retained before overwrite (0 = off)
    pub snapshot_backups: usize,
}

impl ControllerConfig {
    /// Defaults with storage under `state_dir`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            worker_count: 4,
            task_timeout: Duration::from_secs(30),
            snapshot_interval: Duration::from_secs(60),
            max_retry: 3,
            wal_path: state_dir.join("wal").join("events.wal"),
            snapshot_path: state_dir.join("snapshot.json"),
            wal_buffer_size: 100,
            wal_flush_interval: Duration::from_millis(10),
            disable_dispatch_loop: false,
            dispatch_interval: Duration::from_millis(100),
            timeout_sweep_interval: Duration::from_secs(1),
            snapshot_backups: 0,
        }
    }
}

/// Pluggable collaborators, defaulted for production.
pub struct ControllerDeps {
    pub runner: Arc<dyn TaskRunner>,
    pub metrics: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
}

impl Default for ControllerDeps {
    fn default() -> Self {
        Self {
            runner: Arc::new(SimulatedRunner),
            metrics: Arc::new(NoopMetrics),
            clock: Arc::new(SystemClock),
        }
    }
}

/// A job submission.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    pub payload: Payload,
    /// Per-job execution bound; defaults to the configured task timeout
    pub timeout: Option<Duration>,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            payload,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Orchestrator owning the WAL, job manager, snapshot manager, and pool.
pub struct Controller {
    cfg: ControllerConfig,
    manager: JobManager,
    wal: Wal,
    snapshots: SnapshotManager,
    pool: WorkerPool,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    /// Pairs each WAL append with its state mutation; also serializes
    /// snapshot sampling against appends
    commit_mu: Mutex<()>,
    stopped: Mutex<bool>,
    stop_tx: watch::Sender<bool>,
    dispatch_wake: Notify,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Recover state and start the pool and control loops.
    ///
    /// Must be called within a tokio runtime. Schema and replay errors are
    /// fatal: the controller refuses to start on corrupted durable state
    /// rather than silently losing events.
    pub fn start(cfg: ControllerConfig) -> Result<Arc<Self>, ControllerError> {
        Self::start_with_deps(cfg, ControllerDeps::default())
    }

    pub fn start_with_deps(
        cfg: ControllerConfig,
        deps: ControllerDeps,
    ) -> Result<Arc<Self>, ControllerError> {
        let recovery_started = Instant::now();

        let snapshots =
            SnapshotManager::new(&cfg.snapshot_path).with_backups(cfg.snapshot_backups);
        let manager = JobManager::new();

        let data = snapshots.load()?;
        let snapshot_seq = data.last_seq;
        manager.restore(data)?;

        let wal = Wal::open(
            &cfg.wal_path,
            WalOptions {
                buffer_size: cfg.wal_buffer_size,
                flush_interval: cfg.wal_flush_interval,
            },
        )?;

        let now_ms = deps.clock.now_ms();
        let mut replayed = 0usize;
        wal.replay(|event| {
            replayed += 1;
            Self::apply_replay_event(&manager, event, now_ms)
        })?;

        // Jobs still in flight were running when the previous process died;
        // their executors are gone, so they go back to pending.
        let orphaned = manager.in_flight_jobs();
        for id in &orphaned {
            manager.requeue(id, now_ms)?;
        }

        let elapsed = recovery_started.elapsed();
        let stats = manager.stats();
        deps.metrics
            .set_gauge(metric::RECOVERY_TIME_SECONDS, elapsed.as_secs_f64());
        deps.metrics
            .set_gauge(metric::QUEUE_DEPTH, stats.pending as f64);
        info!(
            snapshot_seq,
            replayed,
            requeued = orphaned.len(),
            pending = stats.pending,
            elapsed_ms = elapsed.as_millis() as u64,
            "recovery complete",
        );

        let pool = WorkerPool::start(cfg.worker_count, Arc::clone(&deps.runner));
        let (stop_tx, _) = watch::channel(false);

        let controller = Arc::new(Self {
            cfg,
            manager,
            wal,
            snapshots,
            pool,
            clock: deps.clock,
            metrics: deps.metrics,
            commit_mu: Mutex::new(()),
            stopped: Mutex::new(false),
            stop_tx,
            dispatch_wake: Notify::new(),
            loops: Mutex::new(Vec::new()),
        });

        controller.spawn_loops();
        if stats.pending > 0 {
            controller.dispatch_wake.notify_one();
        }
        Ok(controller)
    }

    /// Apply one replayed event against current state.
    ///
    /// Every arm is guarded so that replay of partially-applied history is
    /// a no-op: re-applying an event on a state already reflecting it
    /// changes nothing.
    fn apply_replay_event(
        manager: &JobManager,
        event: &WalEvent,
        now_ms: u64,
    ) -> Result<(), ControllerError> {
        match event.kind {
            EventKind::Enqueue => {
                if manager.contains(&event.job_id) {
                    return Ok(());
                }
                let Some(job) = event.job.clone() else {
                    // Legacy record without an embedded job; the snapshot
                    // is the only hope of recovering it.
                    warn!(job_id = %event.job_id, seq = event.seq, "ENQUEUE event carries no job record");
                    return Ok(());
                };
                let created = job.created_at_ms;
                manager.enqueue(job, created)?;
            }
            EventKind::Dispatch => {
                let Some(job) = manager.get_job(&event.job_id) else {
                    return Ok(());
                };
                if job.status == JobStatus::Pending {
                    manager.mark_in_flight(&event.job_id, now_ms + job.timeout_ms, None, now_ms)?;
                }
            }
            EventKind::Ack => {
                let Some(job) = manager.get_job(&event.job_id) else {
                    return Ok(());
                };
                if job.status == JobStatus::InFlight {
                    manager.mark_completed(&event.job_id, now_ms)?;
                }
            }
            EventKind::Retry | EventKind::Timeout => {
                let Some(job) = manager.get_job(&event.job_id) else {
                    return Ok(());
                };
                if job.status == JobStatus::InFlight {
                    manager.requeue(&event.job_id, now_ms)?;
                }
            }
            EventKind::Dead => {
                let Some(job) = manager.get_job(&event.job_id) else {
                    return Ok(());
                };
                if !job.status.is_terminal() {
                    manager.mark_dead(&event.job_id, now_ms)?;
                }
            }
        }
        Ok(())
    }

    /// Submit jobs; atomic per job (WAL ENQUEUE, then state).
    ///
    /// A duplicate id aborts with [`ManagerError::DuplicateJob`] before
    /// anything is committed for that job.
    pub fn enqueue_jobs(&self, specs: Vec<JobSpec>) -> Result<(), ControllerError> {
        self.ensure_running()?;
        for spec in specs {
            let JobSpec {
                id,
                payload,
                timeout,
            } = spec;
            {
                let _guard = self.commit_mu.lock();
                let now_ms = self.clock.now_ms();
                if self.manager.contains(&id) {
                    return Err(ManagerError::DuplicateJob(id).into());
                }
                let timeout_ms = timeout.unwrap_or(self.cfg.task_timeout).as_millis() as u64;
                let job = Job::new(id, payload, timeout_ms, now_ms);
                self.wal.append_enqueue(&job, now_ms as i64)?;
                self.manager.enqueue(job, now_ms)?;
            }
            self.update_queue_depth();
        }
        self.dispatch_wake.notify_one();
        Ok(())
    }

    /// Pop up to `max_jobs` pending jobs, marking each in flight under a
    /// fresh deadline (the pull API for remote workers).
    pub async fn poll(&self, max_jobs: usize) -> Result<Vec<Job>, ControllerError> {
        self.ensure_running()?;
        let mut polled = Vec::new();
        for _ in 0..max_jobs {
            match self.dispatch_locked()? {
                Some(job) => polled.push(job),
                None => break,
            }
        }
        Ok(polled)
    }

    /// Record a remote result; same transitions as a local pool result.
    pub async fn acknowledge(
        &self,
        job_id: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<(), ControllerError> {
        self.ensure_running()?;
        self.handle_result(job_id, success, error)
    }

    pub fn stats(&self) -> Stats {
        self.manager.stats()
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.manager.get_job(id)
    }

    /// Verify state machine invariants (quiescent points only).
    pub fn validate(&self) -> Result<(), ManagerError> {
        self.manager.validate()
    }

    /// WAL-append TIMEOUT for every expired in-flight job, then requeue it
    /// or declare it dead once the retry bound is reached. Returns the
    /// number of jobs swept.
    pub fn sweep_expired(&self) -> Result<usize, ControllerError> {
        let now_ms = self.clock.now_ms();
        let expired = self.manager.get_expired_jobs(now_ms);
        let mut swept = 0usize;

        for id in expired {
            let _guard = self.commit_mu.lock();
            // Re-check under the commit lock; a result may have landed
            // between the scan and now.
            let Some(job) = self.manager.get_job(&id) else {
                continue;
            };
            let Some(deadline) = job.deadline_ms else {
                continue;
            };
            if job.status != JobStatus::InFlight || deadline >= now_ms {
                continue;
            }

            self.wal
                .append(EventKind::Timeout, &id, self.clock.now_ms() as i64)?;
            self.manager.requeue(&id, now_ms)?;
            self.metrics.incr_counter(metric::JOBS_TIMEOUT, 1);

            let attempt = job.attempt + 1;
            if attempt >= self.cfg.max_retry {
                self.wal
                    .append(EventKind::Dead, &id, self.clock.now_ms() as i64)?;
                self.manager.mark_dead(&id, now_ms)?;
                self.metrics.incr_counter(metric::JOBS_DEAD, 1);
                warn!(job_id = %id, attempt, "job dead after timeout");
            } else {
                debug!(job_id = %id, attempt, "job timed out, requeued");
                self.dispatch_wake.notify_one();
            }
            swept += 1;
        }

        if swept > 0 {
            self.update_queue_depth();
        }
        Ok(swept)
    }

    /// Sample state together with the WAL position, persist atomically,
    /// then rotate the WAL so the next generation starts empty.
    ///
    /// The commit mutex is held across sample, save, and rotate so that no
    /// append can land between the sampled `last_seq` and the archive of
    /// the generation it refers to.
    pub fn take_snapshot(&self) -> Result<(), ControllerError> {
        let _guard = self.commit_mu.lock();
        let data = self.manager.snapshot(self.wal.last_seq());
        self.snapshots.save(&data)?;
        self.wal.rotate()?;
        debug!(last_seq = data.last_seq, jobs = data.jobs.len(), "snapshot taken");
        Ok(())
    }

    /// Graceful shutdown; idempotent.
    ///
    /// Stops the loops and the pool, takes one final snapshot so terminal
    /// state survives, and closes the WAL. A dispatch racing the pool stop
    /// observes [`PoolError::Closed`] and exits quietly; the job it popped
    /// stays in flight and is requeued by the next recovery.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        {
            let mut stopped = self.stopped.lock();
            if *stopped {
                return Ok(());
            }
            *stopped = true;
        }

        let _ = self.stop_tx.send(true);
        self.pool.stop().await;

        let handles: Vec<JoinHandle<()>> = self.loops.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        // Loops are down and the commit mutex serializes us against any
        // in-flight public call, so the final snapshot's last_seq matches
        // the WAL at this instant.
        if let Err(e) = self.take_snapshot() {
            warn!(error = %e, "final snapshot failed");
        }
        match self.wal.close() {
            Ok(()) | Err(WalError::Closed) => {}
            Err(e) => warn!(error = %e, "WAL close failed"),
        }

        info!("controller stopped");
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), ControllerError> {
        if *self.stopped.lock() {
            return Err(ControllerError::Stopped);
        }
        Ok(())
    }

    /// Pop one pending job and move it to in-flight, WAL first.
    ///
    /// On WAL failure the popped job is restored to the head of the
    /// pending list and no state changes.
    fn dispatch_locked(&self) -> Result<Option<Job>, ControllerError> {
        let _guard = self.commit_mu.lock();
        let Some(job) = self.manager.pop_pending() else {
            return Ok(None);
        };
        let now_ms = self.clock.now_ms();

        if let Err(e) = self.wal.append(EventKind::Dispatch, &job.id, now_ms as i64) {
            self.manager.restore_pending(&job.id);
            return Err(e.into());
        }

        let deadline_ms = now_ms + job.timeout_ms;
        self.manager
            .mark_in_flight(&job.id, deadline_ms, None, now_ms)?;
        self.metrics.incr_counter(metric::JOBS_DISPATCHED, 1);

        // Hand back the canonical post-transition record
        Ok(self.manager.get_job(&job.id))
    }

    /// Apply a worker result. An unknown job or one no longer in flight
    /// (timed out, already acknowledged) is ignored: at-least-once
    /// delivery makes duplicate and late results ordinary.
    fn handle_result(
        &self,
        job_id: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<(), ControllerError> {
        let _guard = self.commit_mu.lock();
        let now_ms = self.clock.now_ms();

        let Some(job) = self.manager.get_job(job_id) else {
            debug!(job_id, "result for unknown job ignored");
            return Ok(());
        };
        if job.status != JobStatus::InFlight {
            debug!(job_id, status = %job.status, "late result ignored");
            return Ok(());
        }

        if success {
            self.wal.append(EventKind::Ack, job_id, now_ms as i64)?;
            self.manager.mark_completed(job_id, now_ms)?;
            self.metrics.incr_counter(metric::JOBS_COMPLETED, 1);
            debug!(job_id, "job completed");
        } else if job.attempt + 1 >= self.cfg.max_retry {
            self.wal.append(EventKind::Dead, job_id, now_ms as i64)?;
            self.manager.mark_dead(job_id, now_ms)?;
            self.metrics.incr_counter(metric::JOBS_DEAD, 1);
            warn!(job_id, attempt = job.attempt, error = error.as_deref().unwrap_or(""), "job dead");
        } else {
            self.wal.append(EventKind::Retry, job_id, now_ms as i64)?;
            self.manager.requeue(job_id, now_ms)?;
            self.metrics.incr_counter(metric::JOBS_RETRIED, 1);
            debug!(job_id, attempt = job.attempt + 1, "job requeued for retry");
            self.dispatch_wake.notify_one();
        }

        self.update_queue_depth();
        Ok(())
    }

    fn update_queue_depth(&self) {
        self.metrics
            .set_gauge(metric::QUEUE_DEPTH, self.manager.stats().pending as f64);
    }

    fn spawn_loops(self: &Arc<Self>) {
        let mut loops = self.loops.lock();

        if let Some(results) = self.pool.take_results() {
            loops.push(tokio::spawn(Arc::clone(self).result_loop(results)));
        }
        if !self.cfg.disable_dispatch_loop {
            loops.push(tokio::spawn(
                Arc::clone(self).dispatch_loop(self.stop_tx.subscribe()),
            ));
        }
        loops.push(tokio::spawn(
            Arc::clone(self).timeout_loop(self.stop_tx.subscribe()),
        ));
        loops.push(tokio::spawn(
            Arc::clone(self).snapshot_loop(self.stop_tx.subscribe()),
        ));
    }

    /// Drain pending jobs into the pool; wakes on enqueue/retry or every
    /// `dispatch_interval`.
    async fn dispatch_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("dispatch loop stopping");
                    return;
                }
                _ = self.dispatch_wake.notified() => {}
                _ = tokio::time::sleep(self.cfg.dispatch_interval) => {}
            }

            loop {
                let job = match self.dispatch_locked() {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "dispatch failed");
                        break;
                    }
                };

                let task = Task {
                    id: job.id.clone(),
                    payload: job.payload,
                    timeout: Duration::from_millis(job.timeout_ms),
                };
                if let Err(PoolError::Closed) = self.pool.submit(task).await {
                    // Benign shutdown race: the job stays in flight and the
                    // next recovery requeues it.
                    debug!(job_id = %job.id, "pool closed during dispatch; exiting");
                    return;
                }
            }
        }
    }

    /// Consume pool results until the pool closes its result channel.
    async fn result_loop(self: Arc<Self>, mut results: mpsc::Receiver<TaskResult>) {
        while let Some(result) = results.recv().await {
            self.metrics
                .observe_histogram(metric::JOB_DURATION_SECONDS, result.duration.as_secs_f64());
            if let Err(e) = self.handle_result(&result.job_id, result.success, result.error) {
                warn!(job_id = %result.job_id, error = %e, "failed to record result");
            }
        }
        debug!("result loop stopping");
    }

    async fn timeout_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("timeout loop stopping");
                    return;
                }
                _ = tokio::time::sleep(self.cfg.timeout_sweep_interval) => {}
            }
            if let Err(e) = self.sweep_expired() {
                warn!(error = %e, "timeout sweep failed");
            }
        }
    }

    async fn snapshot_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("snapshot loop stopping");
                    return;
                }
                _ = tokio::time::sleep(self.cfg.snapshot_interval) => {}
            }
            if let Err(e) = self.take_snapshot() {
                warn!(error = %e, "periodic snapshot failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
