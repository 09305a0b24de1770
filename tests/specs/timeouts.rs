// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deadline enforcement: the sweep expires stuck attempts and late
//! results from superseded attempts are dropped.

use crate::prelude::*;
use grit_core::{FakeClock, JobStatus};
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn sweep_loop_times_out_a_stuck_job() {
    let dir = tempdir().unwrap();
    let mut cfg = spec_config(dir.path());
    // No local executors: the job sits in flight until the sweep fires
    cfg.disable_dispatch_loop = true;
    cfg.worker_count = 0;
    cfg.timeout_sweep_interval = Duration::from_millis(20);
    let clock = FakeClock::new(1_000_000);
    let controller = start_with_runner(cfg, ScriptedRunner::default(), clock.clone());

    controller
        .enqueue_jobs(vec![spec("t4").with_timeout(Duration::from_millis(500))])
        .unwrap();
    let polled = controller.poll(1).await.unwrap();
    assert_eq!(polled[0].status, JobStatus::InFlight);

    // Attempt expires; the background sweep picks it up
    clock.advance(501);
    wait_for(5, || controller.stats().pending == 1).await;

    let job = controller.get_job("t4").unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt, 1);

    // The stale executor reports long after its deadline: dropped
    controller.acknowledge("t4", true, None).await.unwrap();
    assert_eq!(controller.stats().completed, 0);
    controller.validate().unwrap();

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn executor_deadline_turns_a_hang_into_a_failure() {
    let dir = tempdir().unwrap();
    let mut cfg = spec_config(dir.path());
    cfg.max_retry = 1;
    // The runner sleeps far past the 50ms task deadline; the executor's
    // enclosing timeout reports the attempt as failed
    let controller = start_with_runner(cfg, HangingRunner, FakeClock::new(1_000_000));

    controller
        .enqueue_jobs(vec![spec("t4").with_timeout(Duration::from_millis(50))])
        .unwrap();
    wait_for(5, || controller.stats().dead == 1).await;

    assert_eq!(controller.get_job("t4").unwrap().status, JobStatus::Dead);
    controller.stop().await.unwrap();
}
