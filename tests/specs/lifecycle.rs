// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Submission through completion, retry, and the dead letter bound.

use crate::prelude::*;
use grit_core::{FakeClock, JobStatus, Payload};
use grit_engine::ManagerError;
use tempfile::tempdir;

#[tokio::test]
async fn single_job_runs_to_completion() {
    let dir = tempdir().unwrap();
    let controller = start_with_runner(
        spec_config(dir.path()),
        ScriptedRunner::default(),
        FakeClock::new(1_000_000),
    );

    let mut payload = Payload::new();
    payload.insert("x".to_string(), serde_json::Value::from(1));
    controller
        .enqueue_jobs(vec![grit_engine::JobSpec::new("t1", payload)])
        .unwrap();

    wait_for(5, || controller.stats().completed == 1).await;

    let stats = controller.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.dead, 0);
    controller.validate().unwrap();

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn flaky_job_retries_until_success() {
    let dir = tempdir().unwrap();
    let mut cfg = spec_config(dir.path());
    cfg.max_retry = 3;
    let controller = start_with_runner(
        cfg,
        ScriptedRunner::default().fail_times("t2", 2),
        FakeClock::new(1_000_000),
    );

    controller.enqueue_jobs(vec![spec("t2")]).unwrap();
    wait_for(5, || controller.stats().completed == 1).await;

    let job = controller.get_job("t2").unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempt, 2);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn hopeless_job_is_quarantined_at_the_retry_bound() {
    let dir = tempdir().unwrap();
    let mut cfg = spec_config(dir.path());
    cfg.max_retry = 2;
    let controller = start_with_runner(
        cfg,
        ScriptedRunner::default().always_fail("t3"),
        FakeClock::new(1_000_000),
    );

    controller.enqueue_jobs(vec![spec("t3")]).unwrap();
    wait_for(5, || controller.stats().dead == 1).await;

    let job = controller.get_job("t3").unwrap();
    assert_eq!(job.status, JobStatus::Dead);
    // Dead on the attempt that would exceed the bound, not before
    assert_eq!(job.attempt, 1);
    assert_eq!(controller.stats().completed, 0);
    controller.validate().unwrap();

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn duplicate_ids_are_rejected_across_the_lifecycle() {
    let dir = tempdir().unwrap();
    let controller = start_with_runner(
        spec_config(dir.path()),
        ScriptedRunner::default(),
        FakeClock::new(1_000_000),
    );

    controller.enqueue_jobs(vec![spec("t1")]).unwrap();
    wait_for(5, || controller.stats().completed == 1).await;

    // Even a completed job keeps its id reserved
    let err = controller.enqueue_jobs(vec![spec("t1")]).unwrap_err();
    assert!(matches!(
        err,
        grit_engine::ControllerError::Manager(ManagerError::DuplicateJob(_))
    ));

    controller.stop().await.unwrap();
}
