// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery: a new process reconstructs the full queue from
//! snapshot + WAL within budget and resumes without losing work.

use crate::prelude::*;
use grit_core::FakeClock;
use grit_engine::{Controller, ControllerDeps, NoopMetrics};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

#[tokio::test]
async fn hundred_jobs_survive_a_kill_and_finish_after_restart() {
    let dir = tempdir().unwrap();

    // First process: accepts 100 jobs, dispatches 20, then "dies" without
    // any shutdown handshake. The Arc is abandoned mid-flight; only the
    // durable state survives.
    {
        let mut cfg = spec_config(dir.path());
        cfg.disable_dispatch_loop = true;
        cfg.worker_count = 0;
        let victim = start_with_runner(cfg, ScriptedRunner::default(), FakeClock::new(1_000_000));

        let specs = (1..=100).map(|i| spec(&format!("t{i:03}"))).collect();
        victim.enqueue_jobs(specs).unwrap();
        victim.poll(20).await.unwrap();
        drop(victim);
    }

    // Second process: recovery must stay under the 3s cold-start budget
    let recovery_started = Instant::now();
    let controller = start_with_runner(
        spec_config(dir.path()),
        ScriptedRunner::default(),
        FakeClock::new(2_000_000),
    );
    let recovery_elapsed = recovery_started.elapsed();
    assert!(
        recovery_elapsed < Duration::from_secs(3),
        "recovery took {recovery_elapsed:?}"
    );

    // Every job is accounted for in exactly one bucket
    let stats = controller.stats();
    assert_eq!(
        stats.pending + stats.in_flight + stats.completed + stats.dead,
        100
    );
    assert_eq!(stats.total, 100);
    controller.validate().unwrap();

    // The 20 in-flight jobs were requeued and everything completes
    wait_for(10, || controller.stats().completed == 100).await;
    assert_eq!(controller.get_job("t001").unwrap().status.to_string(), "completed");

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn clean_restart_preserves_terminal_state() {
    let dir = tempdir().unwrap();

    {
        let controller = start_with_runner(
            spec_config(dir.path()),
            ScriptedRunner::default().always_fail("doomed"),
            FakeClock::new(1_000_000),
        );
        controller
            .enqueue_jobs(vec![spec("ok"), spec("doomed")])
            .unwrap();
        wait_for(5, || {
            let stats = controller.stats();
            stats.completed == 1 && stats.dead == 1
        })
        .await;
        controller.stop().await.unwrap();
    }

    // Restart sees the same terminal split and does not re-run anything
    let controller = start_with_runner(
        spec_config(dir.path()),
        ScriptedRunner::default(),
        FakeClock::new(2_000_000),
    );
    let stats = controller.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.dead, 1);
    assert_eq!(stats.pending, 0);
    controller.validate().unwrap();

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn replaying_the_same_history_twice_is_identity() {
    let dir = tempdir().unwrap();

    {
        let mut cfg = spec_config(dir.path());
        cfg.disable_dispatch_loop = true;
        cfg.worker_count = 0;
        let victim = start_with_runner(cfg, ScriptedRunner::default(), FakeClock::new(1_000_000));
        victim.enqueue_jobs(vec![spec("tX"), spec("tY")]).unwrap();
        victim.poll(1).await.unwrap();
        victim.acknowledge("tX", true, None).await.unwrap();
        drop(victim);
    }

    // Two successive recoveries from the identical durable state
    let first = {
        let mut cfg = spec_config(dir.path());
        cfg.disable_dispatch_loop = true;
        cfg.worker_count = 0;
        let deps = ControllerDeps {
            runner: Arc::new(ScriptedRunner::default()),
            metrics: Arc::new(NoopMetrics),
            clock: Arc::new(FakeClock::new(2_000_000)),
        };
        let controller = Controller::start_with_deps(cfg, deps).unwrap();
        let stats = controller.stats();
        controller.validate().unwrap();
        drop(controller);
        stats
    };

    let mut cfg = spec_config(dir.path());
    cfg.disable_dispatch_loop = true;
    cfg.worker_count = 0;
    let deps = ControllerDeps {
        runner: Arc::new(ScriptedRunner::default()),
        metrics: Arc::new(NoopMetrics),
        clock: Arc::new(FakeClock::new(3_000_000)),
    };
    let controller = Controller::start_with_deps(cfg, deps).unwrap();

    assert_eq!(controller.stats(), first);
    assert_eq!(
        controller.get_job("tX").unwrap().status.to_string(),
        "completed"
    );
    controller.validate().unwrap();

    controller.stop().await.unwrap();
}
