// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the behavioral specs.

use async_trait::async_trait;
use grit_core::{FakeClock, Payload};
use grit_engine::{
    Controller, ControllerConfig, ControllerDeps, JobSpec, NoopMetrics, Task, TaskRunner,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runner scripted per job id: fails while the per-id budget lasts,
/// succeeds afterwards. Ids without a budget always succeed.
#[derive(Default)]
pub struct ScriptedRunner {
    fail_budget: Mutex<HashMap<String, u32>>,
}

impl ScriptedRunner {
    pub fn fail_times(self, id: &str, times: u32) -> Self {
        self.fail_budget.lock().insert(id.to_string(), times);
        self
    }

    pub fn always_fail(self, id: &str) -> Self {
        self.fail_times(id, u32::MAX)
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn run(&self, task: &Task) -> Result<(), String> {
        let mut budget = self.fail_budget.lock();
        match budget.get_mut(&task.id) {
            Some(0) | None => Ok(()),
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                Err("scripted failure".to_string())
            }
        }
    }
}

/// Fast-loop controller config rooted at `dir`.
pub fn spec_config(dir: &Path) -> ControllerConfig {
    let mut cfg = ControllerConfig::new(dir);
    cfg.worker_count = 4;
    cfg.task_timeout = Duration::from_secs(5);
    cfg.dispatch_interval = Duration::from_millis(10);
    cfg.wal_flush_interval = Duration::from_millis(1);
    cfg.timeout_sweep_interval = Duration::from_secs(3600);
    cfg.snapshot_interval = Duration::from_secs(3600);
    cfg
}

/// Runner that never finishes; only the task deadline ends it.
pub struct HangingRunner;

#[async_trait]
impl TaskRunner for HangingRunner {
    async fn run(&self, _task: &Task) -> Result<(), String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

pub fn start_with_runner<R: TaskRunner + 'static>(
    cfg: ControllerConfig,
    runner: R,
    clock: FakeClock,
) -> Arc<Controller> {
    let deps = ControllerDeps {
        runner: Arc::new(runner),
        metrics: Arc::new(NoopMetrics),
        clock: Arc::new(clock),
    };
    Controller::start_with_deps(cfg, deps).unwrap()
}

pub fn spec(id: &str) -> JobSpec {
    JobSpec::new(id, Payload::new())
}

/// Poll until `predicate` holds; panics after `secs` seconds.
pub async fn wait_for(secs: u64, predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(secs);
    while !predicate() {
        if Instant::now() > deadline {
            panic!("condition not reached within {secs}s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
