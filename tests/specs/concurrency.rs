// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parallel submission: disjoint ids never collide and every job lands
//! in exactly one bucket.

use crate::prelude::*;
use grit_core::FakeClock;
use std::sync::Arc;
use tempfile::tempdir;

const SUBMITTERS: usize = 4;
const JOBS_PER_SUBMITTER: usize = 25;

#[tokio::test]
async fn parallel_enqueue_of_disjoint_ids_accounts_for_every_job() {
    let dir = tempdir().unwrap();
    let controller = start_with_runner(
        spec_config(dir.path()),
        ScriptedRunner::default(),
        FakeClock::new(1_000_000),
    );

    let mut submitters = Vec::new();
    for m in 0..SUBMITTERS {
        let controller = Arc::clone(&controller);
        submitters.push(tokio::spawn(async move {
            for n in 0..JOBS_PER_SUBMITTER {
                controller
                    .enqueue_jobs(vec![spec(&format!("m{m}-n{n}"))])
                    .unwrap();
            }
        }));
    }
    for submitter in submitters {
        submitter.await.unwrap();
    }

    let total = SUBMITTERS * JOBS_PER_SUBMITTER;
    let stats = controller.stats();
    assert_eq!(stats.total, total);
    assert_eq!(
        stats.pending + stats.in_flight + stats.completed + stats.dead,
        total
    );

    wait_for(10, || controller.stats().completed == total).await;
    controller.validate().unwrap();

    controller.stop().await.unwrap();
}
