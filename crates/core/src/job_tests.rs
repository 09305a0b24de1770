// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn payload(pairs: &[(&str, &str)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

#[test]
fn new_job_is_pending_with_zero_attempts() {
    let job = Job::new("t1", payload(&[("x", "1")]), 5_000, 1_000);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt, 0);
    assert_eq!(job.created_at_ms, 1_000);
    assert_eq!(job.updated_at_ms, 1_000);
    assert!(job.deadline_ms.is_none());
    assert!(job.worker_id.is_none());
}

#[yare::parameterized(
    pending   = { JobStatus::Pending,   false },
    in_flight = { JobStatus::InFlight,  false },
    completed = { JobStatus::Completed, true },
    dead      = { JobStatus::Dead,      true },
)]
fn terminal_states(status: JobStatus, expected: bool) {
    assert_eq!(status.is_terminal(), expected);
}

#[yare::parameterized(
    pending   = { JobStatus::Pending,   "pending" },
    in_flight = { JobStatus::InFlight,  "in_flight" },
    completed = { JobStatus::Completed, "completed" },
    dead      = { JobStatus::Dead,      "dead" },
)]
fn status_display_matches_wire_form(status: JobStatus, expected: &str) {
    assert_eq!(status.to_string(), expected);
    let wire = serde_json::to_value(status).unwrap();
    assert_eq!(wire, Value::String(expected.to_string()));
}

#[test]
fn job_round_trips_through_json() {
    let mut job = Job::new("t2", payload(&[("k", "v")]), 2_500, 42);
    job.status = JobStatus::InFlight;
    job.deadline_ms = Some(99);
    job.worker_id = Some("worker-3".to_string());
    job.attempt = 2;

    let json = serde_json::to_string(&job).unwrap();
    let back: Job = serde_json::from_str(&json).unwrap();
    assert_eq!(back, job);
}

#[test]
fn optional_fields_are_omitted_when_unset() {
    let job = Job::new("t3", Payload::new(), 1_000, 0);
    let wire = serde_json::to_value(&job).unwrap();
    let obj = wire.as_object().unwrap();
    assert!(!obj.contains_key("deadline_ms"));
    assert!(!obj.contains_key("worker_id"));
}
