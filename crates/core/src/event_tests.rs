// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::job::Payload;

// Known CRC32-IEEE answers over `kind ∥ job_id ∥ seq` (decimal ASCII seq),
// cross-checked against zlib's crc32.
#[yare::parameterized(
    enqueue  = { EventKind::Enqueue,  "t1",     1,  2734685472 },
    dispatch = { EventKind::Dispatch, "t1",     2,  413305159 },
    ack      = { EventKind::Ack,      "t1",     3,  217392103 },
    enqueue2 = { EventKind::Enqueue,  "job-42", 7,  3451346889 },
    retry    = { EventKind::Retry,    "t2",     5,  4024481712 },
    timeout  = { EventKind::Timeout,  "t4",     9,  2024451454 },
    dead     = { EventKind::Dead,     "t3",     11, 3795977578 },
)]
fn checksum_known_answers(kind: EventKind, job_id: &str, seq: u64, expected: u32) {
    assert_eq!(WalEvent::compute_checksum(kind, job_id, seq), expected);
}

#[test]
fn new_event_verifies() {
    let event = WalEvent::new(3, EventKind::Ack, "t1", 1_700_000_000_000);
    assert!(event.verify_checksum());
}

#[test]
fn tampered_seq_fails_verification() {
    let mut event = WalEvent::new(1, EventKind::Enqueue, "t1", 0);
    event.seq = 2;
    assert!(!event.verify_checksum());
}

#[test]
fn tampered_job_id_fails_verification() {
    let mut event = WalEvent::new(5, EventKind::Retry, "t2", 0);
    event.job_id = "t9".to_string();
    assert!(!event.verify_checksum());
}

#[test]
fn timestamp_is_not_checksummed() {
    let a = WalEvent::new(9, EventKind::Timeout, "t4", 1_000);
    let b = WalEvent::new(9, EventKind::Timeout, "t4", 2_000);
    assert_eq!(a.checksum, b.checksum);
    assert!(a.verify_checksum() && b.verify_checksum());
}

#[test]
fn wire_format_field_names() {
    let event = WalEvent::new(1, EventKind::Enqueue, "t1", 123);
    let wire = serde_json::to_value(&event).unwrap();
    let obj = wire.as_object().unwrap();
    assert_eq!(obj["seq"], 1);
    assert_eq!(obj["type"], "ENQUEUE");
    assert_eq!(obj["job_id"], "t1");
    assert_eq!(obj["timestamp"], 123);
    assert!(obj["checksum"].is_u64());
    // No embedded job unless attached
    assert!(!obj.contains_key("job"));
}

#[test]
fn enqueue_event_embeds_full_job() {
    let job = Job::new("t1", Payload::new(), 5_000, 77);
    let event = WalEvent::new(1, EventKind::Enqueue, "t1", 123).with_job(job.clone());

    let json = serde_json::to_string(&event).unwrap();
    let back: WalEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back.job.as_ref(), Some(&job));
    assert!(back.verify_checksum());
}

#[yare::parameterized(
    enqueue  = { EventKind::Enqueue,  "ENQUEUE" },
    dispatch = { EventKind::Dispatch, "DISPATCH" },
    ack      = { EventKind::Ack,      "ACK" },
    retry    = { EventKind::Retry,    "RETRY" },
    timeout  = { EventKind::Timeout,  "TIMEOUT" },
    dead     = { EventKind::Dead,     "DEAD" },
)]
fn kind_serializes_screaming(kind: EventKind, expected: &str) {
    assert_eq!(kind.as_str(), expected);
    let wire = serde_json::to_value(kind).unwrap();
    assert_eq!(wire, serde_json::Value::String(expected.to_string()));
}
