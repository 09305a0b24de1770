// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer for grit: write-ahead log and snapshots

mod snapshot;
mod wal;

pub use snapshot::{SnapshotData, SnapshotError, SnapshotManager, SCHEMA_VERSION};
pub use wal::{Wal, WalError, WalOptions};
