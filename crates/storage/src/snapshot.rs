// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for crash recovery.
//!
//! A snapshot stores the complete job map at a point in time, tagged with
//! the WAL sequence number it covers. Recovery loads the snapshot and
//! replays WAL entries after that sequence. Writes are atomic: serialize to
//! a `.tmp` sibling, fsync, rename over the target, fsync the directory.

use chrono::Local;
use grit_core::Job;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Snapshot schema version accepted by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupted snapshot: {message}")]
    Corrupted { message: String },
    #[error("incompatible snapshot schema version {found} (supported: {supported})")]
    IncompatibleVersion { found: u32, supported: u32 },
}

/// The full job map plus the WAL sequence it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    pub jobs: HashMap<String, Job>,
    pub schema_ver: u32,
    pub last_seq: u64,
}

impl SnapshotData {
    pub fn new(jobs: HashMap<String, Job>, last_seq: u64) -> Self {
        Self {
            jobs,
            schema_ver: SCHEMA_VERSION,
            last_seq,
        }
    }
}

impl Default for SnapshotData {
    fn default() -> Self {
        Self::new(HashMap::new(), 0)
    }
}

/// Atomic writer and loader for the snapshot file.
///
/// Writes are serialized by an internal mutex; loads are stateless and
/// observe either the previous or the new snapshot, never a partial file.
pub struct SnapshotManager {
    path: PathBuf,
    write_lock: Mutex<()>,
    /// Number of timestamped backups retained before overwrite (0 = off)
    backups: usize,
}

impl SnapshotManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            backups: 0,
        }
    }

    /// Keep up to `count` timestamped `.bak` siblings of the previous
    /// snapshot, pruning the oldest beyond the bound.
    pub fn with_backups(mut self, count: usize) -> Self {
        self.backups = count;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the snapshot atomically.
    ///
    /// The temp sibling lives next to the target so the rename stays on one
    /// filesystem; on rename failure the temp file is removed and the
    /// previous snapshot is left intact.
    pub fn save(&self, data: &SnapshotData) -> Result<(), SnapshotError> {
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        if self.backups > 0 && self.path.exists() {
            self.back_up_current()?;
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, data)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        // Make the rename itself durable across power loss.
        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }

        Ok(())
    }

    /// Load the snapshot.
    ///
    /// A missing file is not an error: it yields an empty, initialized
    /// snapshot. A malformed file is [`SnapshotError::Corrupted`]; an
    /// unknown schema version is [`SnapshotError::IncompatibleVersion`].
    pub fn load(&self) -> Result<SnapshotData, SnapshotError> {
        if !self.path.exists() {
            return Ok(SnapshotData::default());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let value: Value =
            serde_json::from_reader(reader).map_err(|e| SnapshotError::Corrupted {
                message: e.to_string(),
            })?;

        let found = value
            .get("schema_ver")
            .and_then(Value::as_u64)
            .ok_or_else(|| SnapshotError::Corrupted {
                message: "missing schema_ver".to_string(),
            })? as u32;
        if found != SCHEMA_VERSION {
            return Err(SnapshotError::IncompatibleVersion {
                found,
                supported: SCHEMA_VERSION,
            });
        }

        serde_json::from_value(value).map_err(|e| SnapshotError::Corrupted {
            message: e.to_string(),
        })
    }

    /// Rename the current snapshot to a timestamped `.bak` sibling and
    /// prune the oldest backups beyond the retention bound.
    fn back_up_current(&self) -> Result<(), SnapshotError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let bak_path = PathBuf::from(format!("{}.{}.bak", self.path.display(), stamp));
        fs::rename(&self.path, &bak_path)?;
        self.prune_backups();
        Ok(())
    }

    /// Remove the oldest backups beyond the configured count. Best-effort:
    /// a failed directory scan leaves extra backups behind.
    fn prune_backups(&self) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        let Some(file_name) = self.path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let prefix = format!("{file_name}.");

        let Ok(entries) = fs::read_dir(parent) else {
            return;
        };
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".bak"))
            })
            .collect();

        if backups.len() <= self.backups {
            return;
        }

        // Timestamp suffixes sort lexicographically oldest-first.
        backups.sort();
        let excess = backups.len() - self.backups;
        for path in backups.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to prune snapshot backup");
            }
        }
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
