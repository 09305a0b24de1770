// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TOML configuration for the grit binary.
//!
//! Every field is optional; unset fields fall back to the engine defaults.
//! Flags override the file.

use grit_engine::ControllerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// On-disk configuration surface.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub state_dir: Option<PathBuf>,
    pub worker_count: Option<usize>,
    pub task_timeout_ms: Option<u64>,
    pub snapshot_interval_ms: Option<u64>,
    pub max_retry: Option<u32>,
    pub wal_path: Option<PathBuf>,
    pub snapshot_path: Option<PathBuf>,
    pub wal_buffer_size: Option<usize>,
    pub wal_flush_interval_ms: Option<u64>,
    pub disable_dispatch_loop: Option<bool>,
    pub snapshot_backups: Option<usize>,
}

impl FileConfig {
    /// Load from `path`, or return defaults when no file was given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Merge file values and flag overrides onto the engine defaults.
    pub fn into_controller_config(
        self,
        state_dir_flag: Option<PathBuf>,
        workers_flag: Option<usize>,
    ) -> ControllerConfig {
        let state_dir = state_dir_flag
            .or(self.state_dir)
            .unwrap_or_else(|| PathBuf::from(".grit"));
        let mut cfg = ControllerConfig::new(&state_dir);

        if let Some(workers) = workers_flag.or(self.worker_count) {
            cfg.worker_count = workers;
        }
        if let Some(ms) = self.task_timeout_ms {
            cfg.task_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.snapshot_interval_ms {
            cfg.snapshot_interval = Duration::from_millis(ms);
        }
        if let Some(max_retry) = self.max_retry {
            cfg.max_retry = max_retry;
        }
        if let Some(path) = self.wal_path {
            cfg.wal_path = path;
        }
        if let Some(path) = self.snapshot_path {
            cfg.snapshot_path = path;
        }
        if let Some(size) = self.wal_buffer_size {
            cfg.wal_buffer_size = size;
        }
        if let Some(ms) = self.wal_flush_interval_ms {
            cfg.wal_flush_interval = Duration::from_millis(ms);
        }
        if let Some(disable) = self.disable_dispatch_loop {
            cfg.disable_dispatch_loop = disable;
        }
        if let Some(backups) = self.snapshot_backups {
            cfg.snapshot_backups = backups;
        }

        cfg
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
