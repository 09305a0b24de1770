// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL event write-ahead log with group commit.
//!
//! Events are durably stored before the in-memory state is mutated,
//! enabling crash recovery via snapshot + replay. A dedicated writer thread
//! coalesces appends into batches and issues one fsync per batch; a caller
//! never observes a successful append whose bytes were not fsynced.
//!
//! Each entry is a single line of JSON in the wire format of
//! [`grit_core::WalEvent`].

use grit_core::{EventKind, Job, WalEvent};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur in WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt entry at offset {offset}: {message}")]
    Corrupt { offset: u64, message: String },
    #[error("checksum mismatch at seq {seq}: expected {expected}, got {actual}")]
    ChecksumMismatch { seq: u64, expected: u32, actual: u32 },
    #[error("WAL is empty")]
    Empty,
    #[error("WAL is closed")]
    Closed,
    #[error("sync failed: {0}")]
    SyncFailed(String),
}

/// Batching knobs for the background writer.
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Maximum events per batch before a flush is forced
    pub buffer_size: usize,
    /// Maximum wait before a partial batch is flushed
    pub flush_interval: Duration,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            flush_interval: Duration::from_millis(10),
        }
    }
}

/// Commands accepted by the writer thread.
enum WriterCmd {
    Append {
        line: Vec<u8>,
        reply: SyncSender<Result<(), WalError>>,
    },
    Rotate {
        reply: SyncSender<Result<(), WalError>>,
    },
    Shutdown {
        reply: SyncSender<Result<(), WalError>>,
    },
}

/// Control command pulled out of the append stream mid-batch.
enum Control {
    Rotate(SyncSender<Result<(), WalError>>),
    Shutdown(SyncSender<Result<(), WalError>>),
}

struct WalInner {
    /// Last assigned sequence number; resets to 0 on rotate
    seq: u64,
    closed: bool,
    tx: mpsc::Sender<WriterCmd>,
    handle: Option<JoinHandle<()>>,
}

/// Append-only checksummed event log.
///
/// `append` blocks the caller until the enclosing batch is written and
/// fsynced; every caller in a batch observes the same flush outcome.
/// Rotation and appends are mutually exclusive (rotation holds the internal
/// lock while the writer swaps files).
pub struct Wal {
    path: PathBuf,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Open or create a WAL at the given path and start the writer thread.
    ///
    /// A non-empty file resumes sequence numbering from its last record; a
    /// fresh or rotated file starts at 0 (the first append is seq 1).
    pub fn open(path: &Path, options: WalOptions) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let seq = match read_last_seq(path) {
            Ok(seq) => seq,
            Err(WalError::Empty) => 0,
            Err(e) => return Err(e),
        };

        let (tx, rx) = mpsc::channel();
        let writer = BatchWriter {
            file,
            path: path.to_owned(),
            rx,
            buffer_size: options.buffer_size.max(1),
            flush_interval: options.flush_interval,
        };
        let handle = thread::Builder::new()
            .name("grit-wal".to_string())
            .spawn(move || writer.run())?;

        Ok(Self {
            path: path.to_owned(),
            inner: Mutex::new(WalInner {
                seq,
                closed: false,
                tx,
                handle: Some(handle),
            }),
        })
    }

    /// Append an event and block until it is durable.
    ///
    /// Returns the assigned sequence number.
    pub fn append(&self, kind: EventKind, job_id: &str, timestamp_ms: i64) -> Result<u64, WalError> {
        self.append_event(kind, job_id, None, timestamp_ms)
    }

    /// Append an ENQUEUE event carrying the full job record.
    ///
    /// The embedded record lets replay recreate a job that was never
    /// captured by a snapshot.
    pub fn append_enqueue(&self, job: &Job, timestamp_ms: i64) -> Result<u64, WalError> {
        self.append_event(EventKind::Enqueue, &job.id, Some(job), timestamp_ms)
    }

    fn append_event(
        &self,
        kind: EventKind,
        job_id: &str,
        job: Option<&Job>,
        timestamp_ms: i64,
    ) -> Result<u64, WalError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let seq = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(WalError::Closed);
            }
            let seq = inner.seq + 1;

            let mut event = WalEvent::new(seq, kind, job_id, timestamp_ms);
            if let Some(job) = job {
                event = event.with_job(job.clone());
            }
            let line = serde_json::to_vec(&event)?;

            inner
                .tx
                .send(WriterCmd::Append {
                    line,
                    reply: reply_tx,
                })
                .map_err(|_| WalError::Closed)?;
            inner.seq = seq;
            seq
        };

        // Wait outside the lock so other appenders can join the batch.
        reply_rx.recv().map_err(|_| WalError::Closed)??;
        Ok(seq)
    }

    /// Last assigned sequence number in the current generation.
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().seq
    }

    /// Read the active file and apply `handler` to each event in order.
    ///
    /// A malformed line aborts with [`WalError::Corrupt`] naming the byte
    /// offset; a checksum mismatch aborts with
    /// [`WalError::ChecksumMismatch`]; a handler error aborts replay with
    /// that error. Returns the last sequence number seen (0 for an empty
    /// log).
    pub fn replay<E, F>(&self, mut handler: F) -> Result<u64, E>
    where
        E: From<WalError>,
        F: FnMut(&WalEvent) -> Result<(), E>,
    {
        if self.inner.lock().closed {
            return Err(WalError::Closed.into());
        }

        let file = File::open(&self.path).map_err(WalError::from)?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut offset = 0u64;
        let mut last_seq = 0u64;

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).map_err(WalError::from)?;
            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                offset += bytes_read as u64;
                continue;
            }

            let event: WalEvent = serde_json::from_str(trimmed).map_err(|e| WalError::Corrupt {
                offset,
                message: e.to_string(),
            })?;

            let expected = WalEvent::compute_checksum(event.kind, &event.job_id, event.seq);
            if expected != event.checksum {
                return Err(WalError::ChecksumMismatch {
                    seq: event.seq,
                    expected,
                    actual: event.checksum,
                }
                .into());
            }

            handler(&event)?;
            last_seq = event.seq;
            offset += bytes_read as u64;
        }

        Ok(last_seq)
    }

    /// Archive the active file and begin a fresh generation.
    ///
    /// Flushes the pending batch, renames the active file with a timestamp
    /// suffix (best-effort retention for diagnosis), opens a fresh empty
    /// file, and resets the sequence to 0.
    pub fn rotate(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WalError::Closed);
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        inner
            .tx
            .send(WriterCmd::Rotate { reply: reply_tx })
            .map_err(|_| WalError::Closed)?;

        // Holding the lock blocks new appends until the writer swaps files;
        // appends already enqueued are flushed first by channel ordering.
        reply_rx.recv().map_err(|_| WalError::Closed)??;
        inner.seq = 0;
        Ok(())
    }

    /// Drain and flush the pending batch, then stop the writer thread.
    ///
    /// Subsequent operations return [`WalError::Closed`].
    pub fn close(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WalError::Closed);
        }
        inner.closed = true;

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        inner
            .tx
            .send(WriterCmd::Shutdown { reply: reply_tx })
            .map_err(|_| WalError::Closed)?;
        let result = reply_rx.recv().map_err(|_| WalError::Closed)?;

        if let Some(handle) = inner.handle.take() {
            let _ = handle.join();
        }
        result
    }

    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        if inner
            .tx
            .send(WriterCmd::Shutdown { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.recv();
        }
        if let Some(handle) = inner.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Scan the file and return the sequence number of the last record.
///
/// Returns [`WalError::Empty`] for an empty or missing-content file and
/// [`WalError::Corrupt`] if any line fails to parse.
fn read_last_seq(path: &Path) -> Result<u64, WalError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut offset = 0u64;
    let mut last = None;

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            offset += bytes_read as u64;
            continue;
        }

        let event: WalEvent = serde_json::from_str(trimmed).map_err(|e| WalError::Corrupt {
            offset,
            message: e.to_string(),
        })?;
        last = Some(event.seq);
        offset += bytes_read as u64;
    }

    last.ok_or(WalError::Empty)
}

/// Owns the file handle; the only code that touches it.
struct BatchWriter {
    file: File,
    path: PathBuf,
    rx: mpsc::Receiver<WriterCmd>,
    buffer_size: usize,
    flush_interval: Duration,
}

type PendingAppend = (Vec<u8>, SyncSender<Result<(), WalError>>);

impl BatchWriter {
    fn run(mut self) {
        let mut batch: Vec<PendingAppend> = Vec::new();

        loop {
            // Block for the first command of the next batch.
            let cmd = match self.rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => {
                    // Wal dropped without close; nothing pending.
                    return;
                }
            };

            let control = match cmd {
                WriterCmd::Append { line, reply } => {
                    batch.push((line, reply));
                    self.fill_batch(&mut batch)
                }
                WriterCmd::Rotate { reply } => Some(Control::Rotate(reply)),
                WriterCmd::Shutdown { reply } => Some(Control::Shutdown(reply)),
            };

            self.flush_batch(&mut batch);

            match control {
                None => {}
                Some(Control::Rotate(reply)) => {
                    let _ = reply.send(self.rotate_file());
                }
                Some(Control::Shutdown(reply)) => {
                    let _ = reply.send(self.file.sync_all().map_err(WalError::from));
                    return;
                }
            }
        }
    }

    /// Collect appends until the batch is full, the flush interval elapses,
    /// or a control command interrupts (returned to the caller).
    fn fill_batch(&mut self, batch: &mut Vec<PendingAppend>) -> Option<Control> {
        let deadline = Instant::now() + self.flush_interval;

        while batch.len() < self.buffer_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.rx.recv_timeout(remaining) {
                Ok(WriterCmd::Append { line, reply }) => batch.push((line, reply)),
                Ok(WriterCmd::Rotate { reply }) => return Some(Control::Rotate(reply)),
                Ok(WriterCmd::Shutdown { reply }) => return Some(Control::Shutdown(reply)),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        None
    }

    /// Write the batch, fsync once, and reply the shared outcome to every
    /// waiter. Sync failure is fatal to the whole batch.
    fn flush_batch(&mut self, batch: &mut Vec<PendingAppend>) {
        if batch.is_empty() {
            return;
        }

        let outcome = self.write_and_sync(batch);
        match outcome {
            Ok(()) => {
                for (_, reply) in batch.drain(..) {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(message) => {
                warn!(error = %message, entries = batch.len(), "WAL batch flush failed");
                for (_, reply) in batch.drain(..) {
                    let _ = reply.send(Err(WalError::SyncFailed(message.clone())));
                }
            }
        }
    }

    fn write_and_sync(&mut self, batch: &[PendingAppend]) -> Result<(), String> {
        for (line, _) in batch {
            self.file.write_all(line).map_err(|e| e.to_string())?;
            self.file.write_all(b"\n").map_err(|e| e.to_string())?;
        }
        self.file.sync_all().map_err(|e| e.to_string())
    }

    /// Archive the active file under a timestamp suffix and reopen fresh.
    fn rotate_file(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;

        let archived = archive_path(&self.path);
        fs::rename(&self.path, &archived)?;
        info!(
            path = %self.path.display(),
            archived = %archived.display(),
            "rotated WAL",
        );

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }
}

/// Timestamped sibling path for an archived generation, e.g.
/// `events.wal.20260801_104500`. A numeric suffix disambiguates rotations
/// within the same second.
fn archive_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let base = format!("{}.{}", path.display(), stamp);
    let mut candidate = PathBuf::from(&base);
    let mut n = 1u32;
    while candidate.exists() {
        n += 1;
        candidate = PathBuf::from(format!("{base}.{n}"));
    }
    candidate
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
