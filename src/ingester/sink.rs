//! Append-only output file that can be reopened in place.
//!
//! The file handle, the staged bytes of the batch being written and the
//! optional marker-file baseline all live behind one async mutex. Appends and
//! reopens both take that mutex, so a record is always written entirely to the
//! file that was current when its batch acquired the lock.

use super::rotation::MarkerFile;
use super::telemetry;
use crate::{Error, Result};

use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Staged bytes are handed to the file once they exceed this size. Flushes only
/// happen on record boundaries.
const FLUSH_THRESHOLD: usize = 64 * 1024;

/// Exclusively owned writable destination.
pub struct Sink {
    path: PathBuf,
    state: Mutex<SinkState>,
}

struct SinkState {
    file: Option<File>,
    marker: Option<MarkerFile>,
    /// Number of successful opens, including the initial one.
    generation: u64,
    /// A failed write left a partial record that could not be cut off; the
    /// next write starts with a newline.
    torn_tail: bool,
}

/// Outcome of one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    pub records: usize,
    pub bytes: usize,
}

impl Sink {
    /// Open `path` for appending, creating the file if needed.
    ///
    /// Fails if the parent directory does not exist or is not writable.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path).await?;
        Ok(Self {
            path,
            state: Mutex::new(SinkState {
                file: Some(file),
                marker: None,
                generation: 1,
                torn_tail: false,
            }),
        })
    }

    /// Poll `marker` under the sink lock before every batch.
    pub fn with_marker(mut self, marker: MarkerFile) -> Self {
        self.state.get_mut().marker = Some(marker);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the current file and open a fresh one at the configured path.
    ///
    /// A failure to close the old handle is logged and ignored. If the new
    /// file cannot be opened the sink is left without a handle and the next
    /// append retries the open.
    pub async fn reopen(&self) -> Result<()> {
        let mut guard = self.lock().await;
        guard.reopen().await
    }

    /// Append raw bytes as one unit.
    pub async fn append(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.lock().await;
        guard
            .append_with(|buf| {
                buf.extend_from_slice(bytes);
                Ok(())
            })
            .await?;
        guard.commit().await.map(|_| ())
    }

    /// Take the sink's exclusion for a multi-record write.
    pub async fn lock(&self) -> SinkGuard<'_> {
        SinkGuard {
            path: &self.path,
            state: self.state.lock().await,
            pending: Vec::new(),
            summary: AppendSummary::default(),
        }
    }

    /// Flush and sync the current file and drop the handle.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(mut file) = state.file.take() {
            file.flush().await?;
            file.sync_all().await?;
            info!(path = %self.path.display(), "Closed output file");
        }
        Ok(())
    }

    /// Number of successful opens so far.
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }
}

/// Holds the sink's exclusion. Records staged through [`SinkGuard::append_with`]
/// reach the file in order and are fully flushed by [`SinkGuard::commit`].
/// Dropping the guard without committing discards staged bytes that have not
/// been flushed yet.
pub struct SinkGuard<'a> {
    path: &'a Path,
    state: MutexGuard<'a, SinkState>,
    pending: Vec<u8>,
    summary: AppendSummary,
}

impl SinkGuard<'_> {
    /// Reopen if the configured marker file was touched since the last check.
    pub async fn rotate_if_triggered(&mut self) -> Result<bool> {
        let touched = match self.state.marker.as_mut() {
            Some(marker) => marker.check_if_touched().await?,
            None => return Ok(false),
        };
        if touched {
            if let Some(marker) = self.state.marker.as_ref() {
                info!(marker = %marker.path().display(), "Reopen trigger file touched");
            }
            match self.reopen().await {
                Ok(()) => telemetry::record_rotation("marker_file"),
                Err(e) => {
                    telemetry::record_reopen_failure();
                    return Err(e);
                }
            }
        }
        Ok(touched)
    }

    /// Close the current file and open a new one at the same path. Staged
    /// records are written to the old file first.
    pub async fn reopen(&mut self) -> Result<()> {
        self.write_pending().await?;

        if let Some(old) = self.state.file.take() {
            close_quietly(old, self.path).await;
        }
        let file = open_append(self.path).await?;
        self.state.file = Some(file);
        self.state.generation += 1;
        Ok(())
    }

    /// Stage one record produced by `encode`. The closure must leave the
    /// buffer untouched when it fails.
    pub async fn append_with<F>(&mut self, encode: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        let before = self.pending.len();
        encode(&mut self.pending)?;
        self.summary.records += 1;
        self.summary.bytes += self.pending.len() - before;

        if self.pending.len() >= FLUSH_THRESHOLD {
            self.write_pending().await?;
        }
        Ok(())
    }

    /// Write everything staged and flush it to the operating system.
    pub async fn commit(mut self) -> Result<AppendSummary> {
        self.write_pending().await?;
        Ok(self.summary)
    }

    async fn write_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        if self.state.file.is_none() {
            let file = open_append(self.path).await?;
            self.state.file = Some(file);
            self.state.generation += 1;
        }
        let state = &mut *self.state;
        let Some(file) = state.file.as_mut() else {
            return Err(Error::Internal("sink has no open file".to_string()));
        };

        if state.torn_tail {
            self.pending.insert(0, b'\n');
        }
        let before = file.metadata().await?.len();
        let result = match file.write_all(&self.pending).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        self.pending.clear();

        match result {
            Ok(()) => {
                state.torn_tail = false;
                Ok(())
            }
            Err(e) => {
                state.torn_tail = !discard_torn_tail(file, before, self.path).await;
                Err(Error::Io(e))
            }
        }
    }
}

/// Cut the file back to `len` after a short write. Returns false when the
/// partial record could not be removed.
async fn discard_torn_tail(file: &mut File, len: u64, path: &Path) -> bool {
    match file.set_len(len).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                path = %path.display(),
                len,
                error = %e,
                "Truncating partial record failed"
            );
            false
        }
    }
}

async fn open_append(path: &Path) -> Result<File> {
    info!(path = %path.display(), "Opening output file");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(file)
}

async fn close_quietly(mut file: File, path: &Path) {
    if let Err(e) = file.flush().await {
        warn!(path = %path.display(), error = %e, "Flushing old output file failed");
    }
    if let Err(e) = file.sync_all().await {
        warn!(path = %path.display(), error = %e, "Closing old output file failed");
    }
}
