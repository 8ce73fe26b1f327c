//! Rotation triggers.
//!
//! Two ways to ask the process to reopen its sink after an external tool has
//! moved the file away:
//!
//! - [`MarkerFile`]: the write path polls the modification time of a marker
//!   path, under the sink lock, before every batch.
//! - [`ReopenListener`]: a background task reopens the sink whenever it
//!   receives `SIGUSR1` or a request through a [`ReopenHandle`].
//!
//! Both end up in the sink's own reopen, which takes the same lock as appends.

use super::sink::Sink;
use super::telemetry;
use crate::{Error, Result};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Polled rotation trigger keyed on a file's modification time.
#[derive(Debug)]
pub struct MarkerFile {
    path: PathBuf,
    /// `None` while the marker does not exist.
    last_modified: Option<SystemTime>,
}

impl MarkerFile {
    /// Record the marker's current modification time as the baseline. A
    /// missing marker is a valid baseline.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let last_modified = modified_time(&path).await?;
        Ok(Self {
            path,
            last_modified,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True exactly once per modification: the baseline moves to the new
    /// modification time whenever this returns true. Removing the marker is
    /// not a modification.
    pub async fn check_if_touched(&mut self) -> Result<bool> {
        let current = modified_time(&self.path).await?;
        let touched = match (current, self.last_modified) {
            (Some(now), Some(before)) => now > before,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if touched {
            self.last_modified = current;
        }
        Ok(touched)
    }
}

async fn modified_time(path: &Path) -> Result<Option<SystemTime>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

struct ReopenRequest {
    ack: oneshot::Sender<Result<()>>,
}

/// Cloneable handle for requesting a reopen from the listener task.
#[derive(Clone)]
pub struct ReopenHandle {
    tx: mpsc::Sender<ReopenRequest>,
}

impl ReopenHandle {
    /// Request a reopen and wait for its outcome.
    pub async fn reopen(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(ReopenRequest { ack })
            .await
            .map_err(|_| Error::Internal("reopen listener has stopped".to_string()))?;
        done.await
            .map_err(|_| Error::Internal("reopen listener dropped the request".to_string()))?
    }
}

#[cfg(unix)]
type ReopenSignal = tokio::signal::unix::Signal;
#[cfg(not(unix))]
type ReopenSignal = std::convert::Infallible;

/// Background task that reopens the sink on demand.
pub struct ReopenListener {
    handle: ReopenHandle,
    task: JoinHandle<()>,
}

impl ReopenListener {
    /// Spawn a listener driven by `SIGUSR1` (on unix) and by its handle.
    pub fn spawn(sink: Arc<Sink>, shutdown: CancellationToken) -> Result<Self> {
        #[cfg(unix)]
        let signal = {
            use tokio::signal::unix::{signal, SignalKind};
            Some(signal(SignalKind::user_defined1())?)
        };
        #[cfg(not(unix))]
        let signal = None;

        Ok(Self::start(sink, signal, shutdown))
    }

    #[cfg(test)]
    fn without_signals(sink: Arc<Sink>, shutdown: CancellationToken) -> Self {
        Self::start(sink, None, shutdown)
    }

    fn start(sink: Arc<Sink>, signal: Option<ReopenSignal>, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run_listener(sink, rx, signal, shutdown));
        Self {
            handle: ReopenHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> ReopenHandle {
        self.handle.clone()
    }

    /// Wait for the task to exit after its shutdown token was cancelled.
    pub async fn join(self) -> Result<()> {
        drop(self.handle);
        self.task
            .await
            .map_err(|e| Error::Internal(format!("reopen listener panicked: {e}")))
    }
}

async fn run_listener(
    sink: Arc<Sink>,
    mut requests: mpsc::Receiver<ReopenRequest>,
    mut signal: Option<ReopenSignal>,
    shutdown: CancellationToken,
) {
    loop {
        let (trigger, ack) = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => ("request", Some(request.ack)),
                None => break,
            },
            Some(()) = next_signal(&mut signal) => {
                info!("Received SIGUSR1");
                ("signal", None)
            }
        };

        let result = sink.reopen().await;
        match &result {
            Ok(()) => telemetry::record_rotation(trigger),
            Err(e) => {
                error!(path = %sink.path().display(), error = %e, "Reopening output file failed");
                telemetry::record_reopen_failure();
            }
        }
        if let Some(ack) = ack {
            let _ = ack.send(result);
        }
    }
}

#[cfg(unix)]
async fn next_signal(signal: &mut Option<ReopenSignal>) -> Option<()> {
    match signal {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn next_signal(_signal: &mut Option<ReopenSignal>) -> Option<()> {
    std::future::pending().await
}
