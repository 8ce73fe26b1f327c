//! Ingester module for promsink
//!
//! The ingester owns the write path:
//! - Checking the rotation trigger before each batch
//! - Turning every sample into one self-describing output record
//! - Appending a whole batch to the sink under a single lock acquisition
//!
//! Concurrent batches are serialized by the sink lock and never interleave at
//! the record level. A failed batch may leave its earlier records on disk; the
//! caller is told that the batch failed as a whole.

mod rotation;
mod sink;
mod telemetry;

pub use rotation::{MarkerFile, ReopenHandle, ReopenListener};
pub use sink::{AppendSummary, Sink, SinkGuard};

use crate::config::RotationMode;
use crate::schema::{RecordFormat, WriteBatch};
use crate::Result;

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Configuration for the ingester
#[derive(Debug, Clone, Default)]
pub struct IngesterConfig {
    /// Sink file path
    pub output: PathBuf,
    /// Line format of output records
    pub format: RecordFormat,
    /// How reopen requests reach the sink
    pub rotation: RotationMode,
}

/// Write path from decoded batches to the sink file
pub struct Ingester {
    config: IngesterConfig,
    sink: Arc<Sink>,
    /// Present in signal mode
    listener: Mutex<Option<ReopenListener>>,
    reopen: Option<ReopenHandle>,
    in_flight: AtomicI64,
    shutdown: CancellationToken,
}

impl Ingester {
    /// Open the sink and start the configured rotation trigger.
    ///
    /// Failing to open the sink here is fatal for the process.
    pub async fn open(config: IngesterConfig) -> Result<Self> {
        let mut sink = Sink::open(&config.output).await?;
        if let RotationMode::MarkerFile(path) = &config.rotation {
            sink = sink.with_marker(MarkerFile::new(path).await?);
        }
        let sink = Arc::new(sink);

        let shutdown = CancellationToken::new();
        let listener = match config.rotation {
            RotationMode::Signal => Some(ReopenListener::spawn(
                sink.clone(),
                shutdown.child_token(),
            )?),
            RotationMode::None | RotationMode::MarkerFile(_) => None,
        };

        info!(
            output = %config.output.display(),
            format = %config.format,
            rotation = config.rotation.as_str(),
            "Ingester ready"
        );

        Ok(Self {
            reopen: listener.as_ref().map(ReopenListener::handle),
            listener: Mutex::new(listener),
            config,
            sink,
            in_flight: AtomicI64::new(0),
            shutdown,
        })
    }

    /// Append every sample of `batch` as one record each.
    pub async fn write(&self, batch: &WriteBatch) -> Result<AppendSummary> {
        let start = Instant::now();
        let _in_flight = InFlight::enter(&self.in_flight);

        info!(
            timeseries = batch.timeseries.len(),
            samples = batch.sample_count(),
            in_flight = self.in_flight(),
            "Writing timeseries"
        );

        match self.append_batch(batch).await {
            Ok(summary) => {
                telemetry::record_write(
                    start.elapsed().as_secs_f64(),
                    summary.records as u64,
                    summary.bytes as u64,
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(error = %e, "Writing batch failed");
                telemetry::record_write_failure(e.kind());
                Err(e)
            }
        }
    }

    async fn append_batch(&self, batch: &WriteBatch) -> Result<AppendSummary> {
        let format = self.config.format;
        let mut sink = self.sink.lock().await;
        sink.rotate_if_triggered().await?;

        for series in &batch.timeseries {
            for sample in &series.samples {
                sink.append_with(|buf| format.encode(sample, &series.labels, buf))
                    .await?;
            }
        }

        sink.commit().await
    }

    /// Reopen the sink directly, whatever the rotation mode.
    pub async fn reopen(&self) -> Result<()> {
        self.sink.reopen().await
    }

    /// Handle to the signal listener, when running in signal mode.
    pub fn reopen_handle(&self) -> Option<ReopenHandle> {
        self.reopen.clone()
    }

    pub fn sink(&self) -> &Arc<Sink> {
        &self.sink
    }

    pub fn config(&self) -> &IngesterConfig {
        &self.config
    }

    /// Write batches currently in progress.
    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Stop the rotation listener, then flush and close the sink.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(listener) = self.listener.lock().await.take() {
            listener.join().await?;
        }
        self.sink.close().await
    }
}

struct InFlight<'a>(&'a AtomicI64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicI64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        telemetry::record_in_flight_delta(1);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
        telemetry::record_in_flight_delta(-1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Sample, TimeSeries};
    use tempfile::TempDir;

    fn config(dir: &TempDir, format: RecordFormat) -> IngesterConfig {
        IngesterConfig {
            output: dir.path().join("samples.log"),
            format,
            rotation: RotationMode::None,
        }
    }

    #[tokio::test]
    async fn test_scenario_one_series_two_samples() {
        let dir = TempDir::new().unwrap();
        let ingester = Ingester::open(config(&dir, RecordFormat::Json)).await.unwrap();

        let batch = WriteBatch::new(vec![TimeSeries::new(
            [("job", "api")],
            vec![Sample::new(1000, 1.5), Sample::new(2000, 2.0)],
        )]);
        let summary = ingester.write(&batch).await.unwrap();
        assert_eq!(summary.records, 2);

        let contents = std::fs::read_to_string(dir.path().join("samples.log")).unwrap();
        let records = RecordFormat::Json.decode_all(&contents).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sample(), Sample::new(1000, 1.5));
        assert_eq!(records[1].sample(), Sample::new(2000, 2.0));
        for record in &records {
            assert_eq!(record.labels.get("job").map(String::as_str), Some("api"));
        }
        assert_eq!(summary.bytes, contents.len());
    }

    #[tokio::test]
    async fn test_empty_batch_appends_nothing() {
        let dir = TempDir::new().unwrap();
        let ingester = Ingester::open(config(&dir, RecordFormat::Tsv)).await.unwrap();

        let summary = ingester.write(&WriteBatch::default()).await.unwrap();
        assert_eq!(summary, AppendSummary::default());
        let series_without_samples = WriteBatch::new(vec![TimeSeries::new([("a", "b")], vec![])]);
        ingester.write(&series_without_samples).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("samples.log")).unwrap();
        assert!(contents.is_empty());
        assert_eq!(ingester.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sink() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, RecordFormat::Json);
        cfg.rotation = RotationMode::Signal;
        let ingester = Ingester::open(cfg).await.unwrap();
        let handle = ingester.reopen_handle().expect("signal mode has a handle");

        ingester.shutdown().await.unwrap();
        assert!(handle.reopen().await.is_err());
    }
}
