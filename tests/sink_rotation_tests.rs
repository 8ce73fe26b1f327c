//! Integration tests for the sink and its rotation triggers.
//!
//! Tests cover:
//! - Concurrent batches never interleave at the record level
//! - Reopen after an external rename sends later records to the new file
//! - Rotation racing with writes loses and duplicates nothing
//! - Marker-file mode reopens on touch and propagates stat errors
//! - SIGUSR1 reopens the sink in signal mode

use promsink::config::RotationMode;
use promsink::ingester::{Ingester, IngesterConfig, Sink};
use promsink::schema::{OutputRecord, RecordFormat, Sample, TimeSeries, WriteBatch};
use promsink::Error;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn make_config(dir: &TempDir, format: RecordFormat, rotation: RotationMode) -> IngesterConfig {
    IngesterConfig {
        output: dir.path().join("samples.log"),
        format,
        rotation,
    }
}

/// Batch `id` with `series` series of `per_series` samples, all tagged `batch=id`.
fn make_batch(id: usize, series: usize, per_series: usize) -> WriteBatch {
    WriteBatch::new(
        (0..series)
            .map(|s| {
                let batch = id.to_string();
                let series_name = format!("s{s}");
                TimeSeries::new(
                    [
                        ("__name__", "test_metric"),
                        ("batch", batch.as_str()),
                        ("series", series_name.as_str()),
                    ],
                    (0..per_series)
                        .map(|i| Sample::new(i as i64 * 1000, i as f64 + 0.5))
                        .collect(),
                )
            })
            .collect(),
    )
}

fn read_records(path: &Path, format: RecordFormat) -> Vec<OutputRecord> {
    match std::fs::read_to_string(path) {
        Ok(contents) => format.decode_all(&contents).unwrap(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => panic!("reading {}: {e}", path.display()),
    }
}

fn batch_of(record: &OutputRecord) -> usize {
    record.labels["batch"].parse().unwrap()
}

/// Asserts every batch occupies one contiguous run of lines.
fn assert_batches_contiguous(records: &[OutputRecord]) {
    let mut finished: Vec<usize> = Vec::new();
    let mut current: Option<usize> = None;
    for record in records {
        let id = batch_of(record);
        if current != Some(id) {
            assert!(
                !finished.contains(&id),
                "records of batch {id} are split by another batch"
            );
            if let Some(prev) = current {
                finished.push(prev);
            }
            current = Some(id);
        }
    }
}

fn touch_at(path: &Path, time: SystemTime) {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.set_modified(time).unwrap();
}

fn rotated(dir: &TempDir, n: usize) -> PathBuf {
    dir.path().join(format!("samples.log.{n}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_do_not_interleave() {
    let dir = TempDir::new().unwrap();
    let ingester = Arc::new(
        Ingester::open(make_config(&dir, RecordFormat::Json, RotationMode::None))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for id in 0..16 {
        let ingester = ingester.clone();
        handles.push(tokio::spawn(async move {
            ingester.write(&make_batch(id, 3, 40)).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().records, 120);
    }

    let records = read_records(&dir.path().join("samples.log"), RecordFormat::Json);
    assert_eq!(records.len(), 16 * 120);
    assert_batches_contiguous(&records);

    // Within a batch, series and samples keep their request order.
    let first = batch_of(&records[0]);
    let run: Vec<_> = records.iter().take(120).collect();
    assert!(run.iter().all(|r| batch_of(r) == first));
    assert_eq!(run[0].labels["series"], "s0");
    assert_eq!(run[40].labels["series"], "s1");
    assert_eq!(run[1].sample(), Sample::new(1000, 1.5));
}

#[tokio::test]
async fn test_reopen_after_rename_writes_to_new_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.log");
    let sink = Sink::open(&path).await.unwrap();

    sink.append(b"before\n").await.unwrap();
    std::fs::rename(&path, rotated(&dir, 1)).unwrap();
    sink.append(b"still old\n").await.unwrap();
    sink.reopen().await.unwrap();
    sink.append(b"after\n").await.unwrap();

    assert_eq!(
        std::fs::read_to_string(rotated(&dir, 1)).unwrap(),
        "before\nstill old\n"
    );
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "after\n");
    assert_eq!(sink.generation().await, 2);
}

#[tokio::test]
async fn test_reopen_without_rename_keeps_appending() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.log");
    let sink = Sink::open(&path).await.unwrap();

    sink.append(b"one\n").await.unwrap();
    sink.reopen().await.unwrap();
    sink.append(b"two\n").await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
}

#[tokio::test]
async fn test_failed_reopen_recovers_on_next_append() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    std::fs::create_dir(&logs).unwrap();
    let path = logs.join("samples.log");
    let sink = Sink::open(&path).await.unwrap();
    sink.append(b"first\n").await.unwrap();

    let moved = dir.path().join("logs.old");
    std::fs::rename(&logs, &moved).unwrap();
    let err = sink.reopen().await.unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err}");

    // Appends fail while the directory is gone and succeed once it is back.
    assert!(sink.append(b"lost\n").await.is_err());
    std::fs::create_dir(&logs).unwrap();
    sink.append(b"second\n").await.unwrap();

    assert_eq!(
        std::fs::read_to_string(moved.join("samples.log")).unwrap(),
        "first\n"
    );
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rotation_during_writes_loses_nothing() {
    let dir = TempDir::new().unwrap();
    let ingester = Arc::new(
        Ingester::open(make_config(&dir, RecordFormat::Tsv, RotationMode::Signal))
            .await
            .unwrap(),
    );
    let reopen = ingester.reopen_handle().unwrap();

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let ingester = ingester.clone();
            tokio::spawn(async move {
                for b in 0..10 {
                    ingester.write(&make_batch(w * 10 + b, 2, 25)).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let path = dir.path().join("samples.log");
    for n in 1..=5 {
        tokio::time::sleep(Duration::from_millis(2)).await;
        std::fs::rename(&path, rotated(&dir, n)).unwrap();
        reopen.reopen().await.unwrap();
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let mut per_batch: BTreeMap<usize, usize> = BTreeMap::new();
    let mut files = vec![path.clone()];
    files.extend((1..=5).map(|n| rotated(&dir, n)));
    for file in &files {
        let records = read_records(file, RecordFormat::Tsv);
        assert_batches_contiguous(&records);
        let mut seen_here: BTreeMap<usize, usize> = BTreeMap::new();
        for record in &records {
            *seen_here.entry(batch_of(record)).or_default() += 1;
        }
        for (id, count) in seen_here {
            // A batch never straddles two files.
            assert_eq!(count, 50, "batch {id} split across files");
            assert!(per_batch.insert(id, count).is_none(), "batch {id} duplicated");
        }
    }
    assert_eq!(per_batch.len(), 80);

    ingester.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_marker_touch_rotates_before_next_batch() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("reopen");
    let base = SystemTime::now() - Duration::from_secs(60);
    touch_at(&marker, base);

    let ingester = Ingester::open(make_config(
        &dir,
        RecordFormat::Json,
        RotationMode::MarkerFile(marker.clone()),
    ))
    .await
    .unwrap();
    let path = dir.path().join("samples.log");

    ingester.write(&make_batch(1, 1, 3)).await.unwrap();
    std::fs::rename(&path, rotated(&dir, 1)).unwrap();

    // Not touched yet: the renamed file keeps receiving records.
    ingester.write(&make_batch(2, 1, 3)).await.unwrap();
    assert!(!path.exists());

    touch_at(&marker, base + Duration::from_secs(10));
    ingester.write(&make_batch(3, 2, 3)).await.unwrap();
    ingester.write(&make_batch(4, 1, 3)).await.unwrap();

    let old: Vec<_> = read_records(&rotated(&dir, 1), RecordFormat::Json)
        .iter()
        .map(batch_of)
        .collect();
    assert_eq!(old, vec![1, 1, 1, 2, 2, 2]);
    let new: Vec<_> = read_records(&path, RecordFormat::Json)
        .iter()
        .map(batch_of)
        .collect();
    assert_eq!(new, vec![3, 3, 3, 3, 3, 3, 4, 4, 4]);
    assert_eq!(ingester.sink().generation().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_marker_touch_reopens_once_under_concurrent_writers() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("reopen");
    let base = SystemTime::now() - Duration::from_secs(60);
    touch_at(&marker, base);

    let ingester = Arc::new(
        Ingester::open(make_config(
            &dir,
            RecordFormat::Json,
            RotationMode::MarkerFile(marker.clone()),
        ))
        .await
        .unwrap(),
    );
    let path = dir.path().join("samples.log");
    std::fs::rename(&path, rotated(&dir, 1)).unwrap();
    touch_at(&marker, base + Duration::from_secs(10));

    let writers: Vec<_> = (0..32)
        .map(|id| {
            let ingester = ingester.clone();
            tokio::spawn(async move { ingester.write(&make_batch(id, 2, 5)).await.unwrap() })
        })
        .collect();
    for writer in writers {
        assert_eq!(writer.await.unwrap().records, 10);
    }

    // Every writer polled the marker; only the first saw the touch.
    assert_eq!(ingester.sink().generation().await, 2);
    assert!(read_records(&rotated(&dir, 1), RecordFormat::Json).is_empty());
    let records = read_records(&path, RecordFormat::Json);
    assert_eq!(records.len(), 320);
    assert_batches_contiguous(&records);
}

#[tokio::test]
async fn test_marker_created_after_startup_rotates() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("reopen");
    let ingester = Ingester::open(make_config(
        &dir,
        RecordFormat::Json,
        RotationMode::MarkerFile(marker.clone()),
    ))
    .await
    .unwrap();

    ingester.write(&make_batch(1, 1, 1)).await.unwrap();
    assert_eq!(ingester.sink().generation().await, 1);

    touch_at(&marker, SystemTime::now());
    ingester.write(&make_batch(2, 1, 1)).await.unwrap();
    assert_eq!(ingester.sink().generation().await, 2);

    // Removing the marker is not a touch.
    std::fs::remove_file(&marker).unwrap();
    ingester.write(&make_batch(3, 1, 1)).await.unwrap();
    assert_eq!(ingester.sink().generation().await, 2);
}

#[tokio::test]
async fn test_marker_stat_error_fails_the_write() {
    let dir = TempDir::new().unwrap();
    let marker_dir = dir.path().join("trigger");
    std::fs::create_dir(&marker_dir).unwrap();
    let ingester = Ingester::open(make_config(
        &dir,
        RecordFormat::Json,
        RotationMode::MarkerFile(marker_dir.join("reopen")),
    ))
    .await
    .unwrap();

    // Replace the marker's directory with a regular file: stat now fails
    // with something other than "not found".
    std::fs::remove_dir(&marker_dir).unwrap();
    std::fs::write(&marker_dir, "not a directory").unwrap();

    let err = ingester.write(&make_batch(1, 1, 2)).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err}");
    assert!(!err.is_client_error());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("samples.log")).unwrap(),
        ""
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_sigusr1_reopens_sink() {
    let dir = TempDir::new().unwrap();
    let ingester = Ingester::open(make_config(&dir, RecordFormat::Json, RotationMode::Signal))
        .await
        .unwrap();
    let path = dir.path().join("samples.log");

    ingester.write(&make_batch(1, 1, 1)).await.unwrap();
    std::fs::rename(&path, rotated(&dir, 1)).unwrap();

    let status = std::process::Command::new("kill")
        .args(["-USR1", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while ingester.sink().generation().await < 2 {
        assert!(tokio::time::Instant::now() < deadline, "sink was not reopened");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    ingester.write(&make_batch(2, 1, 1)).await.unwrap();
    let new: Vec<_> = read_records(&path, RecordFormat::Json)
        .iter()
        .map(batch_of)
        .collect();
    assert_eq!(new, vec![2]);

    ingester.shutdown().await.unwrap();
}
