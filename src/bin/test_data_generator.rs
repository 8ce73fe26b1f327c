//! Remote write load generator
//!
//! Sends realistic Prometheus Remote Write traffic to a running promsink so
//! that throughput and rotation can be exercised end to end.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin test-data-generator -- \
//!   --endpoint http://localhost:8080 \
//!   --metrics 10 \
//!   --hosts 5 \
//!   --samples-per-second 100 \
//!   --duration 60s
//! ```
//!
//! Gauges follow sine waves or random walks, counters only grow. Every
//! series carries `host`, `region` and `env` labels.

use promsink::api::ingest::prometheus::encode_write_request;
use promsink::schema::{Sample, TimeSeries, WriteBatch, METRIC_NAME_LABEL};

use clap::Parser;
use reqwest::Client;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

/// Remote write load generator for promsink
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// promsink base URL
    #[arg(long, default_value = "http://localhost:8080")]
    endpoint: String,

    /// Number of unique metric names to generate
    #[arg(long, default_value = "10")]
    metrics: usize,

    /// Number of unique hosts
    #[arg(long, default_value = "5")]
    hosts: usize,

    /// Number of unique regions
    #[arg(long, default_value = "3")]
    regions: usize,

    /// Target samples per second
    #[arg(long, default_value = "100")]
    samples_per_second: u64,

    /// Duration to run (e.g., "60s", "5m", "1h")
    #[arg(long, default_value = "60s")]
    duration: humantime::Duration,

    /// Samples per HTTP request
    #[arg(long, default_value = "100")]
    batch_size: usize,

    /// Send everything as fast as possible
    #[arg(long)]
    burst: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy)]
enum ValuePattern {
    Sine { min: f64, max: f64, period: f64 },
    RandomWalk { min: f64, max: f64, step: f64 },
    Counter { rate: f64 },
    Constant { base: f64, jitter: f64 },
}

struct MetricDef {
    name: String,
    pattern: ValuePattern,
}

struct Stats {
    samples_sent: AtomicU64,
    batches_sent: AtomicU64,
    errors: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Stats {
    fn new() -> Self {
        Self {
            samples_sent: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    fn record_batch(&self, samples: u64, bytes: u64) {
        self.samples_sent.fetch_add(samples, Ordering::Relaxed);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> (u64, u64, u64, u64) {
        (
            self.samples_sent.load(Ordering::Relaxed),
            self.batches_sent.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
        )
    }
}

struct DataGenerator {
    metrics: Vec<MetricDef>,
    hosts: Vec<String>,
    regions: Vec<String>,
    environments: Vec<String>,
    counter_values: HashMap<String, f64>,
    walk_values: HashMap<String, f64>,
    start_time: Instant,
}

impl DataGenerator {
    fn new(num_metrics: usize, num_hosts: usize, num_regions: usize) -> Self {
        let metric_templates = [
            ("cpu_usage", ValuePattern::Sine { min: 10.0, max: 95.0, period: 300.0 }),
            ("memory_used_bytes", ValuePattern::RandomWalk { min: 1e9, max: 8e9, step: 1e7 }),
            ("disk_read_bytes_total", ValuePattern::Counter { rate: 1e6 }),
            ("disk_write_bytes_total", ValuePattern::Counter { rate: 5e5 }),
            ("network_rx_bytes_total", ValuePattern::Counter { rate: 2e6 }),
            ("network_tx_bytes_total", ValuePattern::Counter { rate: 1.5e6 }),
            ("http_requests_total", ValuePattern::Counter { rate: 1000.0 }),
            ("http_request_duration_seconds", ValuePattern::Sine { min: 0.01, max: 0.5, period: 120.0 }),
            ("gc_pause_seconds", ValuePattern::Constant { base: 0.05, jitter: 0.02 }),
            ("active_connections", ValuePattern::Sine { min: 10.0, max: 500.0, period: 600.0 }),
        ];

        let metrics: Vec<MetricDef> = (0..num_metrics)
            .map(|i| {
                let (name, pattern) = metric_templates[i % metric_templates.len()];
                MetricDef {
                    name: if i < metric_templates.len() {
                        name.to_string()
                    } else {
                        format!("{}_{}", name, i / metric_templates.len())
                    },
                    pattern,
                }
            })
            .collect();

        let hosts: Vec<String> = (0..num_hosts)
            .map(|i| format!("host-{:03}", i + 1))
            .collect();

        let region_names = ["us-east-1", "us-west-2", "eu-west-1", "ap-northeast-1", "ap-southeast-1"];
        let regions: Vec<String> = region_names
            .iter()
            .take(num_regions.max(1))
            .map(|s| s.to_string())
            .collect();

        Self {
            metrics,
            hosts,
            regions,
            environments: vec!["prod".to_string(), "staging".to_string()],
            counter_values: HashMap::new(),
            walk_values: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Build one batch of `count` samples, one sample per series, grouped the
    /// way a remote-write client groups them.
    fn generate_batch(&mut self, count: usize) -> WriteBatch {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let elapsed_secs = self.start_time.elapsed().as_secs_f64();

        let mut series: BTreeMap<String, TimeSeries> = BTreeMap::new();
        let mut produced = 0usize;

        if self.metrics.is_empty() || self.hosts.is_empty() {
            return WriteBatch::default();
        }

        'outer: loop {
            for metric in &self.metrics {
                for host in &self.hosts {
                    for region in &self.regions {
                        for env in &self.environments {
                            if produced >= count {
                                break 'outer;
                            }

                            let key = format!("{}|{}|{}|{}", metric.name, host, region, env);
                            let value = match metric.pattern {
                                ValuePattern::Sine { min, max, period } => {
                                    let range = max - min;
                                    let phase = (elapsed_secs / period) * 2.0 * std::f64::consts::PI;
                                    min + (range / 2.0) * (1.0 + phase.sin())
                                }
                                ValuePattern::RandomWalk { min, max, step } => {
                                    let current = self.walk_values.entry(key.clone()).or_insert((min + max) / 2.0);
                                    let delta = (rand::random::<f64>() - 0.5) * 2.0 * step;
                                    *current = (*current + delta).clamp(min, max);
                                    *current
                                }
                                ValuePattern::Counter { rate } => {
                                    let current = self.counter_values.entry(key.clone()).or_insert(0.0);
                                    *current += rate / 10.0 + (rand::random::<f64>() * rate / 20.0);
                                    *current
                                }
                                ValuePattern::Constant { base, jitter } => {
                                    base + (rand::random::<f64>() - 0.5) * 2.0 * jitter
                                }
                            };

                            // Later passes over the same series get later timestamps.
                            let timestamp = now_ms + produced as i64;
                            series
                                .entry(key)
                                .or_insert_with(|| {
                                    TimeSeries::new(
                                        [
                                            (METRIC_NAME_LABEL, metric.name.as_str()),
                                            ("host", host.as_str()),
                                            ("region", region.as_str()),
                                            ("env", env.as_str()),
                                        ],
                                        Vec::new(),
                                    )
                                })
                                .samples
                                .push(Sample::new(timestamp, value));

                            produced += 1;
                        }
                    }
                }
            }
        }

        WriteBatch::new(series.into_values().collect())
    }
}

struct RemoteWriteClient {
    client: Client,
    endpoint: String,
}

impl RemoteWriteClient {
    fn new(endpoint: String) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, endpoint })
    }

    async fn send_batch(&self, batch: &WriteBatch) -> Result<usize, String> {
        let body = encode_write_request(batch).map_err(|e| format!("Encoding failed: {}", e))?;
        let bytes_len = body.len();

        let resp = self
            .client
            .post(format!("{}/write", self.endpoint.trim_end_matches('/')))
            .header("Content-Type", "application/x-protobuf")
            .header("Content-Encoding", "snappy")
            .header("X-Prometheus-Remote-Write-Version", "0.1.0")
            .body(body)
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        if resp.status().is_success() {
            Ok(bytes_len)
        } else {
            Err(format!(
                "HTTP error: {} - {}",
                resp.status(),
                resp.text().await.unwrap_or_default()
            ))
        }
    }
}

async fn send_and_record(
    client: &RemoteWriteClient,
    stats: &Stats,
    batch: &WriteBatch,
    verbose: bool,
) {
    match client.send_batch(batch).await {
        Ok(bytes) => {
            stats.record_batch(batch.sample_count() as u64, bytes as u64);
            if verbose {
                println!("Sent batch of {} samples", batch.sample_count());
            }
        }
        Err(e) => {
            stats.record_error();
            eprintln!("Error sending batch: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.batch_size == 0 || args.samples_per_second == 0 {
        return Err("--batch-size and --samples-per-second must be positive".into());
    }

    println!("promsink Load Generator");
    println!("=======================");
    println!("Endpoint:      {}", args.endpoint);
    println!("Metrics:       {}", args.metrics);
    println!("Hosts:         {}", args.hosts);
    println!("Regions:       {}", args.regions);
    println!("Target rate:   {} samples/sec", args.samples_per_second);
    println!("Duration:      {:?}", *args.duration);
    println!("Batch size:    {}", args.batch_size);
    println!("Mode:          {}", if args.burst { "burst" } else { "steady" });
    println!();

    let client = RemoteWriteClient::new(args.endpoint.clone())?;
    let mut generator = DataGenerator::new(args.metrics, args.hosts, args.regions);
    let stats = Arc::new(Stats::new());

    let total_samples = args.samples_per_second * args.duration.as_secs();
    let start_time = Instant::now();

    if args.burst {
        println!("Sending {} samples in burst mode...", total_samples);

        let mut remaining = total_samples as usize;
        while remaining > 0 {
            let batch_count = remaining.min(args.batch_size);
            let batch = generator.generate_batch(batch_count);
            if batch.is_empty() {
                break;
            }
            send_and_record(&client, &stats, &batch, args.verbose).await;
            remaining -= batch_count;
        }
    } else {
        println!("Starting steady-rate generation...");

        let batches_per_second = (args.samples_per_second as f64) / (args.batch_size as f64);
        let mut ticker = interval(Duration::from_secs_f64(1.0 / batches_per_second));
        let deadline = start_time + *args.duration;

        let reporter_stats = stats.clone();
        tokio::spawn(async move {
            let mut reporter = interval(Duration::from_secs(10));
            loop {
                reporter.tick().await;
                let (samples, batches, errors, bytes) = reporter_stats.summary();
                println!(
                    "[Stats] Samples: {}, Batches: {}, Errors: {}, Bytes: {}",
                    samples, batches, errors, bytes
                );
            }
        });

        while Instant::now() < deadline {
            ticker.tick().await;
            let batch = generator.generate_batch(args.batch_size);
            send_and_record(&client, &stats, &batch, args.verbose).await;
        }
    }

    let elapsed = start_time.elapsed();
    let (samples, batches, errors, bytes) = stats.summary();

    println!();
    println!("Generation Complete");
    println!("===================");
    println!("Duration:       {:?}", elapsed);
    println!("Samples sent:   {}", samples);
    println!("Batches sent:   {}", batches);
    println!("Errors:         {}", errors);
    println!("Bytes sent:     {} ({:.2} MB)", bytes, bytes as f64 / 1e6);
    println!(
        "Actual rate:    {:.2} samples/sec",
        samples as f64 / elapsed.as_secs_f64()
    );

    if errors > 0 {
        eprintln!("WARNING: {} errors occurred during generation", errors);
    }

    Ok(())
}
