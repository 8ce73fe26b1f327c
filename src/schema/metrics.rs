//! Time-series data model
//!
//! A [`WriteBatch`] is the unit decoded from one remote-write request. Every
//! [`TimeSeries`] carries its own label set and an ordered list of samples.

use std::collections::BTreeMap;

/// Reserved label carrying the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Label name to label value. Ordered so that records are written
/// deterministically.
pub type LabelSet = BTreeMap<String, String>;

/// A single point of a series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Epoch timestamp as sent by the client (milliseconds for Prometheus)
    pub timestamp: i64,
    /// Sample value
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// One label set and the samples that share it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub labels: LabelSet,
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    /// Build a series from label pairs. Later duplicates of a name win.
    pub fn new<I, K, V>(labels: I, samples: Vec<Sample>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            samples,
        }
    }

    /// Metric name, if the series carries one
    pub fn metric_name(&self) -> Option<&str> {
        self.labels.get(METRIC_NAME_LABEL).map(String::as_str)
    }
}

/// Ordered sequence of series decoded from one request body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub timeseries: Vec<TimeSeries>,
}

impl WriteBatch {
    pub fn new(timeseries: Vec<TimeSeries>) -> Self {
        Self { timeseries }
    }

    /// Number of output records this batch produces
    pub fn sample_count(&self) -> usize {
        self.timeseries.iter().map(|ts| ts.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }
}
