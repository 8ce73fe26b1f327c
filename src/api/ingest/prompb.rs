//! Protobuf messages of the Prometheus remote-write protocol (`prometheus.WriteRequest`).
//!
//! Only the fields the receiver persists are declared. Exemplars, native
//! histograms and metadata are skipped by the decoder as unknown fields.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Milliseconds since the epoch
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl From<TimeSeries> for crate::schema::TimeSeries {
    fn from(ts: TimeSeries) -> Self {
        crate::schema::TimeSeries::new(
            ts.labels.into_iter().map(|l| (l.name, l.value)),
            ts.samples
                .into_iter()
                .map(|s| crate::schema::Sample::new(s.timestamp, s.value))
                .collect(),
        )
    }
}

impl From<WriteRequest> for crate::schema::WriteBatch {
    fn from(req: WriteRequest) -> Self {
        crate::schema::WriteBatch::new(req.timeseries.into_iter().map(Into::into).collect())
    }
}

impl From<&crate::schema::WriteBatch> for WriteRequest {
    fn from(batch: &crate::schema::WriteBatch) -> Self {
        WriteRequest {
            timeseries: batch
                .timeseries
                .iter()
                .map(|ts| TimeSeries {
                    labels: ts
                        .labels
                        .iter()
                        .map(|(name, value)| Label::new(name.as_str(), value.as_str()))
                        .collect(),
                    samples: ts
                        .samples
                        .iter()
                        .map(|s| Sample {
                            value: s.value,
                            timestamp: s.timestamp,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
