//! Schema definitions for promsink
//!
//! The decoded write model ([`WriteBatch`], [`TimeSeries`], [`Sample`]) and the
//! line formats used to persist it ([`RecordFormat`], [`OutputRecord`]).

mod metrics;
pub mod record;

pub use metrics::{LabelSet, Sample, TimeSeries, WriteBatch, METRIC_NAME_LABEL};
pub use record::{OutputRecord, RecordFormat};
