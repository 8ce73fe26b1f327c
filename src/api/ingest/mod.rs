//! Ingestion protocols

pub mod prometheus;
pub mod prompb;
