//! Prometheus Remote Write receiver
//!
//! Implements the Prometheus Remote Write protocol with Snappy compression.

use super::prompb;
use crate::api::ApiState;
use crate::schema::WriteBatch;
use crate::{Error, Result};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use prost::Message;
use tracing::debug;

/// Handle Prometheus Remote Write requests
///
/// POST /write
/// Content-Encoding: snappy
/// Content-Type: application/x-protobuf
///
/// 200 with an empty body once every sample is appended, 400 for a body that
/// cannot be decoded, 500 when the sink rejects the write.
pub async fn handle_remote_write(
    State(state): State<ApiState>,
    body: Bytes,
) -> std::result::Result<StatusCode, Error> {
    let batch = decode_write_request(&body)?;

    debug!(
        body_bytes = body.len(),
        timeseries = batch.timeseries.len(),
        samples = batch.sample_count(),
        "Decoded remote write request"
    );

    state.ingester.write(&batch).await?;
    Ok(StatusCode::OK)
}

/// Decode a snappy block-compressed `prometheus.WriteRequest`.
///
/// Compression failures map to [`Error::Compression`], protobuf failures to
/// [`Error::Schema`].
pub fn decode_write_request(body: &[u8]) -> Result<WriteBatch> {
    let decompressed = snap::raw::Decoder::new().decompress_vec(body)?;
    let request = prompb::WriteRequest::decode(decompressed.as_slice())?;
    Ok(request.into())
}

/// Encode a batch the way a remote-write client sends it.
pub fn encode_write_request(batch: &WriteBatch) -> Result<Vec<u8>> {
    let request = prompb::WriteRequest::from(batch);
    Ok(snap::raw::Encoder::new().compress_vec(&request.encode_to_vec())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Sample, TimeSeries};

    fn sample_batch() -> WriteBatch {
        WriteBatch::new(vec![
            TimeSeries::new(
                [("__name__", "cpu_usage"), ("host", "server1")],
                vec![Sample::new(1000, 0.85), Sample::new(2000, 0.90)],
            ),
            TimeSeries::new([("__name__", "up")], vec![Sample::new(1000, 1.0)]),
        ])
    }

    #[test]
    fn test_decode_remote_write_body() {
        let body = encode_write_request(&sample_batch()).unwrap();
        let batch = decode_write_request(&body).unwrap();
        assert_eq!(batch, sample_batch());
        assert_eq!(batch.sample_count(), 3);
    }

    #[test]
    fn test_bad_compression_is_compression_error() {
        let err = decode_write_request(b"definitely not snappy").unwrap_err();
        assert!(matches!(err, Error::Compression(_)), "{err}");

        let err = decode_write_request(b"").unwrap_err();
        assert!(matches!(err, Error::Compression(_)), "{err}");
    }

    #[test]
    fn test_bad_protobuf_is_schema_error() {
        // Field 1 declared as a length-delimited message longer than the payload.
        let body = snap::raw::Encoder::new()
            .compress_vec(&[0x0a, 0x7f, 0x01])
            .unwrap();
        let err = decode_write_request(&body).unwrap_err();
        assert!(matches!(err, Error::Schema(_)), "{err}");
    }

    #[test]
    fn test_empty_message_is_empty_batch() {
        let body = snap::raw::Encoder::new().compress_vec(&[]).unwrap();
        let batch = decode_write_request(&body).unwrap();
        assert!(batch.timeseries.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut raw = prompb::WriteRequest::from(&sample_batch()).encode_to_vec();
        // Field 3 (metadata), length-delimited, empty.
        raw.extend_from_slice(&[0x1a, 0x00]);
        let body = snap::raw::Encoder::new().compress_vec(&raw).unwrap();
        assert_eq!(decode_write_request(&body).unwrap(), sample_batch());
    }
}
