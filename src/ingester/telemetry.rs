//! Ingester telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct IngesterInstruments {
    write_requests: Counter<u64>,
    write_records: Counter<u64>,
    write_bytes: Counter<u64>,
    write_duration_seconds: Histogram<f64>,
    write_failures: Counter<u64>,
    writes_in_flight: UpDownCounter<i64>,
    rotations: Counter<u64>,
    reopen_failures: Counter<u64>,
}

fn instruments() -> &'static IngesterInstruments {
    static INSTRUMENTS: OnceLock<IngesterInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("promsink.ingester");
        IngesterInstruments {
            write_requests: meter
                .u64_counter("promsink.ingester.write.requests")
                .with_description("Write batches accepted by the sink")
                .init(),
            write_records: meter
                .u64_counter("promsink.ingester.write.records")
                .with_description("Output records appended to the sink")
                .init(),
            write_bytes: meter
                .u64_counter("promsink.ingester.write.bytes")
                .with_description("Bytes appended to the sink")
                .with_unit("By")
                .init(),
            write_duration_seconds: meter
                .f64_histogram("promsink.ingester.write.duration")
                .with_description("Time spent writing one batch, lock wait included")
                .with_unit("s")
                .init(),
            write_failures: meter
                .u64_counter("promsink.ingester.write.failures")
                .with_description("Write batches that failed, by error kind")
                .init(),
            writes_in_flight: meter
                .i64_up_down_counter("promsink.ingester.write.in_flight")
                .with_description("Write batches currently being processed")
                .init(),
            rotations: meter
                .u64_counter("promsink.ingester.rotations")
                .with_description("Sink reopens by trigger")
                .init(),
            reopen_failures: meter
                .u64_counter("promsink.ingester.reopen.failures")
                .with_description("Sink reopens that could not open the new file")
                .init(),
        }
    })
}

pub fn record_write(duration_seconds: f64, records: u64, bytes: u64) {
    let i = instruments();
    i.write_requests.add(1, &[]);
    i.write_records.add(records, &[]);
    i.write_bytes.add(bytes, &[]);
    i.write_duration_seconds.record(duration_seconds, &[]);
}

pub fn record_write_failure(kind: &'static str) {
    instruments()
        .write_failures
        .add(1, &[KeyValue::new("kind", kind)]);
}

pub fn record_in_flight_delta(delta: i64) {
    instruments().writes_in_flight.add(delta, &[]);
}

pub fn record_rotation(trigger: &'static str) {
    instruments()
        .rotations
        .add(1, &[KeyValue::new("trigger", trigger)]);
}

pub fn record_reopen_failure() {
    instruments().reopen_failures.add(1, &[]);
}
