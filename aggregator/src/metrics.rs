//! Prometheus metrics for ingestion and upload

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

// ── Ingestion metrics ────────────────────────────────────────────────────────

pub static LINES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "logmeter_lines_total",
        "Access log lines read, by parse result",
        &["result"]
    )
    .unwrap()
});

pub static BYTES_READ: Lazy<Counter> = Lazy::new(|| {
    register_counter!("logmeter_bytes_read_total", "Access log bytes consumed").unwrap()
});

pub static RECORDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "logmeter_records_total",
        "Parsed records by aggregation outcome",
        &["disposition"]
    )
    .unwrap()
});

pub static HOSTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("logmeter_hosts_total", "Host runs by outcome", &["status"]).unwrap()
});

// ── Upload metrics ───────────────────────────────────────────────────────────

pub static BATCHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "logmeter_batches_total",
        "Table store write requests",
        &["status"]
    )
    .unwrap()
});

pub static ENTITIES_UPLOADED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "logmeter_entities_uploaded_total",
        "Consumption entities written to the table store"
    )
    .unwrap()
});

pub static UPLOAD_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "logmeter_upload_duration_seconds",
        "Table store write latency",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
