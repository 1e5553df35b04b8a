//! Metrics module
//!
//! Prometheus counters and histograms for the upload engine, registered in the
//! default registry. `gather_text` renders them in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // File metrics
    pub static ref FILES_TOTAL: CounterVec = register_counter_vec!(
        "kumo_files_total",
        "Files settled by the upload engine",
        &["strategy", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "kumo_upload_bytes_total",
        "Total bytes of successfully uploaded files"
    ).unwrap();

    pub static ref FILE_DURATION: HistogramVec = register_histogram_vec!(
        "kumo_file_duration_seconds",
        "Time from first attempt to final outcome of one file",
        &["strategy"],
        vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 180.0]
    ).unwrap();

    pub static ref FILE_RETRIES: Counter = register_counter!(
        "kumo_file_retries_total",
        "File-level retry attempts"
    ).unwrap();

    // Chunk metrics
    pub static ref CHUNK_ATTEMPTS: CounterVec = register_counter_vec!(
        "kumo_chunk_attempts_total",
        "Chunk transfer attempts",
        &["result"]  // "success" or "failure"
    ).unwrap();

    // Batch metrics
    pub static ref BATCHES_TOTAL: CounterVec = register_counter_vec!(
        "kumo_batches_total",
        "Batches by aggregate outcome",
        &["summary"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "kumo_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a file that reached `success`
pub fn record_file_success(strategy: &str, bytes: u64, duration_secs: f64) {
    FILES_TOTAL.with_label_values(&[strategy, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    FILE_DURATION
        .with_label_values(&[strategy])
        .observe(duration_secs);
}

/// Record a file that reached `error`
pub fn record_file_failure(strategy: &str, duration_secs: f64) {
    FILES_TOTAL.with_label_values(&[strategy, "error"]).inc();
    FILE_DURATION
        .with_label_values(&[strategy])
        .observe(duration_secs);
}

pub fn record_file_retry() {
    FILE_RETRIES.inc();
}

/// Record one chunk attempt
pub fn record_chunk_attempt(success: bool) {
    let result = if success { "success" } else { "failure" };
    CHUNK_ATTEMPTS.with_label_values(&[result]).inc();
}

pub fn record_batch(summary: &str) {
    BATCHES_TOTAL.with_label_values(&[summary]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
