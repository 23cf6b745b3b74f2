//! Prometheus metrics for the bridge relayer
//!
//! Exposed on /metrics by the API server.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Gauge, HistogramVec,
};

lazy_static! {
    // Source processing
    pub static ref BLOCKS_PROCESSED: Counter = register_counter!(
        "ebrelayer_blocks_processed_total",
        "Total number of Cosmos blocks processed"
    ).unwrap();

    pub static ref CHECKPOINT_HEIGHT: Gauge = register_gauge!(
        "ebrelayer_checkpoint_height",
        "Last Cosmos height persisted to the checkpoint store"
    ).unwrap();

    pub static ref EVENTS: CounterVec = register_counter_vec!(
        "ebrelayer_events_total",
        "Lock/burn events witnessed, by outcome",
        &["kind", "outcome"]
    ).unwrap();

    // Submission
    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "ebrelayer_submissions_total",
        "Prophecy claim submissions, by status",
        &["status"]
    ).unwrap();

    pub static ref SUBMISSION_LATENCY: HistogramVec = register_histogram_vec!(
        "ebrelayer_submission_latency_seconds",
        "Time from build to confirmed receipt of a claim transaction",
        &["status"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]
    ).unwrap();

    pub static ref NONCE: Gauge = register_gauge!(
        "ebrelayer_nonce",
        "Next nonce the relayer will use"
    ).unwrap();

    // Health
    pub static ref LISTENER_RESTARTS: Counter = register_counter!(
        "ebrelayer_listener_restarts_total",
        "Times the supervisor restarted the listener"
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "ebrelayer_errors_total",
        "Total number of errors",
        &["component", "type"]
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "ebrelayer_up",
        "Whether the listener is streaming blocks"
    ).unwrap();
}

/// Record a fully processed block
pub fn record_block_processed(height: u64) {
    BLOCKS_PROCESSED.inc();
    CHECKPOINT_HEIGHT.set(height as f64);
}

/// Record what happened to a witnessed event
pub fn record_event(kind: &str, outcome: &str) {
    EVENTS.with_label_values(&[kind, outcome]).inc();
}

/// Record a finished submission
pub fn record_submission(status: &str, seconds: f64) {
    SUBMISSIONS.with_label_values(&[status]).inc();
    SUBMISSION_LATENCY
        .with_label_values(&[status])
        .observe(seconds);
}

pub fn set_nonce(nonce: u64) {
    NONCE.set(nonce as f64);
}

pub fn record_restart() {
    LISTENER_RESTARTS.inc();
}

/// Record an error
pub fn record_error(component: &str, error_type: &str) {
    ERRORS.with_label_values(&[component, error_type]).inc();
}

pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}
