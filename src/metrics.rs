//! Prometheus metrics for the relay node
//!
//! Exposed on /metrics when the API server is enabled.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};

lazy_static! {
    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "relay_latest_scanned_block",
        "Latest block scanned",
        &["chain"]
    ).unwrap();

    pub static ref DEPOSITS_DETECTED: CounterVec = register_counter_vec!(
        "relay_deposits_detected_total",
        "Total number of deposit events detected",
        &["direction"]
    ).unwrap();

    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "relay_submissions_total",
        "Wallet calls submitted, by outcome",
        &["chain", "call", "status"]
    ).unwrap();

    pub static ref SCAN_ERRORS: CounterVec = register_counter_vec!(
        "relay_scan_errors_total",
        "Blocks or logs skipped while scanning",
        &["chain", "type"]
    ).unwrap();

    pub static ref QUORUM_REACHED: CounterVec = register_counter_vec!(
        "relay_quorum_reached_total",
        "Source transactions that reached the signature threshold",
        &["chain"]
    ).unwrap();

    pub static ref QUEUED_JOBS: Gauge = register_gauge!(
        "relay_queued_jobs",
        "Jobs waiting for the submission worker"
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "relay_up",
        "Whether the relay node is up and running"
    ).unwrap();
}

pub fn record_block_scanned(chain: &str, block_number: u64) {
    LATEST_BLOCK
        .with_label_values(&[chain])
        .set(block_number as f64);
}

pub fn record_deposit_detected(direction: &str) {
    DEPOSITS_DETECTED.with_label_values(&[direction]).inc();
}

/// Record a submission outcome
pub fn record_submission(chain: &str, call: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    SUBMISSIONS.with_label_values(&[chain, call, status]).inc();
}

pub fn record_quorum_reached(chain: &str) {
    QUORUM_REACHED.with_label_values(&[chain]).inc();
}
