//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_TOTAL: &str = "matte_jobs_total";
    pub const JOB_DURATION_SECONDS: &str = "matte_job_duration_seconds";
    pub const JOBS_IN_FLIGHT: &str = "matte_jobs_in_flight";
    pub const JOBS_REQUEUED_TOTAL: &str = "matte_jobs_requeued_total";
    pub const RESULT_UPLOADS_TOTAL: &str = "matte_result_uploads_total";
}

/// Serve metrics over HTTP at `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("failed to start metrics exporter: {e}")))
}

/// Record a finished job. `outcome` is `completed` or an error category.
pub fn record_job(job_type: &str, outcome: &str, duration_secs: f64) {
    let labels = [("type", job_type.to_string()), ("outcome", outcome.to_string())];
    counter!(names::JOBS_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_requeued(count: usize) {
    counter!(names::JOBS_REQUEUED_TOTAL).increment(count as u64);
}

pub fn record_upload(variant: &str, ok: bool) {
    let labels = [
        ("variant", variant.to_string()),
        ("status", if ok { "ok" } else { "error" }.to_string()),
    ];
    counter!(names::RESULT_UPLOADS_TOTAL, &labels).increment(1);
}
