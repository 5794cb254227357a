//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the submission pipeline
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Dossier metrics
pub const METRICS_PREFIX: &str = "dossier";

/// Buckets for end-to-end submission processing (uploads + CRM round trips)
pub const SUBMISSION_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
    120.0,  // 2m
];

/// Outcome label of a finished submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
        }
    }
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Intake
    describe_counter!(
        format!("{}_submissions_accepted_total", METRICS_PREFIX),
        Unit::Count,
        "Total submissions accepted at intake"
    );

    // Pipeline
    describe_counter!(
        format!("{}_submissions_completed_total", METRICS_PREFIX),
        Unit::Count,
        "Total submissions that reached a terminal status"
    );

    describe_histogram!(
        format!("{}_submission_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Background processing time per submission in seconds"
    );

    // Storage
    describe_counter!(
        format!("{}_folders_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total folders created in the storage provider"
    );

    describe_counter!(
        format!("{}_files_uploaded_total", METRICS_PREFIX),
        Unit::Count,
        "Total files uploaded to the storage provider"
    );

    // CRM
    describe_counter!(
        format!("{}_crm_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total CRM webhook calls, per attempt"
    );

    describe_counter!(
        format!("{}_crm_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Total CRM webhook calls that were retried"
    );

    tracing::info!("Metrics registered");
}

/// Tracks one submission from pick-up to terminal status
pub struct SubmissionTimer {
    start: Instant,
}

impl SubmissionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record the terminal outcome and elapsed time
    pub fn finish(self, outcome: Outcome) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_submissions_completed_total", METRICS_PREFIX),
            "outcome" => outcome.as_str()
        )
        .increment(1);

        histogram!(
            format!("{}_submission_duration_seconds", METRICS_PREFIX),
            "outcome" => outcome.as_str()
        )
        .record(duration);
    }
}

pub fn record_submission_accepted(submission_type: &str) {
    counter!(
        format!("{}_submissions_accepted_total", METRICS_PREFIX),
        "type" => submission_type.to_string()
    )
    .increment(1);
}

pub fn record_folder_created() {
    counter!(format!("{}_folders_created_total", METRICS_PREFIX)).increment(1);
}

pub fn record_files_uploaded(count: usize) {
    counter!(format!("{}_files_uploaded_total", METRICS_PREFIX)).increment(count as u64);
}

/// Helper to record a single CRM attempt; `status` is the HTTP status or
/// `"error"` when no response arrived
pub fn record_crm_request(method: &str, status: &str) {
    counter!(
        format!("{}_crm_requests_total", METRICS_PREFIX),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_crm_retry(method: &str) {
    counter!(
        format!("{}_crm_retries_total", METRICS_PREFIX),
        "method" => method.to_string()
    )
    .increment(1);
}
