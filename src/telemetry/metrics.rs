//! Metric instrument factories for vigil-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"vigil-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for vigil-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("vigil-rs")
}

/// Counter: periods visited by the scheduling sweep.
/// Labels: `result` ("scheduled" | "completed" | "skipped" | "error").
pub fn sweep_periods() -> Counter<u64> {
    meter()
        .u64_counter("vigil.sweep.periods")
        .with_description("Periods visited by the scheduling sweep")
        .build()
}

/// Counter: jobs enqueued.
/// Labels: `kind`, `result` ("ok" | "duplicate").
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("vigil.jobs.enqueued")
        .with_description("Jobs enqueued into the delivery/analysis queues")
        .build()
}

/// Counter: job state transitions.
/// Labels: `kind`, `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("vigil.jobs.state_transitions")
        .with_description("Job state transitions")
        .build()
}

/// Counter: inbound messages handled by ingestion.
/// Labels: `result` ("matched" | "no_patient" | "no_period" |
/// "out_of_range" | "no_question").
pub fn answers_ingested() -> Counter<u64> {
    meter()
        .u64_counter("vigil.answers.ingested")
        .with_description("Inbound messages handled by the ingestion pipeline")
        .build()
}

/// Counter: alerts created.
/// Labels: `risk`, `trigger` ("system" | "staff").
pub fn alerts_created() -> Counter<u64> {
    meter()
        .u64_counter("vigil.alerts.created")
        .with_description("Alerts created")
        .build()
}

/// Counter: alert state transitions.
/// Labels: `from`, `to`.
pub fn alert_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("vigil.alerts.state_transitions")
        .with_description("Alert state transitions")
        .build()
}

/// Counter: outbound notifications.
/// Labels: `audience` ("patient" | "tracker" | "doctor"),
/// `result` ("ok" | "error").
pub fn notifications_sent() -> Counter<u64> {
    meter()
        .u64_counter("vigil.notifications.sent")
        .with_description("Best-effort outbound notifications")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("vigil.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
