//! Structured domain events emitted on every significant transition.
//!
//! External consumers (CRM sync, dashboards, audit) read the event feed
//! via `Engine::events_since` — at-least-once, fire-and-forget. Payloads
//! are a closed tagged-variant set so consumers get structural guarantees
//! instead of runtime shape assumptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    AlertId, AlertStatus, AnswerId, PatientId, PeriodId, RiskLevel, StaffId, TaskId, TimeSlot,
};

/// A recorded event with its position in the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PatientCreated {
        patient_id: PatientId,
    },
    PeriodStarted {
        patient_id: PatientId,
        period_id: PeriodId,
        duration_days: u16,
    },
    PeriodCompleted {
        patient_id: PatientId,
        period_id: PeriodId,
    },
    PeriodCancelled {
        patient_id: PatientId,
        period_id: PeriodId,
    },
    AnswerRecorded {
        patient_id: PatientId,
        period_id: PeriodId,
        answer_id: AnswerId,
        day_number: i64,
        slot: TimeSlot,
    },
    AlertCreated {
        patient_id: PatientId,
        alert_id: AlertId,
        risk_level: RiskLevel,
    },
    AlertEscalated {
        alert_id: AlertId,
        escalated_to: StaffId,
    },
    AlertResolved {
        alert_id: AlertId,
        resolved_by: Option<StaffId>,
    },
    AlertStatusChanged {
        alert_id: AlertId,
        from: AlertStatus,
        to: AlertStatus,
    },
    TaskCreated {
        task_id: TaskId,
        alert_id: Option<AlertId>,
        assignee_id: StaffId,
        priority: u8,
    },
    TaskCancelled {
        task_id: TaskId,
    },
    /// A delivery job exhausted its retries. Operational dead-letter.
    DeliveryFailed {
        patient_id: PatientId,
        period_id: PeriodId,
        day_number: i64,
        slot: TimeSlot,
        error: String,
    },
    /// An analysis job exhausted its retries; the answer stays unprocessed.
    AnalysisFailed {
        answer_id: AnswerId,
        error: String,
    },
    /// Persisted event whose JSON no longer parses into a known variant.
    /// Kept raw so old feeds survive schema evolution.
    Unknown {
        raw: String,
    },
}
