//! Core data model.
//!
//! A period is a bounded course of daily check-ins for one patient.
//! Questions are scheduled per day and time slot, answers are matched
//! back to exactly one question, and risky answers raise alerts that
//! drive staff tasks. All lifecycle enums carry explicit transition
//! tables; nothing relies on declaration or lexical ordering.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Uuid newtype with a short (8-char) display, like a git abbreviated hash.
macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }
    };
}

id_type!(PatientId);
id_type!(StaffId);
id_type!(PeriodId);
id_type!(TemplateId);
id_type!(AnswerId);
id_type!(AlertId);
id_type!(TaskId);
id_type!(VisitId);
id_type!(JobId);

// ---------------------------------------------------------------------------
// Time slots
// ---------------------------------------------------------------------------

/// One of the three daily check-in windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
}

impl TimeSlot {
    pub const ALL: [TimeSlot; 3] = [TimeSlot::Morning, TimeSlot::Afternoon, TimeSlot::Evening];

    /// Explicit ordering rank. All slot sorting goes through this —
    /// never the enum's declaration order and never alphabetic order.
    pub fn rank(self) -> u8 {
        match self {
            TimeSlot::Morning => 0,
            TimeSlot::Afternoon => 1,
            TimeSlot::Evening => 2,
        }
    }

    /// Default send time for this slot (server-local clock).
    pub fn default_time(self) -> NaiveTime {
        let (h, m) = match self {
            TimeSlot::Morning => (9, 0),
            TimeSlot::Afternoon => (14, 0),
            TimeSlot::Evening => (20, 0),
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(TimeSlot::Morning),
            "afternoon" => Some(TimeSlot::Afternoon),
            "evening" => Some(TimeSlot::Evening),
            _ => None,
        }
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Patients and staff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientStatus {
    Active,
    Inactive,
}

impl PatientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PatientStatus::Active => "active",
            PatientStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PatientStatus::Active),
            "inactive" => Some(PatientStatus::Inactive),
            _ => None,
        }
    }
}

/// A patient under follow-up.
///
/// `phone` is stored canonicalized (digits only, country code first) and
/// carries a unique index — inbound message resolution is an exact match,
/// never a substring scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub name: String,
    pub phone: String,
    pub status: PatientStatus,
    pub tracker_id: Option<StaffId>,
    pub doctor_id: Option<StaffId>,
    pub current_period_id: Option<PeriodId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Tracker,
    Doctor,
}

impl StaffRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StaffRole::Tracker => "tracker",
            StaffRole::Doctor => "doctor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tracker" => Some(StaffRole::Tracker),
            "doctor" => Some(StaffRole::Doctor),
            _ => None,
        }
    }
}

/// A staff member who receives tasks and notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffUser {
    pub id: StaffId,
    pub name: String,
    pub phone: String,
    pub role: StaffRole,
}

// ---------------------------------------------------------------------------
// Periods and day logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Active,
    Completed,
    Cancelled,
}

impl PeriodStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PeriodStatus::Completed | PeriodStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodStatus::Active => "active",
            PeriodStatus::Completed => "completed",
            PeriodStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PeriodStatus::Active),
            "completed" => Some(PeriodStatus::Completed),
            "cancelled" => Some(PeriodStatus::Cancelled),
            _ => None,
        }
    }
}

/// Per-slot send-time overrides for a period. Slots without an override
/// fall back to [`TimeSlot::default_time`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotSchedule {
    pub morning: Option<NaiveTime>,
    pub afternoon: Option<NaiveTime>,
    pub evening: Option<NaiveTime>,
}

impl SlotSchedule {
    pub fn time_for(&self, slot: TimeSlot) -> NaiveTime {
        let custom = match slot {
            TimeSlot::Morning => self.morning,
            TimeSlot::Afternoon => self.afternoon,
            TimeSlot::Evening => self.evening,
        };
        custom.unwrap_or_else(|| slot.default_time())
    }
}

/// A bounded course of daily check-ins for one patient.
///
/// At most one period per patient may be ACTIVE at a time (enforced by a
/// partial unique index in storage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Period {
    pub id: PeriodId,
    pub patient_id: PatientId,
    pub start_date: NaiveDate,
    /// 1..=365, validated at creation.
    pub duration_days: u16,
    pub status: PeriodStatus,
    pub schedule: SlotSchedule,
    /// When set, the sweep completes the period once its duration elapses.
    pub auto_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Period {
    /// 1-based day number of `on` within this period, by calendar-day
    /// difference. Values outside `1..=duration_days` mean the period has
    /// not started yet (< 1) or has run its course (> duration_days).
    pub fn day_number(&self, on: NaiveDate) -> i64 {
        (on - self.start_date).num_days() + 1
    }

    pub fn contains_day(&self, day_number: i64) -> bool {
        day_number >= 1 && day_number <= i64::from(self.duration_days)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    Pending,
    Partial,
    Completed,
    Missed,
}

impl DayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DayStatus::Pending => "pending",
            DayStatus::Partial => "partial",
            DayStatus::Completed => "completed",
            DayStatus::Missed => "missed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DayStatus::Pending),
            "partial" => Some(DayStatus::Partial),
            "completed" => Some(DayStatus::Completed),
            "missed" => Some(DayStatus::Missed),
            _ => None,
        }
    }
}

/// One row per (period, day). Generated at period creation for every day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayLog {
    pub period_id: PeriodId,
    pub day_number: i64,
    pub morning_answered: bool,
    pub afternoon_answered: bool,
    pub evening_answered: bool,
    pub status: DayStatus,
}

impl DayLog {
    pub fn slot_answered(&self, slot: TimeSlot) -> bool {
        match slot {
            TimeSlot::Morning => self.morning_answered,
            TimeSlot::Afternoon => self.afternoon_answered,
            TimeSlot::Evening => self.evening_answered,
        }
    }

    pub fn any_answered(&self) -> bool {
        self.morning_answered || self.afternoon_answered || self.evening_answered
    }
}

// ---------------------------------------------------------------------------
// Question templates and answers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Text,
    Photo,
    Voice,
    Option,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseType::Text => "text",
            ResponseType::Photo => "photo",
            ResponseType::Voice => "voice",
            ResponseType::Option => "option",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ResponseType::Text),
            "photo" => Some(ResponseType::Photo),
            "voice" => Some(ResponseType::Voice),
            "option" => Some(ResponseType::Option),
            _ => None,
        }
    }
}

/// A scheduled prompt for a specific period/day/slot.
///
/// Keyed uniquely by (period, day, slot, ord). Immutable once answered —
/// answers reference it but never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionTemplate {
    pub id: TemplateId,
    pub period_id: PeriodId,
    pub day_number: i64,
    pub slot: TimeSlot,
    /// Order within the slot, ascending.
    pub ord: i32,
    pub question_text: String,
    pub response_type: ResponseType,
    pub is_required: bool,
    /// Optional per-question analysis prompt override.
    pub ai_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A patient's response matched to one question template.
///
/// At most one answer per template (unique index). `answered_at` is the
/// message's original send time, not ingestion time — ordering survives
/// delivery lag. The analysis worker mutates it exactly once, setting
/// `is_processed`, `risk_level`, and `ai_analysis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub patient_id: PatientId,
    pub period_id: PeriodId,
    pub template_id: TemplateId,
    pub day_number: i64,
    pub slot: TimeSlot,
    pub text_content: Option<String>,
    pub media_url: Option<String>,
    pub is_processed: bool,
    pub risk_level: RiskLevel,
    pub ai_analysis: Option<serde_json::Value>,
    pub answered_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    MissedResponse,
    NoPhoto,
    BadCondition,
    Custom,
}

impl AlertType {
    /// Task type spawned for the assigned tracker when this alert fires.
    pub fn default_task_type(self) -> TaskType {
        match self {
            AlertType::MissedResponse => TaskType::Call,
            AlertType::NoPhoto => TaskType::CheckPhoto,
            AlertType::BadCondition => TaskType::Escalate,
            AlertType::Custom => TaskType::Custom,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::MissedResponse => "missed_response",
            AlertType::NoPhoto => "no_photo",
            AlertType::BadCondition => "bad_condition",
            AlertType::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "missed_response" => Some(AlertType::MissedResponse),
            "no_photo" => Some(AlertType::NoPhoto),
            "bad_condition" => Some(AlertType::BadCondition),
            "custom" => Some(AlertType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    InProgress,
    Escalated,
    Resolved,
}

impl AlertStatus {
    /// Strictly forward transitions. Escalation may follow New or
    /// InProgress; nothing leaves Resolved.
    pub fn can_transition_to(self, to: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, to),
            (New, InProgress)
                | (New, Escalated)
                | (New, Resolved)
                | (InProgress, Escalated)
                | (InProgress, Resolved)
                | (Escalated, Resolved)
        )
    }

    pub fn is_open(self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::InProgress => "in_progress",
            AlertStatus::Escalated => "escalated",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(AlertStatus::New),
            "in_progress" => Some(AlertStatus::InProgress),
            "escalated" => Some(AlertStatus::Escalated),
            "resolved" => Some(AlertStatus::Resolved),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    System,
    Staff,
}

impl TriggeredBy {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggeredBy::System => "system",
            TriggeredBy::Staff => "staff",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "system" => Some(TriggeredBy::System),
            "staff" => Some(TriggeredBy::Staff),
            _ => None,
        }
    }
}

/// A system- or staff-raised risk flag on a patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub patient_id: PatientId,
    pub answer_id: Option<AnswerId>,
    pub alert_type: AlertType,
    pub risk_level: RiskLevel,
    pub status: AlertStatus,
    pub title: String,
    pub description: Option<String>,
    pub triggered_by: TriggeredBy,
    pub resolved_by: Option<StaffId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Builder for raising a new alert. The engine's public API for both the
/// analysis worker (system-triggered) and staff actions.
pub struct NewAlert {
    pub(crate) patient_id: PatientId,
    pub(crate) alert_type: AlertType,
    pub(crate) risk_level: RiskLevel,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) triggered_by: TriggeredBy,
    pub(crate) answer_id: Option<AnswerId>,
    pub(crate) metadata: serde_json::Value,
}

impl NewAlert {
    pub fn new(
        patient_id: PatientId,
        alert_type: AlertType,
        risk_level: RiskLevel,
        title: impl Into<String>,
    ) -> Self {
        Self {
            patient_id,
            alert_type,
            risk_level,
            title: title.into(),
            description: None,
            triggered_by: TriggeredBy::System,
            answer_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn triggered_by(mut self, triggered_by: TriggeredBy) -> Self {
        self.triggered_by = triggered_by;
        self
    }

    pub fn answer(mut self, answer_id: AnswerId) -> Self {
        self.answer_id = Some(answer_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Call,
    CheckPhoto,
    Escalate,
    Custom,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Call => "call",
            TaskType::CheckPhoto => "check_photo",
            TaskType::Escalate => "escalate",
            TaskType::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "call" => Some(TaskType::Call),
            "check_photo" => Some(TaskType::CheckPhoto),
            "escalate" => Some(TaskType::Escalate),
            "custom" => Some(TaskType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (Pending, Completed)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An actionable follow-up item assigned to staff, usually spawned by an
/// alert. Owned by the alert/task state machine — mutated only through
/// alert transition handlers or direct staff action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub patient_id: PatientId,
    pub assignee_id: StaffId,
    pub alert_id: Option<AlertId>,
    pub task_type: TaskType,
    /// 0..=10, higher is more urgent.
    pub priority: u8,
    pub status: TaskStatus,
    pub due_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Follow-up window for alert-spawned tasks.
pub const TASK_DUE_WINDOW: Duration = Duration::hours(24);

/// Priority for alert-spawned tasks: maximum for critical risk and for
/// escalation targets, moderate otherwise.
pub fn alert_task_priority(risk: RiskLevel) -> u8 {
    if risk == RiskLevel::Critical { 10 } else { 5 }
}

// ---------------------------------------------------------------------------
// Visits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl VisitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VisitStatus::Scheduled => "scheduled",
            VisitStatus::Completed => "completed",
            VisitStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(VisitStatus::Scheduled),
            "completed" => Some(VisitStatus::Completed),
            "cancelled" => Some(VisitStatus::Cancelled),
            _ => None,
        }
    }
}

/// A scheduled in-person visit. The sweep sends a best-effort reminder
/// the day before and the day of the visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub patient_id: PatientId,
    pub scheduled_on: NaiveDate,
    pub note: Option<String>,
    pub status: VisitStatus,
    pub reminded: bool,
}

// ---------------------------------------------------------------------------
// Queue jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Delivery,
    Analysis,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Delivery => "delivery",
            JobKind::Analysis => "analysis",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "delivery" => Some(JobKind::Delivery),
            "analysis" => Some(JobKind::Analysis),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its run_at to pass.
    Scheduled,
    /// Claimed by a worker.
    Running,
    /// Done. Terminal; its dedup key stays occupied so re-sweeps are no-ops.
    Completed,
    /// Exhausted retries. Terminal; the dedup key is released.
    Dead,
}

impl JobState {
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Scheduled, Running)
                | (Running, Completed)
                | (Running, Scheduled) // retry with backoff
                | (Running, Dead)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(JobState::Scheduled),
            "running" => Some(JobState::Running),
            "completed" => Some(JobState::Completed),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }
}

/// A queued unit of background work: one question-delivery send or one
/// answer analysis. Deduplicated by `(kind, dedup_key)` among non-dead
/// jobs, retried with exponential backoff up to `max_attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub dedup_key: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Payload of a delivery job. Carries the denormalized fields needed to
/// send without a storage round-trip on the hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub patient_id: PatientId,
    pub period_id: PeriodId,
    pub day_number: i64,
    pub slot: TimeSlot,
    pub phone: String,
    pub questions: Vec<String>,
}

impl DeliveryPayload {
    /// Idempotency key. One send per (patient, period, day, slot), ever.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.patient_id.0, self.period_id.0, self.day_number, self.slot
        )
    }
}

/// Payload of an analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub answer_id: AnswerId,
}

impl AnalysisPayload {
    pub fn dedup_key(&self) -> String {
        self.answer_id.0.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tracker stats
// ---------------------------------------------------------------------------

/// Aggregate alert metrics for one tracker's patients.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackerStats {
    /// Alert counts keyed by status.
    pub by_status: Vec<(AlertStatus, u64)>,
    /// Open-alert counts keyed by risk level.
    pub open_by_risk: Vec<(RiskLevel, u64)>,
    /// Mean of (updated_at - created_at) in minutes over alerts whose
    /// status is no longer New. None when no alert has been touched.
    pub avg_reaction_minutes: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_rank_is_chronological_not_alphabetical() {
        // Alphabetically: afternoon < evening < morning. Rank must not be.
        assert!(TimeSlot::Morning.rank() < TimeSlot::Afternoon.rank());
        assert!(TimeSlot::Afternoon.rank() < TimeSlot::Evening.rank());
    }

    #[test]
    fn alert_transitions_are_forward_only() {
        use AlertStatus::*;
        assert!(New.can_transition_to(Resolved));
        assert!(InProgress.can_transition_to(Escalated));
        assert!(!Resolved.can_transition_to(New));
        assert!(!Resolved.can_transition_to(Escalated));
        assert!(!Escalated.can_transition_to(InProgress));
    }

    #[test]
    fn day_number_is_one_based() {
        let period = Period {
            id: PeriodId::new(),
            patient_id: PatientId::new(),
            start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            duration_days: 5,
            status: PeriodStatus::Active,
            schedule: SlotSchedule::default(),
            auto_complete: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let d = |day| NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
        assert_eq!(period.day_number(d(1)), 1);
        assert_eq!(period.day_number(d(5)), 5);
        assert!(period.contains_day(period.day_number(d(5))));
        assert_eq!(period.day_number(d(6)), 6);
        assert!(!period.contains_day(period.day_number(d(6))));
    }
}
