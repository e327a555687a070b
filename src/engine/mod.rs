//! Core engine. The public API for the follow-up domain.
//!
//! The engine owns the storage and the event feed. All state transitions
//! go through here: period lifecycle (scheduler), answer ingestion,
//! analysis, and the alert/task state machine. The async worker loops in
//! [`worker`] drive it from the job queue.

pub mod alerts;
pub mod analysis;
pub mod ingest;
pub mod scheduler;
pub mod worker;

pub use scheduler::SweepOutcome;
pub use worker::{Daemon, WorkerConfig};

use chrono::{NaiveDate, Utc};

use crate::catalog::Protocol;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::*;
use crate::storage::Storage;
use crate::transport::canonicalize_phone;

/// The follow-up engine. Owns all state and enforces all invariants.
pub struct Engine {
    storage: Storage,
}

/// Options for period creation.
pub struct PeriodOptions<'a> {
    /// Per-slot send-time overrides.
    pub schedule: SlotSchedule,
    /// Complete the period automatically once its duration elapses.
    pub auto_complete: bool,
    /// Protocol whose questions are instantiated into the new period.
    pub protocol: Option<&'a Protocol>,
}

impl Default for PeriodOptions<'_> {
    fn default() -> Self {
        Self {
            schedule: SlotSchedule::default(),
            auto_complete: true,
            protocol: None,
        }
    }
}

impl Engine {
    /// Create an engine with in-memory storage (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            storage: Storage::in_memory()?,
        })
    }

    /// Create an engine backed by a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self {
            storage: Storage::open(path)?,
        })
    }

    // -----------------------------------------------------------------------
    // Staff and patients
    // -----------------------------------------------------------------------

    pub fn create_staff(
        &mut self,
        name: impl Into<String>,
        phone: &str,
        role: StaffRole,
    ) -> Result<StaffUser> {
        let staff = StaffUser {
            id: StaffId::new(),
            name: name.into(),
            phone: canonicalize_phone(phone),
            role,
        };
        self.storage.insert_staff(&staff)?;
        Ok(staff)
    }

    pub fn create_patient(
        &mut self,
        name: impl Into<String>,
        phone: &str,
        tracker_id: Option<StaffId>,
        doctor_id: Option<StaffId>,
    ) -> Result<Patient> {
        let patient = Patient {
            id: PatientId::new(),
            name: name.into(),
            phone: canonicalize_phone(phone),
            status: PatientStatus::Active,
            tracker_id,
            doctor_id,
            current_period_id: None,
            created_at: Utc::now(),
        };

        self.storage.with_transaction(|tx| {
            tx.insert_patient(&patient)?;
            tx.record_event(EventKind::PatientCreated {
                patient_id: patient.id,
            })?;
            Ok(())
        })?;

        Ok(patient)
    }

    pub fn patient(&self, id: PatientId) -> Result<Patient> {
        self.storage.get_patient(id)
    }

    pub fn staff(&self, id: StaffId) -> Result<StaffUser> {
        self.storage.get_staff(id)
    }

    // -----------------------------------------------------------------------
    // Periods
    // -----------------------------------------------------------------------

    /// Start a follow-up period.
    ///
    /// Rejects with a conflict when the patient already has an ACTIVE
    /// period (partial unique index — nothing is written, no day logs
    /// appear). Otherwise, in one transaction: period row, one day log
    /// per day, the patient's current-period pointer, protocol templates,
    /// and the `PeriodStarted` event.
    pub fn create_period(
        &mut self,
        patient_id: PatientId,
        start_date: NaiveDate,
        duration_days: u16,
        options: PeriodOptions<'_>,
    ) -> Result<Period> {
        if duration_days == 0 || duration_days > 365 {
            return Err(Error::Conflict(format!(
                "duration_days must be 1..=365, got {duration_days}"
            )));
        }
        // Existence check up front for a clean NotFound.
        self.storage.get_patient(patient_id)?;

        let now = Utc::now();
        let period = Period {
            id: PeriodId::new(),
            patient_id,
            start_date,
            duration_days,
            status: PeriodStatus::Active,
            schedule: options.schedule,
            auto_complete: options.auto_complete,
            created_at: now,
            updated_at: now,
        };

        let templates = match options.protocol {
            Some(protocol) => protocol.instantiate(period.id)?,
            None => Vec::new(),
        };

        self.storage.with_transaction(|tx| {
            tx.insert_period(&period)?;
            for day in 1..=i64::from(duration_days) {
                tx.insert_day_log(&DayLog {
                    period_id: period.id,
                    day_number: day,
                    morning_answered: false,
                    afternoon_answered: false,
                    evening_answered: false,
                    status: DayStatus::Pending,
                })?;
            }
            tx.set_current_period(patient_id, Some(period.id))?;
            for template in &templates {
                tx.insert_template(template)?;
            }
            tx.record_event(EventKind::PeriodStarted {
                patient_id,
                period_id: period.id,
                duration_days,
            })?;
            Ok(())
        })?;

        Ok(period)
    }

    /// Cancel a period and detach it from the patient's current-period
    /// pointer.
    pub fn cancel_period(&mut self, id: PeriodId) -> Result<()> {
        let period = self.storage.get_period(id)?;
        if period.status.is_terminal() {
            return Err(Error::InvalidTransition {
                entity: "period",
                from: period.status.as_str().to_string(),
                to: PeriodStatus::Cancelled.as_str().to_string(),
            });
        }

        self.storage.with_transaction(|tx| {
            tx.update_period_status(id, PeriodStatus::Cancelled)?;
            tx.set_current_period(period.patient_id, None)?;
            tx.record_event(EventKind::PeriodCancelled {
                patient_id: period.patient_id,
                period_id: id,
            })?;
            Ok(())
        })
    }

    pub fn period(&self, id: PeriodId) -> Result<Period> {
        self.storage.get_period(id)
    }

    pub fn day_log(&self, period_id: PeriodId, day_number: i64) -> Result<DayLog> {
        self.storage.get_day_log(period_id, day_number)
    }

    /// Add a single question to an active period (outside any protocol).
    pub fn add_question(&mut self, template: QuestionTemplate) -> Result<()> {
        let period = self.storage.get_period(template.period_id)?;
        if period.status != PeriodStatus::Active {
            return Err(Error::Conflict(format!(
                "period {} is {}",
                period.id,
                period.status.as_str()
            )));
        }
        if !period.contains_day(template.day_number) {
            return Err(Error::Conflict(format!(
                "day {} outside period duration {}",
                template.day_number, period.duration_days
            )));
        }
        self.storage.insert_template(&template)
    }

    pub fn answer(&self, id: AnswerId) -> Result<Answer> {
        self.storage.get_answer(id)
    }

    // -----------------------------------------------------------------------
    // Visits
    // -----------------------------------------------------------------------

    pub fn create_visit(
        &mut self,
        patient_id: PatientId,
        scheduled_on: NaiveDate,
        note: Option<String>,
    ) -> Result<Visit> {
        self.storage.get_patient(patient_id)?;
        let visit = Visit {
            id: VisitId::new(),
            patient_id,
            scheduled_on,
            note,
            status: VisitStatus::Scheduled,
            reminded: false,
        };
        self.storage.insert_visit(&visit)?;
        Ok(visit)
    }

    // -----------------------------------------------------------------------
    // Jobs and events (worker plumbing, also useful to operators)
    // -----------------------------------------------------------------------

    /// Enqueue a job directly. Operator surface for re-running work after
    /// a dead-letter; the sweep and ingestion enqueue through their own
    /// transactions.
    pub fn enqueue_job(
        &mut self,
        kind: JobKind,
        dedup_key: &str,
        payload: &serde_json::Value,
        run_at: chrono::DateTime<Utc>,
    ) -> Result<Option<JobId>> {
        self.storage.enqueue_job(kind, dedup_key, payload, run_at)
    }

    pub fn claim_job(
        &mut self,
        kind: JobKind,
        now: chrono::DateTime<Utc>,
    ) -> Result<Option<Job>> {
        self.storage.claim_due_job(kind, now)
    }

    pub fn complete_job(&mut self, id: JobId) -> Result<()> {
        self.storage.complete_job(id)
    }

    pub fn fail_job(
        &mut self,
        id: JobId,
        error: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<crate::storage::queue::FailOutcome> {
        self.storage.fail_job(id, error, now)
    }

    pub fn list_jobs(&self, kind: JobKind, state: JobState) -> Result<Vec<Job>> {
        self.storage.list_jobs(kind, state)
    }

    pub fn record_event(&mut self, kind: EventKind) -> Result<Event> {
        self.storage.record_event(kind)
    }

    /// The CRM-sync feed: events after `since_seq`, at-least-once.
    pub fn events_since(&self, since_seq: u64) -> Result<Vec<Event>> {
        self.storage.events_since(since_seq)
    }
}
