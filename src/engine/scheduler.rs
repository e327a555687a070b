//! The scheduling sweep: the write side of the question pipeline.
//!
//! A sweep visits every ACTIVE period, computes its current day number,
//! and enqueues one delivery job per slot that has questions that day.
//! Job dedup makes the sweep idempotent, so running it every hour (or
//! every minute) schedules each slot at most once.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use opentelemetry::KeyValue;
use tracing::warn;

use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::*;
use crate::telemetry::metrics;
use crate::transport::Transport;

use super::Engine;

/// Tally of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Delivery jobs newly enqueued.
    pub scheduled: u64,
    /// Periods auto-completed because their duration elapsed.
    pub completed: u64,
    /// Periods that failed; the sweep continues past them.
    pub errors: u64,
}

enum PeriodSweep {
    Completed,
    Scheduled(u64),
    Skipped,
}

impl Engine {
    /// Run one scheduling sweep at `now` (server-local time).
    ///
    /// Failures are isolated per period: a bad period is logged and
    /// counted, and the sweep moves on.
    pub fn sweep(&mut self, now: DateTime<Local>) -> Result<SweepOutcome> {
        let started = std::time::Instant::now();
        let today = now.date_naive();
        let now_utc = now.with_timezone(&Utc);

        let periods = self.storage.list_active_periods()?;
        let visited = metrics::sweep_periods();
        let mut outcome = SweepOutcome::default();

        for (period, patient) in periods {
            match self.sweep_period(&period, &patient, today, now_utc) {
                Ok(PeriodSweep::Completed) => {
                    outcome.completed += 1;
                    visited.add(1, &[KeyValue::new("result", "completed")]);
                }
                Ok(PeriodSweep::Scheduled(n)) if n > 0 => {
                    outcome.scheduled += n;
                    visited.add(1, &[KeyValue::new("result", "scheduled")]);
                }
                Ok(_) => {
                    visited.add(1, &[KeyValue::new("result", "skipped")]);
                }
                Err(err) => {
                    warn!(period_id = %period.id, patient_id = %patient.id, error = %err,
                          "sweep failed for period");
                    outcome.errors += 1;
                    visited.add(1, &[KeyValue::new("result", "error")]);
                }
            }
        }

        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "sweep")],
        );
        Ok(outcome)
    }

    fn sweep_period(
        &mut self,
        period: &Period,
        patient: &Patient,
        today: NaiveDate,
        now_utc: DateTime<Utc>,
    ) -> Result<PeriodSweep> {
        let day = period.day_number(today);

        // Not started yet.
        if day < 1 {
            return Ok(PeriodSweep::Skipped);
        }

        // Duration elapsed: complete if the period asks for it, otherwise
        // leave it for an operator.
        if !period.contains_day(day) {
            if !period.auto_complete {
                return Ok(PeriodSweep::Skipped);
            }
            let (period_id, patient_id) = (period.id, period.patient_id);
            self.storage.with_transaction(|tx| {
                tx.update_period_status(period_id, PeriodStatus::Completed)?;
                tx.set_current_period(patient_id, None)?;
                tx.record_event(EventKind::PeriodCompleted {
                    patient_id,
                    period_id,
                })?;
                Ok(())
            })?;
            return Ok(PeriodSweep::Completed);
        }

        // Earlier days that never got an answer go MISSED.
        let stale = self.storage.pending_days_before(period.id, day)?;
        if !stale.is_empty() {
            let period_id = period.id;
            self.storage.with_transaction(|tx| {
                for d in &stale {
                    tx.mark_day_missed(period_id, *d)?;
                }
                Ok(())
            })?;
        }

        // One delivery job per slot with questions today. Dedup makes
        // re-sweeping the same slot a no-op.
        let templates = self.storage.list_templates_for_day(period.id, day)?;
        let enqueued = metrics::jobs_enqueued();
        let mut scheduled = 0u64;

        for slot in TimeSlot::ALL {
            let questions: Vec<String> = templates
                .iter()
                .filter(|t| t.slot == slot)
                .map(|t| t.question_text.clone())
                .collect();
            if questions.is_empty() {
                continue;
            }

            let payload = DeliveryPayload {
                patient_id: patient.id,
                period_id: period.id,
                day_number: day,
                slot,
                phone: patient.phone.clone(),
                questions,
            };
            let key = payload.dedup_key();
            let value =
                serde_json::to_value(&payload).map_err(|e| Error::Other(e.to_string()))?;

            // Slot times already past today fire immediately.
            let run_at = local_instant(today, period.schedule.time_for(slot), now_utc)
                .max(now_utc);

            match self
                .storage
                .enqueue_job(JobKind::Delivery, &key, &value, run_at)?
            {
                Some(_) => {
                    scheduled += 1;
                    enqueued.add(
                        1,
                        &[
                            KeyValue::new("kind", "delivery"),
                            KeyValue::new("result", "ok"),
                        ],
                    );
                }
                None => {
                    enqueued.add(
                        1,
                        &[
                            KeyValue::new("kind", "delivery"),
                            KeyValue::new("result", "duplicate"),
                        ],
                    );
                }
            }
        }

        Ok(PeriodSweep::Scheduled(scheduled))
    }

    /// Send reminders for visits scheduled today or tomorrow. Best-effort:
    /// a failed send is logged and retried on the next pass because the
    /// visit stays unreminded.
    pub async fn check_visits(
        &mut self,
        now: DateTime<Local>,
        transport: &dyn Transport,
    ) -> Result<u64> {
        let today = now.date_naive();
        let dates = [today, today + chrono::Duration::days(1)];
        let due = self.storage.visits_needing_reminder(&dates)?;

        let notifications = metrics::notifications_sent();
        let mut sent = 0u64;

        for (visit, phone) in due {
            let body = format!(
                "Reminder: you have a visit scheduled on {}.",
                visit.scheduled_on
            );
            match transport.send(&phone, &body).await {
                Ok(_) => {
                    self.storage.mark_visit_reminded(visit.id)?;
                    sent += 1;
                    notifications.add(
                        1,
                        &[
                            KeyValue::new("audience", "patient"),
                            KeyValue::new("result", "ok"),
                        ],
                    );
                }
                Err(err) => {
                    warn!(visit_id = %visit.id, error = %err, "visit reminder failed");
                    notifications.add(
                        1,
                        &[
                            KeyValue::new("audience", "patient"),
                            KeyValue::new("result", "error"),
                        ],
                    );
                }
            }
        }

        Ok(sent)
    }
}

/// Resolve a local wall-clock time to an instant. DST gaps fall back to
/// the provided instant.
fn local_instant(date: NaiveDate, time: NaiveTime, fallback: DateTime<Utc>) -> DateTime<Utc> {
    match Local.from_local_datetime(&date.and_time(time)) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        chrono::LocalResult::None => fallback,
    }
}
