//! The alert/task state machine.
//!
//! Alerts move forward only: NEW -> IN_PROGRESS -> ESCALATED, with
//! RESOLVED reachable from any open status and terminal. Task side
//! effects ride the same transaction as the status write; staff
//! notifications happen after commit and never roll anything back.

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::warn;

use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::*;
use crate::telemetry::metrics;
use crate::transport::Transport;

use super::Engine;

impl Engine {
    /// Raise an alert. In one transaction: the NEW alert row, a follow-up
    /// task for the patient's tracker when one is assigned, and the feed
    /// events. The tracker notification goes out after commit.
    pub async fn create_alert(
        &mut self,
        new: NewAlert,
        transport: &dyn Transport,
    ) -> Result<Alert> {
        let patient = self.storage.get_patient(new.patient_id)?;
        let now = Utc::now();

        let alert = Alert {
            id: AlertId::new(),
            patient_id: new.patient_id,
            answer_id: new.answer_id,
            alert_type: new.alert_type,
            risk_level: new.risk_level,
            status: AlertStatus::New,
            title: new.title,
            description: new.description,
            triggered_by: new.triggered_by,
            resolved_by: None,
            resolved_at: None,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };

        let task = patient.tracker_id.map(|tracker_id| Task {
            id: TaskId::new(),
            patient_id: patient.id,
            assignee_id: tracker_id,
            alert_id: Some(alert.id),
            task_type: alert.alert_type.default_task_type(),
            priority: alert_task_priority(alert.risk_level),
            status: TaskStatus::Pending,
            due_at: now + TASK_DUE_WINDOW,
            completed_at: None,
            created_at: now,
            updated_at: now,
        });

        self.storage.with_transaction(|tx| {
            tx.insert_alert(&alert)?;
            tx.record_event(EventKind::AlertCreated {
                patient_id: alert.patient_id,
                alert_id: alert.id,
                risk_level: alert.risk_level,
            })?;
            if let Some(task) = &task {
                tx.insert_task(task)?;
                tx.record_event(EventKind::TaskCreated {
                    task_id: task.id,
                    alert_id: task.alert_id,
                    assignee_id: task.assignee_id,
                    priority: task.priority,
                })?;
            }
            Ok(())
        })?;

        metrics::alerts_created().add(
            1,
            &[
                KeyValue::new("risk", alert.risk_level.as_str()),
                KeyValue::new("trigger", alert.triggered_by.as_str()),
            ],
        );

        if let Some(task) = &task {
            let body = format!(
                "New alert for {}: {} (risk: {})",
                patient.name,
                alert.title,
                alert.risk_level.as_str()
            );
            self.notify_staff(task.assignee_id, &body, "tracker", transport)
                .await;
        }

        Ok(alert)
    }

    /// Move an alert to a new status.
    ///
    /// Resolution stamps `resolved_by`/`resolved_at` and completes every
    /// open task on the alert in the same transaction. Escalation goes
    /// through [`Engine::escalate_alert`], which owns the target choice.
    pub fn update_alert_status(
        &mut self,
        id: AlertId,
        to: AlertStatus,
        resolved_by: Option<StaffId>,
    ) -> Result<Alert> {
        let alert = self.storage.get_alert(id)?;
        let from = alert.status;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                entity: "alert",
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let now = Utc::now();
        self.storage.with_transaction(|tx| {
            tx.update_alert_status(id, from, to)?;
            if to == AlertStatus::Resolved {
                tx.stamp_alert_resolution(id, resolved_by, now)?;
                tx.complete_open_tasks_for_alert(id, now)?;
                tx.record_event(EventKind::AlertResolved {
                    alert_id: id,
                    resolved_by,
                })?;
            } else {
                tx.record_event(EventKind::AlertStatusChanged {
                    alert_id: id,
                    from,
                    to,
                })?;
            }
            Ok(())
        })?;

        metrics::alert_state_transitions().add(
            1,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", to.as_str()),
            ],
        );
        self.storage.get_alert(id)
    }

    /// Escalate an alert to a doctor.
    ///
    /// The target is the explicit `escalated_to` or the patient's
    /// assigned doctor; without either, the call fails before any write.
    /// In one transaction, in order: pending tasks are cancelled, the
    /// status flips to ESCALATED, and a priority-10 doctor task due in
    /// 24h is created.
    pub async fn escalate_alert(
        &mut self,
        id: AlertId,
        escalated_to: Option<StaffId>,
        transport: &dyn Transport,
    ) -> Result<Alert> {
        let alert = self.storage.get_alert(id)?;
        let from = alert.status;
        if !from.can_transition_to(AlertStatus::Escalated) {
            return Err(Error::InvalidTransition {
                entity: "alert",
                from: from.as_str().to_string(),
                to: AlertStatus::Escalated.as_str().to_string(),
            });
        }

        let patient = self.storage.get_patient(alert.patient_id)?;
        let Some(target) = escalated_to.or(patient.doctor_id) else {
            return Err(Error::NoEscalationTarget(format!(
                "alert {id}: no explicit target and patient {} has no doctor",
                patient.id
            )));
        };

        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            patient_id: patient.id,
            assignee_id: target,
            alert_id: Some(alert.id),
            task_type: TaskType::Escalate,
            priority: 10,
            status: TaskStatus::Pending,
            due_at: now + TASK_DUE_WINDOW,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.storage.with_transaction(|tx| {
            // Cancel the superseded tasks before the new one exists, so
            // the doctor task can never be swept up in the cancellation.
            let cancelled = tx.cancel_pending_tasks_for_alert(id, now)?;
            for task_id in cancelled {
                tx.record_event(EventKind::TaskCancelled { task_id })?;
            }
            tx.update_alert_status(id, from, AlertStatus::Escalated)?;
            tx.insert_task(&task)?;
            tx.record_event(EventKind::TaskCreated {
                task_id: task.id,
                alert_id: task.alert_id,
                assignee_id: task.assignee_id,
                priority: task.priority,
            })?;
            tx.record_event(EventKind::AlertEscalated {
                alert_id: id,
                escalated_to: target,
            })?;
            Ok(())
        })?;

        metrics::alert_state_transitions().add(
            1,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", AlertStatus::Escalated.as_str()),
            ],
        );

        let body = format!(
            "Escalated alert for {}: {} (risk: {})",
            patient.name,
            alert.title,
            alert.risk_level.as_str()
        );
        self.notify_staff(target, &body, "doctor", transport).await;

        self.storage.get_alert(id)
    }

    // -----------------------------------------------------------------------
    // Reads and task actions
    // -----------------------------------------------------------------------

    pub fn alert(&self, id: AlertId) -> Result<Alert> {
        self.storage.get_alert(id)
    }

    pub fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        patient_id: Option<PatientId>,
        limit: i64,
    ) -> Result<Vec<Alert>> {
        self.storage.list_alerts(status, patient_id, limit)
    }

    pub fn task(&self, id: TaskId) -> Result<Task> {
        self.storage.get_task(id)
    }

    pub fn tasks_for_alert(&self, alert_id: AlertId) -> Result<Vec<Task>> {
        self.storage.list_tasks_for_alert(alert_id)
    }

    pub fn tasks_for_assignee(
        &self,
        assignee_id: StaffId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        self.storage.list_tasks_for_assignee(assignee_id, status)
    }

    /// Staff-driven task transition.
    pub fn update_task_status(&mut self, id: TaskId, to: TaskStatus) -> Result<Task> {
        let task = self.storage.get_task(id)?;
        if !task.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                entity: "task",
                from: task.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.storage.update_task_status(id, task.status, to)?;
        self.storage.get_task(id)
    }

    /// Alert workload metrics over one tracker's patients.
    pub fn stats_by_tracker(&self, tracker_id: StaffId) -> Result<TrackerStats> {
        self.storage.tracker_stats(tracker_id)
    }

    /// Best-effort staff notification. Failures are logged; the caller's
    /// state transition already committed.
    async fn notify_staff(
        &mut self,
        staff_id: StaffId,
        body: &str,
        audience: &'static str,
        transport: &dyn Transport,
    ) {
        let notifications = metrics::notifications_sent();
        let phone = match self.storage.get_staff(staff_id) {
            Ok(staff) => staff.phone,
            Err(err) => {
                warn!(staff_id = %staff_id, error = %err, "notification target lookup failed");
                notifications.add(
                    1,
                    &[
                        KeyValue::new("audience", audience),
                        KeyValue::new("result", "error"),
                    ],
                );
                return;
            }
        };

        match transport.send(&phone, body).await {
            Ok(_) => notifications.add(
                1,
                &[
                    KeyValue::new("audience", audience),
                    KeyValue::new("result", "ok"),
                ],
            ),
            Err(err) => {
                warn!(staff_id = %staff_id, error = %err, "staff notification failed");
                notifications.add(
                    1,
                    &[
                        KeyValue::new("audience", audience),
                        KeyValue::new("result", "error"),
                    ],
                );
            }
        }
    }
}
