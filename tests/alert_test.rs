//! Alert/task state machine: task spawning, resolution, escalation.

mod common;

use vigil_rs::error::Error;
use vigil_rs::event::EventKind;
use vigil_rs::model::*;
use vigil_rs::transport::RecordingTransport;

use common::*;

#[tokio::test]
async fn alert_spawns_tracker_task_and_notifies() {
    let mut engine = engine();
    let (tracker, _, patient) = seed_care_team(&mut engine, "905321250001");
    let transport = RecordingTransport::new();

    let alert = engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::BadCondition,
                RiskLevel::High,
                "Dizziness reported",
            ),
            &transport,
        )
        .await
        .unwrap();

    assert_eq!(alert.status, AlertStatus::New);

    let tasks = engine.tasks_for_alert(alert.id).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].assignee_id, tracker.id);
    assert_eq!(tasks[0].task_type, TaskType::Escalate);
    assert_eq!(tasks[0].priority, 5);
    assert_eq!(tasks[0].status, TaskStatus::Pending);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, tracker.phone);
}

#[tokio::test]
async fn critical_alert_task_gets_maximum_priority() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321250002");
    let transport = RecordingTransport::new();

    let alert = engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::MissedResponse,
                RiskLevel::Critical,
                "Three missed days",
            ),
            &transport,
        )
        .await
        .unwrap();

    let tasks = engine.tasks_for_alert(alert.id).unwrap();
    assert_eq!(tasks[0].priority, 10);
    assert_eq!(tasks[0].task_type, TaskType::Call);
}

#[tokio::test]
async fn failed_notification_does_not_block_alert_creation() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321250003");
    let transport = RecordingTransport::failing_first(1);

    let alert = engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::BadCondition,
                RiskLevel::Medium,
                "Mild fever",
            ),
            &transport,
        )
        .await
        .unwrap();

    // Alert and task committed even though the send failed.
    assert_eq!(engine.alert(alert.id).unwrap().status, AlertStatus::New);
    assert_eq!(engine.tasks_for_alert(alert.id).unwrap().len(), 1);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn resolving_completes_every_open_task() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321250004");
    let transport = RecordingTransport::new();

    let alert = engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::BadCondition,
                RiskLevel::High,
                "Bleeding reported",
            ),
            &transport,
        )
        .await
        .unwrap();
    let staff = engine.tasks_for_alert(alert.id).unwrap()[0].assignee_id;

    let resolved = engine
        .update_alert_status(alert.id, AlertStatus::Resolved, Some(staff))
        .unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.resolved_by, Some(staff));
    assert!(resolved.resolved_at.is_some());

    for task in engine.tasks_for_alert(alert.id).unwrap() {
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some(), "completed task must be stamped");
    }

    let events = engine.events_since(0).unwrap();
    assert!(events.iter().any(|e| matches!(
        e.kind,
        EventKind::AlertResolved { alert_id, .. } if alert_id == alert.id
    )));
}

#[tokio::test]
async fn escalation_cancels_pending_tasks_then_creates_one_doctor_task() {
    let mut engine = engine();
    let (tracker, doctor, patient) = seed_care_team(&mut engine, "905321250005");
    let transport = RecordingTransport::new();

    let alert = engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::BadCondition,
                RiskLevel::High,
                "Worsening wound",
            ),
            &transport,
        )
        .await
        .unwrap();

    let escalated = engine
        .escalate_alert(alert.id, None, &transport)
        .await
        .unwrap();
    assert_eq!(escalated.status, AlertStatus::Escalated);

    let tasks = engine.tasks_for_alert(alert.id).unwrap();
    assert_eq!(tasks.len(), 2);

    let tracker_task = tasks.iter().find(|t| t.assignee_id == tracker.id).unwrap();
    assert_eq!(tracker_task.status, TaskStatus::Cancelled);

    let doctor_task = tasks.iter().find(|t| t.assignee_id == doctor.id).unwrap();
    assert_eq!(doctor_task.status, TaskStatus::Pending);
    assert_eq!(doctor_task.priority, 10);
    assert_eq!(doctor_task.task_type, TaskType::Escalate);
    let window = doctor_task.due_at - doctor_task.created_at;
    assert_eq!(window, TASK_DUE_WINDOW);

    // Feed order: the cancellation precedes the new task.
    let events = engine.events_since(0).unwrap();
    let cancelled_seq = events
        .iter()
        .find(|e| matches!(e.kind, EventKind::TaskCancelled { .. }))
        .unwrap()
        .seq;
    let created_seq = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::TaskCreated { .. }))
        .map(|e| e.seq)
        .max()
        .unwrap();
    assert!(cancelled_seq < created_seq);

    // One notification to the tracker at creation, one to the doctor now.
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].0, doctor.phone);
}

#[tokio::test]
async fn escalation_without_target_fails_before_any_write() {
    let mut engine = engine();
    let tracker = engine
        .create_staff("Tracker", "905000000010", StaffRole::Tracker)
        .unwrap();
    // No doctor assigned.
    let patient = engine
        .create_patient("Mehmet Kaya", "905321250006", Some(tracker.id), None)
        .unwrap();
    let transport = RecordingTransport::new();

    let alert = engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::BadCondition,
                RiskLevel::High,
                "Needs a doctor",
            ),
            &transport,
        )
        .await
        .unwrap();

    let err = engine
        .escalate_alert(alert.id, None, &transport)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoEscalationTarget(_)), "got {err:?}");

    // Nothing changed: alert still NEW, tracker task still pending.
    assert_eq!(engine.alert(alert.id).unwrap().status, AlertStatus::New);
    let tasks = engine.tasks_for_alert(alert.id).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Pending);
}

#[tokio::test]
async fn alert_transitions_are_forward_only() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321250007");
    let transport = RecordingTransport::new();

    let alert = engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::Custom,
                RiskLevel::Low,
                "Manual note",
            )
            .triggered_by(TriggeredBy::Staff),
            &transport,
        )
        .await
        .unwrap();

    engine
        .update_alert_status(alert.id, AlertStatus::Resolved, None)
        .unwrap();

    // Nothing leaves RESOLVED.
    assert!(matches!(
        engine.update_alert_status(alert.id, AlertStatus::InProgress, None),
        Err(Error::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.escalate_alert(alert.id, None, &transport).await,
        Err(Error::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn tracker_stats_aggregate_status_risk_and_reaction_time() {
    let mut engine = engine();
    let (tracker, _, patient) = seed_care_team(&mut engine, "905321250009");
    let transport = RecordingTransport::new();

    let resolved = engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::BadCondition,
                RiskLevel::High,
                "Handled quickly",
            ),
            &transport,
        )
        .await
        .unwrap();
    engine
        .update_alert_status(resolved.id, AlertStatus::Resolved, Some(tracker.id))
        .unwrap();
    engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::MissedResponse,
                RiskLevel::Critical,
                "Still open",
            ),
            &transport,
        )
        .await
        .unwrap();

    // Another tracker's patient must not leak into these stats.
    let other_tracker = engine
        .create_staff("Other Tracker", "905000000020", StaffRole::Tracker)
        .unwrap();
    let other_patient = engine
        .create_patient("Zeynep Demir", "905321250010", Some(other_tracker.id), None)
        .unwrap();
    engine
        .create_alert(
            NewAlert::new(other_patient.id, AlertType::Custom, RiskLevel::Low, "Elsewhere"),
            &transport,
        )
        .await
        .unwrap();

    let stats = engine.stats_by_tracker(tracker.id).unwrap();

    let count = |status: AlertStatus| {
        stats
            .by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    assert_eq!(count(AlertStatus::New), 1);
    assert_eq!(count(AlertStatus::Resolved), 1);

    // Resolved alerts drop out of the open-by-risk breakdown.
    assert_eq!(stats.open_by_risk, vec![(RiskLevel::Critical, 1)]);

    // Reaction time averages over alerts no longer NEW — here just the
    // resolved one, touched moments after creation.
    let avg = stats.avg_reaction_minutes.expect("one alert was resolved");
    assert!((0.0..1.0).contains(&avg), "got {avg}");
}

#[tokio::test]
async fn staff_task_transitions_are_guarded() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321250008");
    let transport = RecordingTransport::new();

    let alert = engine
        .create_alert(
            NewAlert::new(
                patient.id,
                AlertType::NoPhoto,
                RiskLevel::Medium,
                "No photo received",
            ),
            &transport,
        )
        .await
        .unwrap();
    let task_id = engine.tasks_for_alert(alert.id).unwrap()[0].id;

    let task = engine
        .update_task_status(task_id, TaskStatus::InProgress)
        .unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.task_type, TaskType::CheckPhoto);

    let task = engine
        .update_task_status(task_id, TaskStatus::Completed)
        .unwrap();
    assert!(task.completed_at.is_some());

    assert!(matches!(
        engine.update_task_status(task_id, TaskStatus::Pending),
        Err(Error::InvalidTransition { .. })
    ));
}
