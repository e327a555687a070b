//! Full pipeline: protocol -> sweep -> delivery -> reply -> analysis ->
//! alert -> escalation, driven through the worker entry points.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};

use vigil_rs::catalog::CatalogRegistry;
use vigil_rs::engine::{Daemon, Engine, PeriodOptions, WorkerConfig};
use vigil_rs::event::EventKind;
use vigil_rs::llm::FixedAnalyzer;
use vigil_rs::model::*;
use vigil_rs::transport::{InboundMessage, InboundPayload, RecordingTransport};

use common::*;

const PROTOCOL: &str = r#"
    [protocol]
    name = "post-op-7d"
    duration_days = 7

    [[question]]
    day = 1
    slot = "morning"
    text = "How is your pain this morning, 1-10?"
    ai_prompt = "Flag pain above 6."

    [[question]]
    day = 1
    slot = "morning"
    order = 1
    text = "Did you take your medication?"
"#;

fn daemon_with(
    engine: Engine,
    transport: Arc<RecordingTransport>,
    analyzer: FixedAnalyzer,
) -> Daemon {
    Daemon::new(
        engine,
        transport,
        Arc::new(analyzer),
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            sweep_interval: Duration::from_secs(3600),
        },
    )
}

#[tokio::test]
async fn risky_reply_flows_from_delivery_to_escalation() {
    let mut engine = engine();
    let (tracker, doctor, patient) = seed_care_team(&mut engine, "905321260001");

    let protocol = CatalogRegistry::parse(PROTOCOL).unwrap();
    engine
        .create_period(
            patient.id,
            today(),
            7,
            PeriodOptions {
                schedule: immediate_schedule(),
                protocol: Some(&protocol),
                ..PeriodOptions::default()
            },
        )
        .unwrap();

    let outcome = engine.sweep(Local::now()).unwrap();
    assert_eq!(outcome.scheduled, 1);

    let transport = Arc::new(RecordingTransport::new());
    let daemon = daemon_with(
        engine,
        Arc::clone(&transport),
        FixedAnalyzer::new(FixedAnalyzer::verdict(RiskLevel::High, true)),
    );
    let engine = daemon.engine();

    // Delivery: both morning questions in one job, template order.
    assert!(daemon.process_next_delivery().await.unwrap());
    assert!(!daemon.process_next_delivery().await.unwrap());
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, patient.phone);
    assert!(sent[0].1.contains("pain"));
    assert!(sent[1].1.contains("medication"));

    // The patient replies; the reply matches the first morning question.
    let answer_id = {
        let mut engine = engine.lock().await;
        engine
            .ingest(
                &InboundMessage {
                    from_phone: "905321260001".to_string(),
                    sent_at: Utc::now(),
                    payload: InboundPayload::Text {
                        body: "pain is 9, very bad".to_string(),
                    },
                },
                Local::now(),
            )
            .unwrap()
            .expect("reply should match the morning question")
    };

    // Analysis: verdict persisted, alert raised, tracker task + ping.
    assert!(daemon.process_next_analysis().await.unwrap());
    assert!(!daemon.process_next_analysis().await.unwrap());

    let alert = {
        let engine = engine.lock().await;

        let answer = engine.answer(answer_id).unwrap();
        assert!(answer.is_processed);
        assert_eq!(answer.risk_level, RiskLevel::High);
        assert!(answer.ai_analysis.is_some());

        let alerts = engine.list_alerts(Some(AlertStatus::New), None, 10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].answer_id, Some(answer_id));
        alerts[0].clone()
    };

    let sent = transport.sent();
    assert_eq!(sent.len(), 3, "tracker should have been notified");
    assert_eq!(sent[2].0, tracker.phone);

    // The tracker escalates to the patient's doctor.
    {
        let mut engine = engine.lock().await;
        let escalated = engine
            .escalate_alert(alert.id, None, transport.as_ref())
            .await
            .unwrap();
        assert_eq!(escalated.status, AlertStatus::Escalated);

        let doctor_task = engine
            .tasks_for_assignee(doctor.id, Some(TaskStatus::Pending))
            .unwrap();
        assert_eq!(doctor_task.len(), 1);
        assert_eq!(doctor_task[0].priority, 10);
    }
    assert_eq!(transport.sent().len(), 4);

    // The feed tells the whole story in order.
    let events = engine.lock().await.events_since(0).unwrap();
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match &e.kind {
            EventKind::PatientCreated { .. } => "patient_created",
            EventKind::PeriodStarted { .. } => "period_started",
            EventKind::AnswerRecorded { .. } => "answer_recorded",
            EventKind::AlertCreated { .. } => "alert_created",
            EventKind::TaskCreated { .. } => "task_created",
            EventKind::TaskCancelled { .. } => "task_cancelled",
            EventKind::AlertEscalated { .. } => "alert_escalated",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "patient_created",
            "period_started",
            "answer_recorded",
            "alert_created",
            "task_created",
            "task_cancelled",
            "task_created",
            "alert_escalated",
        ]
    );

    // Re-sweeping after delivery completed must not re-send: the dedup
    // key survives completion.
    {
        let mut engine = engine.lock().await;
        let outcome = engine.sweep(Local::now()).unwrap();
        assert_eq!(outcome.scheduled, 0);
        assert!(
            engine
                .list_jobs(JobKind::Delivery, JobState::Scheduled)
                .unwrap()
                .is_empty()
        );
    }
}

#[tokio::test]
async fn calm_reply_produces_no_alert() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321260002");
    let period = engine
        .create_period(
            patient.id,
            today(),
            7,
            PeriodOptions {
                schedule: immediate_schedule(),
                ..PeriodOptions::default()
            },
        )
        .unwrap();
    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 0, "How are you?"))
        .unwrap();
    engine.sweep(Local::now()).unwrap();

    let transport = Arc::new(RecordingTransport::new());
    let daemon = daemon_with(
        engine,
        Arc::clone(&transport),
        FixedAnalyzer::new(FixedAnalyzer::verdict(RiskLevel::Low, false)),
    );
    let engine = daemon.engine();

    assert!(daemon.process_next_delivery().await.unwrap());
    {
        let mut engine = engine.lock().await;
        engine
            .ingest(
                &InboundMessage {
                    from_phone: "905321260002".to_string(),
                    sent_at: Utc::now(),
                    payload: InboundPayload::Text {
                        body: "doing great".to_string(),
                    },
                },
                Local::now(),
            )
            .unwrap()
            .unwrap();
    }
    assert!(daemon.process_next_analysis().await.unwrap());

    let engine = engine.lock().await;
    assert!(engine.list_alerts(None, None, 10).unwrap().is_empty());
    assert_eq!(
        engine
            .list_jobs(JobKind::Analysis, JobState::Completed)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn delivery_to_cancelled_period_is_skipped_quietly() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321260003");
    let period = engine
        .create_period(
            patient.id,
            today(),
            7,
            PeriodOptions {
                schedule: immediate_schedule(),
                ..PeriodOptions::default()
            },
        )
        .unwrap();
    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 0, "How are you?"))
        .unwrap();
    engine.sweep(Local::now()).unwrap();

    // Cancelled between sweep and delivery.
    engine.cancel_period(period.id).unwrap();

    let transport = Arc::new(RecordingTransport::new());
    let daemon = daemon_with(
        engine,
        Arc::clone(&transport),
        FixedAnalyzer::new(FixedAnalyzer::verdict(RiskLevel::Low, false)),
    );

    assert!(daemon.process_next_delivery().await.unwrap());
    assert!(transport.sent().is_empty());

    let engine = daemon.engine();
    let engine = engine.lock().await;
    assert_eq!(
        engine
            .list_jobs(JobKind::Delivery, JobState::Completed)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn delivery_with_vanished_target_settles_instead_of_wedging() {
    let mut engine = engine();

    // A job whose period and patient rows do not exist, as after a
    // restore from a partial backup.
    let payload = DeliveryPayload {
        patient_id: PatientId::new(),
        period_id: PeriodId::new(),
        day_number: 1,
        slot: TimeSlot::Morning,
        phone: "905320000000".to_string(),
        questions: vec!["How are you?".to_string()],
    };
    engine
        .enqueue_job(
            JobKind::Delivery,
            &payload.dedup_key(),
            &serde_json::to_value(&payload).unwrap(),
            Utc::now(),
        )
        .unwrap()
        .unwrap();

    let transport = Arc::new(RecordingTransport::new());
    let daemon = daemon_with(
        engine,
        Arc::clone(&transport),
        FixedAnalyzer::new(FixedAnalyzer::verdict(RiskLevel::Low, false)),
    );

    // Handled, not an error escaping the loop.
    assert!(daemon.process_next_delivery().await.unwrap());
    assert!(transport.sent().is_empty());

    let engine = daemon.engine();
    let engine = engine.lock().await;
    assert!(
        engine
            .list_jobs(JobKind::Delivery, JobState::Running)
            .unwrap()
            .is_empty(),
        "claimed job must not stay RUNNING"
    );
    let retried = engine
        .list_jobs(JobKind::Delivery, JobState::Scheduled)
        .unwrap();
    assert_eq!(retried.len(), 1);
    assert!(retried[0].last_error.is_some());
}

#[tokio::test]
async fn exhausted_delivery_goes_dead_and_hits_the_feed() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321260004");
    let period = engine
        .create_period(
            patient.id,
            today(),
            7,
            PeriodOptions {
                schedule: immediate_schedule(),
                ..PeriodOptions::default()
            },
        )
        .unwrap();
    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 0, "How are you?"))
        .unwrap();
    engine.sweep(Local::now()).unwrap();

    // Provider down for good.
    let transport = Arc::new(RecordingTransport::failing_first(u32::MAX));
    let daemon = daemon_with(
        engine,
        Arc::clone(&transport),
        FixedAnalyzer::new(FixedAnalyzer::verdict(RiskLevel::Low, false)),
    );
    let engine = daemon.engine();

    // Three attempts with 1s and 2s backoff between them.
    assert!(daemon.process_next_delivery().await.unwrap());
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(daemon.process_next_delivery().await.unwrap());
    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert!(daemon.process_next_delivery().await.unwrap());

    let engine = engine.lock().await;
    let dead = engine.list_jobs(JobKind::Delivery, JobState::Dead).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
    assert!(dead[0].last_error.is_some());

    let events = engine.events_since(0).unwrap();
    assert!(events.iter().any(|e| matches!(
        e.kind,
        EventKind::DeliveryFailed { period_id, slot: TimeSlot::Morning, .. }
            if period_id == period.id
    )));
}
