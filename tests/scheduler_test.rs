//! Scheduling sweep behavior: idempotency, day windows, auto-completion.

mod common;

use chrono::{Duration, Local};

use vigil_rs::engine::{Engine, PeriodOptions};
use vigil_rs::error::Error;
use vigil_rs::event::EventKind;
use vigil_rs::model::*;
use vigil_rs::transport::RecordingTransport;

use common::*;

#[test]
fn sweep_enqueues_one_job_per_slot_and_is_idempotent() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230001");
    let period = engine
        .create_period(patient.id, today(), 7, PeriodOptions::default())
        .unwrap();

    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 0, "Pain level?"))
        .unwrap();
    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 1, "Slept well?"))
        .unwrap();
    engine
        .add_question(question(period.id, 1, TimeSlot::Evening, 0, "Photo of the wound?"))
        .unwrap();

    let first = engine.sweep(Local::now()).unwrap();
    // Two slots have questions today: one job each, not one per question.
    assert_eq!(first.scheduled, 2);
    assert_eq!(first.completed, 0);
    assert_eq!(first.errors, 0);

    let second = engine.sweep(Local::now()).unwrap();
    assert_eq!(second.scheduled, 0);

    let jobs = engine
        .list_jobs(JobKind::Delivery, JobState::Scheduled)
        .unwrap();
    assert_eq!(jobs.len(), 2);
}

#[test]
fn sweep_skips_periods_that_have_not_started() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230002");
    let period = engine
        .create_period(
            patient.id,
            today() + Duration::days(3),
            7,
            PeriodOptions::default(),
        )
        .unwrap();
    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 0, "How are you?"))
        .unwrap();

    let outcome = engine.sweep(Local::now()).unwrap();
    assert_eq!(outcome.scheduled, 0);
    assert!(
        engine
            .list_jobs(JobKind::Delivery, JobState::Scheduled)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn sweep_completes_elapsed_period_and_schedules_nothing_for_it() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230003");
    // Started 5 days ago with a 5-day duration: today is day 6.
    let period = engine
        .create_period(
            patient.id,
            today() - Duration::days(5),
            5,
            PeriodOptions::default(),
        )
        .unwrap();
    engine
        .add_question(question(period.id, 5, TimeSlot::Morning, 0, "Final check?"))
        .unwrap();

    let outcome = engine.sweep(Local::now()).unwrap();
    assert_eq!(outcome.completed, 1);
    assert_eq!(outcome.scheduled, 0);

    assert_eq!(
        engine.period(period.id).unwrap().status,
        PeriodStatus::Completed
    );
    assert_eq!(engine.patient(patient.id).unwrap().current_period_id, None);

    let events = engine.events_since(0).unwrap();
    assert!(events.iter().any(|e| matches!(
        e.kind,
        EventKind::PeriodCompleted { period_id, .. } if period_id == period.id
    )));
}

#[test]
fn elapsed_period_without_auto_complete_stays_active() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230004");
    let period = engine
        .create_period(
            patient.id,
            today() - Duration::days(10),
            5,
            PeriodOptions {
                auto_complete: false,
                ..PeriodOptions::default()
            },
        )
        .unwrap();

    let outcome = engine.sweep(Local::now()).unwrap();
    assert_eq!(outcome.completed, 0);
    assert_eq!(
        engine.period(period.id).unwrap().status,
        PeriodStatus::Active
    );
}

#[test]
fn sweep_marks_unanswered_past_days_missed() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230005");
    // Day 3 today; days 1 and 2 never got an answer.
    let period = engine
        .create_period(
            patient.id,
            today() - Duration::days(2),
            10,
            PeriodOptions::default(),
        )
        .unwrap();

    engine.sweep(Local::now()).unwrap();

    assert_eq!(
        engine.day_log(period.id, 1).unwrap().status,
        DayStatus::Missed
    );
    assert_eq!(
        engine.day_log(period.id, 2).unwrap().status,
        DayStatus::Missed
    );
    assert_eq!(
        engine.day_log(period.id, 3).unwrap().status,
        DayStatus::Pending
    );
}

#[test]
fn second_active_period_is_rejected_without_side_effects() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230006");
    let first = engine
        .create_period(patient.id, today(), 7, PeriodOptions::default())
        .unwrap();

    let err = engine
        .create_period(patient.id, today(), 14, PeriodOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "got {err:?}");

    // The rejected transaction left nothing behind.
    assert_eq!(
        engine.patient(patient.id).unwrap().current_period_id,
        Some(first.id)
    );
    let started: Vec<_> = engine
        .events_since(0)
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::PeriodStarted { .. }))
        .collect();
    assert_eq!(started.len(), 1);
}

#[test]
fn period_duration_is_bounded() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230007");

    assert!(
        engine
            .create_period(patient.id, today(), 0, PeriodOptions::default())
            .is_err()
    );
    assert!(
        engine
            .create_period(patient.id, today(), 366, PeriodOptions::default())
            .is_err()
    );
    assert!(
        engine
            .create_period(patient.id, today(), 365, PeriodOptions::default())
            .is_ok()
    );
}

#[test]
fn cancelled_period_detaches_from_patient() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230008");
    let period = engine
        .create_period(patient.id, today(), 7, PeriodOptions::default())
        .unwrap();

    engine.cancel_period(period.id).unwrap();

    assert_eq!(
        engine.period(period.id).unwrap().status,
        PeriodStatus::Cancelled
    );
    assert_eq!(engine.patient(patient.id).unwrap().current_period_id, None);

    // Terminal: cancelling again is an invalid transition.
    assert!(matches!(
        engine.cancel_period(period.id),
        Err(Error::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn visit_reminders_cover_today_and_tomorrow_exactly_once() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230010");
    engine
        .create_visit(patient.id, today(), Some("wound check".to_string()))
        .unwrap();
    engine
        .create_visit(patient.id, today() + Duration::days(1), None)
        .unwrap();
    // Outside the reminder window.
    engine
        .create_visit(patient.id, today() + Duration::days(3), None)
        .unwrap();

    let transport = RecordingTransport::new();
    let sent = engine.check_visits(Local::now(), &transport).await.unwrap();
    assert_eq!(sent, 2);
    assert!(
        transport
            .sent()
            .iter()
            .all(|(phone, _)| phone == &patient.phone)
    );

    // Reminded visits are skipped on the next pass.
    let again = engine.check_visits(Local::now(), &transport).await.unwrap();
    assert_eq!(again, 0);
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn failed_visit_reminder_stays_pending_for_the_next_pass() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321230011");
    engine.create_visit(patient.id, today(), None).unwrap();

    let transport = RecordingTransport::failing_first(1);
    let sent = engine.check_visits(Local::now(), &transport).await.unwrap();
    assert_eq!(sent, 0);

    // The visit was left unreminded, so the retry delivers it.
    let sent = engine.check_visits(Local::now(), &transport).await.unwrap();
    assert_eq!(sent, 1);
    assert_eq!(transport.sent().len(), 1);
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil.db");

    let patient_id = {
        let mut engine = Engine::open(&path).unwrap();
        let (_, _, patient) = seed_care_team(&mut engine, "905321230009");
        engine
            .create_period(patient.id, today(), 7, PeriodOptions::default())
            .unwrap();
        patient.id
    };

    let engine = Engine::open(&path).unwrap();
    let patient = engine.patient(patient_id).unwrap();
    assert!(patient.current_period_id.is_some());
    assert_eq!(engine.events_since(0).unwrap().len(), 2);
}
