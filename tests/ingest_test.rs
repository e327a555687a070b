//! Inbound message matching: slot ordering, answered-question skipping,
//! and the precondition no-ops.

mod common;

use chrono::{Local, Utc};

use vigil_rs::engine::PeriodOptions;
use vigil_rs::model::*;
use vigil_rs::transport::{InboundMessage, InboundPayload};

use common::*;

fn text_message(phone: &str, body: &str) -> InboundMessage {
    InboundMessage {
        from_phone: phone.to_string(),
        sent_at: Utc::now(),
        payload: InboundPayload::Text {
            body: body.to_string(),
        },
    }
}

#[test]
fn matches_first_unanswered_by_slot_rank_not_insertion_order() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321240001");
    let period = engine
        .create_period(patient.id, today(), 7, PeriodOptions::default())
        .unwrap();

    // Evening inserted first; morning must still match first.
    engine
        .add_question(question(period.id, 1, TimeSlot::Evening, 0, "Evening check?"))
        .unwrap();
    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 0, "Morning check?"))
        .unwrap();

    let first = engine
        .ingest(&text_message("905321240001", "feeling ok"), Local::now())
        .unwrap()
        .expect("message should match");
    let answer = engine.answer(first).unwrap();
    assert_eq!(answer.slot, TimeSlot::Morning);
    assert_eq!(answer.text_content.as_deref(), Some("feeling ok"));

    // The morning question is taken; the next reply lands on evening.
    let second = engine
        .ingest(&text_message("905321240001", "a bit tired"), Local::now())
        .unwrap()
        .expect("message should match");
    assert_eq!(engine.answer(second).unwrap().slot, TimeSlot::Evening);

    let log = engine.day_log(period.id, 1).unwrap();
    assert!(log.morning_answered);
    assert!(log.evening_answered);
}

#[test]
fn messy_phone_formatting_still_matches_the_patient() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321240002");
    let period = engine
        .create_period(patient.id, today(), 7, PeriodOptions::default())
        .unwrap();
    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 0, "How are you?"))
        .unwrap();

    let matched = engine
        .ingest(&text_message("+90 (532) 124-00-02", "fine"), Local::now())
        .unwrap();
    assert!(matched.is_some());
}

#[test]
fn media_reply_stores_url_and_enqueues_analysis() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321240003");
    let period = engine
        .create_period(patient.id, today(), 7, PeriodOptions::default())
        .unwrap();
    let mut photo = question(period.id, 1, TimeSlot::Morning, 0, "Send a wound photo.");
    photo.response_type = ResponseType::Photo;
    engine.add_question(photo).unwrap();

    let msg = InboundMessage {
        from_phone: "905321240003".to_string(),
        sent_at: Utc::now(),
        payload: InboundPayload::Media {
            caption: Some("here it is".to_string()),
            url: "https://media.test/wound.jpg".to_string(),
        },
    };
    let answer_id = engine.ingest(&msg, Local::now()).unwrap().unwrap();

    let answer = engine.answer(answer_id).unwrap();
    assert_eq!(answer.media_url.as_deref(), Some("https://media.test/wound.jpg"));
    assert_eq!(answer.text_content.as_deref(), Some("here it is"));
    assert!(!answer.is_processed);
    // Unprocessed answers sit at the floor until the analyzer runs.
    assert_eq!(answer.risk_level, RiskLevel::Low);

    let jobs = engine
        .list_jobs(JobKind::Analysis, JobState::Scheduled)
        .unwrap();
    assert_eq!(jobs.len(), 1);
}

#[test]
fn unmatched_messages_are_dropped_not_errors() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321240004");

    // Unknown phone.
    assert_eq!(
        engine
            .ingest(&text_message("905329999999", "hello?"), Local::now())
            .unwrap(),
        None
    );

    // Known patient, no period.
    assert_eq!(
        engine
            .ingest(&text_message("905321240004", "hello?"), Local::now())
            .unwrap(),
        None
    );

    // Active period, but no question today.
    let period = engine
        .create_period(patient.id, today(), 7, PeriodOptions::default())
        .unwrap();
    assert_eq!(
        engine
            .ingest(&text_message("905321240004", "hello?"), Local::now())
            .unwrap(),
        None
    );

    // Question exists but is already answered.
    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 0, "How are you?"))
        .unwrap();
    engine
        .ingest(&text_message("905321240004", "good"), Local::now())
        .unwrap()
        .unwrap();
    assert_eq!(
        engine
            .ingest(&text_message("905321240004", "still good"), Local::now())
            .unwrap(),
        None
    );
}

#[test]
fn cancelled_period_stops_matching() {
    let mut engine = engine();
    let (_, _, patient) = seed_care_team(&mut engine, "905321240005");
    let period = engine
        .create_period(patient.id, today(), 7, PeriodOptions::default())
        .unwrap();
    engine
        .add_question(question(period.id, 1, TimeSlot::Morning, 0, "How are you?"))
        .unwrap();

    engine.cancel_period(period.id).unwrap();

    assert_eq!(
        engine
            .ingest(&text_message("905321240005", "hello"), Local::now())
            .unwrap(),
        None
    );
}
