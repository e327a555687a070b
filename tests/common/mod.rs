#![allow(dead_code)]

use chrono::{Local, NaiveDate, NaiveTime};

use vigil_rs::engine::Engine;
use vigil_rs::model::*;

pub fn engine() -> Engine {
    Engine::in_memory().unwrap()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Tracker, doctor, and a patient assigned to both.
pub fn seed_care_team(engine: &mut Engine, patient_phone: &str) -> (StaffUser, StaffUser, Patient) {
    let tracker = engine
        .create_staff("Tracker Tuna", "905000000001", StaffRole::Tracker)
        .unwrap();
    let doctor = engine
        .create_staff("Dr. Deniz", "905000000002", StaffRole::Doctor)
        .unwrap();
    let patient = engine
        .create_patient("Ayse Yilmaz", patient_phone, Some(tracker.id), Some(doctor.id))
        .unwrap();
    (tracker, doctor, patient)
}

/// Slot schedule with every slot at midnight, so freshly swept jobs are
/// immediately due.
pub fn immediate_schedule() -> SlotSchedule {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
    SlotSchedule {
        morning: Some(midnight),
        afternoon: Some(midnight),
        evening: Some(midnight),
    }
}

pub fn question(
    period_id: PeriodId,
    day: i64,
    slot: TimeSlot,
    ord: i32,
    text: &str,
) -> QuestionTemplate {
    QuestionTemplate {
        id: TemplateId::new(),
        period_id,
        day_number: day,
        slot,
        ord,
        question_text: text.to_string(),
        response_type: ResponseType::Text,
        is_required: true,
        ai_prompt: None,
    }
}
