//! Inbound message ingestion: match a patient reply to the question it
//! answers.
//!
//! Every precondition miss is a logged no-op, never an error. Patients
//! text whatever they want whenever they want; only messages that land on
//! an active period's current day with an unanswered question become
//! answers.

use chrono::{DateTime, Local, Utc};
use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::*;
use crate::telemetry::metrics;
use crate::transport::{InboundMessage, canonicalize_phone};

use super::Engine;

impl Engine {
    /// Ingest one inbound message at `now` (server-local time).
    ///
    /// Returns the new answer id when the message matched a question, and
    /// `None` when it was dropped. Matching picks the first template of
    /// the period's current day, in slot-rank-then-order position, that
    /// has no answer yet.
    pub fn ingest(
        &mut self,
        msg: &InboundMessage,
        now: DateTime<Local>,
    ) -> Result<Option<AnswerId>> {
        let ingested = metrics::answers_ingested();
        let phone = canonicalize_phone(&msg.from_phone);

        let Some(patient) = self.storage.find_patient_by_phone(&phone)? else {
            warn!(phone, "inbound message from unknown phone");
            ingested.add(1, &[KeyValue::new("result", "no_patient")]);
            return Ok(None);
        };

        let Some(period_id) = patient.current_period_id else {
            warn!(patient_id = %patient.id, "inbound message outside any period");
            ingested.add(1, &[KeyValue::new("result", "no_period")]);
            return Ok(None);
        };
        let period = self.storage.get_period(period_id)?;
        if period.status != PeriodStatus::Active {
            warn!(patient_id = %patient.id, period_id = %period.id,
                  status = period.status.as_str(), "current period not active");
            ingested.add(1, &[KeyValue::new("result", "no_period")]);
            return Ok(None);
        }

        let day = period.day_number(now.date_naive());
        if day < 1 || !period.contains_day(day) {
            warn!(patient_id = %patient.id, period_id = %period.id, day,
                  "inbound message outside period range");
            ingested.add(1, &[KeyValue::new("result", "out_of_range")]);
            return Ok(None);
        }

        // First unanswered question of the day, in slot rank then order.
        let templates = self.storage.list_templates_for_day(period.id, day)?;
        let answered = self.storage.answered_template_ids(period.id)?;
        let Some(template) = templates.iter().find(|t| !answered.contains(&t.id)) else {
            warn!(patient_id = %patient.id, period_id = %period.id, day,
                  "no unanswered question for inbound message");
            ingested.add(1, &[KeyValue::new("result", "no_question")]);
            return Ok(None);
        };

        let answer = Answer {
            id: AnswerId::new(),
            patient_id: patient.id,
            period_id: period.id,
            template_id: template.id,
            day_number: day,
            slot: template.slot,
            text_content: msg.text().map(str::to_string),
            media_url: msg.media_url().map(str::to_string),
            is_processed: false,
            risk_level: RiskLevel::Low,
            ai_analysis: None,
            answered_at: msg.sent_at,
            created_at: Utc::now(),
        };

        let analysis = AnalysisPayload {
            answer_id: answer.id,
        };
        let payload =
            serde_json::to_value(&analysis).map_err(|e| Error::Other(e.to_string()))?;
        let run_at = now.with_timezone(&Utc);

        self.storage.with_transaction(|tx| {
            tx.insert_answer(&answer)?;
            tx.mark_slot_answered(period.id, day, template.slot)?;
            tx.enqueue_job(JobKind::Analysis, &analysis.dedup_key(), &payload, run_at)?;
            tx.record_event(EventKind::AnswerRecorded {
                patient_id: patient.id,
                period_id: period.id,
                answer_id: answer.id,
                day_number: day,
                slot: template.slot,
            })?;
            Ok(())
        })?;

        info!(patient_id = %patient.id, answer_id = %answer.id, day,
              slot = template.slot.as_str(), "answer recorded");
        ingested.add(1, &[KeyValue::new("result", "matched")]);
        Ok(Some(answer.id))
    }
}
