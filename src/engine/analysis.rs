//! Answer analysis: turn a stored answer into a risk verdict and,
//! when warranted, an alert.
//!
//! Called by the analysis worker for each claimed job. Idempotent on the
//! answer's processed flag, so a retried job that already wrote its
//! verdict is a no-op.

use std::fmt::Write as _;

use tracing::info;

use crate::error::{Error, Result};
use crate::llm::{AnalysisRequest, Analyzer};
use crate::model::*;
use crate::transport::Transport;

use super::Engine;

/// Recent answers included in the analyzer's patient context.
const CONTEXT_ANSWERS: u32 = 5;

impl Engine {
    /// Analyze one answer. Returns the created alert id when the verdict
    /// asked for one.
    ///
    /// Analyzer failures propagate so the queue's retry policy applies.
    /// The verdict write and the alert creation are separate steps: a
    /// retry after a partial failure skips the already-processed answer.
    pub async fn process_answer(
        &mut self,
        answer_id: AnswerId,
        analyzer: &dyn Analyzer,
        transport: &dyn Transport,
    ) -> Result<Option<AlertId>> {
        let answer = self.storage.get_answer(answer_id)?;
        if answer.is_processed {
            info!(answer_id = %answer_id, "answer already processed, skipping");
            return Ok(None);
        }

        let patient = self.storage.get_patient(answer.patient_id)?;
        let template = self.storage.get_template(answer.template_id)?;

        let request = AnalysisRequest {
            question: template.question_text.clone(),
            ai_prompt: template.ai_prompt.clone(),
            answer_text: answer.text_content.clone(),
            photo_url: answer.media_url.clone(),
            patient_context: self.patient_context(&patient, answer.id)?,
        };

        let assessment = analyzer.analyze(&request).await?;
        let verdict =
            serde_json::to_value(&assessment).map_err(|e| Error::Other(e.to_string()))?;
        self.storage
            .set_answer_analysis(answer.id, assessment.risk_level, &verdict)?;

        if !assessment.should_alert {
            return Ok(None);
        }

        let title = assessment
            .alert_reason
            .clone()
            .unwrap_or_else(|| assessment.summary.clone());
        let new_alert = NewAlert::new(
            patient.id,
            AlertType::BadCondition,
            assessment.risk_level,
            title,
        )
        .description(assessment.summary.clone())
        .answer(answer.id)
        .metadata(assessment.extracted_data.clone());

        let alert = self.create_alert(new_alert, transport).await?;
        Ok(Some(alert.id))
    }

    /// Compact profile + recent-answer history for the analyzer prompt.
    fn patient_context(&self, patient: &Patient, current: AnswerId) -> Result<String> {
        let mut context = format!("Patient: {}\n", patient.name);

        let recent = self
            .storage
            .recent_answers(patient.id, CONTEXT_ANSWERS + 1)?;
        let history: Vec<_> = recent
            .into_iter()
            .filter(|(a, _)| a.id != current)
            .take(CONTEXT_ANSWERS as usize)
            .collect();

        if history.is_empty() {
            context.push_str("No previous answers.\n");
        } else {
            context.push_str("Recent answers (newest first):\n");
            for (answer, question) in history {
                let risk = if answer.is_processed {
                    answer.risk_level.as_str()
                } else {
                    "unassessed"
                };
                let reply = answer
                    .text_content
                    .as_deref()
                    .unwrap_or(if answer.media_url.is_some() {
                        "(photo)"
                    } else {
                        "(empty)"
                    });
                let _ = writeln!(context, "- [{risk}] Q: {question} A: {reply}");
            }
        }

        Ok(context)
    }
}
