//! Risk analysis via rig-core.
//!
//! [`Analyzer`] is the seam the analysis worker calls through. The
//! production implementation prompts an Anthropic model and parses a
//! strict JSON verdict; a malformed response is a hard error that
//! reaches the queue's retry layer. Tests use [`FixedAnalyzer`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::RiskLevel;
use crate::telemetry::genai;

/// Default completion model for answer analysis.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Everything the analyzer needs for one answer. The photo path is taken
/// iff `photo_url` is present; both paths return the same result shape.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub question: String,
    /// Per-question prompt override from the template, when set.
    pub ai_prompt: Option<String>,
    pub answer_text: Option<String>,
    pub photo_url: Option<String>,
    /// Compact patient profile + recent-answer history.
    pub patient_context: String,
}

/// Structured analysis verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub sentiment: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub extracted_data: serde_json::Value,
    pub summary: String,
    pub should_alert: bool,
    #[serde(default)]
    pub alert_reason: Option<String>,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Assessment>;
}

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(
    api_key: &SecretString,
) -> std::result::Result<rig::providers::anthropic::Client, rig::http_client::Error> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
}

/// Production analyzer backed by an Anthropic completion model.
pub struct AnthropicAnalyzer {
    client: rig::providers::anthropic::Client,
    model: String,
}

impl AnthropicAnalyzer {
    pub fn new(api_key: &SecretString, model: impl Into<String>) -> Result<Self> {
        let client = anthropic_client(api_key)
            .map_err(|e| Error::Analysis(format!("anthropic client: {e}")))?;
        Ok(Self {
            client,
            model: model.into(),
        })
    }
}

#[async_trait]
impl Analyzer for AnthropicAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Assessment> {
        use rig::client::CompletionClient;
        use rig::completion::Prompt;

        let span = genai::start_chat_span(&self.model, "anthropic");
        let _enter = span.enter();

        let agent = self
            .client
            .agent(&self.model)
            .preamble(SYSTEM_PROMPT)
            .build();

        let prompt = build_prompt(request);
        let raw = agent
            .prompt(prompt)
            .await
            .map_err(|e| Error::Analysis(format!("completion failed: {e}")))?;

        parse_assessment(&raw)
    }
}

const SYSTEM_PROMPT: &str = "You are a clinical follow-up triage assistant. \
Assess the patient's reply for health risk. Respond with a single JSON object \
and nothing else, with keys: sentiment (string), risk_level (one of \
\"low\", \"medium\", \"high\", \"critical\"), extracted_data (object), \
summary (string, one sentence), should_alert (bool), alert_reason \
(string or null).";

fn build_prompt(request: &AnalysisRequest) -> String {
    let mut prompt = String::new();
    if let Some(override_prompt) = &request.ai_prompt {
        prompt.push_str(override_prompt);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Patient context:\n");
    prompt.push_str(&request.patient_context);
    prompt.push_str("\n\nQuestion asked: ");
    prompt.push_str(&request.question);
    if let Some(url) = &request.photo_url {
        prompt.push_str("\nPatient sent a photo: ");
        prompt.push_str(url);
    }
    if let Some(text) = &request.answer_text {
        prompt.push_str("\nPatient's reply: ");
        prompt.push_str(text);
    }
    prompt
}

/// Parse the model's verdict. Accepts a bare JSON object or one wrapped
/// in a markdown code fence; anything else is a hard error so the queue
/// retries.
fn parse_assessment(raw: &str) -> Result<Assessment> {
    let trimmed = raw.trim();
    if let Ok(assessment) = serde_json::from_str(trimmed) {
        return Ok(assessment);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(assessment) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(assessment);
            }
        }
    }

    // Char-wise truncation: a byte slice could split a multibyte
    // character in the model's output and panic.
    let preview: String = trimmed.chars().take(200).collect();
    Err(Error::Analysis(format!(
        "unparseable analysis response: {preview}"
    )))
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Deterministic analyzer returning a preset verdict, optionally failing
/// the first N calls to exercise the retry path.
pub struct FixedAnalyzer {
    assessment: Assessment,
    fail_first: Mutex<u32>,
}

impl FixedAnalyzer {
    pub fn new(assessment: Assessment) -> Self {
        Self {
            assessment,
            fail_first: Mutex::new(0),
        }
    }

    pub fn failing_first(n: u32, assessment: Assessment) -> Self {
        Self {
            assessment,
            fail_first: Mutex::new(n),
        }
    }

    /// Convenience verdict for tests.
    pub fn verdict(risk_level: RiskLevel, should_alert: bool) -> Assessment {
        Assessment {
            sentiment: "neutral".to_string(),
            risk_level,
            extracted_data: serde_json::Value::Null,
            summary: "fixed verdict".to_string(),
            should_alert,
            alert_reason: should_alert.then(|| "risk detected".to_string()),
        }
    }
}

#[async_trait]
impl Analyzer for FixedAnalyzer {
    async fn analyze(&self, _request: &AnalysisRequest) -> Result<Assessment> {
        {
            let mut remaining = self.fail_first.lock().expect("analyzer lock poisoned");
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Analysis("simulated analyzer outage".to_string()));
            }
        }
        Ok(self.assessment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json_verdict() {
        let raw = r#"{"sentiment":"worried","risk_level":"high","extracted_data":{},
                      "summary":"dizziness reported","should_alert":true,
                      "alert_reason":"dizziness"}"#;
        let a = parse_assessment(raw).unwrap();
        assert_eq!(a.risk_level, RiskLevel::High);
        assert!(a.should_alert);
    }

    #[test]
    fn parses_fenced_json_verdict() {
        let raw = "```json\n{\"sentiment\":\"calm\",\"risk_level\":\"low\",\
                   \"summary\":\"doing fine\",\"should_alert\":false}\n```";
        let a = parse_assessment(raw).unwrap();
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(!a.should_alert);
    }

    #[test]
    fn rejects_non_json_response() {
        assert!(parse_assessment("The patient seems fine.").is_err());
    }

    #[test]
    fn long_multibyte_response_is_rejected_without_panicking() {
        // Three bytes per char, so a 200-byte cut would land mid-char.
        let raw = "健".repeat(120);
        assert!(parse_assessment(&raw).is_err());
    }
}
