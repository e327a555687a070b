//! Question catalog: reusable follow-up protocols.
//!
//! A protocol is a per-day, per-slot ordered list of question templates
//! defined in a TOML file. Pure read model — period creation instantiates
//! a protocol's questions into that period's template rows.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::{PeriodId, QuestionTemplate, ResponseType, TemplateId, TimeSlot};

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ProtocolFile {
    protocol: ProtocolMeta,
    #[serde(default)]
    question: Vec<QuestionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProtocolMeta {
    name: String,
    duration_days: u16,
}

/// One question line in a protocol file.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionSpec {
    pub day: i64,
    pub slot: String,
    #[serde(default)]
    pub order: i32,
    pub text: String,
    #[serde(default = "default_response_type")]
    pub response_type: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub ai_prompt: Option<String>,
}

fn default_response_type() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

/// A validated protocol ready to instantiate into periods.
#[derive(Debug, Clone)]
pub struct Protocol {
    pub name: String,
    pub duration_days: u16,
    questions: Vec<QuestionSpec>,
}

impl Protocol {
    /// Materialize this protocol's questions as template rows for a period.
    pub fn instantiate(&self, period_id: PeriodId) -> Result<Vec<QuestionTemplate>> {
        self.questions
            .iter()
            .map(|q| {
                let slot = TimeSlot::from_str(&q.slot)
                    .ok_or_else(|| Error::Config(format!("unknown slot: {}", q.slot)))?;
                let response_type = ResponseType::from_str(&q.response_type).ok_or_else(|| {
                    Error::Config(format!("unknown response type: {}", q.response_type))
                })?;
                Ok(QuestionTemplate {
                    id: TemplateId::new(),
                    period_id,
                    day_number: q.day,
                    slot,
                    ord: q.order,
                    question_text: q.text.clone(),
                    response_type,
                    is_required: q.required,
                    ai_prompt: q.ai_prompt.clone(),
                })
            })
            .collect()
    }
}

/// Registry of loaded protocols, indexed by name.
pub struct CatalogRegistry {
    protocols: HashMap<String, Protocol>,
}

impl CatalogRegistry {
    /// Create an empty registry with no protocols.
    pub fn empty() -> Self {
        Self {
            protocols: HashMap::new(),
        }
    }

    /// Load all `.toml` files from a directory and build the registry.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut protocols = HashMap::new();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read catalog dir {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                let protocol = Self::parse(&content).map_err(|e| {
                    Error::Config(format!("bad protocol file {}: {e}", path.display()))
                })?;
                protocols.insert(protocol.name.clone(), protocol);
            }
        }

        Ok(Self { protocols })
    }

    /// Parse a single protocol definition.
    pub fn parse(content: &str) -> Result<Protocol> {
        let file: ProtocolFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        if file.protocol.duration_days == 0 || file.protocol.duration_days > 365 {
            return Err(Error::Config(format!(
                "duration_days must be 1..=365, got {}",
                file.protocol.duration_days
            )));
        }
        for q in &file.question {
            if q.day < 1 || q.day > i64::from(file.protocol.duration_days) {
                return Err(Error::Config(format!(
                    "question day {} outside protocol duration {}",
                    q.day, file.protocol.duration_days
                )));
            }
        }

        Ok(Protocol {
            name: file.protocol.name,
            duration_days: file.protocol.duration_days,
            questions: file.question,
        })
    }

    /// Look up a protocol by name.
    pub fn get(&self, name: &str) -> Option<&Protocol> {
        self.protocols.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [protocol]
        name = "post-op-5d"
        duration_days = 5

        [[question]]
        day = 1
        slot = "morning"
        text = "How do you feel this morning?"

        [[question]]
        day = 1
        slot = "evening"
        order = 0
        text = "Please send a photo of the wound."
        response_type = "photo"
        ai_prompt = "Look for swelling or discharge."
    "#;

    #[test]
    fn parses_protocol_and_instantiates_templates() {
        let protocol = CatalogRegistry::parse(SAMPLE).unwrap();
        assert_eq!(protocol.name, "post-op-5d");
        assert_eq!(protocol.duration_days, 5);

        let templates = protocol.instantiate(PeriodId::new()).unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].slot, TimeSlot::Morning);
        assert_eq!(templates[1].response_type, ResponseType::Photo);
        assert!(templates[1].ai_prompt.is_some());
    }

    #[test]
    fn rejects_question_outside_duration() {
        let bad = r#"
            [protocol]
            name = "short"
            duration_days = 2

            [[question]]
            day = 3
            slot = "morning"
            text = "Too late."
        "#;
        assert!(CatalogRegistry::parse(bad).is_err());
    }
}
