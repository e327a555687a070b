//! Message transport seam.
//!
//! The concrete WhatsApp (or other) provider lives outside this crate;
//! the engine only needs `send` and a normalized inbound message shape.
//! Production wires a real provider behind [`Transport`]; the daemon's
//! dev default and the tests use the in-crate implementations below.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

use crate::error::Result;

/// Provider acknowledgement for an outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider message id, when the provider reports one.
    pub message_id: Option<String>,
}

/// Outbound message delivery.
///
/// Delivery-job callers propagate errors into the queue's retry policy;
/// notification callers log and swallow them — a failed notification must
/// never block or roll back the state transition that triggered it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, phone: &str, body: &str) -> Result<SendReceipt>;
}

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

/// Type-tagged payload of an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundPayload {
    Text {
        body: String,
    },
    /// Quoted/forwarded text variants some providers emit separately.
    ExtendedText {
        body: String,
    },
    Media {
        caption: Option<String>,
        url: String,
    },
}

/// A normalized inbound message pushed by the provider webhook.
///
/// `sent_at` is the provider's original send timestamp — answers keep it
/// so ordering survives delivery lag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from_phone: String,
    pub sent_at: DateTime<Utc>,
    pub payload: InboundPayload,
}

impl InboundMessage {
    /// Extract the text content per payload variant.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            InboundPayload::Text { body } | InboundPayload::ExtendedText { body } => Some(body),
            InboundPayload::Media { caption, .. } => caption.as_deref(),
        }
    }

    /// Media URL, when the payload carries one.
    pub fn media_url(&self) -> Option<&str> {
        match &self.payload {
            InboundPayload::Media { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// Canonicalize a phone number to digits only (E.164 without the plus).
/// Patient lookup is an exact match on this form.
pub fn canonicalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

// ---------------------------------------------------------------------------
// In-crate implementations
// ---------------------------------------------------------------------------

/// Dev transport: logs every send and reports success. Used by `serve`
/// when no provider is wired up.
pub struct ConsoleTransport;

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send(&self, phone: &str, body: &str) -> Result<SendReceipt> {
        info!(phone, body, "outbound message");
        Ok(SendReceipt { message_id: None })
    }
}

/// Test double: records every send, optionally failing the first N.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    fail_first: Mutex<u32>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` sends before succeeding — exercises retry paths.
    pub fn failing_first(n: u32) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_first: Mutex::new(n),
        }
    }

    /// Snapshot of `(phone, body)` pairs sent so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("transport lock poisoned").clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, phone: &str, body: &str) -> Result<SendReceipt> {
        {
            let mut remaining = self.fail_first.lock().expect("transport lock poisoned");
            if *remaining > 0 {
                *remaining -= 1;
                return Err(crate::error::Error::Transport(
                    "simulated send failure".to_string(),
                ));
            }
        }
        self.sent
            .lock()
            .expect("transport lock poisoned")
            .push((phone.to_string(), body.to_string()));
        Ok(SendReceipt {
            message_id: Some(format!("msg-{}", uuid::Uuid::new_v4())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_everything_but_digits() {
        assert_eq!(canonicalize_phone("+90 (532) 123-45-67"), "905321234567");
        assert_eq!(canonicalize_phone("905321234567"), "905321234567");
    }

    #[test]
    fn text_extraction_covers_all_payload_variants() {
        let plain = InboundMessage {
            from_phone: "1".into(),
            sent_at: Utc::now(),
            payload: InboundPayload::Text { body: "hi".into() },
        };
        assert_eq!(plain.text(), Some("hi"));

        let media = InboundMessage {
            from_phone: "1".into(),
            sent_at: Utc::now(),
            payload: InboundPayload::Media {
                caption: Some("wound photo".into()),
                url: "https://example.test/p.jpg".into(),
            },
        };
        assert_eq!(media.text(), Some("wound photo"));
        assert_eq!(media.media_url(), Some("https://example.test/p.jpg"));
    }
}
