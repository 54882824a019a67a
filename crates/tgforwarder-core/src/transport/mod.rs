pub mod listener;
pub mod telegram;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use listener::{ListenerConfig, run_update_listener};
pub use telegram::{DEFAULT_API_BASE, TelegramBotClient};

/// Points back at the original message so it can be relayed intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: String,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub source_id: String,
    pub message_id: i64,
    pub text: String,
    pub handle: MessageHandle,
}

impl InboundEvent {
    /// Messages without text (media without caption) carry an empty body.
    pub fn new(source_id: impl Into<String>, message_id: i64, text: Option<String>) -> Self {
        let source_id = source_id.into();
        Self {
            handle: MessageHandle {
                chat_id: source_id.clone(),
                message_id,
            },
            source_id,
            message_id,
            text: text.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("telegram api error {code}: {description}")]
    Api { code: i64, description: String },
}

/// Outbound side of the chat network.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Relay the original message, keeping media and attribution.
    async fn forward(
        &self,
        destination: &str,
        handle: &MessageHandle,
    ) -> Result<(), TransportError>;

    async fn send_text(&self, destination: &str, text: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_text_becomes_empty_string() {
        let event = InboundEvent::new("-100", 7, None);
        assert_eq!(event.text, "");
        assert_eq!(
            event.handle,
            MessageHandle {
                chat_id: "-100".into(),
                message_id: 7
            }
        );
    }
}
