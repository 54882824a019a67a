use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{MessageHandle, MessageTransport, TransportError};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageId {
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
}

impl Update {
    /// Group/private messages and channel posts. Edits and other update kinds are ignored.
    pub fn into_message(self) -> Option<Message> {
        self.message.or(self.channel_post)
    }
}

/// Minimal Bot API client covering the calls the forwarder needs.
#[derive(Clone)]
pub struct TelegramBotClient {
    http: Client,
    token: String,
    api_base: String,
}

impl TelegramBotClient {
    pub fn new(http: Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn get_me(&self) -> Result<User, TransportError> {
        self.call("getMe", &json!({})).await
    }

    pub async fn forward_message(
        &self,
        chat_id: &str,
        from_chat_id: &str,
        message_id: i64,
    ) -> Result<Message, TransportError> {
        self.call(
            "forwardMessage",
            &json!({
                "chat_id": chat_id_value(chat_id),
                "from_chat_id": chat_id_value(from_chat_id),
                "message_id": message_id,
            }),
        )
        .await
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<Message, TransportError> {
        self.call(
            "sendMessage",
            &json!({
                "chat_id": chat_id_value(chat_id),
                "text": text,
            }),
        )
        .await
    }

    /// Long-poll for updates after `offset`. The HTTP client timeout must exceed `timeout_secs`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TransportError> {
        let mut body = json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message", "channel_post"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", &body).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<T, TransportError> {
        let url = format!("{}/bot{}/{}", self.api_base, self.token, method);
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let parsed: ApiResponse<T> = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(TransportError::Api {
                    code: i64::from(status.as_u16()),
                    description: text,
                });
            }
            Err(err) => return Err(TransportError::Decode(err)),
        };

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(TransportError::Api {
                code: i64::from(status.as_u16()),
                description: format!("{method} returned no result"),
            }),
            (false, _) => Err(TransportError::Api {
                code: parsed
                    .error_code
                    .unwrap_or_else(|| i64::from(status.as_u16())),
                description: parsed.description.unwrap_or_default(),
            }),
        }
    }
}

/// Numeric chat ids are sent as numbers, `@channel` names as strings.
fn chat_id_value(chat_id: &str) -> Value {
    match chat_id.parse::<i64>() {
        Ok(id) => Value::from(id),
        Err(_) => Value::String(chat_id.to_string()),
    }
}

#[async_trait]
impl MessageTransport for TelegramBotClient {
    async fn forward(
        &self,
        destination: &str,
        handle: &MessageHandle,
    ) -> Result<(), TransportError> {
        self.forward_message(destination, &handle.chat_id, handle.message_id)
            .await
            .map(|_| ())
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<(), TransportError> {
        self.send_message(destination, text).await.map(|_| ())
    }
}
