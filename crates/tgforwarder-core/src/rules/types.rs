use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    /// Relay the original message, keeping attachments and attribution.
    #[default]
    Forward,
    /// Send a fresh text-only message.
    Copy,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Forward => "forward",
            DeliveryMethod::Copy => "copy",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "forward" => Some(Self::Forward),
            "copy" => Some(Self::Copy),
            _ => None,
        }
    }
}

/// Stored alongside a rule for the management UI. Never evaluated by dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub system_instruction: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: Option<String>,
    pub source: String,
    pub destination: String,
    /// Raw filter document; resolved with [`super::FilterSpec::from_json`].
    pub filters: Option<Value>,
    pub delivery_method: DeliveryMethod,
    pub is_active: bool,
    pub ai_config: Option<AiConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub name: Option<String>,
    pub source: String,
    pub destination: String,
    pub filters: Option<Value>,
    pub delivery_method: DeliveryMethod,
    pub is_active: bool,
    pub ai_config: Option<AiConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleValidationError {
    #[error("source must not be empty")]
    EmptySource,
    #[error("destination must not be empty")]
    EmptyDestination,
}

impl NewRule {
    /// Trim the channel identifiers and check they are present.
    pub fn normalized(mut self) -> Result<Self, RuleValidationError> {
        self.source = self.source.trim().to_string();
        self.destination = self.destination.trim().to_string();
        if self.source.is_empty() {
            return Err(RuleValidationError::EmptySource);
        }
        if self.destination.is_empty() {
            return Err(RuleValidationError::EmptyDestination);
        }
        if matches!(self.filters, Some(Value::Null)) {
            self.filters = None;
        }
        Ok(self)
    }
}

impl From<Rule> for NewRule {
    fn from(rule: Rule) -> Self {
        Self {
            name: rule.name,
            source: rule.source,
            destination: rule.destination,
            filters: rule.filters,
            delivery_method: rule.delivery_method,
            is_active: rule.is_active,
            ai_config: rule.ai_config,
        }
    }
}
