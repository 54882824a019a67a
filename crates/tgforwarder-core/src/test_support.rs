//! In-memory collaborators for exercising dispatch without a database or network.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::delivery_logs::{AuditSink, NewDeliveryLog};
use crate::rules::{DeliveryMethod, Rule, RuleStore};
use crate::transport::{MessageHandle, MessageTransport, TransportError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
pub struct MemoryStore {
    pub rules: Mutex<Vec<Rule>>,
    pub broken: bool,
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_active_rules_for_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<Rule>, BoxError> {
        if self.broken {
            return Err("database is locked".into());
        }
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|rule| rule.is_active && rule.source == source_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Forward { destination: String, handle: MessageHandle },
    SendText { destination: String, text: String },
}

#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Mutex<Vec<Call>>,
    /// Destinations that answer with an API error.
    pub failing: HashSet<String>,
    /// Destinations that hang well past any test timeout.
    pub slow: HashSet<String>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn outcome(&self, destination: &str) -> Result<(), TransportError> {
        if self.slow.contains(destination) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.failing.contains(destination) {
            return Err(TransportError::Api {
                code: 400,
                description: "Bad Request: chat not found".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn forward(
        &self,
        destination: &str,
        handle: &MessageHandle,
    ) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(Call::Forward {
            destination: destination.into(),
            handle: handle.clone(),
        });
        self.outcome(destination).await
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(Call::SendText {
            destination: destination.into(),
            text: text.into(),
        });
        self.outcome(destination).await
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub entries: Mutex<Vec<NewDeliveryLog>>,
    pub broken: bool,
}

impl MemorySink {
    pub fn entries(&self) -> Vec<NewDeliveryLog> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn append(&self, entry: NewDeliveryLog) -> Result<(), BoxError> {
        if self.broken {
            return Err("disk full".into());
        }
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

/// Active rule on source `-100` with no filter.
pub fn rule(id: &str, destination: &str, method: DeliveryMethod) -> Rule {
    Rule {
        id: id.into(),
        name: Some(format!("rule {id}")),
        source: "-100".into(),
        destination: destination.into(),
        filters: None,
        delivery_method: method,
        is_active: true,
        ai_config: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn store_with(rules: Vec<Rule>) -> MemoryStore {
    MemoryStore {
        rules: Mutex::new(rules),
        broken: false,
    }
}
