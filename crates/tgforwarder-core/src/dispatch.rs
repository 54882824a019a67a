use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::delivery_logs::{AuditSink, DeliveryStatus, NewDeliveryLog};
use crate::rules::{
    DeliveryMethod, EvaluationContext, FilterSpec, Rule, RuleSelector, RuleStore, SelectorError,
};
use crate::transport::{InboundEvent, MessageTransport, TransportError};

#[derive(Clone, Copy, Debug)]
pub struct DispatchConfig {
    /// Upper bound for one outbound call. Also bounds each audit write.
    pub delivery_timeout: Duration,
    /// Treat a failed rule fetch as "no rules" instead of reporting an error.
    pub fail_open_on_store_error: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(10),
            fail_open_on_store_error: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Select(#[from] SelectorError),
}

#[derive(Debug, Error)]
enum DeliveryFailure {
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("delivery timed out after {0:?}")]
    TimedOut(Duration),
    #[error("cancelled: shutdown in progress")]
    Cancelled,
    #[error("delivery panicked: {0}")]
    Panicked(String),
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Result of delivering one message for one matching rule.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub rule_id: String,
    pub destination: String,
    pub method: DeliveryMethod,
    pub status: DeliveryStatus,
    pub details: String,
    /// False when the audit record could not be written.
    pub logged: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Active rules returned for the source, before filtering.
    pub candidates: usize,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == DeliveryStatus::Forwarded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

/// Routes one inbound message to every matching rule's destination.
///
/// Holds no state between events: rules are fetched fresh for each message,
/// each matching rule is delivered and audited independently, and a failure
/// on one destination never stops the others.
#[derive(Clone)]
pub struct DispatchEngine {
    selector: RuleSelector<dyn RuleStore>,
    transport: Arc<dyn MessageTransport>,
    audit: Arc<dyn AuditSink>,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn RuleStore>,
        transport: Arc<dyn MessageTransport>,
        audit: Arc<dyn AuditSink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            selector: RuleSelector::new(store),
            transport,
            audit,
            config,
        }
    }

    pub async fn handle(&self, event: &InboundEvent) -> Result<DispatchReport, DispatchError> {
        self.handle_until(event, &CancellationToken::new()).await
    }

    /// Like [`handle`](Self::handle), but once `cancel` fires the in-flight delivery
    /// and any rules not yet attempted are recorded as failed.
    pub async fn handle_until(
        &self,
        event: &InboundEvent,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        let span = info_span!(
            "dispatch.handle",
            source_id = %event.source_id,
            message_id = event.message_id
        );
        self.dispatch(event, cancel).instrument(span).await
    }

    async fn dispatch(
        &self,
        event: &InboundEvent,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        let rules = match self.selector.select(&event.source_id).await {
            Ok(rules) => rules,
            Err(err) if self.config.fail_open_on_store_error => {
                warn!(error = %err, "rule fetch failed; continuing as if no rules matched");
                return Ok(DispatchReport::default());
            }
            Err(err) => {
                error!(error = %err, "rule fetch failed; message not dispatched");
                return Err(err.into());
            }
        };

        let candidates = rules.len();
        let mut ctx = EvaluationContext::new();
        let matching: Vec<Rule> = rules
            .into_iter()
            .filter(|rule| {
                let matched = FilterSpec::from_json(rule.filters.as_ref())
                    .matches_with(&event.text, &mut ctx);
                if !matched {
                    debug!(rule_id = %rule.id, "filter did not match");
                }
                matched
            })
            .collect();

        let mut report = DispatchReport {
            candidates,
            outcomes: Vec::with_capacity(matching.len()),
        };

        for rule in matching {
            let result = if cancel.is_cancelled() {
                Err(DeliveryFailure::Cancelled)
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(DeliveryFailure::Cancelled),
                    result = AssertUnwindSafe(self.deliver(&rule, event)).catch_unwind() => {
                        result.unwrap_or_else(|panic| {
                            Err(DeliveryFailure::Panicked(panic_message(panic.as_ref())))
                        })
                    }
                }
            };
            report.outcomes.push(self.record(&rule, event, result).await);
        }

        if !report.outcomes.is_empty() {
            info!(
                candidates,
                delivered = report.delivered(),
                failed = report.failed(),
                "message dispatched"
            );
        }

        Ok(report)
    }

    async fn deliver(&self, rule: &Rule, event: &InboundEvent) -> Result<String, DeliveryFailure> {
        let destination = rule.destination.as_str();
        let send = async {
            match rule.delivery_method {
                DeliveryMethod::Forward => self.transport.forward(destination, &event.handle).await,
                DeliveryMethod::Copy => self.transport.send_text(destination, &event.text).await,
            }
        };

        match timeout(self.config.delivery_timeout, send).await {
            Ok(Ok(())) => Ok(match rule.delivery_method {
                DeliveryMethod::Forward => format!("Forwarded to {destination}"),
                DeliveryMethod::Copy => format!("Copied to {destination}"),
            }),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(DeliveryFailure::TimedOut(self.config.delivery_timeout)),
        }
    }

    async fn record(
        &self,
        rule: &Rule,
        event: &InboundEvent,
        result: Result<String, DeliveryFailure>,
    ) -> DeliveryOutcome {
        let (status, details) = match result {
            Ok(details) => {
                info!(rule_id = %rule.id, destination = %rule.destination, method = rule.delivery_method.as_str(), "delivered");
                (DeliveryStatus::Forwarded, details)
            }
            Err(err) => {
                warn!(rule_id = %rule.id, destination = %rule.destination, error = %err, "delivery failed");
                (DeliveryStatus::Failed, err.to_string())
            }
        };

        let entry = NewDeliveryLog {
            rule_id: rule.id.clone(),
            source_id: event.source_id.clone(),
            source_message_id: event.message_id,
            destination: rule.destination.clone(),
            status,
            details: details.clone(),
        };

        let logged = match timeout(self.config.delivery_timeout, self.audit.append(entry)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!(rule_id = %rule.id, status = status.as_str(), error = %err, "failed to write delivery log");
                false
            }
            Err(_) => {
                error!(rule_id = %rule.id, status = status.as_str(), "delivery log write timed out");
                false
            }
        };

        DeliveryOutcome {
            rule_id: rule.id.clone(),
            destination: rule.destination.clone(),
            method: rule.delivery_method,
            status,
            details,
            logged,
        }
    }
}
