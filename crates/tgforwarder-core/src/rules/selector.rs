use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::types::Rule;

/// Read side of rule storage used by dispatch.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_active_rules_for_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<Rule>, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("failed to fetch rules for source {source_id}: {message}")]
    Fetch { source_id: String, message: String },
}

/// Picks the rules that apply to one source. Every call goes to the store so
/// edits made through the API take effect on the next message.
pub struct RuleSelector<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for RuleSelector<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RuleStore + ?Sized> RuleSelector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn select(&self, source_id: &str) -> Result<Vec<Rule>, SelectorError> {
        let rules = self
            .store
            .list_active_rules_for_source(source_id)
            .await
            .map_err(|err| SelectorError::Fetch {
                source_id: source_id.to_string(),
                message: err.to_string(),
            })?;

        let fetched = rules.len();
        let selected: Vec<Rule> = rules
            .into_iter()
            .filter(|rule| rule.is_active && rule.source == source_id)
            .collect();

        if selected.len() != fetched {
            debug!(
                source_id,
                fetched,
                selected = selected.len(),
                "store returned rules outside the requested source"
            );
        }

        Ok(selected)
    }
}
