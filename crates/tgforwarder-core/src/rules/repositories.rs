use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, params};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError};

use super::selector::RuleStore;
use super::types::{DeliveryMethod, NewRule, Rule};

const RULE_COLUMNS: &str = "id, name, source, destination, filters_json, delivery_method, is_active, ai_config_json, created_at, updated_at";

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("rule not found: {0}")]
    NotFound(String),
    #[error("invalid delivery_method value {0}")]
    InvalidDeliveryMethod(String),
}

#[derive(Clone)]
pub struct RuleRepository {
    db: Database,
}

impl RuleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, new_rule: NewRule) -> Result<Rule, RuleError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let filters_json = optional_json(&new_rule.filters)?;
        let ai_config_json = optional_json(&new_rule.ai_config)?;
        let is_active = new_rule.is_active as i64;

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO rules (
                        id, name, source, destination, filters_json, delivery_method, is_active, ai_config_json, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                    RETURNING {RULE_COLUMNS}"
                ),
                params![
                    id,
                    new_rule.name,
                    new_rule.source,
                    new_rule.destination,
                    filters_json,
                    new_rule.delivery_method.as_str(),
                    is_active,
                    ai_config_json,
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_rule(row),
            None => Err(RuleError::NotFound("insert failed".into())),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Rule, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_rule(row),
            None => Err(RuleError::NotFound(id.to_string())),
        }
    }

    pub async fn list(&self, offset: u32, limit: u32) -> Result<Vec<Rule>, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS}
                     FROM rules
                     ORDER BY created_at, id
                     LIMIT ?1 OFFSET ?2"
                ),
                params![limit as i64, offset as i64],
            )
            .await?;

        let mut rules = Vec::new();
        while let Some(row) = rows.next().await? {
            rules.push(row_to_rule(row)?);
        }
        Ok(rules)
    }

    pub async fn list_active_for_source(&self, source: &str) -> Result<Vec<Rule>, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS}
                     FROM rules
                     WHERE source = ?1 AND is_active = 1
                     ORDER BY created_at, id"
                ),
                params![source],
            )
            .await?;

        let mut rules = Vec::new();
        while let Some(row) = rows.next().await? {
            rules.push(row_to_rule(row)?);
        }
        Ok(rules)
    }

    pub async fn update(&self, id: &str, updated: NewRule) -> Result<Rule, RuleError> {
        let now = now_rfc3339();
        let filters_json = optional_json(&updated.filters)?;
        let ai_config_json = optional_json(&updated.ai_config)?;
        let is_active = updated.is_active as i64;

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE rules
                     SET name = ?1,
                         source = ?2,
                         destination = ?3,
                         filters_json = ?4,
                         delivery_method = ?5,
                         is_active = ?6,
                         ai_config_json = ?7,
                         updated_at = ?8
                     WHERE id = ?9
                     RETURNING {RULE_COLUMNS}"
                ),
                params![
                    updated.name,
                    updated.source,
                    updated.destination,
                    filters_json,
                    updated.delivery_method.as_str(),
                    is_active,
                    ai_config_json,
                    now,
                    id
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_rule(row),
            None => Err(RuleError::NotFound(id.to_string())),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query("DELETE FROM rules WHERE id = ?1 RETURNING id", params![id])
            .await?;

        match rows.next().await? {
            Some(_) => Ok(()),
            None => Err(RuleError::NotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl RuleStore for RuleRepository {
    async fn list_active_rules_for_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<Rule>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.list_active_for_source(source_id).await?)
    }
}

fn optional_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, RuleError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(RuleError::from)
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_rule(row: Row) -> Result<Rule, RuleError> {
    let filters_json: Option<String> = row.get(4)?;
    let delivery_method: String = row.get(5)?;
    let is_active: i64 = row.get(6)?;
    let ai_config_json: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    let delivery_method = DeliveryMethod::from_str(&delivery_method)
        .ok_or_else(|| RuleError::InvalidDeliveryMethod(delivery_method.clone()))?;

    Ok(Rule {
        id: row.get(0)?,
        name: row.get(1)?,
        source: row.get(2)?,
        destination: row.get(3)?,
        filters: filters_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        delivery_method,
        is_active: is_active != 0,
        ai_config: ai_config_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}
