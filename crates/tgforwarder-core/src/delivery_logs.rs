use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Forwarded,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Forwarded => "forwarded",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "forwarded" => Some(Self::Forwarded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One delivery attempt for a (message, rule) pair. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: String,
    /// Cleared when the rule is deleted.
    pub rule_id: Option<String>,
    pub source_id: Option<String>,
    pub source_message_id: i64,
    pub destination: Option<String>,
    pub status: DeliveryStatus,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDeliveryLog {
    pub rule_id: String,
    pub source_id: String,
    pub source_message_id: i64,
    pub destination: String,
    pub status: DeliveryStatus,
    pub details: String,
}

#[derive(Debug, Error)]
pub enum DeliveryLogError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("invalid status value {0}")]
    InvalidStatus(String),
    #[error("delivery log insert returned no row")]
    InsertFailed,
}

/// Destination for audit records produced by dispatch.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(
        &self,
        entry: NewDeliveryLog,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

const DELIVERY_LOG_COLUMNS: &str =
    "id, rule_id, source_id, source_message_id, destination, status, details, timestamp";

#[derive(Clone)]
pub struct DeliveryLogRepository {
    db: Database,
}

impl DeliveryLogRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert one entry. A rule deleted since it was selected is stored with
    /// no `rule_id`; source and destination still identify the delivery.
    pub async fn create(&self, entry: NewDeliveryLog) -> Result<DeliveryLog, DeliveryLogError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO delivery_logs (
                        id, rule_id, source_id, source_message_id, destination, status, details, timestamp
                    ) VALUES (?1, (SELECT id FROM rules WHERE id = ?2), ?3, ?4, ?5, ?6, ?7, ?8)
                    RETURNING {DELIVERY_LOG_COLUMNS}"
                ),
                params![
                    id,
                    entry.rule_id,
                    entry.source_id,
                    entry.source_message_id,
                    entry.destination,
                    entry.status.as_str(),
                    entry.details,
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_delivery_log(row),
            None => Err(DeliveryLogError::InsertFailed),
        }
    }

    /// Most recent entries first, optionally narrowed to one rule.
    pub async fn list(
        &self,
        rule_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeliveryLog>, DeliveryLogError> {
        let conn = self.db.connection().await?;
        let mut rows = match rule_id {
            Some(rule_id) => {
                conn.query(
                    &format!(
                        "SELECT {DELIVERY_LOG_COLUMNS}
                         FROM delivery_logs
                         WHERE rule_id = ?1
                         ORDER BY timestamp DESC, rowid DESC
                         LIMIT ?2"
                    ),
                    params![rule_id, limit as i64],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!(
                        "SELECT {DELIVERY_LOG_COLUMNS}
                         FROM delivery_logs
                         ORDER BY timestamp DESC, rowid DESC
                         LIMIT ?1"
                    ),
                    params![limit as i64],
                )
                .await?
            }
        };

        let mut logs = Vec::new();
        while let Some(row) = rows.next().await? {
            logs.push(row_to_delivery_log(row)?);
        }
        Ok(logs)
    }
}

#[async_trait]
impl AuditSink for DeliveryLogRepository {
    async fn append(
        &self,
        entry: NewDeliveryLog,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.create(entry).await?;
        Ok(())
    }
}

fn row_to_delivery_log(row: Row) -> Result<DeliveryLog, DeliveryLogError> {
    let status: String = row.get(5)?;
    let timestamp: String = row.get(7)?;
    let status = DeliveryStatus::from_str(&status)
        .ok_or_else(|| DeliveryLogError::InvalidStatus(status.clone()))?;

    Ok(DeliveryLog {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        source_id: row.get(2)?,
        source_message_id: row.get(3)?,
        destination: row.get(4)?,
        status,
        details: row.get(6)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc),
    })
}
