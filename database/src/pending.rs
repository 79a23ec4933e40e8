use crate::{classify_sql_error, Database};
use chrono::{DateTime, Utc};
use sentiment_core::{ContentItem, DatabaseError};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    /// Will be offered to the classifier again next cycle.
    Pending,
    /// Failed too many times; kept for inspection only.
    Abandoned,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Abandoned => "abandoned",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PendingStatus::Pending),
            "abandoned" => Some(PendingStatus::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item whose classification failed and has not yet succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    pub item: ContentItem,
    pub feed_key: String,
    pub attempts: u32,
    pub last_error: String,
    pub status: PendingStatus,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PendingRow {
    item_id: String,
    feed_key: String,
    item_json: String,
    attempts: i64,
    last_error: String,
    status: String,
    first_failed_at: DateTime<Utc>,
    last_failed_at: DateTime<Utc>,
}

impl TryFrom<PendingRow> for PendingItem {
    type Error = DatabaseError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        let item = serde_json::from_str(&row.item_json).map_err(|e| {
            DatabaseError::CorruptRecord {
                key: row.item_id.clone(),
                reason: format!("pending item payload: {}", e),
            }
        })?;
        let status = PendingStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::CorruptRecord {
                key: row.item_id.clone(),
                reason: format!("unknown pending status '{}'", row.status),
            }
        })?;

        Ok(PendingItem {
            item,
            feed_key: row.feed_key,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            last_error: row.last_error,
            status,
            first_failed_at: row.first_failed_at,
            last_failed_at: row.last_failed_at,
        })
    }
}

impl Database {
    /// Count one more failed classification of `item`. Once `max_failures` is
    /// reached the item is abandoned and no longer offered for retry.
    pub async fn record_failure(
        &self,
        feed_key: &str,
        item: &ContentItem,
        error: &str,
        max_failures: u32,
    ) -> Result<PendingItem, DatabaseError> {
        let item_json = serde_json::to_string(item).map_err(|e| DatabaseError::CorruptRecord {
            key: item.id.clone(),
            reason: e.to_string(),
        })?;
        let max_failures = i64::from(max_failures.max(1));
        let now = Utc::now();

        let row = sqlx::query_as::<_, PendingRow>(
            "INSERT INTO pending_items (
                 item_id, feed_key, item_json, attempts, last_error, status,
                 first_failed_at, last_failed_at
             ) VALUES (?1, ?2, ?3, 1, ?4, CASE WHEN 1 >= ?5 THEN 'abandoned' ELSE 'pending' END, ?6, ?6)
             ON CONFLICT (item_id) DO UPDATE SET
                 item_json = excluded.item_json,
                 attempts = pending_items.attempts + 1,
                 last_error = excluded.last_error,
                 status = CASE WHEN pending_items.attempts + 1 >= ?5
                               THEN 'abandoned' ELSE 'pending' END,
                 last_failed_at = excluded.last_failed_at
             RETURNING item_id, feed_key, item_json, attempts, last_error, status,
                       first_failed_at, last_failed_at",
        )
        .bind(&item.id)
        .bind(feed_key)
        .bind(item_json)
        .bind(error)
        .bind(max_failures)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(classify_sql_error)?;

        let pending = PendingItem::try_from(row)?;
        match pending.status {
            PendingStatus::Abandoned => warn!(
                item_id = %item.id,
                attempts = pending.attempts,
                error,
                "Giving up on item after repeated classification failures"
            ),
            PendingStatus::Pending => debug!(
                item_id = %item.id,
                attempts = pending.attempts,
                "Item queued for retry next cycle"
            ),
        }
        Ok(pending)
    }

    /// Items of `feed_key` still awaiting a retry, in feed order.
    pub async fn load_pending(&self, feed_key: &str) -> Result<Vec<PendingItem>, DatabaseError> {
        self.list_pending_with_status(feed_key, PendingStatus::Pending)
            .await
    }

    pub async fn list_abandoned(&self, feed_key: &str) -> Result<Vec<PendingItem>, DatabaseError> {
        self.list_pending_with_status(feed_key, PendingStatus::Abandoned)
            .await
    }

    /// Ids of `feed_key` that will not be classified again.
    pub async fn abandoned_ids(&self, feed_key: &str) -> Result<HashSet<String>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT item_id FROM pending_items WHERE feed_key = ?1 AND status = 'abandoned'",
        )
        .bind(feed_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    /// `(pending, abandoned)` counts across all feeds.
    pub async fn pending_counts(&self) -> Result<(i64, i64), DatabaseError> {
        let counts = sqlx::query_as::<_, (i64, i64)>(
            "SELECT
                 COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN status = 'abandoned' THEN 1 ELSE 0 END), 0)
             FROM pending_items",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn list_pending_with_status(
        &self,
        feed_key: &str,
        status: PendingStatus,
    ) -> Result<Vec<PendingItem>, DatabaseError> {
        let rows = sqlx::query_as::<_, PendingRow>(
            "SELECT item_id, feed_key, item_json, attempts, last_error, status,
                    first_failed_at, last_failed_at
             FROM pending_items
             WHERE feed_key = ?1 AND status = ?2",
        )
        .bind(feed_key)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut items = rows
            .into_iter()
            .map(PendingItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        items.sort_by(|a, b| a.item.position().cmp(&b.item.position()));
        Ok(items)
    }
}
