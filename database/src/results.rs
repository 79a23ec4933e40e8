use crate::{classify_sql_error, Database};
use chrono::{DateTime, Utc};
use sentiment_core::{
    ContentItem, DatabaseError, ItemKind, SentimentLabel, SentimentResult, StoredResult,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The id was already in the processed set; nothing was written.
    AlreadyProcessed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelCount {
    pub label: SentimentLabel,
    pub count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ResultRow {
    item_id: String,
    kind: String,
    subreddit: String,
    author: Option<String>,
    parent_id: Option<String>,
    title: Option<String>,
    body: String,
    permalink: String,
    created_utc: i64,
    label: String,
    confidence: Option<f64>,
    rationale: Option<String>,
    truncated: bool,
    original_chars: i64,
    provider: String,
    model: String,
    attempts: i64,
    raw_response: String,
    classified_at: DateTime<Utc>,
}

impl TryFrom<ResultRow> for StoredResult {
    type Error = DatabaseError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "post" => ItemKind::Post,
            "comment" => ItemKind::Comment,
            other => {
                return Err(DatabaseError::CorruptRecord {
                    key: row.item_id,
                    reason: format!("unknown item kind '{}'", other),
                })
            }
        };
        let label = SentimentLabel::from_model_output(&row.label);

        Ok(StoredResult {
            item: ContentItem {
                id: row.item_id.clone(),
                kind,
                parent_id: row.parent_id,
                author: row.author,
                subreddit: row.subreddit,
                title: row.title,
                body: row.body,
                permalink: row.permalink,
                created_utc: row.created_utc,
            },
            result: SentimentResult {
                item_id: row.item_id,
                label,
                confidence: row.confidence.map(|c| c as f32),
                rationale: row.rationale,
                truncated: row.truncated,
                original_chars: usize::try_from(row.original_chars).unwrap_or_default(),
                provider: row.provider,
                model: row.model,
                attempts: u32::try_from(row.attempts).unwrap_or_default(),
                classified_at: row.classified_at,
                raw_response: row.raw_response,
            },
        })
    }
}

impl Database {
    /// Record `result` for `item` and mark the id processed in one transaction.
    /// Any pending-retry row for the item is cleared in the same transaction.
    pub async fn commit_classification(
        &self,
        item: &ContentItem,
        result: &SentimentResult,
    ) -> Result<CommitOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(classify_sql_error)?;

        let inserted = sqlx::query(
            "INSERT INTO processed_items (item_id, processed_at, source) VALUES (?1, ?2, 'commit')
             ON CONFLICT (item_id) DO NOTHING",
        )
        .bind(&item.id)
        .bind(result.classified_at)
        .execute(&mut *tx)
        .await
        .map_err(classify_sql_error)?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            debug!(item_id = %item.id, "Item already processed, result not stored");
            return Ok(CommitOutcome::AlreadyProcessed);
        }

        sqlx::query(
            "INSERT INTO sentiment_results (
                 item_id, kind, subreddit, author, parent_id, title, body, permalink,
                 created_utc, label, confidence, rationale, truncated, original_chars,
                 provider, model, attempts, raw_response, classified_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        )
        .bind(&item.id)
        .bind(item.kind.as_str())
        .bind(&item.subreddit)
        .bind(item.author.as_deref())
        .bind(item.parent_id.as_deref())
        .bind(item.title.as_deref())
        .bind(&item.body)
        .bind(&item.permalink)
        .bind(item.created_utc)
        .bind(result.label.as_str())
        .bind(result.confidence.map(f64::from))
        .bind(result.rationale.as_deref())
        .bind(result.truncated)
        .bind(result.original_chars as i64)
        .bind(&result.provider)
        .bind(&result.model)
        .bind(i64::from(result.attempts))
        .bind(&result.raw_response)
        .bind(result.classified_at)
        .execute(&mut *tx)
        .await
        .map_err(classify_sql_error)?;

        sqlx::query("DELETE FROM pending_items WHERE item_id = ?1")
            .bind(&item.id)
            .execute(&mut *tx)
            .await
            .map_err(classify_sql_error)?;

        tx.commit().await.map_err(|e| DatabaseError::TransactionFailed {
            reason: e.to_string(),
        })?;

        debug!(item_id = %item.id, label = %result.label, "Stored classification");
        Ok(CommitOutcome::Committed)
    }

    /// Stored results in feed order, oldest first.
    pub async fn list_results(&self, limit: Option<u32>) -> Result<Vec<StoredResult>, DatabaseError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows = sqlx::query_as::<_, ResultRow>(
            "SELECT item_id, kind, subreddit, author, parent_id, title, body, permalink,
                    created_utc, label, confidence, rationale, truncated, original_chars,
                    provider, model, attempts, raw_response, classified_at
             FROM sentiment_results
             ORDER BY created_utc ASC, item_id ASC
             LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredResult::try_from).collect()
    }

    pub async fn get_result(&self, item_id: &str) -> Result<Option<StoredResult>, DatabaseError> {
        let row = sqlx::query_as::<_, ResultRow>(
            "SELECT item_id, kind, subreddit, author, parent_id, title, body, permalink,
                    created_utc, label, confidence, rationale, truncated, original_chars,
                    provider, model, attempts, raw_response, classified_at
             FROM sentiment_results
             WHERE item_id = ?1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredResult::try_from).transpose()
    }

    pub async fn count_results(&self) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sentiment_results")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Result counts for every label, including labels with no results.
    pub async fn label_counts(&self) -> Result<Vec<LabelCount>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT label, COUNT(*) FROM sentiment_results GROUP BY label",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(SentimentLabel::ALL
            .iter()
            .map(|&label| LabelCount {
                label,
                count: rows
                    .iter()
                    .filter(|(stored, _)| stored == label.as_str())
                    .map(|(_, count)| *count)
                    .sum(),
            })
            .collect())
    }

    /// Every id in the processed set.
    pub async fn processed_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, String>("SELECT item_id FROM processed_items")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Add `item_id` to the processed set without a result. Returns false if it
    /// was already there. The row is kept by `reconcile`.
    pub async fn mark_processed(&self, item_id: &str) -> Result<bool, DatabaseError> {
        let inserted = sqlx::query(
            "INSERT INTO processed_items (item_id, processed_at, source) VALUES (?1, ?2, 'marked')
             ON CONFLICT (item_id) DO NOTHING",
        )
        .bind(item_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(classify_sql_error)?
        .rows_affected();
        Ok(inserted > 0)
    }
}
