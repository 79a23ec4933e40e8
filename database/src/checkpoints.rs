use crate::Database;
use chrono::Utc;
use sentiment_core::{Checkpoint, DatabaseError};
use tracing::debug;

#[derive(Debug, sqlx::FromRow)]
struct CheckpointRow {
    created_utc: i64,
    item_id: Option<String>,
}

impl Database {
    /// The stored checkpoint for `feed_key`, or the initial checkpoint if the
    /// feed has never been processed.
    pub async fn load_checkpoint(&self, feed_key: &str) -> Result<Checkpoint, DatabaseError> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT created_utc, item_id FROM checkpoints WHERE feed_key = ?1",
        )
        .bind(feed_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|row| Checkpoint {
                created_utc: row.created_utc,
                item_id: row.item_id,
            })
            .unwrap_or_else(Checkpoint::initial))
    }

    /// Store `checkpoint` for `feed_key` unless the stored one is already at or
    /// past it. Returns whether the stored checkpoint moved.
    pub async fn save_checkpoint(
        &self,
        feed_key: &str,
        checkpoint: &Checkpoint,
    ) -> Result<bool, DatabaseError> {
        // '' sorts below every real fullname, matching None < Some(_).
        let advanced = sqlx::query(
            "INSERT INTO checkpoints (feed_key, created_utc, item_id, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (feed_key) DO UPDATE SET
                 created_utc = excluded.created_utc,
                 item_id = excluded.item_id,
                 updated_at = excluded.updated_at
             WHERE excluded.created_utc > checkpoints.created_utc
                OR (excluded.created_utc = checkpoints.created_utc
                    AND COALESCE(excluded.item_id, '') > COALESCE(checkpoints.item_id, ''))",
        )
        .bind(feed_key)
        .bind(checkpoint.created_utc)
        .bind(checkpoint.item_id.as_deref())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        debug!(
            feed_key,
            created_utc = checkpoint.created_utc,
            item_id = ?checkpoint.item_id,
            advanced,
            "Saved checkpoint"
        );
        Ok(advanced)
    }
}
