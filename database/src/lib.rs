//! SQLite persistence for classification results, feed checkpoints, the
//! processed-id set and items awaiting a retry.

use sentiment_core::DatabaseError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

mod checkpoints;
mod dedup;
mod pending;
mod results;


pub use dedup::DedupStore;
pub use pending::{PendingItem, PendingStatus};
pub use results::{CommitOutcome, LabelCount};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// What startup reconciliation repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Committed ids with no stored result, removed so they are classified again.
    pub orphaned_ids: u64,
    /// Stored results whose id was missing from the processed set.
    pub restored_ids: u64,
    /// Pending rows for items already in the processed set.
    pub stale_pending: u64,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_ids == 0 && self.restored_ids == 0 && self.stale_pending == 0
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the SQLite database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        if !database_url.starts_with("sqlite:") {
            return Err(DatabaseError::ConnectionFailed {
                reason: format!("unsupported database URL {}", database_url),
            });
        }
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: format!("invalid database URL {}: {}", database_url, e),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        debug!(database_url, "Connected to database");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        MIGRATOR.run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Bring the processed-id set and the result table back into agreement
    /// after an interrupted run. Ids added with `mark_processed` have no result
    /// and are left alone.
    pub async fn reconcile(&self) -> Result<ReconcileReport, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let orphaned_ids = sqlx::query(
            "DELETE FROM processed_items
             WHERE source = 'commit'
               AND item_id NOT IN (SELECT item_id FROM sentiment_results)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let restored_ids = sqlx::query(
            "INSERT INTO processed_items (item_id, processed_at)
             SELECT item_id, classified_at FROM sentiment_results
             WHERE item_id NOT IN (SELECT item_id FROM processed_items)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let stale_pending = sqlx::query(
            "DELETE FROM pending_items
             WHERE item_id IN (SELECT item_id FROM processed_items)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        let report = ReconcileReport {
            orphaned_ids,
            restored_ids,
            stale_pending,
        };
        if report.is_clean() {
            debug!("Storage reconciliation found nothing to repair");
        } else {
            warn!(
                orphaned_ids,
                restored_ids,
                stale_pending,
                "Repaired storage left inconsistent by an interrupted run"
            );
        }
        Ok(report)
    }
}

/// SQLite reports lock contention as a generic database error; surface it as
/// its own retryable variant.
pub(crate) fn classify_sql_error(error: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(db_error) = &error {
        let locked = matches!(db_error.code().as_deref(), Some("5") | Some("6"))
            || db_error.message().contains("database is locked");
        if locked {
            return DatabaseError::DatabaseLocked;
        }
    }
    DatabaseError::Sql(error)
}
