//! Durable checkpoint store backed by SQLite.
//!
//! Checkpoints are stored one row per checkpoint, with the full payload as
//! the JSON form of [`PersistedCheckpoint`]. Denormalized columns exist for
//! the fields the queries filter and order on.

use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::instrument;

use crate::runtime::checkpointer::{
    Checkpoint, CheckpointMeta, Checkpointer, CheckpointerError, Result,
};
use crate::runtime::persistence::{JsonSerializable, PersistedCheckpoint};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id     TEXT    NOT NULL,
    checkpoint_id TEXT    NOT NULL,
    seq           INTEGER NOT NULL,
    step          INTEGER NOT NULL,
    payload       TEXT    NOT NULL,
    created_at    TEXT    NOT NULL,
    PRIMARY KEY (thread_id, seq)
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_by_id
    ON checkpoints (thread_id, checkpoint_id);
";

pub struct SqliteCheckpointer {
    pool: Arc<SqlitePool>,
}

impl SqliteCheckpointer {
    /// Connect to the database and create the schema when absent.
    ///
    /// `database_url` follows sqlx conventions, e.g.
    /// `sqlite://relaygraph.db?mode=rwc`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(backend)?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(backend)?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint> {
        let payload: String = row.get("payload");
        let persisted = PersistedCheckpoint::from_json_str(&payload).map_err(serde)?;
        Checkpoint::try_from(persisted).map_err(serde)
    }
}

fn backend(err: sqlx::Error) -> CheckpointerError {
    CheckpointerError::Backend {
        message: err.to_string(),
    }
}

fn serde(err: crate::runtime::persistence::PersistenceError) -> CheckpointerError {
    CheckpointerError::Serde {
        message: err.to_string(),
    }
}

#[async_trait::async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self, checkpoint), fields(thread_id = %checkpoint.thread_id, seq = checkpoint.seq))]
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let persisted = PersistedCheckpoint::from(&checkpoint);
        let payload = persisted.to_json_string().map_err(serde)?;
        sqlx::query(
            "INSERT INTO checkpoints (thread_id, checkpoint_id, seq, step, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.thread_id)
        .bind(&checkpoint.checkpoint_id)
        .bind(checkpoint.seq as i64)
        .bind(checkpoint.step as i64)
        .bind(&payload)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(self.pool.as_ref())
        .await
        .map_err(backend)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT payload FROM checkpoints WHERE thread_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(backend)?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    #[instrument(skip(self))]
    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT payload FROM checkpoints WHERE thread_id = ? AND checkpoint_id = ?",
        )
        .bind(thread_id)
        .bind(checkpoint_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(backend)?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>> {
        let rows =
            sqlx::query("SELECT payload FROM checkpoints WHERE thread_id = ? ORDER BY seq ASC")
                .bind(thread_id)
                .fetch_all(self.pool.as_ref())
                .await
                .map_err(backend)?;
        rows.iter()
            .map(|row| Self::parse_row(row).map(|cp| cp.meta()))
            .collect()
    }

    #[instrument(skip(self))]
    async fn delete(&self, thread_id: &str, before_seq: Option<u64>) -> Result<u64> {
        let result = match before_seq {
            None => sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
                .bind(thread_id)
                .execute(self.pool.as_ref())
                .await
                .map_err(backend)?,
            Some(cutoff) => {
                sqlx::query("DELETE FROM checkpoints WHERE thread_id = ? AND seq < ?")
                    .bind(thread_id)
                    .bind(cutoff as i64)
                    .execute(self.pool.as_ref())
                    .await
                    .map_err(backend)?
            }
        };
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn cleanup(&self, thread_id: &str, retain: usize) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM checkpoints
             WHERE thread_id = ?
               AND seq NOT IN (
                   SELECT seq FROM checkpoints
                   WHERE thread_id = ?
                   ORDER BY seq DESC LIMIT ?
               )",
        )
        .bind(thread_id)
        .bind(thread_id)
        .bind(retain as i64)
        .execute(self.pool.as_ref())
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }
}
