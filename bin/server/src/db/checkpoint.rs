//! PostgreSQL checkpoint store.
//!
//! One row per conversation holding the latest envelope-encoded checkpoint.
//! Writes are conditional on the stored `version`, so two writers for the
//! same conversation cannot both commit.

use async_trait::async_trait;
use concierge_core::ConversationId;
use concierge_routing::{Checkpoint, CheckpointError, CheckpointStore};
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};

/// Row type for checkpoint queries.
#[derive(FromRow)]
struct CheckpointRow {
    version: i64,
    payload: Vec<u8>,
}

/// Checkpoint store backed by the `conversation_checkpoints` table.
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn stored_version(&self, conversation_id: &ConversationId) -> Result<u64, CheckpointError> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM conversation_checkpoints WHERE conversation_id = $1",
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(version.map_or(0, |v| u64::try_from(v).unwrap_or(0)))
    }
}

fn unavailable(e: sqlx::Error) -> CheckpointError {
    CheckpointError::Unavailable {
        reason: e.to_string(),
    }
}

fn column_version(checkpoint: &Checkpoint, version: u64) -> Result<i64, CheckpointError> {
    i64::try_from(version).map_err(|_| CheckpointError::Corrupt {
        conversation_id: checkpoint.conversation_id,
        reason: format!("version {version} out of range"),
    })
}

/// How a save reaches the table.
#[derive(Debug, PartialEq, Eq)]
enum Write {
    /// First checkpoint of a conversation.
    Insert { version: i64 },
    /// Replaces the row only if it still holds `expected`.
    Update { version: i64, expected: i64 },
    /// Version 0 never wins a write.
    Refuse,
}

fn plan_write(checkpoint: &Checkpoint) -> Result<Write, CheckpointError> {
    if checkpoint.version == 0 {
        return Ok(Write::Refuse);
    }
    let version = column_version(checkpoint, checkpoint.version)?;
    let expected = column_version(checkpoint, checkpoint.expected_version())?;
    Ok(if expected == 0 {
        Write::Insert { version }
    } else {
        Write::Update { version, expected }
    })
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    async fn load(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT version, payload
            FROM conversation_checkpoints
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let checkpoint = Checkpoint::decode(*conversation_id, &row.payload)?;
        if i64::try_from(checkpoint.version).ok() != Some(row.version) {
            return Err(CheckpointError::Corrupt {
                conversation_id: *conversation_id,
                reason: format!(
                    "payload version {} does not match row version {}",
                    checkpoint.version, row.version
                ),
            });
        }
        Ok(Some(checkpoint))
    }

    #[instrument(skip(self, checkpoint), fields(conversation_id = %checkpoint.conversation_id, version = checkpoint.version))]
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let write = plan_write(checkpoint)?;
        let payload = checkpoint.encode()?;

        let result = match write {
            Write::Refuse => None,
            Write::Insert { version } => Some(
                sqlx::query(
                    r#"
                INSERT INTO conversation_checkpoints (conversation_id, version, payload, saved_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (conversation_id) DO NOTHING
                "#,
                )
                .bind(checkpoint.conversation_id.to_string())
                .bind(version)
                .bind(&payload)
                .bind(checkpoint.saved_at)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?,
            ),
            Write::Update { version, expected } => Some(
                sqlx::query(
                    r#"
                UPDATE conversation_checkpoints
                SET version = $2, payload = $3, saved_at = $4
                WHERE conversation_id = $1 AND version = $5
                "#,
                )
                .bind(checkpoint.conversation_id.to_string())
                .bind(version)
                .bind(&payload)
                .bind(checkpoint.saved_at)
                .bind(expected)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?,
            ),
        };

        if result.is_none_or(|r| r.rows_affected() == 0) {
            let found = self.stored_version(&checkpoint.conversation_id).await?;
            return Err(CheckpointError::VersionConflict {
                conversation_id: checkpoint.conversation_id,
                expected: checkpoint.expected_version(),
                found,
            });
        }

        debug!("checkpoint saved");
        Ok(())
    }
}
