//! Checkpoint persistence.
//!
//! A checkpoint is the full conversation state plus the node to run next,
//! written after every step. Stores enforce a single writer per
//! conversation with an optimistic version check: a save succeeds only if
//! the stored version is exactly one behind the checkpoint being saved.

use crate::envelope::{Envelope, RawEnvelope};
use crate::error::CheckpointError;
use crate::router::Node;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_conversation::ConversationState;
use concierge_core::ConversationId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A committed snapshot of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The conversation this checkpoint belongs to.
    pub conversation_id: ConversationId,
    /// Monotonic write counter, starting at 1.
    pub version: u64,
    /// The conversation state after the step.
    pub state: ConversationState,
    /// The node to run next.
    pub cursor: Node,
    /// When the checkpoint was written.
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates the first checkpoint of a new conversation.
    #[must_use]
    pub fn initial(state: ConversationState) -> Self {
        Self {
            conversation_id: state.conversation_id,
            version: 0,
            state,
            cursor: Node::Terminal,
            saved_at: Utc::now(),
        }
    }

    /// Returns the version a store must currently hold for this save to win.
    #[must_use]
    pub fn expected_version(&self) -> u64 {
        self.version.saturating_sub(1)
    }

    /// Encodes the checkpoint in a versioned envelope.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Corrupt` if the state cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, CheckpointError> {
        Envelope::new(self)
            .to_json_bytes()
            .map_err(|e| CheckpointError::Corrupt {
                conversation_id: self.conversation_id,
                reason: e.to_string(),
            })
    }

    /// Decodes a checkpoint written by [`Checkpoint::encode`].
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Corrupt` for malformed bytes or an envelope
    /// version newer than this build understands.
    pub fn decode(conversation_id: ConversationId, bytes: &[u8]) -> Result<Self, CheckpointError> {
        let corrupt = |reason: String| CheckpointError::Corrupt {
            conversation_id,
            reason,
        };

        let raw = RawEnvelope::from_json_bytes(bytes).map_err(|e| corrupt(e.to_string()))?;
        if !raw.is_supported() {
            return Err(corrupt(format!(
                "unsupported envelope version {}",
                raw.version
            )));
        }
        let checkpoint = raw
            .deserialize_payload::<Self>()
            .map_err(|e| corrupt(e.to_string()))?
            .into_payload();
        if checkpoint.conversation_id != conversation_id {
            return Err(corrupt(format!(
                "checkpoint belongs to {}",
                checkpoint.conversation_id
            )));
        }
        Ok(checkpoint)
    }
}

/// Durable storage for checkpoints.
///
/// Implementations must be atomic per conversation and read-your-writes.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the latest checkpoint, or `None` for a new conversation.
    async fn load(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Saves a checkpoint.
    ///
    /// Fails with `CheckpointError::VersionConflict` unless the stored
    /// version equals `checkpoint.expected_version()` (0 meaning absent).
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    version: u64,
    bytes: Vec<u8>,
}

/// In-process checkpoint store.
///
/// Stores encoded bytes, so loads exercise the same envelope path as a
/// database-backed store. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<Mutex<HashMap<ConversationId, StoredCheckpoint>>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing has been saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let stored = self
            .checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned();

        stored
            .map(|s| Checkpoint::decode(*conversation_id, &s.bytes))
            .transpose()
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let bytes = checkpoint.encode()?;
        let mut checkpoints = self
            .checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let found = checkpoints
            .get(&checkpoint.conversation_id)
            .map_or(0, |s| s.version);
        let expected = checkpoint.expected_version();
        if found != expected || checkpoint.version == 0 {
            return Err(CheckpointError::VersionConflict {
                conversation_id: checkpoint.conversation_id,
                expected,
                found,
            });
        }

        checkpoints.insert(
            checkpoint.conversation_id,
            StoredCheckpoint {
                version: checkpoint.version,
                bytes,
            },
        );
        Ok(())
    }
}
