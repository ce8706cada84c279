//! Appending generated nodes to a story game on-chain.

use std::sync::Arc;

use ethrpc::{Address, TransactionReceipt};
use tokio::sync::Mutex;

use crate::chain::StoryBackend;
use crate::error::WriteError;
use crate::registry::StoryGameRegistry;

/// Writes story nodes and keeps the registry's node counts in step with
/// confirmed writes.
///
/// Exactly one attempt per invocation: a failed write is surfaced to the
/// orchestrator, never resubmitted here, because a second submission of a
/// state-changing call is not safely idempotent.
pub struct StoryNodeWriter {
    backend: Arc<dyn StoryBackend>,
}

impl StoryNodeWriter {
    pub fn new(backend: Arc<dyn StoryBackend>) -> Self {
        Self { backend }
    }

    /// Submit `content` as the next node of `story_game_id` and wait for
    /// confirmation. The registry count is only incremented after the
    /// receipt confirms success.
    pub async fn append_node(
        &self,
        registry: &Mutex<StoryGameRegistry>,
        story_game: Option<Address>,
        story_game_id: u64,
        content: &str,
    ) -> Result<TransactionReceipt, WriteError> {
        let hash = self
            .backend
            .submit_node(story_game_id, content)
            .await
            .map_err(WriteError::Submit)?;
        tracing::debug!(story_game_id, %hash, "node write submitted");

        let receipt = self.backend.confirm(hash).await.map_err(WriteError::Confirm)?;

        if let Some(address) = story_game {
            registry.lock().await.increment_node_count(address);
        }
        tracing::info!(
            story_game_id,
            tx = %receipt.transaction_hash,
            block = receipt.block_number,
            "story node confirmed"
        );
        Ok(receipt)
    }
}
