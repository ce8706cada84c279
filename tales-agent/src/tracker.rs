//! In-memory tracking of player positions and choice history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ethrpc::Address;

/// One observed choice, in observation order (not block order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceRecord {
    /// When the agent handled the event.
    pub at: DateTime<Utc>,
    /// The player's node before the choice, if the agent had seen them.
    pub from_node: Option<u64>,
    pub choice: u64,
    pub story_game_id: Option<u64>,
    /// The player's on-chain node after the choice.
    pub to_node: Option<u64>,
}

/// Everything known about one player.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerRecord {
    pub current_node: Option<u64>,
    /// Append-only; entries are never reordered or removed.
    pub history: Vec<ChoiceRecord>,
}

/// Tracks per-player story position for the lifetime of the process.
///
/// Purely in-memory: a restart loses this state, and the chain remains the
/// durable source of truth for node content.
#[derive(Debug, Default)]
pub struct PlayerStateTracker {
    players: HashMap<Address, PlayerRecord>,
}

impl PlayerStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a choice to the player's history and move their current node.
    /// Creates the record on first sight of the player.
    pub fn record_choice(&mut self, player: Address, record: ChoiceRecord) {
        let entry = self.players.entry(player).or_default();
        entry.current_node = record.to_node;
        entry.history.push(record);
    }

    /// The player's choice history, oldest first. Empty for unknown players.
    pub fn history(&self, player: Address) -> &[ChoiceRecord] {
        self.players
            .get(&player)
            .map(|record| record.history.as_slice())
            .unwrap_or_default()
    }

    /// The player's last-known node, if any.
    pub fn current_node(&self, player: Address) -> Option<u64> {
        self.players.get(&player).and_then(|record| record.current_node)
    }

    /// Number of players seen so far.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}
