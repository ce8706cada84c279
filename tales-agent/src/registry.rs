//! In-memory registry of story game contracts seen by the agent.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ethrpc::Address;

/// Metadata for one deployed story game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryGameRecord {
    /// Factory-assigned id, when the creating event (or a lookup) supplied
    /// one. Node writes go through this id.
    pub id: Option<u64>,
    pub owner: Address,
    pub title: String,
    pub address: Address,
    pub created_at: DateTime<Utc>,
    pub node_count: u64,
}

/// Registry of story games, keyed by contract address.
///
/// A second registration for the same address replaces the record; entries
/// live for the lifetime of the process.
#[derive(Debug, Default)]
pub struct StoryGameRegistry {
    games: HashMap<Address, StoryGameRecord>,
}

impl StoryGameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record at its address.
    pub fn register(&mut self, record: StoryGameRecord) {
        self.games.insert(record.address, record);
    }

    /// Bump the node count after a confirmed write. Unknown addresses are
    /// ignored so a failed lookup never fails the caller.
    pub fn increment_node_count(&mut self, address: Address) {
        if let Some(record) = self.games.get_mut(&address) {
            record.node_count += 1;
        }
    }

    pub fn get(&self, address: Address) -> Option<&StoryGameRecord> {
        self.games.get(&address)
    }

    /// Find a game by its factory-assigned id.
    pub fn find_by_id(&self, id: u64) -> Option<&StoryGameRecord> {
        self.games.values().find(|record| record.id == Some(id))
    }

    /// Snapshot of all records; later mutations do not affect it.
    pub fn list(&self) -> Vec<StoryGameRecord> {
        self.games.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}
