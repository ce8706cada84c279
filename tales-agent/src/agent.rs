//! The agent orchestrator.
//!
//! Wires the chain backend, the narrative generator, and the node writer
//! together: `PlayerChoice` events update the player tracker and produce a
//! continuation passage; `StoryGameCreated` events register the game and
//! seed its opening passage. Every per-event failure becomes a
//! [`HandlerOutcome`] consumed by one reporting sink; nothing a handler
//! does can take the subscription down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ethrpc::{Address, Log};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::chain::StoryBackend;
use crate::error::{AgentError, HandlerError};
use crate::events::{self, EventKey, PlayerChoice, StoryEvent, StoryGameCreated};
use crate::generator::{NarrativeGenerator, NarrativeRequest};
use crate::registry::{StoryGameRecord, StoryGameRegistry};
use crate::tracker::{ChoiceRecord, PlayerStateTracker};
use crate::writer::StoryNodeWriter;

const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle state of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Listening,
    Stopped,
}

/// Result of handling one delivered log.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The event was handled; `appended_node` says whether a write landed.
    Completed { appended_node: bool },
    Skipped(SkipReason),
    Failed(HandlerError),
}

/// Why a delivered log was not handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Same transaction hash and log index as an already-handled event.
    DuplicateDelivery,
    /// The node flagged the log as removed by a reorganization.
    ReorgedLog,
}

/// Central sink for handler results.
fn report_outcome(event_name: &str, outcome: &HandlerOutcome) {
    match outcome {
        HandlerOutcome::Completed { appended_node: true } => {
            tracing::info!(event = event_name, "event handled, story node appended");
        }
        HandlerOutcome::Completed {
            appended_node: false,
        } => {
            tracing::info!(event = event_name, "event handled");
        }
        HandlerOutcome::Skipped(reason) => {
            tracing::debug!(event = event_name, ?reason, "event skipped");
        }
        HandlerOutcome::Failed(error) => {
            tracing::warn!(event = event_name, error = %error, "event handler failed");
        }
    }
}

/// Per-key serialization points.
///
/// Handlers for different players and games run concurrently; handlers
/// touching the same key queue up here instead of interleaving. Lock
/// acquisition order is fixed (player, then game address, then game id) so
/// handlers can hold more than one.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockKey {
    Player(Address),
    GameAddress(Address),
    Game(u64),
}

impl KeyedLocks {
    async fn acquire(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }
}

struct Inner {
    backend: Arc<dyn StoryBackend>,
    generator: Arc<dyn NarrativeGenerator>,
    writer: StoryNodeWriter,
    players: Mutex<PlayerStateTracker>,
    games: Mutex<StoryGameRegistry>,
    seen: Mutex<HashSet<EventKey>>,
    locks: KeyedLocks,
}

/// The off-chain story agent.
pub struct StoryAgent {
    inner: Arc<Inner>,
    status: Mutex<AgentStatus>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    health_interval: Duration,
}

impl StoryAgent {
    pub fn new(backend: Arc<dyn StoryBackend>, generator: Arc<dyn NarrativeGenerator>) -> Self {
        Self {
            inner: Arc::new(Inner {
                writer: StoryNodeWriter::new(Arc::clone(&backend)),
                backend,
                generator,
                players: Mutex::new(PlayerStateTracker::new()),
                games: Mutex::new(StoryGameRegistry::new()),
                seen: Mutex::new(HashSet::new()),
                locks: KeyedLocks::default(),
            }),
            status: Mutex::new(AgentStatus::Idle),
            tasks: Mutex::new(Vec::new()),
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub async fn status(&self) -> AgentStatus {
        *self.status.lock().await
    }

    /// Registered story games, as a snapshot.
    pub async fn story_games(&self) -> Vec<StoryGameRecord> {
        self.inner.games.lock().await.list()
    }

    /// A player's observed choice history, oldest first.
    pub async fn player_history(&self, player: Address) -> Vec<ChoiceRecord> {
        self.inner.players.lock().await.history(player).to_vec()
    }

    /// Subscribe to the factory and begin handling events.
    ///
    /// Fatal setup problems (unreachable node, rejected subscription) are
    /// returned to the caller; once listening, per-event failures are only
    /// reported and never stop the agent.
    pub async fn start(&self) -> Result<(), AgentError> {
        let mut status = self.status.lock().await;
        match *status {
            AgentStatus::Listening => return Ok(()),
            AgentStatus::Stopped => return Err(AgentError::Stopped),
            AgentStatus::Idle => {}
        }

        let mut stream = match self.inner.backend.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "could not subscribe to the story factory");
                return Err(AgentError::Connection(e));
            }
        };
        *status = AgentStatus::Listening;

        let inner = Arc::clone(&self.inner);
        let dispatch = tokio::spawn(async move {
            while let Some(log) = stream.recv().await {
                // One task per event: a slow generation or confirmation wait
                // must not hold up delivery of the next event.
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    let (event_name, outcome) = inner.handle_log(&log).await;
                    report_outcome(event_name, &outcome);
                });
            }
            // Stream end means the connection went away. Restart policy
            // belongs to the operator, not this loop.
            tracing::warn!("event stream ended");
        });

        let inner = Arc::clone(&self.inner);
        let interval = self.health_interval;
        let health = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match inner.backend.chain_head().await {
                    Ok(block) => tracing::debug!(block, "connection health check ok"),
                    Err(e) => tracing::warn!(error = %e, "connection health check failed"),
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(dispatch);
        tasks.push(health);
        tracing::info!("agent listening for story events");
        Ok(())
    }

    /// Stop listening and close the chain connection. Idempotent; handlers
    /// already in flight run to completion.
    pub async fn stop(&self) {
        let mut status = self.status.lock().await;
        if *status == AgentStatus::Stopped {
            return;
        }
        *status = AgentStatus::Stopped;

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.inner.backend.close().await;
        tracing::info!("agent stopped");
    }

    /// Handle one log outside the subscription, e.g. during a backfill.
    /// Runs the same pipeline (dedup, decode, dispatch) as live delivery.
    pub async fn process_log(&self, log: &Log) -> HandlerOutcome {
        let (event_name, outcome) = self.inner.handle_log(log).await;
        report_outcome(event_name, &outcome);
        outcome
    }
}

impl Inner {
    async fn handle_log(&self, log: &Log) -> (&'static str, HandlerOutcome) {
        if log.removed {
            return ("<removed>", HandlerOutcome::Skipped(SkipReason::ReorgedLog));
        }

        let event = match events::decode(log) {
            Ok(event) => event,
            Err(e) => return ("<undecoded>", HandlerOutcome::Failed(e.into())),
        };
        let event_name = event.name();

        if let Some(key) = EventKey::of(log) {
            let mut seen = self.seen.lock().await;
            if !seen.insert(key) {
                return (
                    event_name,
                    HandlerOutcome::Skipped(SkipReason::DuplicateDelivery),
                );
            }
        }

        tracing::debug!(
            ?event,
            block = log.block_number,
            tx = ?log.transaction_hash,
            "event received"
        );

        let outcome = match event {
            StoryEvent::PlayerChoice(event) => self.handle_player_choice(event).await,
            StoryEvent::StoryGameCreated(event) => self.handle_story_game_created(event).await,
        };
        (event_name, outcome)
    }

    async fn handle_player_choice(&self, event: PlayerChoice) -> HandlerOutcome {
        let _player_lock = self.locks.acquire(LockKey::Player(event.player)).await;
        let _game_lock = match event.story_game_id {
            Some(id) => Some(self.locks.acquire(LockKey::Game(id)).await),
            None => None,
        };

        let game = {
            let games = self.games.lock().await;
            event
                .story_game_id
                .and_then(|id| games.find_by_id(id).cloned())
        };

        // The on-chain position is read first; if the read fails the
        // handler aborts without touching any state.
        let to_node = match self
            .backend
            .player_position(event.story_game_id, event.player)
            .await
        {
            Ok(node) => node,
            Err(e) => return HandlerOutcome::Failed(HandlerError::ChainRead(e)),
        };

        {
            let mut players = self.players.lock().await;
            let from_node = players.current_node(event.player);
            players.record_choice(
                event.player,
                ChoiceRecord {
                    at: Utc::now(),
                    from_node,
                    choice: event.choice,
                    story_game_id: event.story_game_id,
                    to_node: Some(to_node),
                },
            );
        }

        // The earliest contract revision emits no story game id; those
        // choices are tracked and nothing more can be written for them.
        let Some(story_game_id) = event.story_game_id else {
            return HandlerOutcome::Completed {
                appended_node: false,
            };
        };

        let game_address = game.as_ref().map(|g| g.address);
        let prior = match self
            .backend
            .story_content(Some(story_game_id), game_address)
            .await
        {
            Ok(content) => content,
            Err(e) => return HandlerOutcome::Failed(HandlerError::ChainRead(e)),
        };

        let passage = match self
            .generator
            .generate(NarrativeRequest::Continuation {
                title: game.as_ref().map(|g| g.title.as_str()),
                prior_content: &prior,
                choice: event.choice,
            })
            .await
        {
            Ok(text) => text,
            Err(e) => return HandlerOutcome::Failed(e.into()),
        };

        match self
            .writer
            .append_node(&self.games, game_address, story_game_id, &passage)
            .await
        {
            Ok(_) => HandlerOutcome::Completed {
                appended_node: true,
            },
            Err(e) => HandlerOutcome::Failed(e.into()),
        }
    }

    async fn handle_story_game_created(&self, event: StoryGameCreated) -> HandlerOutcome {
        let _address_lock = self
            .locks
            .acquire(LockKey::GameAddress(event.story_game))
            .await;

        let mut story_game_id = event.story_game_id;
        if story_game_id.is_none() {
            // Older factories omit the id from the event; the listing gives
            // it back as the story's position.
            match self.backend.find_story_id(event.story_game).await {
                Ok(found) => story_game_id = found,
                Err(e) => {
                    tracing::warn!(error = %e, story_game = %event.story_game,
                        "could not resolve story game id");
                }
            }
        }

        self.games.lock().await.register(StoryGameRecord {
            id: story_game_id,
            owner: event.owner,
            title: event.title.clone(),
            address: event.story_game,
            created_at: Utc::now(),
            node_count: 0,
        });

        let Some(story_game_id) = story_game_id else {
            // Registered, but with no id there is no way to address writes.
            return HandlerOutcome::Completed {
                appended_node: false,
            };
        };
        let _game_lock = self.locks.acquire(LockKey::Game(story_game_id)).await;

        let passage = match self
            .generator
            .generate(NarrativeRequest::Opening {
                title: &event.title,
                theme: None,
            })
            .await
        {
            Ok(text) => text,
            Err(e) => return HandlerOutcome::Failed(e.into()),
        };

        match self
            .writer
            .append_node(&self.games, Some(event.story_game), story_game_id, &passage)
            .await
        {
            Ok(_) => HandlerOutcome::Completed {
                appended_node: true,
            },
            Err(e) => HandlerOutcome::Failed(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Address {
        "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap()
    }

    #[tokio::test]
    async fn test_keyed_locks_serialize_same_key() {
        let locks = KeyedLocks::default();
        let guard = locks.acquire(LockKey::Player(player())).await;

        let second = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(LockKey::Player(player())),
        )
        .await;
        assert!(second.is_err(), "same key must block while held");

        drop(guard);
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(LockKey::Player(player())),
        )
        .await;
        assert!(second.is_ok(), "key must be free after release");
    }

    #[tokio::test]
    async fn test_keyed_locks_distinct_keys_are_independent() {
        let locks = KeyedLocks::default();
        let _guard = locks.acquire(LockKey::Game(1)).await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(LockKey::Game(2)))
            .await;
        assert!(other.is_ok(), "distinct keys must not contend");
    }
}
