//! Orchestrator tests against scripted chain and generator mocks.
//!
//! These drive the full pipeline (dedup, decode, tracking, generation,
//! write) both through the live subscription stream and through direct log
//! injection where ordering must be deterministic.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethrpc::abi::{self, Token};
use ethrpc::{Address, Log, TransactionReceipt, H256, U256};
use tokio::sync::{mpsc, Mutex};

use tales_agent::{
    AgentError, AgentStatus, ConnectionError, GenerationError, HandlerError, HandlerOutcome,
    NarrativeGenerator, NarrativeRequest, SkipReason, StoryAgent, StoryBackend,
};

fn owner() -> Address {
    "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap()
}

fn player() -> Address {
    "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc".parse().unwrap()
}

fn game() -> Address {
    "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512".parse().unwrap()
}

/// Scripted chain backend. Writes are recorded at submission; failures are
/// queued up front by the test.
#[derive(Default)]
struct MockBackend {
    positions: Mutex<HashMap<Address, u64>>,
    content: Mutex<HashMap<u64, Vec<String>>>,
    listed_stories: Mutex<Vec<Address>>,
    submit_failures: Mutex<VecDeque<String>>,
    appended: Mutex<Vec<(u64, String)>>,
    events: Mutex<Option<mpsc::UnboundedSender<Log>>>,
    closed: AtomicBool,
}

impl MockBackend {
    async fn set_position(&self, who: Address, node: u64) {
        self.positions.lock().await.insert(who, node);
    }

    async fn fail_next_submit(&self, reason: &str) {
        self.submit_failures.lock().await.push_back(reason.to_string());
    }

    async fn push_event(&self, log: Log) {
        let events = self.events.lock().await;
        events
            .as_ref()
            .expect("subscribe() not called")
            .send(log)
            .expect("event stream closed");
    }

    async fn appended(&self) -> Vec<(u64, String)> {
        self.appended.lock().await.clone()
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoryBackend for MockBackend {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Log>, ConnectionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().await = Some(tx);
        Ok(rx)
    }

    async fn chain_head(&self) -> Result<u64, ethrpc::Error> {
        Ok(1)
    }

    async fn player_position(
        &self,
        _story_game_id: Option<u64>,
        who: Address,
    ) -> Result<u64, ethrpc::Error> {
        Ok(self.positions.lock().await.get(&who).copied().unwrap_or(0))
    }

    async fn story_content(
        &self,
        story_game_id: Option<u64>,
        _story_game: Option<Address>,
    ) -> Result<Vec<String>, ethrpc::Error> {
        let content = self.content.lock().await;
        Ok(story_game_id
            .and_then(|id| content.get(&id).cloned())
            .unwrap_or_default())
    }

    async fn find_story_id(&self, story_game: Address) -> Result<Option<u64>, ethrpc::Error> {
        Ok(self
            .listed_stories
            .lock()
            .await
            .iter()
            .position(|a| *a == story_game)
            .map(|i| i as u64))
    }

    async fn submit_node(&self, story_game_id: u64, content: &str) -> Result<H256, ethrpc::Error> {
        if let Some(reason) = self.submit_failures.lock().await.pop_front() {
            return Err(ethrpc::Error::TransactionFailed {
                hash: H256([0u8; 32]),
                reason,
            });
        }
        self.appended
            .lock()
            .await
            .push((story_game_id, content.to_string()));
        Ok(H256([0x11; 32]))
    }

    async fn confirm(&self, hash: H256) -> Result<TransactionReceipt, ethrpc::Error> {
        Ok(TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(1),
            status: Some(1),
            gas_used: None,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Generator that replays scripted results, then defaults to a fixed
/// passage.
#[derive(Default)]
struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
}

impl ScriptedGenerator {
    async fn script(&self, response: Result<&str, GenerationError>) {
        self.responses
            .lock()
            .await
            .push_back(response.map(str::to_string));
    }
}

#[async_trait]
impl NarrativeGenerator for ScriptedGenerator {
    async fn generate(&self, _request: NarrativeRequest<'_>) -> Result<String, GenerationError> {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok("A fresh passage unfolds.".to_string()))
    }
}

fn base_log(topics: Vec<H256>, data: Vec<u8>, tx_marker: u8) -> Log {
    Log {
        address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap(),
        topics,
        data,
        block_number: Some(1),
        transaction_hash: Some(H256([tx_marker; 32])),
        log_index: Some(0),
        removed: false,
    }
}

fn created_log(owner: Address, story_game: Address, title: &str, id: u64, tx_marker: u8) -> Log {
    let topic = abi::event_topic("StoryGameCreated(address,address,string,uint256)");
    let data = abi::encode(&[
        Token::Address(owner),
        Token::Address(story_game),
        Token::String(title.to_string()),
        Token::Uint(U256::from(id)),
    ]);
    base_log(vec![topic], data, tx_marker)
}

fn choice_log(who: Address, choice: u64, node_index: u64, id: u64, tx_marker: u8) -> Log {
    let topic = abi::event_topic("PlayerChoice(address,uint256,uint256,uint256)");
    let data = abi::encode(&[
        Token::Address(who),
        Token::Uint(U256::from(choice)),
        Token::Uint(U256::from(node_index)),
        Token::Uint(U256::from(id)),
    ]);
    base_log(vec![topic], data, tx_marker)
}

fn harness() -> (Arc<MockBackend>, Arc<ScriptedGenerator>, StoryAgent) {
    let backend = Arc::new(MockBackend::default());
    let generator = Arc::new(ScriptedGenerator::default());
    let agent = StoryAgent::new(
        Arc::clone(&backend) as Arc<dyn StoryBackend>,
        Arc::clone(&generator) as Arc<dyn NarrativeGenerator>,
    )
    .with_health_interval(Duration::from_secs(3600));
    (backend, generator, agent)
}

#[tokio::test]
async fn story_game_created_registers_and_seeds_first_node() {
    let (backend, generator, agent) = harness();
    generator.script(Ok("The gate creaks open.")).await;

    agent.start().await.unwrap();
    assert_eq!(agent.status().await, AgentStatus::Listening);

    backend
        .push_event(created_log(owner(), game(), "Found a treasure", 0, 1))
        .await;

    let mut seeded = false;
    for _ in 0..200 {
        if backend.appended().await.len() == 1 {
            seeded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seeded, "opening node was never appended");
    // Let any stray work settle before asserting exact counts.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let appended = backend.appended().await;
    assert_eq!(appended, vec![(0, "The gate creaks open.".to_string())]);

    let games = agent.story_games().await;
    assert_eq!(games.len(), 1);
    let record = &games[0];
    assert_eq!(record.owner, owner());
    assert_eq!(record.address, game());
    assert_eq!(record.title, "Found a treasure");
    assert_eq!(record.id, Some(0));
    assert_eq!(record.node_count, 1);

    agent.stop().await;
}

#[tokio::test]
async fn player_choices_update_history_in_handling_order() {
    let (backend, _generator, agent) = harness();
    agent.start().await.unwrap();

    backend.set_position(player(), 3).await;
    let outcome = agent
        .process_log(&choice_log(player(), 1, 0, 0, 2))
        .await;
    assert!(matches!(
        outcome,
        HandlerOutcome::Completed { appended_node: true }
    ));

    backend.set_position(player(), 5).await;
    let outcome = agent
        .process_log(&choice_log(player(), 2, 3, 0, 3))
        .await;
    assert!(matches!(
        outcome,
        HandlerOutcome::Completed { appended_node: true }
    ));

    let history = agent.player_history(player()).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].choice, 1);
    assert_eq!(history[0].from_node, None);
    assert_eq!(history[0].to_node, Some(3));
    assert_eq!(history[1].choice, 2);
    assert_eq!(history[1].from_node, Some(3));
    assert_eq!(history[1].to_node, Some(5));

    agent.stop().await;
}

#[tokio::test]
async fn generation_failure_skips_the_write() {
    let (backend, generator, agent) = harness();
    agent.start().await.unwrap();

    // Register the game first so any registry damage would be visible.
    generator.script(Ok("Opening.")).await;
    let outcome = agent
        .process_log(&created_log(owner(), game(), "Found a treasure", 0, 4))
        .await;
    assert!(matches!(outcome, HandlerOutcome::Completed { .. }));
    assert_eq!(backend.appended().await.len(), 1);

    generator.script(Err(GenerationError::Empty)).await;
    let outcome = agent.process_log(&choice_log(player(), 1, 0, 0, 5)).await;
    assert!(matches!(
        outcome,
        HandlerOutcome::Failed(HandlerError::Generation(_))
    ));

    // No write happened and the record was not touched beyond registration.
    assert_eq!(backend.appended().await.len(), 1);
    let games = agent.story_games().await;
    assert_eq!(games[0].node_count, 1);

    // The choice itself is still tracked.
    assert_eq!(agent.player_history(player()).await.len(), 1);

    // The agent keeps handling events afterwards.
    let outcome = agent.process_log(&choice_log(player(), 0, 1, 0, 6)).await;
    assert!(matches!(
        outcome,
        HandlerOutcome::Completed { appended_node: true }
    ));

    agent.stop().await;
}

#[tokio::test]
async fn write_failure_skips_the_node_count_increment() {
    let (backend, generator, agent) = harness();
    agent.start().await.unwrap();

    generator.script(Ok("Opening.")).await;
    agent
        .process_log(&created_log(owner(), game(), "Found a treasure", 0, 7))
        .await;
    assert_eq!(agent.story_games().await[0].node_count, 1);

    backend.fail_next_submit("execution reverted").await;
    let outcome = agent.process_log(&choice_log(player(), 1, 0, 0, 8)).await;
    assert!(matches!(
        outcome,
        HandlerOutcome::Failed(HandlerError::Write(_))
    ));

    assert_eq!(agent.story_games().await[0].node_count, 1);
    assert_eq!(backend.appended().await.len(), 1);

    agent.stop().await;
}

#[tokio::test]
async fn duplicate_delivery_is_skipped() {
    let (backend, generator, agent) = harness();
    agent.start().await.unwrap();

    generator.script(Ok("Opening.")).await;
    let log = created_log(owner(), game(), "Found a treasure", 0, 9);
    let outcome = agent.process_log(&log).await;
    assert!(matches!(outcome, HandlerOutcome::Completed { .. }));

    let outcome = agent.process_log(&log).await;
    assert!(matches!(
        outcome,
        HandlerOutcome::Skipped(SkipReason::DuplicateDelivery)
    ));
    assert_eq!(backend.appended().await.len(), 1);

    agent.stop().await;
}

#[tokio::test]
async fn reorged_logs_are_ignored() {
    let (backend, _generator, agent) = harness();
    agent.start().await.unwrap();

    let mut log = choice_log(player(), 1, 0, 0, 10);
    log.removed = true;
    let outcome = agent.process_log(&log).await;
    assert!(matches!(
        outcome,
        HandlerOutcome::Skipped(SkipReason::ReorgedLog)
    ));
    assert!(backend.appended().await.is_empty());
    assert!(agent.player_history(player()).await.is_empty());

    agent.stop().await;
}

#[tokio::test]
async fn created_event_without_id_is_resolved_from_the_listing() {
    let (backend, generator, agent) = harness();
    agent.start().await.unwrap();

    backend.listed_stories.lock().await.push(game());
    generator.script(Ok("Opening.")).await;

    // Three-argument revision: no storyGameId in the payload.
    let topic = abi::event_topic("StoryGameCreated(address,address,string)");
    let data = abi::encode(&[
        Token::Address(owner()),
        Token::Address(game()),
        Token::String("Found a treasure".to_string()),
    ]);
    let outcome = agent.process_log(&base_log(vec![topic], data, 11)).await;
    assert!(matches!(
        outcome,
        HandlerOutcome::Completed { appended_node: true }
    ));

    let games = agent.story_games().await;
    assert_eq!(games[0].id, Some(0));
    assert_eq!(games[0].node_count, 1);

    agent.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_closes_the_connection() {
    let (backend, _generator, agent) = harness();
    agent.start().await.unwrap();

    agent.stop().await;
    assert!(backend.closed());
    assert_eq!(agent.status().await, AgentStatus::Stopped);

    // A second stop must not panic or error.
    agent.stop().await;
    assert_eq!(agent.status().await, AgentStatus::Stopped);

    // A stopped agent refuses to restart.
    assert!(matches!(agent.start().await, Err(AgentError::Stopped)));
}
