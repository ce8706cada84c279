//! # Immutable Tales agent
//!
//! Off-chain companion process for the Immutable Tales story contracts. It
//! subscribes to the factory's events and reacts:
//!
//! - **PlayerChoice** — records the player's new on-chain position, then
//!   generates and appends the next story passage
//! - **StoryGameCreated** — registers the new game and seeds its opening
//!   passage
//!
//! All tracked state is in-memory for the lifetime of the process; the
//! chain stays the durable source of truth for story content.

pub mod agent;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod generator;
pub mod prompts;
pub mod registry;
pub mod tracker;
pub mod writer;

pub use agent::{AgentStatus, HandlerOutcome, SkipReason, StoryAgent};
pub use chain::{OnChainBackend, StoryBackend, StoryFactory, StorySummary};
pub use config::{AgentConfig, ChainConfig};
pub use error::{
    AgentError, ConfigError, ConnectionError, DecodeError, GenerationError, HandlerError,
    WriteError,
};
pub use events::{EventKey, PlayerChoice, StoryEvent, StoryGameCreated};
pub use generator::{CompletionsGenerator, NarrativeGenerator, NarrativeRequest};
pub use registry::{StoryGameRecord, StoryGameRegistry};
pub use tracker::{ChoiceRecord, PlayerRecord, PlayerStateTracker};
pub use writer::StoryNodeWriter;
