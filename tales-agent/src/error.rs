//! Error types for the agent.
//!
//! Uses thiserror for ergonomic error definition. Per-event failures are
//! collected into [`HandlerError`] and consumed by the outcome sink; they
//! never propagate into the subscription machinery. Setup failures surface
//! through [`AgentError`].

use std::time::Duration;

/// Configuration errors, surfaced before the agent starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    /// An environment variable could not be parsed
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// The chain connection could not be established or set up.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The node is unreachable or rejected the subscription
    #[error("chain connection failed: {0}")]
    Node(#[from] ethrpc::Error),
}

/// An event payload could not be normalized.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The log's topic matches no known event revision
    #[error("unrecognized event topic {0}")]
    UnknownEvent(ethrpc::H256),

    /// The log carries no topics at all
    #[error("log has no topic")]
    MissingTopic,

    /// A required field is absent from the payload
    #[error("{event} event is missing required field {field}")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    /// The payload bytes do not decode against any tolerated shape
    #[error("malformed {event} payload: {reason}")]
    Payload {
        event: &'static str,
        reason: String,
    },
}

/// The text-generation service failed to produce usable output.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The completion service call failed
    #[error("completion service error: {0}")]
    Service(#[from] completions::Error),

    /// The call did not finish in time
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with empty content
    #[error("service returned empty content")]
    Empty,
}

impl GenerationError {
    /// Whether a bounded retry is worthwhile. Auth and request errors are
    /// permanent; timeouts, transport hiccups, and empty output are not.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Service(e) => e.is_transient(),
            GenerationError::Timeout(_) => true,
            GenerationError::Empty => true,
        }
    }
}

/// A node write failed. Never retried automatically: resubmitting a
/// state-changing call without an on-chain sequence check risks duplicate
/// effects.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The transaction was rejected at submission
    #[error("failed to submit transaction: {0}")]
    Submit(ethrpc::Error),

    /// The transaction reverted or was not confirmed in time
    #[error("transaction not confirmed: {0}")]
    Confirm(ethrpc::Error),
}

/// Failure of one event handler, reported through the outcome sink.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A read against the contract failed before any mutation
    #[error("chain read failed: {0}")]
    ChainRead(ethrpc::Error),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Fatal errors surfaced to the caller of `start`.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The agent was already stopped and cannot be restarted
    #[error("agent is stopped")]
    Stopped,
}
