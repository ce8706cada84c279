//! Minimal Ethereum JSON-RPC client.
//!
//! This crate provides a focused client for the node surface the story
//! contracts need:
//! - WebSocket log subscriptions with an HTTP polling fallback
//! - Read-only contract calls and node-signed transaction submission
//! - Confirmation waits with explicit timeouts
//! - A small recursive ABI codec (`address`, `uint256`, `string`, arrays,
//!   tuples)

use thiserror::Error as ThisError;

pub mod abi;
mod contract;
mod provider;
mod transport;
mod types;

pub use contract::Contract;
pub use provider::{LogFilter, LogSubscription, PendingTransaction, Provider};
pub use types::{Address, Log, TransactionReceipt, H256, U256};

/// Errors that can occur when talking to a node.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The connection could not be established or has failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The node rejected the request.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// A submitted transaction reverted or was never confirmed.
    #[error("transaction {hash} failed: {reason}")]
    TransactionFailed { hash: H256, reason: String },

    /// A response or payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection was closed while a request was in flight.
    #[error("connection closed")]
    Closed,
}
