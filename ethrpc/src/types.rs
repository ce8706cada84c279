//! Core wire types: addresses, hashes, 256-bit quantities, logs, receipts.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::Error;

/// A 20-byte Ethereum account or contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Interpret the low 20 bytes of a 32-byte word as an address.
    pub fn from_word(word: &[u8; 32]) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&word[12..]);
        Address(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| Error::Decode(format!("invalid address {s:?}: {e}")))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid address {s:?}: expected 20 bytes")))?;
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A 32-byte hash (transaction hash, block hash, or log topic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct H256(pub [u8; 32]);

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| Error::Decode(format!("invalid hash {s:?}: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid hash {s:?}: expected 32 bytes")))?;
        Ok(H256(bytes))
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A 256-bit unsigned integer, stored big-endian.
///
/// The story contracts only ever hand back small counters (node indices,
/// story ids), so conversion to `u64` is the common path and overflow is
/// surfaced as a decode failure rather than silently truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct U256(pub [u8; 32]);

impl U256 {
    /// Zero.
    pub const ZERO: U256 = U256([0u8; 32]);

    /// Big-endian bytes of this value.
    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Convert to `u64` if the value fits.
    pub fn as_u64(self) -> Option<u64> {
        if self.0[..24].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[24..]);
        Some(u64::from_be_bytes(low))
    }

    pub fn is_zero(self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl From<u64> for U256 {
    fn from(value: u64) -> Self {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&value.to_be_bytes());
        U256(out)
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u64() {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "0x{}", hex::encode(self.0)),
        }
    }
}

/// A decoded log entry delivered by a subscription or `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(deserialize_with = "deserialize_hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default, deserialize_with = "deserialize_opt_quantity")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    #[serde(default, deserialize_with = "deserialize_opt_quantity")]
    pub log_index: Option<u64>,
    /// Set by the node when the log was removed by a chain reorganization.
    #[serde(default)]
    pub removed: bool,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    #[serde(default, deserialize_with = "deserialize_opt_quantity")]
    pub block_number: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_quantity")]
    pub status: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_quantity")]
    pub gas_used: Option<u64>,
}

impl TransactionReceipt {
    /// Whether the transaction executed successfully. Receipts without a
    /// status field (pre-Byzantium nodes) are treated as successful.
    pub fn succeeded(&self) -> bool {
        self.status != Some(0)
    }
}

/// Parse a 0x-prefixed hex quantity (`"0x1a"`) into a `u64`.
pub(crate) fn parse_quantity(s: &str) -> Result<u64, Error> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::Decode(format!("invalid quantity {s:?}: {e}")))
}

/// Format a `u64` as a 0x-prefixed hex quantity.
pub(crate) fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Parse a 0x-prefixed hex byte string into raw bytes.
pub(crate) fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, Error> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| Error::Decode(format!("invalid hex data: {e}")))
}

fn deserialize_hex_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_hex_bytes(&s).map_err(de::Error::custom)
}

fn deserialize_opt_quantity<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) => parse_quantity(&s).map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip() {
        let addr: Address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            .parse()
            .unwrap();
        assert_eq!(addr.to_string(), "0x5fbdb2315678afecb367f032d93f642f64180aa3");
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("not-an-address".parse::<Address>().is_err());
    }

    #[test]
    fn test_u256_u64_conversion() {
        assert_eq!(U256::from(42).as_u64(), Some(42));
        assert_eq!(U256::ZERO.as_u64(), Some(0));

        let mut big = [0u8; 32];
        big[0] = 1;
        assert_eq!(U256(big).as_u64(), None);
    }

    #[test]
    fn test_quantity_parsing() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert!(parse_quantity("0xzz").is_err());
        assert_eq!(format_quantity(26), "0x1a");
    }

    #[test]
    fn test_log_deserialization() {
        let json = r#"{
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
            "data": "0x0000000000000000000000000000000000000000000000000000000000000001",
            "blockNumber": "0x10",
            "transactionHash": "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
            "logIndex": "0x0"
        }"#;
        let log: Log = serde_json::from_str(json).unwrap();
        assert_eq!(log.block_number, Some(16));
        assert_eq!(log.log_index, Some(0));
        assert_eq!(log.data.len(), 32);
        assert!(!log.removed);
    }

    #[test]
    fn test_receipt_status() {
        let ok: TransactionReceipt = serde_json::from_str(
            r#"{"transactionHash": "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef", "status": "0x1"}"#,
        )
        .unwrap();
        assert!(ok.succeeded());

        let reverted: TransactionReceipt = serde_json::from_str(
            r#"{"transactionHash": "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef", "status": "0x0"}"#,
        )
        .unwrap();
        assert!(!reverted.succeeded());
    }
}
