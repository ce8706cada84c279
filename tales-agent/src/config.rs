//! Environment-driven configuration.
//!
//! Both binaries load a `.env` file first (when present) and then read the
//! process environment. Recognized variables:
//!
//! - `RPC_URL` — chain node endpoint (`ws://`, `wss://`, `http://`, `https://`)
//! - `CONTRACT_ADDRESS` — deployed story factory
//! - `AGENT_ACCOUNT` — node-managed account the agent signs with
//! - `COMPLETIONS_API_KEY`, `COMPLETIONS_BASE_URL`, `COMPLETIONS_MODEL` —
//!   text-generation service credentials
//! - `CONFIRM_TIMEOUT_SECS`, `GENERATION_TIMEOUT_SECS`,
//!   `GENERATION_ATTEMPTS`, `HEALTH_CHECK_SECS` — optional tuning knobs

use std::time::Duration;

use ethrpc::Address;

use crate::error::ConfigError;

const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_GENERATION_ATTEMPTS: u32 = 3;
const DEFAULT_HEALTH_CHECK: Duration = Duration::from_secs(60);

/// Connection settings shared by the daemon and the admin CLI.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub factory_address: Address,
    pub agent_account: Address,
}

impl ChainConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            rpc_url: require("RPC_URL")?,
            factory_address: parse_address("CONTRACT_ADDRESS", require("CONTRACT_ADDRESS")?)?,
            agent_account: parse_address("AGENT_ACCOUNT", require("AGENT_ACCOUNT")?)?,
        })
    }
}

/// Full configuration of the agent daemon.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub chain: ChainConfig,
    pub completions_api_key: String,
    pub completions_base_url: Option<String>,
    pub completions_model: Option<String>,
    pub confirm_timeout: Duration,
    pub generation_timeout: Duration,
    pub generation_attempts: u32,
    pub health_check_interval: Duration,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            chain: ChainConfig::from_env()?,
            completions_api_key: require("COMPLETIONS_API_KEY")?,
            completions_base_url: optional("COMPLETIONS_BASE_URL"),
            completions_model: optional("COMPLETIONS_MODEL"),
            confirm_timeout: duration_secs(
                "CONFIRM_TIMEOUT_SECS",
                optional("CONFIRM_TIMEOUT_SECS"),
                DEFAULT_CONFIRM_TIMEOUT,
            )?,
            generation_timeout: duration_secs(
                "GENERATION_TIMEOUT_SECS",
                optional("GENERATION_TIMEOUT_SECS"),
                DEFAULT_GENERATION_TIMEOUT,
            )?,
            generation_attempts: count(
                "GENERATION_ATTEMPTS",
                optional("GENERATION_ATTEMPTS"),
                DEFAULT_GENERATION_ATTEMPTS,
            )?,
            health_check_interval: duration_secs(
                "HEALTH_CHECK_SECS",
                optional("HEALTH_CHECK_SECS"),
                DEFAULT_HEALTH_CHECK,
            )?,
        })
    }

    /// Build the completions client described by this configuration.
    pub fn completions_client(&self) -> completions::Client {
        let mut client = completions::Client::new(self.completions_api_key.clone());
        if let Some(base_url) = &self.completions_base_url {
            client = client.with_base_url(base_url.clone());
        }
        if let Some(model) = &self.completions_model {
            client = client.with_model(model.clone());
        }
        client
    }
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(var)),
    }
}

fn optional(var: &'static str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_address(var: &'static str, value: String) -> Result<Address, ConfigError> {
    value.parse().map_err(|e: ethrpc::Error| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn duration_secs(
    var: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }),
    }
}

fn count(var: &'static str, value: Option<String>, default: u32) -> Result<u32, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_default_and_parse() {
        let default = Duration::from_secs(60);
        assert_eq!(duration_secs("X", None, default).unwrap(), default);
        assert_eq!(
            duration_secs("X", Some("90".to_string()), default).unwrap(),
            Duration::from_secs(90)
        );
        assert!(duration_secs("X", Some("soon".to_string()), default).is_err());
    }

    #[test]
    fn test_count_parse() {
        assert_eq!(count("X", None, 3).unwrap(), 3);
        assert_eq!(count("X", Some("5".to_string()), 3).unwrap(), 5);
        assert!(count("X", Some("-1".to_string()), 3).is_err());
    }

    #[test]
    fn test_address_parse_reports_variable() {
        let err = parse_address("CONTRACT_ADDRESS", "nope".to_string()).unwrap_err();
        assert!(err.to_string().contains("CONTRACT_ADDRESS"));
    }
}
