//! Thin typed wrapper binding a deployed contract address to a provider.

use std::sync::Arc;

use crate::abi::{self, ParamType, Token};
use crate::provider::{LogSubscription, PendingTransaction};
use crate::{Address, Error, Provider};

/// A deployed contract instance.
#[derive(Clone)]
pub struct Contract {
    provider: Arc<Provider>,
    address: Address,
}

impl Contract {
    pub fn new(provider: Arc<Provider>, address: Address) -> Self {
        Self { provider, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Read-only invocation of `signature` (e.g. `"getAllStories()"`),
    /// decoding the return data against `returns`.
    pub async fn call(
        &self,
        signature: &str,
        args: &[Token],
        returns: &[ParamType],
    ) -> Result<Vec<Token>, Error> {
        let data = abi::encode_call(signature, args);
        let raw = self.provider.call(self.address, data).await?;
        abi::decode(&raw, returns)
    }

    /// Submit a state-changing invocation from `from`; confirmation is the
    /// caller's responsibility via the returned handle.
    pub async fn send(
        &self,
        from: Address,
        signature: &str,
        args: &[Token],
    ) -> Result<PendingTransaction<'_>, Error> {
        let data = abi::encode_call(signature, args);
        self.provider.send_transaction(from, self.address, data).await
    }

    /// Subscribe to every log this contract emits.
    pub async fn subscribe_logs(&self) -> Result<LogSubscription, Error> {
        self.provider.subscribe_logs(self.address).await
    }
}
