//! Connection to a chain node: reads, transaction submission, log
//! subscriptions, and confirmation waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use crate::transport::{HttpTransport, WsTransport};
use crate::types::{format_quantity, parse_hex_bytes, parse_quantity};
use crate::{Address, Error, Log, TransactionReceipt, H256};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

enum Transport {
    Ws(WsTransport),
    Http(HttpTransport),
}

/// A connection to an Ethereum-compatible node.
///
/// WebSocket endpoints get push-based log subscriptions; anything else (or a
/// failed WebSocket handshake) falls back to HTTP with block-range polling.
/// Construction fails if no connection can be established; retry policy
/// belongs to the caller.
pub struct Provider {
    transport: Transport,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl Provider {
    /// Connect to `url`. `ws://` and `wss://` endpoints are tried as
    /// WebSocket first and demoted to HTTP polling when the handshake
    /// fails, mirroring the usual provider fallback behavior.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let transport = if url.starts_with("ws://") || url.starts_with("wss://") {
            match WsTransport::connect(url).await {
                Ok(ws) => Transport::Ws(ws),
                Err(e) => {
                    let http_url = url
                        .replacen("wss://", "https://", 1)
                        .replacen("ws://", "http://", 1);
                    tracing::warn!(
                        error = %e,
                        fallback = %http_url,
                        "websocket connection failed, falling back to HTTP polling"
                    );
                    Transport::Http(HttpTransport::new(&http_url)?)
                }
            }
        } else {
            Transport::Http(HttpTransport::new(url)?)
        };

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown,
        })
    }

    /// Interval used for HTTP log polling and receipt polling.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Issue a raw JSON-RPC request.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
        match &self.transport {
            Transport::Ws(ws) => ws.request(method, params).await,
            Transport::Http(http) => http.request(method, params).await,
        }
    }

    pub async fn block_number(&self) -> Result<u64, Error> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        quantity_from(&result)
    }

    pub async fn chain_id(&self) -> Result<u64, Error> {
        let result = self.request("eth_chainId", json!([])).await?;
        quantity_from(&result)
    }

    /// Read-only contract invocation; returns the raw return data.
    pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        let params = json!([
            {"to": to, "data": format!("0x{}", hex::encode(data))},
            "latest",
        ]);
        let result = self.request("eth_call", params).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| Error::Decode(format!("eth_call returned {result}")))?;
        parse_hex_bytes(hex)
    }

    /// Submit a state-changing transaction signed by the node-managed
    /// `from` account. Returns a handle that resolves once mined.
    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
    ) -> Result<PendingTransaction<'_>, Error> {
        let params = json!([
            {"from": from, "to": to, "data": format!("0x{}", hex::encode(data))},
        ]);
        let result = self.request("eth_sendTransaction", params).await?;
        let hash = result
            .as_str()
            .ok_or_else(|| Error::Decode(format!("eth_sendTransaction returned {result}")))?
            .parse()?;
        Ok(PendingTransaction {
            provider: self,
            hash,
        })
    }

    pub async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, Error> {
        let result = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| Error::Decode(format!("invalid receipt: {e}")))
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, Error> {
        let result = self.request("eth_getLogs", json!([filter.to_params()])).await?;
        serde_json::from_value(result).map_err(|e| Error::Decode(format!("invalid logs: {e}")))
    }

    /// Subscribe to all logs emitted by `address`.
    ///
    /// Over WebSocket this is a push subscription (`eth_subscribe`); over
    /// HTTP it is a background block-range polling loop with the same
    /// delivery contract.
    pub async fn subscribe_logs(&self, address: Address) -> Result<LogSubscription, Error> {
        match &self.transport {
            Transport::Ws(ws) => {
                let params = json!(["logs", {"address": address}]);
                let result = ws.request("eth_subscribe", params).await?;
                let subscription_id = result
                    .as_str()
                    .ok_or_else(|| Error::Decode(format!("eth_subscribe returned {result}")))?
                    .to_string();

                let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Value>();
                let (log_tx, log_rx) = mpsc::unbounded_channel::<Log>();
                ws.register_subscription(subscription_id.clone(), raw_tx);
                tokio::spawn(async move {
                    while let Some(value) = raw_rx.recv().await {
                        match serde_json::from_value::<Log>(value) {
                            Ok(log) => {
                                if log_tx.send(log).is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "dropping undecodable log"),
                        }
                    }
                });

                Ok(LogSubscription {
                    rx: log_rx,
                    canceller: Canceller::Ws {
                        transport: ws.clone(),
                        subscription_id,
                    },
                })
            }
            Transport::Http(http) => {
                let mut from_block = self.block_number().await? + 1;
                let (log_tx, log_rx) = mpsc::unbounded_channel::<Log>();
                let stop = Arc::new(AtomicBool::new(false));
                let stop_flag = Arc::clone(&stop);
                let mut provider_shutdown = self.shutdown.subscribe();
                let http = http.clone();
                let interval = self.poll_interval;

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(interval) => {}
                            _ = provider_shutdown.changed() => break,
                        }
                        if stop_flag.load(Ordering::Relaxed) {
                            break;
                        }

                        let latest = match http.request("eth_blockNumber", json!([])).await {
                            Ok(value) => match quantity_from(&value) {
                                Ok(n) => n,
                                Err(e) => {
                                    tracing::warn!(error = %e, "log poll failed");
                                    continue;
                                }
                            },
                            Err(e) => {
                                tracing::warn!(error = %e, "log poll failed");
                                continue;
                            }
                        };
                        if latest < from_block {
                            continue;
                        }

                        let filter = LogFilter {
                            address: Some(address),
                            from_block: Some(from_block),
                            to_block: Some(latest),
                        };
                        let logs = match http.request("eth_getLogs", json!([filter.to_params()])).await {
                            Ok(value) => match serde_json::from_value::<Vec<Log>>(value) {
                                Ok(logs) => logs,
                                Err(e) => {
                                    tracing::warn!(error = %e, "log poll returned bad data");
                                    continue;
                                }
                            },
                            Err(e) => {
                                tracing::warn!(error = %e, "log poll failed");
                                continue;
                            }
                        };
                        from_block = latest + 1;
                        for log in logs {
                            if log_tx.send(log).is_err() {
                                return;
                            }
                        }
                    }
                });

                Ok(LogSubscription {
                    rx: log_rx,
                    canceller: Canceller::Poll { stop },
                })
            }
        }
    }

    /// Poll until the transaction with `hash` is mined, failing if it
    /// reverted or was not confirmed within `timeout`.
    pub async fn wait_for_receipt(
        &self,
        hash: H256,
        timeout: Duration,
    ) -> Result<TransactionReceipt, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.transaction_receipt(hash).await? {
                if receipt.succeeded() {
                    return Ok(receipt);
                }
                return Err(Error::TransactionFailed {
                    hash,
                    reason: "execution reverted".to_string(),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::TransactionFailed {
                    hash,
                    reason: format!("not confirmed within {timeout:?}"),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Release the connection. Safe to call more than once; pending
    /// subscriptions end their streams.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
        if let Transport::Ws(ws) = &self.transport {
            ws.close();
        }
    }
}

/// Log filter for `eth_getLogs`.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub address: Option<Address>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    fn to_params(&self) -> Value {
        let mut params = serde_json::Map::new();
        if let Some(address) = self.address {
            params.insert("address".to_string(), json!(address));
        }
        if let Some(from) = self.from_block {
            params.insert("fromBlock".to_string(), json!(format_quantity(from)));
        }
        if let Some(to) = self.to_block {
            params.insert("toBlock".to_string(), json!(format_quantity(to)));
        }
        Value::Object(params)
    }
}

enum Canceller {
    Ws {
        transport: WsTransport,
        subscription_id: String,
    },
    Poll {
        stop: Arc<AtomicBool>,
    },
}

/// An active log subscription. Dropping it stops delivery; `unsubscribe`
/// additionally tells the node to forget the subscription and never fails,
/// even after the connection is gone.
pub struct LogSubscription {
    rx: mpsc::UnboundedReceiver<Log>,
    canceller: Canceller,
}

impl LogSubscription {
    /// Next log, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Log> {
        self.rx.recv().await
    }

    /// Detach into the raw receiving channel, keeping delivery alive for
    /// the lifetime of the connection.
    pub fn into_receiver(self) -> mpsc::UnboundedReceiver<Log> {
        self.rx
    }

    pub async fn unsubscribe(self) {
        match self.canceller {
            Canceller::Ws {
                transport,
                subscription_id,
            } => {
                // Best effort: the connection may already be closed.
                let _ = transport
                    .request("eth_unsubscribe", json!([subscription_id]))
                    .await;
                transport.forget_subscription(&subscription_id);
            }
            Canceller::Poll { stop } => {
                stop.store(true, Ordering::Relaxed);
            }
        }
    }
}

/// A submitted transaction awaiting inclusion.
pub struct PendingTransaction<'a> {
    provider: &'a Provider,
    hash: H256,
}

impl PendingTransaction<'_> {
    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// Poll until the transaction is mined, failing if it reverted or was
    /// not confirmed within `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<TransactionReceipt, Error> {
        self.provider.wait_for_receipt(self.hash, timeout).await
    }
}

fn quantity_from(value: &Value) -> Result<u64, Error> {
    let hex = value
        .as_str()
        .ok_or_else(|| Error::Decode(format!("expected hex quantity, got {value}")))?;
    parse_quantity(hex)
}
