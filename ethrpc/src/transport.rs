//! JSON-RPC transports: a WebSocket connection with subscription routing,
//! and a plain HTTP request/response fallback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on notifications buffered for a subscription whose sink has not been
/// registered yet (the `eth_subscribe` response and the first notifications
/// race through the same socket).
const PENDING_NOTIFICATION_CAP: usize = 256;

#[derive(Debug, Deserialize)]
pub(crate) struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct WsIncoming {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<SubscriptionNotification>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionNotification {
    subscription: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
struct HttpRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

fn rpc_request_body(id: u64, method: &str, params: &Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

/// Commands sent to the WebSocket driver task.
enum WsCommand {
    Request {
        id: u64,
        method: String,
        params: Value,
        respond: oneshot::Sender<Result<Value, Error>>,
    },
    Subscribe {
        subscription_id: String,
        sink: mpsc::UnboundedSender<Value>,
    },
    Unsubscribe {
        subscription_id: String,
    },
    Close,
}

/// A persistent WebSocket JSON-RPC connection.
///
/// All socket I/O happens on one driver task; clones of this handle enqueue
/// commands to it. Request/response correlation is by id, subscription
/// notifications are routed by subscription id.
#[derive(Clone)]
pub(crate) struct WsTransport {
    commands: mpsc::UnboundedSender<WsCommand>,
    next_id: Arc<AtomicU64>,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url));
        let (stream, _) = connect
            .await
            .map_err(|_| Error::Connection(format!("timed out connecting to {url}")))?
            .map_err(|e| Error::Connection(format!("websocket handshake with {url} failed: {e}")))?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive_socket(stream, command_rx));

        Ok(Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (respond, response) = oneshot::channel();
        self.commands
            .send(WsCommand::Request {
                id,
                method: method.to_string(),
                params,
                respond,
            })
            .map_err(|_| Error::Closed)?;

        match tokio::time::timeout(REQUEST_TIMEOUT, response).await {
            Err(_) => Err(Error::Timeout(REQUEST_TIMEOUT)),
            Ok(Err(_)) => Err(Error::Closed),
            Ok(Ok(result)) => result,
        }
    }

    /// Route notifications for `subscription_id` into `sink`. Must be called
    /// after a successful `eth_subscribe`; notifications that raced ahead of
    /// the registration are flushed into the sink.
    pub fn register_subscription(&self, subscription_id: String, sink: mpsc::UnboundedSender<Value>) {
        let _ = self.commands.send(WsCommand::Subscribe {
            subscription_id,
            sink,
        });
    }

    pub fn forget_subscription(&self, subscription_id: &str) {
        let _ = self.commands.send(WsCommand::Unsubscribe {
            subscription_id: subscription_id.to_string(),
        });
    }

    pub fn close(&self) {
        let _ = self.commands.send(WsCommand::Close);
    }
}

async fn drive_socket(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut commands: mpsc::UnboundedReceiver<WsCommand>,
) {
    let (mut write, mut read) = stream.split();
    let mut pending: HashMap<u64, oneshot::Sender<Result<Value, Error>>> = HashMap::new();
    let mut sinks: HashMap<String, mpsc::UnboundedSender<Value>> = HashMap::new();
    let mut unrouted: HashMap<String, Vec<Value>> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WsCommand::Request { id, method, params, respond }) => {
                    let body = rpc_request_body(id, &method, &params);
                    match write.send(Message::Text(body)).await {
                        Ok(()) => {
                            pending.insert(id, respond);
                        }
                        Err(e) => {
                            let _ = respond.send(Err(Error::Connection(format!(
                                "failed to send request: {e}"
                            ))));
                        }
                    }
                }
                Some(WsCommand::Subscribe { subscription_id, sink }) => {
                    if let Some(buffered) = unrouted.remove(&subscription_id) {
                        for value in buffered {
                            let _ = sink.send(value);
                        }
                    }
                    sinks.insert(subscription_id, sink);
                }
                Some(WsCommand::Unsubscribe { subscription_id }) => {
                    sinks.remove(&subscription_id);
                    unrouted.remove(&subscription_id);
                }
                Some(WsCommand::Close) | None => break,
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_incoming(&text, &mut pending, &mut sinks, &mut unrouted);
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::warn!("chain connection closed by remote");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "chain connection error");
                    break;
                }
            },
        }
    }

    // Fail anything still waiting, then let subscribers observe the close
    // through their channel ending.
    for (_, respond) in pending.drain() {
        let _ = respond.send(Err(Error::Closed));
    }
    sinks.clear();
    let _ = write.send(Message::Close(None)).await;
}

fn handle_incoming(
    text: &str,
    pending: &mut HashMap<u64, oneshot::Sender<Result<Value, Error>>>,
    sinks: &mut HashMap<String, mpsc::UnboundedSender<Value>>,
    unrouted: &mut HashMap<String, Vec<Value>>,
) {
    let incoming: WsIncoming = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unparseable message from node");
            return;
        }
    };

    if let Some(id) = incoming.id {
        if let Some(respond) = pending.remove(&id) {
            let result = match incoming.error {
                Some(err) => Err(Error::Rpc {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(incoming.result.unwrap_or(Value::Null)),
            };
            let _ = respond.send(result);
        }
        return;
    }

    if incoming.method.as_deref() == Some("eth_subscription") {
        let Some(notification) = incoming.params else {
            return;
        };
        match sinks.get(&notification.subscription) {
            Some(sink) => {
                if sink.send(notification.result).is_err() {
                    sinks.remove(&notification.subscription);
                }
            }
            None => {
                let buffer = unrouted.entry(notification.subscription).or_default();
                if buffer.len() < PENDING_NOTIFICATION_CAP {
                    buffer.push(notification.result);
                }
            }
        }
    }
}

/// Plain HTTP JSON-RPC transport.
#[derive(Clone)]
pub(crate) struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl HttpTransport {
    pub fn new(url: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .body(rpc_request_body(id, method, &params))
            .send()
            .await
            .map_err(|e| Error::Connection(format!("request to {} failed: {e}", self.url)))?;

        if !response.status().is_success() {
            return Err(Error::Connection(format!(
                "node returned HTTP {}",
                response.status()
            )));
        }

        let body: HttpRpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("invalid JSON-RPC response: {e}")))?;

        match body.error {
            Some(err) => Err(Error::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(body.result.unwrap_or(Value::Null)),
        }
    }
}
