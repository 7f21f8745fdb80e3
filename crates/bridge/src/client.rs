//! Persistent JSON-RPC 2.0 client for the remote tool bridge.
//!
//! Maintains one WebSocket connection to the configured endpoint, correlates
//! requests and responses by id, fans out id-less frames to notification
//! subscribers, and reconnects after a fixed delay whenever the connection
//! drops. The endpoint is reconfigurable at any time; reconfiguration tears
//! down the live connection and rejects every in-flight call before the
//! state change is visible to observers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use tabpilot_core::{BridgeConfig, BridgeStatus, Error, Result, ToolBridge};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

type Settle = oneshot::Sender<Result<Value>>;

struct Shared {
    /// In-flight calls keyed by request id. Single shared mutable resource;
    /// entries never outlive their connection generation.
    pending: Mutex<HashMap<u64, Settle>>,
    /// Sender into the writer task of the current connection, if any.
    writer: Mutex<Option<mpsc::Sender<String>>>,
    /// Written with send_replace only: the stored value must stay current
    /// even when no receiver is subscribed.
    status_tx: watch::Sender<BridgeStatus>,
    notify_subs: Mutex<Vec<mpsc::Sender<Value>>>,
    next_id: AtomicU64,
    /// Bumped on every reconfiguration; a connection task whose generation
    /// is stale must not touch shared state.
    generation: AtomicU64,
    endpoint: Mutex<Option<String>>,
    call_timeout: Duration,
    reconnect_delay: Duration,
}

pub struct BridgeClient {
    shared: Arc<Shared>,
}

impl BridgeClient {
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_timeouts(
            Duration::from_secs(config.call_timeout_secs),
            Duration::from_secs(config.reconnect_delay_secs),
        )
    }

    pub fn with_timeouts(call_timeout: Duration, reconnect_delay: Duration) -> Self {
        let (status_tx, _) = watch::channel(BridgeStatus::Disconnected);
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                writer: Mutex::new(None),
                status_tx,
                notify_subs: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                endpoint: Mutex::new(None),
                call_timeout,
                reconnect_delay,
            }),
        }
    }

    /// Set or clear the bridge endpoint.
    ///
    /// Clearing tears down any live connection and suppresses reconnection.
    /// A new url tears down the old connection, rejecting all in-flight
    /// calls, then connects fresh. The same url is a no-op unless currently
    /// disconnected, in which case it reconnects.
    pub async fn configure(&self, url: Option<&str>) {
        let mut endpoint = self.shared.endpoint.lock().await;
        let same = endpoint.as_deref() == url;
        if same && url.is_some() && *self.shared.status_tx.borrow() != BridgeStatus::Disconnected {
            return;
        }

        // Orphan the current connection task and its reconnect timer.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        *self.shared.writer.lock().await = None;
        drain_pending(&self.shared).await;
        self.shared.status_tx.send_replace(BridgeStatus::Disconnected);

        *endpoint = url.map(str::to_string);
        if let Some(target) = endpoint.clone() {
            let generation = self.shared.generation.load(Ordering::SeqCst);
            info!(url = %target, "bridge endpoint configured");
            tokio::spawn(connection_task(self.shared.clone(), target, generation));
        } else {
            info!("bridge endpoint cleared");
        }
    }

    pub fn connected(&self) -> bool {
        *self.shared.status_tx.borrow() == BridgeStatus::Connected
    }

    /// Watch channel for connection state. Pending calls are always settled
    /// before a Disconnected value becomes observable here.
    pub fn status(&self) -> watch::Receiver<BridgeStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Receive server-initiated frames that carry no request id.
    pub async fn subscribe_notifications(&self) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.shared.notify_subs.lock().await.push(tx);
        rx
    }

    /// Invoke `tools/call` on the bridge.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.call(
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        )
        .await
    }

    /// Send a correlated request and wait for exactly one outcome: the
    /// remote result, the remote error message, `mcp-timeout`, or
    /// `disconnected`.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.connected() {
            return Err(Error::Disconnected);
        }
        let writer = self
            .shared
            .writer
            .lock()
            .await
            .clone()
            .ok_or(Error::Disconnected)?;

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let req = RpcRequest {
            jsonrpc: "2.0",
            id: id.to_string(),
            method,
            params,
        };
        let line = serde_json::to_string(&req)?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);
        debug!(id, method, "bridge request");

        if writer.send(line).await.is_err() {
            // Send failure fails this one call; connection state is the
            // connection task's business.
            self.shared.pending.lock().await.remove(&id);
            return Err(Error::Tool("bridge send failed".into()));
        }

        match tokio::time::timeout(self.shared.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                // Late responses for this id are dropped, never delivered.
                self.shared.pending.lock().await.remove(&id);
                Err(Error::BridgeTimeout)
            }
        }
    }
}

#[async_trait]
impl ToolBridge for BridgeClient {
    fn connected(&self) -> bool {
        BridgeClient::connected(self)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        BridgeClient::call_tool(self, name, arguments).await
    }
}

/// Reject every pending call. Must run before a Disconnected broadcast so
/// observers never see the state change with stale promises outstanding.
async fn drain_pending(shared: &Arc<Shared>) {
    let mut map = shared.pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(Error::Disconnected));
    }
}

/// Owns one endpoint generation: connect, pump frames, tear down, wait the
/// reconnect delay, repeat. Exits silently once its generation goes stale.
async fn connection_task(shared: Arc<Shared>, url: String, generation: u64) {
    loop {
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        shared.status_tx.send_replace(BridgeStatus::Connecting);

        match connect_async(&url).await {
            Ok((ws, _)) => {
                let (mut sink, mut stream) = ws.split();
                let (tx, mut rx) = mpsc::channel::<String>(64);
                {
                    let mut writer = shared.writer.lock().await;
                    if shared.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    *writer = Some(tx);
                }
                shared.status_tx.send_replace(BridgeStatus::Connected);
                info!(%url, "bridge connected");

                let writer_task = tokio::spawn(async move {
                    while let Some(frame) = rx.recv().await {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.close().await;
                });

                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => handle_frame(&shared, &text).await,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("bridge read error: {}", e);
                            break;
                        }
                    }
                }
                writer_task.abort();
            }
            Err(e) => {
                // Socket construction failure takes the same path as a close.
                warn!(%url, "bridge connect failed: {}", e);
            }
        }

        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        *shared.writer.lock().await = None;
        drain_pending(&shared).await;
        shared.status_tx.send_replace(BridgeStatus::Disconnected);
        debug!(%url, "bridge disconnected, reconnect scheduled");
        tokio::time::sleep(shared.reconnect_delay).await;
    }
}

/// Dispatch one incoming frame: settle the matching pending call, fan out a
/// notification, or drop it with a diagnostic.
async fn handle_frame(shared: &Arc<Shared>, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("bridge: dropping malformed frame: {}", e);
            return;
        }
    };

    if let Some(id) = frame.get("id").and_then(parse_id) {
        let settle = shared.pending.lock().await.remove(&id);
        match settle {
            Some(tx) => {
                let outcome = if let Some(err) = frame.get("error") {
                    let message = err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("bridge error")
                        .to_string();
                    Err(Error::Tool(message))
                } else {
                    Ok(frame.get("result").cloned().unwrap_or(Value::Null))
                };
                let _ = tx.send(outcome);
            }
            // Late response for an already-settled call.
            None => debug!(id, "bridge: ignoring frame for settled call"),
        }
        return;
    }

    let subs = shared.notify_subs.lock().await;
    for tx in subs.iter() {
        let _ = tx.try_send(frame.clone());
    }
}

/// Request ids go out as strings; accept string or numeric forms coming back.
fn parse_id(v: &Value) -> Option<u64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}
