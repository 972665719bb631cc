//! CDP Client - The Core Communication Layer
//!
//! Design decisions:
//! 1. One WebSocket per client, one client per target
//! 2. Request/response matching via ID, events fanned out to listeners
//! 3. In-flight requests fail on disconnect and are never replayed
//! 4. Only the transport heals itself: a supervised background task
//!    reconnects with exponential backoff after an unexpected close
//!
//! Lock order is lifecycle before sink. Reader and supervisor tasks hold a
//! `Weak` so dropping the last client handle stops them.

use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::discovery::{fetch_targets, http_client, select_target};
use super::protocol::*;
use crate::config::ClientConfig;
use crate::error::{CDPError, Result};
use crate::events::{ConnectionEvent, ConnectionState, EventBus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Event listener callback, invoked with the event's `params`
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

const CLOSED_BY_CLIENT: &str = "Client disconnected";
const CLOSED_BY_REMOTE: &str = "WebSocket closed";

#[derive(Default)]
struct Lifecycle {
    /// Bumped whenever a link is installed or torn down; a reader only
    /// handles closure for the generation it was spawned with.
    generation: u64,
    target_id: Option<TargetId>,
    reader: Option<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
}

struct Inner {
    config: ClientConfig,

    /// Discovery client, shared across connects and reconnection attempts
    http: reqwest::Client,

    /// Monotonic request ID counter, never reset
    next_id: AtomicU64,

    /// Pending requests waiting for responses
    pending: DashMap<RequestId, oneshot::Sender<Result<Value>>>,

    /// Key: method name (e.g., "Page.loadEventFired"), Value: callbacks
    listeners: DashMap<String, Vec<EventCallback>>,

    /// WebSocket write half, `None` while not connected
    sink: Mutex<Option<WsSink>>,

    lifecycle: Mutex<Lifecycle>,
    state: watch::Sender<ConnectionState>,
    events: EventBus,
}

/// CDP Client - manages a single WebSocket connection to one target.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct CDPClient {
    inner: Arc<Inner>,
}

impl CDPClient {
    /// Create a disconnected client. Fails if the host is not loopback and
    /// remote access was not allowed.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = http_client()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                next_id: AtomicU64::new(1),
                pending: DashMap::new(),
                listeners: DashMap::new(),
                sink: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle::default()),
                state,
                events: EventBus::new(),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to lifecycle events (connect, loss, reconnection)
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Target recorded by the last successful connect
    pub async fn target_id(&self) -> Option<TargetId> {
        self.inner.lifecycle.lock().await.target_id.clone()
    }

    /// Discover targets and connect to `target_id`, or to the first page.
    ///
    /// An existing connection is torn down first and a running reconnection
    /// loop is cancelled. On failure the client is left disconnected.
    pub async fn connect(&self, target_id: Option<&str>) -> Result<()> {
        self.inner.teardown(CLOSED_BY_CLIENT).await;

        self.inner.state.send_replace(ConnectionState::Connecting);
        match self.inner.open_link(target_id, false).await {
            Ok(target_id) => {
                tracing::info!(%target_id, port = self.inner.config.port, "Connected to target");
                self.inner
                    .events
                    .publish(ConnectionEvent::Connected { target_id });
                Ok(())
            }
            Err(e) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Close the connection and fail every in-flight request. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.teardown(CLOSED_BY_CLIENT).await;
    }

    /// Send CDP request and wait for its response
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        if !self.is_connected() {
            return Err(CDPError::connection("Not connected"));
        }

        let method = method.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CDPRequest {
            id,
            method: method.clone(),
            params,
        };
        let json = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);
        let _pending = PendingGuard {
            pending: &self.inner.pending,
            id,
        };

        {
            let mut sink = self.inner.sink.lock().await;
            let sink = sink
                .as_mut()
                .ok_or_else(|| CDPError::connection("Not connected"))?;
            sink.send(Message::Text(json))
                .await
                .map_err(|e| CDPError::connection(format!("Failed to send '{method}': {e}")))?;
        }
        tracing::debug!(id, %method, "Sent request");

        let timeout = self.inner.config.timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CDPError::connection(CLOSED_BY_CLIENT)),
            Err(_) => {
                tracing::debug!(id, %method, "Request timed out");
                Err(CDPError::RequestTimeout {
                    method,
                    id,
                    timeout,
                })
            }
        }
    }

    /// Send a typed command and decode its response
    pub async fn execute<C: Command>(&self, command: &C) -> Result<C::Response> {
        let params = serde_json::to_value(command)?;
        let result = self.send(C::METHOD, Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Evaluate JavaScript and return the value by value (`null` if undefined)
    pub async fn evaluate(&self, expression: impl Into<String>, await_promise: bool) -> Result<Value> {
        let response = self
            .execute(&Evaluate::new(expression, await_promise))
            .await?;

        if let Some(details) = response.exception_details {
            return Err(CDPError::Evaluation(details.message()));
        }

        Ok(response
            .result
            .and_then(|object| object.value)
            .unwrap_or(Value::Null))
    }

    pub async fn evaluate_as<T: DeserializeOwned>(
        &self,
        expression: impl Into<String>,
        await_promise: bool,
    ) -> Result<T> {
        let value = self.evaluate(expression, await_promise).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Navigate to an http(s) URL. Other schemes are rejected before
    /// anything is sent.
    pub async fn navigate(&self, url: &str) -> Result<NavigateResult> {
        let parsed = url::Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CDPError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        self.execute(&Navigate {
            url: url.to_string(),
        })
        .await
    }

    /// Register a listener; registering the same `Arc` twice is a no-op
    pub fn on(&self, event: impl Into<String>, listener: EventCallback) {
        let mut listeners = self.inner.listeners.entry(event.into()).or_default();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn off(&self, event: &str, listener: &EventCallback) {
        if let Some(mut listeners) = self.inner.listeners.get_mut(event) {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
        self.inner
            .listeners
            .remove_if(event, |_, listeners| listeners.is_empty());
    }

    /// Wait for the next occurrence of `event` and return its params.
    ///
    /// `timeout` defaults to the client's request timeout.
    pub async fn wait_for_event(&self, event: &str, timeout: Option<Duration>) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let slot = StdMutex::new(Some(tx));
        let listener: EventCallback = Arc::new(move |params: &Value| {
            if let Some(tx) = slot.lock().ok().and_then(|mut slot| slot.take()) {
                let _ = tx.send(params.clone());
            }
        });

        self.on(event, listener.clone());
        let _registration = Registration {
            client: self,
            event,
            listener,
        };

        let timeout = timeout.unwrap_or_else(|| self.inner.config.timeout());
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(CDPError::connection(CLOSED_BY_CLIENT)),
            Err(_) => Err(CDPError::EventTimeout {
                event: event.to_string(),
                timeout,
            }),
        }
    }
}

impl std::fmt::Debug for CDPClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CDPClient")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Removes a pending entry when its `send` finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a DashMap<RequestId, oneshot::Sender<Result<Value>>>,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Deregisters a one-shot listener
struct Registration<'a> {
    client: &'a CDPClient,
    event: &'a str,
    listener: EventCallback,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.client.off(self.event, &self.listener);
    }
}

impl Inner {
    /// Discover, select and open a WebSocket to a target, then install it
    /// as the current link. Returns the connected target id.
    async fn open_link(self: &Arc<Self>, target_id: Option<&str>, from_supervisor: bool) -> Result<TargetId> {
        let config = &self.config;
        let targets = fetch_targets(&self.http, &config.host, config.port, config.timeout()).await?;
        let target = select_target(&targets, target_id)?;
        let ws_url = target.web_socket_debugger_url.as_deref().ok_or_else(|| {
            CDPError::connection(format!(
                "Target '{}' has no WebSocket URL; another debugger may be attached",
                target.id
            ))
        })?;

        tracing::debug!(target_id = %target.id, %ws_url, "Opening WebSocket");
        let (ws_stream, _) = tokio::time::timeout(self.config.timeout(), connect_async(ws_url))
            .await
            .map_err(|_| CDPError::connection(format!("Timed out opening WebSocket to {ws_url}")))?
            .map_err(|e| CDPError::connection(format!("WebSocket connection to {ws_url} failed: {e}")))?;
        let (sink, stream) = ws_stream.split();

        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        lifecycle.target_id = Some(target.id.clone());
        if from_supervisor {
            // The loop is done once this link is live; a later close may start a new one.
            lifecycle.supervisor = None;
        }

        *self.sink.lock().await = Some(sink);
        let reader = spawn_reader(Arc::downgrade(self), stream, generation);
        if let Some(stale) = lifecycle.reader.replace(reader) {
            stale.abort();
        }
        self.state.send_replace(ConnectionState::Connected);

        Ok(target.id.clone())
    }

    /// Explicit teardown: stops the reader and any reconnection loop.
    async fn teardown(&self, reason: &str) {
        // An aborted supervisor may have installed a link before it stopped,
        // so drain until no supervisor is left.
        loop {
            let (reader, supervisor) = {
                let mut lifecycle = self.lifecycle.lock().await;
                lifecycle.generation += 1;
                (lifecycle.reader.take(), lifecycle.supervisor.take())
            };
            if let Some(reader) = reader {
                reader.abort();
            }
            match supervisor {
                Some(task) => {
                    task.abort();
                    let _ = task.await;
                }
                None => break,
            }
        }

        let previous = self.state.send_replace(ConnectionState::Disconnected);

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Error closing WebSocket");
            }
        }

        self.reject_all(reason);

        if previous != ConnectionState::Disconnected {
            tracing::info!(reason, "Disconnected");
            self.events.publish(ConnectionEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Transport closed underneath us
    async fn handle_link_closed(self: &Arc<Self>, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.generation != generation {
            return;
        }
        lifecycle.generation += 1;
        lifecycle.reader = None;

        self.sink.lock().await.take();
        self.state.send_replace(ConnectionState::Disconnected);
        self.reject_all(CLOSED_BY_REMOTE);

        tracing::warn!(target_id = ?lifecycle.target_id, "WebSocket closed unexpectedly");
        self.events.publish(ConnectionEvent::Disconnected {
            reason: CLOSED_BY_REMOTE.to_string(),
        });

        let Some(target_id) = lifecycle.target_id.clone() else {
            return;
        };
        if lifecycle
            .supervisor
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }

        self.state.send_replace(ConnectionState::Reconnecting);
        lifecycle.supervisor = Some(spawn_supervisor(Arc::downgrade(self), target_id));
    }

    fn reject_all(&self, reason: &str) {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(CDPError::connection(reason)));
            }
        }
    }

    /// Handle incoming WebSocket message; malformed frames are dropped
    fn handle_message(&self, text: &str) {
        let msg: CDPMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        match msg {
            CDPMessage::Response(response) => {
                let Some((_, tx)) = self.pending.remove(&response.id) else {
                    tracing::debug!(id = response.id, "Response for unknown request");
                    return;
                };
                let outcome = match response.error {
                    Some(error) => Err(CDPError::Evaluation(error.message)),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome); // Receiver may have timed out
            }
            CDPMessage::Event(event) => self.dispatch(event),
        }
    }

    fn dispatch(&self, event: CDPEvent) {
        // Snapshot so listeners may call on/off without deadlocking the map
        let listeners = match self.listeners.get(&event.method) {
            Some(listeners) => listeners.value().clone(),
            None => return,
        };
        let params = event.params.unwrap_or(Value::Null);
        for listener in listeners {
            listener(&params);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if let Some(task) = lifecycle.reader.take() {
            task.abort();
        }
        if let Some(task) = lifecycle.supervisor.take() {
            task.abort();
        }
    }
}

// Spawning goes through plain fns: the reader and supervisor futures
// reference each other and their Send bounds must not be inferred cyclically.
fn spawn_reader(inner: Weak<Inner>, stream: WsSource, generation: u64) -> JoinHandle<()> {
    tokio::spawn(read_loop(inner, stream, generation))
}

fn spawn_supervisor(inner: Weak<Inner>, target_id: TargetId) -> JoinHandle<()> {
    tokio::spawn(reconnect_loop(inner, target_id))
}

async fn read_loop(inner: Weak<Inner>, mut stream: WsSource, generation: u64) {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    tracing::debug!("Dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "Close frame received");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket read error");
                break;
            }
        };

        let Some(client) = inner.upgrade() else {
            return;
        };
        client.handle_message(&text);
    }

    if let Some(client) = inner.upgrade() {
        client.handle_link_closed(generation).await;
    }
}

async fn reconnect_loop(inner: Weak<Inner>, target_id: TargetId) {
    let Some(policy) = inner.upgrade().map(|inner| inner.config.reconnect) else {
        return;
    };

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay(attempt - 1);
        match inner.upgrade() {
            Some(client) => client
                .events
                .publish(ConnectionEvent::Reconnecting { attempt, delay }),
            None => return,
        }
        tokio::time::sleep(delay).await;

        let Some(client) = inner.upgrade() else {
            return;
        };
        match client.open_link(Some(&target_id), true).await {
            Ok(target_id) => {
                tracing::info!(%target_id, attempt, "Reconnected");
                client
                    .events
                    .publish(ConnectionEvent::Reconnected { target_id, attempt });
                return;
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "Reconnection attempt failed");
            }
        }
    }

    let Some(client) = inner.upgrade() else {
        return;
    };
    {
        let mut lifecycle = client.lifecycle.lock().await;
        lifecycle.supervisor = None;
        client.state.send_if_modified(|state| {
            if *state == ConnectionState::Reconnecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    tracing::warn!(%target_id, attempts = policy.max_attempts, "Giving up on reconnection");
    client.events.publish(ConnectionEvent::ReconnectFailed {
        attempts: policy.max_attempts,
    });
}
