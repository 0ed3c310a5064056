//! Reconnecting WebSocket event client.
//!
//! The `EventClient` owns one logical connection for a (room, user) pair. It
//! decodes `{event, data}` envelopes, dispatches payloads to handlers registered
//! by event name, and re-establishes the connection after an unexpected close.
//!
//! LIFECYCLE
//! =========
//! 1. `connect()` → `Connecting` → `Connected`, emits `connected`
//! 2. Unexpected close → `Reconnecting`, emits `disconnected`
//! 3. Attempt `n` waits `reconnect_delay * n`, then `Connecting` again
//! 4. Attempts exhausted → `Disconnected`, emits `reconnectFailed` once
//! 5. `disconnect()` at any point → `Disconnected`, no reconnect, handlers cleared
//!
//! Each connection cycle runs on one spawned task. A generation counter is
//! bumped by every `connect()`/`disconnect()`. Every state write a task makes
//! re-checks its generation under the state channel's lock, so a superseded
//! task never touches state after it has been replaced.
//!
//! ERROR HANDLING
//! ==============
//! Malformed inbound messages are logged and dropped. A panicking handler is
//! caught and logged; the remaining handlers still run. Sends while not
//! connected are rejected, never queued.

#[cfg(test)]
#[path = "event_client_test.rs"]
mod event_client_test;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use super::envelope::{self, CONNECTED, DISCONNECTED, ERROR, RECONNECT_FAILED};
use crate::config::EventClientConfig;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Callback invoked with an event's payload.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Error type for event client operations.
#[derive(Debug, thiserror::Error)]
pub enum EventClientError {
    /// The WebSocket connection or handshake failed.
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    /// No open connection to send on.
    #[error("websocket is not connected")]
    NotConnected,
    /// A newer `connect()` or a `disconnect()` replaced this attempt.
    #[error("connection attempt superseded")]
    Superseded,
}

/// Handle for one handler registration, used to unsubscribe it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    event: String,
    id: u64,
}

impl Subscription {
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }
}

/// Delay before reconnect attempt `attempt` (1-indexed).
#[must_use]
pub fn reconnect_delay(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(attempt)
}

// =============================================================================
// LISTENERS
// =============================================================================

/// Per-instance registry: event name → registrations in insertion order.
#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_event: HashMap<String, Vec<(u64, Handler)>>,
}

impl Listeners {
    fn add(&mut self, event: &str, handler: Handler) -> Subscription {
        self.next_id += 1;
        let id = self.next_id;
        self.by_event
            .entry(event.to_owned())
            .or_default()
            .push((id, handler));
        Subscription {
            event: event.to_owned(),
            id,
        }
    }

    fn remove(&mut self, subscription: &Subscription) -> bool {
        let Some(list) = self.by_event.get_mut(&subscription.event) else {
            return false;
        };
        let Some(index) = list.iter().position(|(id, _)| *id == subscription.id) else {
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            self.by_event.remove(&subscription.event);
        }
        true
    }

    fn handlers(&self, event: &str) -> Vec<Handler> {
        self.by_event
            .get(event)
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default()
    }

    fn count(&self, event: &str) -> usize {
        self.by_event.get(event).map_or(0, Vec::len)
    }

    fn clear(&mut self) {
        self.by_event.clear();
    }
}

// =============================================================================
// SHARED STATE
// =============================================================================

struct Shared {
    config: EventClientConfig,
    room_id: String,
    user_id: String,
    listeners: Mutex<Listeners>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    intentional_close: AtomicBool,
    attempts: AtomicU32,
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Message>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "ws: state change");
        }
    }

    /// Apply `next` only if `generation` is still live. The check runs under
    /// the state channel's lock, so it cannot interleave with the state write
    /// that `disconnect()` makes after retiring the generation. Leaving
    /// `Connected` drops the outbound sender in the same critical section.
    fn set_state_if(&self, generation: u64, next: ConnectionState) -> bool {
        let mut previous = None;
        // Lock order: state channel, then outbound.
        let applied = self.state.send_if_modified(|state| {
            if !self.is_current(generation) {
                return false;
            }
            if next != ConnectionState::Connected {
                self.outbound().take();
            }
            previous = Some(std::mem::replace(state, next));
            true
        });
        if let Some(previous) = previous.filter(|previous| *previous != next) {
            debug!(from = ?previous, to = ?next, "ws: state change");
        }
        applied
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
            && !self.intentional_close.load(Ordering::SeqCst)
    }

    fn target_url(&self) -> String {
        let separator = if self.config.ws_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}roomId={}&userId={}",
            self.config.ws_url,
            urlencoding::encode(&self.room_id),
            urlencoding::encode(&self.user_id),
        )
    }

    /// Deliver `data` to every handler for `event`, isolating panics.
    fn emit(&self, event: &str, data: &Value) {
        // Snapshot so handlers may subscribe/unsubscribe while running.
        let handlers = self.listeners().handlers(event);
        for (index, handler) in handlers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
                error!(event, index, "ws: event handler panicked");
            }
        }
    }

    fn dispatch_text(&self, text: &str) {
        match envelope::decode_event(text) {
            Ok(env) => {
                debug!(event = %env.event, "ws: recv event");
                self.emit(&env.event, &env.data);
            }
            Err(e) => warn!(error = %e, "ws: dropping malformed message"),
        }
    }

    fn dispatch_bytes(&self, bytes: &[u8]) {
        match envelope::decode_event_bytes(bytes) {
            Ok(env) => {
                debug!(event = %env.event, "ws: recv event (binary)");
                self.emit(&env.event, &env.data);
            }
            Err(e) => warn!(error = %e, "ws: dropping malformed binary message"),
        }
    }

    /// Install a fresh outbound channel for a newly opened connection.
    fn attach(&self, generation: u64) -> Option<mpsc::UnboundedReceiver<Message>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tx = Some(tx);
        let attached = self.state.send_if_modified(|state| {
            if !self.is_current(generation) {
                return false;
            }
            *self.outbound() = tx.take();
            *state = ConnectionState::Connected;
            true
        });
        if !attached {
            return None;
        }
        self.attempts.store(0, Ordering::SeqCst);
        info!(room_id = %self.room_id, user_id = %self.user_id, "ws: connected");
        self.emit(
            CONNECTED,
            &json!({ "roomId": self.room_id, "userId": self.user_id }),
        );
        Some(rx)
    }

    /// Invalidate the running connection cycle, closing its socket.
    fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.outbound().take() {
            let _ = tx.send(Message::Close(None));
        }
        if let Some(task) = self.task().take() {
            // A connected pump drains the close frame and exits by itself;
            // otherwise the task is sleeping or dialing and can be dropped.
            if self.state() != ConnectionState::Connected {
                task.abort();
            }
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Reconnecting event client for one (room, user) pair.
pub struct EventClient {
    shared: Arc<Shared>,
}

impl EventClient {
    #[must_use]
    pub fn new(
        config: EventClientConfig,
        room_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                room_id: room_id.into(),
                user_id: user_id.into(),
                listeners: Mutex::new(Listeners::default()),
                state,
                outbound: Mutex::new(None),
                intentional_close: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.shared.room_id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnect attempts made since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Register `handler` for `event`. Registering the same callback twice
    /// creates two independent registrations.
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.listeners().add(event, Arc::new(handler))
    }

    /// Remove exactly one registration. Returns `false` if it was already gone.
    pub fn off(&self, subscription: &Subscription) -> bool {
        self.shared.listeners().remove(subscription)
    }

    /// Number of live registrations for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.shared.listeners().count(event)
    }

    /// Open the connection, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns [`EventClientError::Connect`] if the handshake fails (the client
    /// stays `Disconnected` and does not retry), or
    /// [`EventClientError::Superseded`] if a concurrent `connect()` or
    /// `disconnect()` replaced this attempt.
    pub async fn connect(&self) -> Result<(), EventClientError> {
        let shared = &self.shared;
        shared.teardown();
        shared.intentional_close.store(false, Ordering::SeqCst);
        shared.attempts.store(0, Ordering::SeqCst);
        let generation = shared.generation.load(Ordering::SeqCst);
        shared.set_state(ConnectionState::Connecting);

        let url = shared.target_url();
        info!(%url, "ws: connecting");
        let stream = match open(&url).await {
            Ok(stream) => stream,
            Err(e) => {
                if shared.set_state_if(generation, ConnectionState::Disconnected) {
                    warn!(error = %e, "ws: connect failed");
                    shared.emit(ERROR, &json!({ "message": e.to_string() }));
                }
                return Err(e);
            }
        };

        let Some(outbound) = shared.attach(generation) else {
            return Err(EventClientError::Superseded);
        };
        let handle = tokio::spawn(supervise(Arc::clone(shared), generation, stream, outbound));
        *shared.task() = Some(handle);
        Ok(())
    }

    /// Send `{action, data}` on the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`EventClientError::NotConnected`] when no connection is open;
    /// the message is dropped, not queued.
    pub fn send(&self, action: &str, data: &Value) -> Result<(), EventClientError> {
        let connected = self.is_connected();
        let outbound = self.shared.outbound();
        let sender = outbound.as_ref().filter(|_| connected);
        let Some(sender) = sender else {
            warn!(action, "ws: send rejected, not connected");
            return Err(EventClientError::NotConnected);
        };
        let text = envelope::encode_action(action, data);
        sender.send(Message::text(text)).map_err(|_| {
            warn!(action, "ws: send rejected, connection closing");
            EventClientError::NotConnected
        })
    }

    /// Close the connection on purpose: no reconnect, all handlers cleared.
    pub fn disconnect(&self) {
        let shared = &self.shared;
        shared.intentional_close.store(true, Ordering::SeqCst);
        shared.teardown();
        shared.listeners().clear();
        shared.set_state(ConnectionState::Disconnected);
        info!(room_id = %shared.room_id, user_id = %shared.user_id, "ws: disconnected by client");
    }
}

impl Drop for EventClient {
    fn drop(&mut self) {
        self.shared.intentional_close.store(true, Ordering::SeqCst);
        self.shared.teardown();
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

async fn open(url: &str) -> Result<WsStream, EventClientError> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| EventClientError::Connect(Box::new(e)))?;
    Ok(stream)
}

/// Run connections for one generation until closed on purpose or given up.
async fn supervise(
    shared: Arc<Shared>,
    generation: u64,
    stream: WsStream,
    outbound: mpsc::UnboundedReceiver<Message>,
) {
    let mut link = Some((stream, outbound));
    while let Some((stream, outbound)) = link.take() {
        let reason = pump(&shared, stream, outbound).await;
        if !shared.set_state_if(generation, ConnectionState::Reconnecting) {
            debug!(reason, "ws: connection ended after intentional close");
            return;
        }
        warn!(reason, "ws: connection lost");
        shared.emit(DISCONNECTED, &Value::Null);
        link = reconnect(&shared, generation).await;
    }
}

async fn reconnect(
    shared: &Shared,
    generation: u64,
) -> Option<(WsStream, mpsc::UnboundedReceiver<Message>)> {
    let max_attempts = shared.config.max_reconnect_attempts;
    loop {
        let attempt = shared.attempts.load(Ordering::SeqCst) + 1;
        if attempt > max_attempts {
            if !shared.set_state_if(generation, ConnectionState::Disconnected) {
                return None;
            }
            error!(max_attempts, "ws: reconnect attempts exhausted");
            shared.emit(RECONNECT_FAILED, &Value::Null);
            return None;
        }
        if !shared.set_state_if(generation, ConnectionState::Reconnecting) {
            return None;
        }
        shared.attempts.store(attempt, Ordering::SeqCst);

        let delay = reconnect_delay(shared.config.reconnect_delay, attempt);
        info!(attempt, max_attempts, delay_ms = delay.as_millis(), "ws: reconnecting");
        tokio::time::sleep(delay).await;
        if !shared.set_state_if(generation, ConnectionState::Connecting) {
            return None;
        }
        match open(&shared.target_url()).await {
            Ok(stream) => {
                let outbound = shared.attach(generation)?;
                return Some((stream, outbound));
            }
            Err(e) => {
                if !shared.is_current(generation) {
                    return None;
                }
                warn!(attempt, error = %e, "ws: reconnect attempt failed");
                shared.emit(ERROR, &json!({ "message": e.to_string() }));
            }
        }
    }
}

/// Relay outbound messages and dispatch inbound ones until the socket ends.
async fn pump(
    shared: &Shared,
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) -> &'static str {
    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(Message::Close(frame)) => {
                    let _ = write.send(Message::Close(frame)).await;
                    return "closed by client";
                }
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        warn!(error = %e, "ws: send failed");
                        return "send failed";
                    }
                }
                None => {
                    let _ = write.close().await;
                    return "outbound channel closed";
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.dispatch_text(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => shared.dispatch_bytes(&bytes),
                Some(Ok(Message::Close(_))) | None => return "closed by server",
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "ws: read failed");
                    return "read failed";
                }
            },
        }
    }
}
