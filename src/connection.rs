//! The notification connection client.
//!
//! Owns one logical WebSocket connection to the notification endpoint,
//! multiplexed across any number of destination subscriptions. Handles:
//!
//! - Protocol-level connect handshake (`Connect` → `Connected` ack; a raw
//!   socket-open is not sufficient)
//! - Classification of handshake rejections: authentication failures latch
//!   the reconnect policy and are never retried locally
//! - Message routing to subscriptions by subscription ID / destination
//! - Bounded auto-reconnection gated by [`ReconnectPolicy`], with
//!   re-subscription of active destinations after a reconnect
//! - Keepalive pings with a pong deadline
//! - Connection-state pushes through a `watch` channel
//!
//! The public [`ConnectionClient`] handle sends commands to a background
//! task that owns the socket; nothing here connects until `connect()` is
//! requested.

use crate::{
    classify::is_auth_failure_message,
    error::{BazaarLinkError, Result},
    event_handlers::{ConnectionFault, DisconnectReason, EventHandlers},
    models::{ClientFrame, ServerFrame},
    reconnect::ReconnectPolicy,
    timeouts::BazaarLinkTimeouts,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of each subscription's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the command channel into the background task.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Sleep horizon used to park inactive timers.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Lifecycle state of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; nothing in flight.
    Disconnected,
    /// A connect attempt (initial or retry) is in progress.
    Connecting,
    /// Handshake acknowledged; subscriptions are live.
    Connected,
    /// The client was shut down; terminal.
    Closed,
}

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
enum ConnCmd {
    /// Establish the connection (runs the protocol handshake).
    Connect {
        result_tx: oneshot::Sender<Result<()>>,
    },
    /// Intentional shutdown of the transport. Clears the reconnect intent
    /// before closing so the closure is not retried.
    Disconnect { result_tx: oneshot::Sender<()> },
    /// Register a subscription. Answers `None` when not connected.
    Subscribe {
        destination: String,
        event_tx: mpsc::Sender<JsonValue>,
        result_tx: oneshot::Sender<Result<Option<String>>>,
    },
    /// Remove a subscription (fire-and-forget; used by handle cancel/Drop).
    Unsubscribe { id: String },
    /// Publish a payload to a destination.
    Publish {
        destination: String,
        payload: JsonValue,
        headers: Option<HashMap<String, String>>,
        result_tx: oneshot::Sender<Result<()>>,
    },
    /// Tear the task down; terminal.
    Shutdown,
}

/// Per-subscription state held by the connection task.
struct SubEntry {
    destination: String,
    event_tx: mpsc::Sender<JsonValue>,
}

// ── SubscriptionHandle ──────────────────────────────────────────────────────

/// Consumer handle for one destination subscription.
///
/// Events arrive through [`next`](SubscriptionHandle::next).
/// [`cancel`](SubscriptionHandle::cancel) is guarded against double
/// invocation and also runs on `Drop`, so a handle torn down mid-flow still
/// unsubscribes exactly once.
pub struct SubscriptionHandle {
    id: String,
    event_rx: mpsc::Receiver<JsonValue>,
    cmd_tx: mpsc::Sender<ConnCmd>,
    cancelled: bool,
}

impl SubscriptionHandle {
    /// The client-generated subscription ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receive the next event for this subscription.
    ///
    /// Returns `None` after `cancel()` or when the connection task is gone.
    pub async fn next(&mut self) -> Option<JsonValue> {
        if self.cancelled {
            return None;
        }
        self.event_rx.recv().await
    }

    /// Cancel the subscription. Safe to call more than once; only the first
    /// call sends the unsubscribe.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        let _ = self.cmd_tx.try_send(ConnCmd::Unsubscribe {
            id: self.id.clone(),
        });
    }

    /// Whether `cancel()` has run.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ── ConnectionClient (public handle) ────────────────────────────────────────

/// Handle to the single logical notification connection.
///
/// Constructed via [`ConnectionClient::new`]; does **not** connect on
/// creation — an unauthenticated startup must not produce a doomed connect
/// attempt against an endpoint that requires a session.
pub struct ConnectionClient {
    cmd_tx: mpsc::Sender<ConnCmd>,
    connected: Arc<AtomicBool>,
    state_rx: watch::Receiver<ConnectionState>,
    _task: JoinHandle<()>,
}

impl ConnectionClient {
    /// Spawn the background connection task in its idle state.
    pub fn new(
        notify_url: String,
        timeouts: BazaarLinkTimeouts,
        policy: Arc<ReconnectPolicy>,
        event_handlers: EventHandlers,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let connected = Arc::new(AtomicBool::new(false));

        let connected_clone = connected.clone();
        let task = tokio::spawn(async move {
            connection_task(
                cmd_rx,
                notify_url,
                timeouts,
                policy,
                event_handlers,
                connected_clone,
                state_tx,
            )
            .await;
        });

        Self {
            cmd_tx,
            connected,
            state_rx,
            _task: task,
        }
    }

    /// Establish the connection.
    ///
    /// Resolves only once the protocol-level `Connected` acknowledgment has
    /// been received. A handshake rejected for authentication reasons
    /// returns [`BazaarLinkError::AuthenticationError`] and latches the
    /// reconnect policy; it is never retried here. Any other failure is
    /// returned to the caller and additionally schedules policy-gated
    /// retries in the background.
    pub async fn connect(&self) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCmd::Connect { result_tx })
            .await
            .map_err(|_| task_gone())?;
        result_rx.await.map_err(|_| task_gone())?
    }

    /// Intentionally close the connection.
    ///
    /// The reconnect intent is cleared before the socket closes, so this
    /// never triggers the reconnect hook.
    pub async fn disconnect(&self) {
        let (result_tx, result_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnCmd::Disconnect { result_tx })
            .await
            .is_ok()
        {
            let _ = result_rx.await;
        }
    }

    /// Subscribe to a destination.
    ///
    /// Returns `Ok(None)` when not currently connected — callers must check.
    /// Subscriptions are additive; any number of handles can coexist on the
    /// same connection.
    pub async fn subscribe(&self, destination: &str) -> Result<Option<SubscriptionHandle>> {
        if !self.is_connected() {
            return Ok(None);
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCmd::Subscribe {
                destination: destination.to_string(),
                event_tx,
                result_tx,
            })
            .await
            .map_err(|_| task_gone())?;

        let id = match result_rx.await.map_err(|_| task_gone())?? {
            Some(id) => id,
            None => return Ok(None),
        };

        Ok(Some(SubscriptionHandle {
            id,
            event_rx,
            cmd_tx: self.cmd_tx.clone(),
            cancelled: false,
        }))
    }

    /// Publish a payload to a destination.
    pub async fn publish(
        &self,
        destination: &str,
        payload: JsonValue,
        headers: Option<HashMap<String, String>>,
    ) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCmd::Publish {
                destination: destination.to_string(),
                payload,
                headers,
                result_tx,
            })
            .await
            .map_err(|_| task_gone())?;
        result_rx.await.map_err(|_| task_gone())?
    }

    /// Whether the connection is open and handshake-acknowledged.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Watch receiver for connection-state changes.
    ///
    /// State is pushed on every transition; consumers subscribe instead of
    /// polling a flag.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        // Best-effort shutdown signal.
        let _ = self.cmd_tx.try_send(ConnCmd::Shutdown);
    }
}

fn task_gone() -> BazaarLinkError {
    BazaarLinkError::InternalError("connection task is not running".to_string())
}

// ── Handshake ───────────────────────────────────────────────────────────────

/// Open the socket and run the protocol handshake.
///
/// Resolves on the `Connected` frame. An `Error` frame during the handshake
/// is classified: auth-failure text becomes `AuthenticationError`, anything
/// else `ProtocolError`.
async fn establish(
    notify_url: &str,
    timeouts: &BazaarLinkTimeouts,
    event_handlers: &EventHandlers,
) -> Result<WsStream> {
    log::debug!("[bazaar-link] connecting to {}", notify_url);

    let connect_result =
        tokio::time::timeout(timeouts.connection_timeout, connect_async(notify_url)).await;

    let mut ws = match connect_result {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let msg = format!("connection failed: {}", e);
            event_handlers.emit_transport_error(ConnectionFault::new(&msg, true));
            return Err(BazaarLinkError::TransportError(msg));
        }
        Err(_) => {
            let msg = format!("connection timeout ({:?})", timeouts.connection_timeout);
            event_handlers.emit_transport_error(ConnectionFault::new(&msg, true));
            return Err(BazaarLinkError::TimeoutError(msg));
        }
    };

    let connect_frame = serde_json::to_string(&ClientFrame::Connect {})
        .map_err(|e| BazaarLinkError::InternalError(format!("serialize connect: {}", e)))?;
    ws.send(Message::Text(connect_frame.into()))
        .await
        .map_err(|e| BazaarLinkError::TransportError(format!("send connect: {}", e)))?;

    // Wait for the Connected ack; a socket-open alone is not a connection.
    let ack = tokio::time::timeout(timeouts.handshake_timeout, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(ServerFrame::Connected {}) => return Ok(()),
                        Ok(ServerFrame::Error { message }) => {
                            return Err(classify_protocol_error(message, event_handlers));
                        }
                        Ok(other) => {
                            log::debug!(
                                "[bazaar-link] ignoring frame during handshake: {:?}",
                                other
                            );
                        }
                        Err(e) => {
                            log::warn!("[bazaar-link] unparseable handshake frame: {}", e);
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(BazaarLinkError::TransportError(format!(
                        "handshake transport error: {}",
                        e
                    )));
                }
                None => {
                    return Err(BazaarLinkError::TransportError(
                        "connection closed during handshake".to_string(),
                    ));
                }
            }
        }
    })
    .await;

    match ack {
        Ok(Ok(())) => {
            log::info!("[bazaar-link] connected and acknowledged");
            Ok(ws)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            let msg = format!("handshake timeout ({:?})", timeouts.handshake_timeout);
            event_handlers.emit_transport_error(ConnectionFault::new(&msg, true));
            Err(BazaarLinkError::TimeoutError(msg))
        }
    }
}

/// Classify a server error frame received during the handshake.
fn classify_protocol_error(message: String, event_handlers: &EventHandlers) -> BazaarLinkError {
    if is_auth_failure_message(&message) {
        event_handlers.emit_protocol_error(ConnectionFault::new(&message, false));
        BazaarLinkError::AuthenticationError(message)
    } else {
        event_handlers.emit_protocol_error(ConnectionFault::new(&message, true));
        BazaarLinkError::ProtocolError(message)
    }
}

/// Send a `Subscribe` frame.
async fn send_subscribe(ws: &mut WsStream, id: &str, destination: &str) -> Result<()> {
    let frame = ClientFrame::Subscribe {
        id: id.to_string(),
        destination: destination.to_string(),
    };
    let payload = serde_json::to_string(&frame)
        .map_err(|e| BazaarLinkError::InternalError(format!("serialize subscribe: {}", e)))?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| BazaarLinkError::TransportError(format!("send subscribe: {}", e)))
}

/// Send an `Unsubscribe` frame.
async fn send_unsubscribe(ws: &mut WsStream, id: &str) -> Result<()> {
    let frame = ClientFrame::Unsubscribe { id: id.to_string() };
    let payload = serde_json::to_string(&frame)
        .map_err(|e| BazaarLinkError::InternalError(format!("serialize unsubscribe: {}", e)))?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| BazaarLinkError::TransportError(format!("send unsubscribe: {}", e)))
}

/// Route a server `Message` frame to its subscription channel.
///
/// Exact subscription-ID match first; otherwise every entry registered on
/// the frame's destination receives the event (destinations are additive).
async fn route_event(
    subscription_id: &str,
    destination: &str,
    event: JsonValue,
    subs: &HashMap<String, SubEntry>,
) {
    if let Some(entry) = subs.get(subscription_id) {
        if entry.event_tx.send(event).await.is_err() {
            log::debug!(
                "[bazaar-link] subscription {} receiver dropped",
                subscription_id
            );
        }
        return;
    }

    let mut delivered = false;
    for (id, entry) in subs.iter() {
        if entry.destination == destination {
            delivered = true;
            if entry.event_tx.send(event.clone()).await.is_err() {
                log::debug!("[bazaar-link] subscription {} receiver dropped", id);
            }
        }
    }
    if !delivered {
        log::debug!(
            "[bazaar-link] no subscription for id={} destination={}",
            subscription_id,
            destination
        );
    }
}

/// Re-subscribe all active destinations after a successful reconnect.
///
/// The transport has no replay; anything pushed while disconnected is gone,
/// but live destinations must keep receiving new events.
async fn resubscribe_all(ws: &mut WsStream, subs: &HashMap<String, SubEntry>) {
    if subs.is_empty() {
        return;
    }
    log::info!(
        "[bazaar-link] re-subscribing {} destination(s) after reconnect",
        subs.len()
    );
    for (id, entry) in subs.iter() {
        if let Err(e) = send_subscribe(ws, id, &entry.destination).await {
            log::warn!("[bazaar-link] failed to re-subscribe {}: {}", id, e);
        }
    }
}

// ── Background connection task ──────────────────────────────────────────────

/// The task owning the socket.
///
/// Starts idle. `Connect` commands run the handshake; unrequested closures
/// and non-auth connect failures enter the retry loop gated by the shared
/// [`ReconnectPolicy`]; `Disconnect` clears the reconnect intent before
/// closing so intentional shutdowns are never retried.
#[allow(clippy::too_many_arguments)]
async fn connection_task(
    mut cmd_rx: mpsc::Receiver<ConnCmd>,
    notify_url: String,
    timeouts: BazaarLinkTimeouts,
    policy: Arc<ReconnectPolicy>,
    event_handlers: EventHandlers,
    connected: Arc<AtomicBool>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut subs: HashMap<String, SubEntry> = HashMap::new();
    let mut ws_stream: Option<WsStream> = None;
    let mut shutdown_requested = false;
    // Reconnect intent: true while the connection is wanted. Cleared by an
    // explicit Disconnect before the socket closes.
    let mut should_reconnect = false;
    // Set when an unrequested closure occurred and retries should run.
    let mut pending_reconnect = false;
    let mut next_sub_seq: u64 = 1;

    // Keepalive configuration.
    let has_keepalive = !timeouts.keepalive_interval.is_zero();
    let keepalive_dur = if has_keepalive {
        timeouts.keepalive_interval
    } else {
        FAR_FUTURE
    };
    let has_pong_timeout = has_keepalive && !timeouts.pong_timeout.is_zero();
    let mut awaiting_pong = false;
    let mut idle_deadline = TokioInstant::now() + keepalive_dur;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;

    loop {
        if shutdown_requested {
            if let Some(mut ws) = ws_stream.take() {
                for id in subs.keys() {
                    let _ = send_unsubscribe(&mut ws, id).await;
                }
                let _ = ws.close(None).await;
            }
            let was_connected = connected.swap(false, Ordering::SeqCst);
            if was_connected {
                event_handlers.emit_disconnect(DisconnectReason::requested("client shut down"));
            }
            let _ = state_tx.send(ConnectionState::Closed);
            return;
        }

        match ws_stream.take() {
            // ── Connected: multiplex socket frames, commands, keepalive ────
            Some(mut ws) => {
                let idle_sleep = tokio::time::sleep_until(idle_deadline);
                tokio::pin!(idle_sleep);
                let pong_sleep = tokio::time::sleep_until(pong_deadline);
                tokio::pin!(pong_sleep);

                tokio::select! {
                    biased;

                    // Pong deadline passed: the peer is silent, treat as dead.
                    _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                        log::warn!(
                            "[bazaar-link] pong timeout ({:?}), treating connection as dead",
                            timeouts.pong_timeout
                        );
                        awaiting_pong = false;
                        connected.store(false, Ordering::SeqCst);
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        event_handlers.emit_disconnect(DisconnectReason::unrequested(
                            "keepalive pong timeout",
                        ));
                        pending_reconnect = should_reconnect;
                        // ws dropped here
                    }

                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(ConnCmd::Connect { result_tx }) => {
                                // Already connected.
                                let _ = result_tx.send(Ok(()));
                                ws_stream = Some(ws);
                            }
                            Some(ConnCmd::Disconnect { result_tx }) => {
                                // Clear the intent first: the closure below is
                                // intentional and must not schedule a retry.
                                should_reconnect = false;
                                pending_reconnect = false;
                                for id in subs.keys() {
                                    let _ = send_unsubscribe(&mut ws, id).await;
                                }
                                let _ = ws.close(None).await;
                                connected.store(false, Ordering::SeqCst);
                                let _ = state_tx.send(ConnectionState::Disconnected);
                                event_handlers.emit_disconnect(
                                    DisconnectReason::requested("client disconnected"),
                                );
                                let _ = result_tx.send(());
                            }
                            Some(ConnCmd::Subscribe { destination, event_tx, result_tx }) => {
                                let id = format!("sub_{}", next_sub_seq);
                                next_sub_seq += 1;
                                match send_subscribe(&mut ws, &id, &destination).await {
                                    Ok(()) => {
                                        subs.insert(id.clone(), SubEntry { destination, event_tx });
                                        let _ = result_tx.send(Ok(Some(id)));
                                        ws_stream = Some(ws);
                                    }
                                    Err(e) => {
                                        // A failed write means the socket is gone.
                                        let _ = result_tx.send(Err(e));
                                        connected.store(false, Ordering::SeqCst);
                                        let _ = state_tx.send(ConnectionState::Disconnected);
                                        event_handlers.emit_disconnect(
                                            DisconnectReason::unrequested("write failed"),
                                        );
                                        pending_reconnect = should_reconnect;
                                    }
                                }
                            }
                            Some(ConnCmd::Unsubscribe { id }) => {
                                if subs.remove(&id).is_some() {
                                    let _ = send_unsubscribe(&mut ws, &id).await;
                                }
                                ws_stream = Some(ws);
                            }
                            Some(ConnCmd::Publish { destination, payload, headers, result_tx }) => {
                                let frame = ClientFrame::Publish { destination, payload, headers };
                                let result = match serde_json::to_string(&frame) {
                                    Ok(text) => ws
                                        .send(Message::Text(text.into()))
                                        .await
                                        .map_err(|e| BazaarLinkError::TransportError(
                                            format!("send publish: {}", e),
                                        )),
                                    Err(e) => Err(BazaarLinkError::InternalError(
                                        format!("serialize publish: {}", e),
                                    )),
                                };
                                match result {
                                    Ok(()) => {
                                        let _ = result_tx.send(Ok(()));
                                        ws_stream = Some(ws);
                                    }
                                    Err(e) => {
                                        let transport_failure =
                                            matches!(e, BazaarLinkError::TransportError(_));
                                        let _ = result_tx.send(Err(e));
                                        if transport_failure {
                                            connected.store(false, Ordering::SeqCst);
                                            let _ = state_tx.send(ConnectionState::Disconnected);
                                            event_handlers.emit_disconnect(
                                                DisconnectReason::unrequested("write failed"),
                                            );
                                            pending_reconnect = should_reconnect;
                                        } else {
                                            ws_stream = Some(ws);
                                        }
                                    }
                                }
                            }
                            Some(ConnCmd::Shutdown) | None => {
                                shutdown_requested = true;
                                ws_stream = Some(ws);
                            }
                        }
                    }

                    // Keepalive ping.
                    _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                        if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                            log::warn!("[bazaar-link] keepalive ping failed: {}", e);
                            connected.store(false, Ordering::SeqCst);
                            let _ = state_tx.send(ConnectionState::Disconnected);
                            event_handlers.emit_disconnect(DisconnectReason::unrequested(
                                format!("keepalive ping failed: {}", e),
                            ));
                            pending_reconnect = should_reconnect;
                        } else {
                            if has_pong_timeout {
                                awaiting_pong = true;
                                pong_deadline = TokioInstant::now() + timeouts.pong_timeout;
                            }
                            idle_deadline = TokioInstant::now() + keepalive_dur;
                            ws_stream = Some(ws);
                        }
                    }

                    frame = ws.next() => {
                        // Any frame proves the connection is alive.
                        idle_deadline = TokioInstant::now() + keepalive_dur;
                        if awaiting_pong {
                            awaiting_pong = false;
                            pong_deadline = TokioInstant::now() + FAR_FUTURE;
                        }

                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerFrame>(text.as_str()) {
                                    Ok(ServerFrame::Message { subscription_id, destination, event }) => {
                                        route_event(&subscription_id, &destination, event, &subs).await;
                                    }
                                    Ok(ServerFrame::Error { message }) => {
                                        // Post-handshake protocol error. Auth
                                        // classification latches the policy so a
                                        // following closure is not retried.
                                        if is_auth_failure_message(&message) {
                                            policy.mark_auth_failed();
                                            event_handlers.emit_protocol_error(
                                                ConnectionFault::new(&message, false),
                                            );
                                        } else {
                                            event_handlers.emit_protocol_error(
                                                ConnectionFault::new(&message, true),
                                            );
                                        }
                                    }
                                    Ok(ServerFrame::Connected {}) => {
                                        log::debug!("[bazaar-link] duplicate Connected frame");
                                    }
                                    Err(e) => {
                                        log::warn!("[bazaar-link] unparseable frame: {}", e);
                                    }
                                }
                                ws_stream = Some(ws);
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = ws.send(Message::Pong(payload)).await;
                                ws_stream = Some(ws);
                            }
                            Some(Ok(Message::Pong(_))) => {
                                ws_stream = Some(ws);
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let reason = match frame {
                                    Some(f) => DisconnectReason::unrequested(f.reason.to_string())
                                        .with_code(f.code.into()),
                                    None => DisconnectReason::unrequested("server closed connection"),
                                };
                                connected.store(false, Ordering::SeqCst);
                                let _ = state_tx.send(ConnectionState::Disconnected);
                                event_handlers.emit_disconnect(reason);
                                pending_reconnect = should_reconnect;
                            }
                            Some(Ok(_)) => {
                                ws_stream = Some(ws);
                            }
                            Some(Err(e)) => {
                                let msg = e.to_string();
                                event_handlers.emit_transport_error(
                                    ConnectionFault::new(&msg, true),
                                );
                                connected.store(false, Ordering::SeqCst);
                                let _ = state_tx.send(ConnectionState::Disconnected);
                                event_handlers.emit_disconnect(DisconnectReason::unrequested(
                                    format!("transport error: {}", msg),
                                ));
                                pending_reconnect = should_reconnect;
                            }
                            None => {
                                connected.store(false, Ordering::SeqCst);
                                let _ = state_tx.send(ConnectionState::Disconnected);
                                event_handlers.emit_disconnect(DisconnectReason::unrequested(
                                    "stream ended",
                                ));
                                pending_reconnect = should_reconnect;
                            }
                        }
                    }
                }
            }

            // ── Disconnected ───────────────────────────────────────────────
            None => {
                if pending_reconnect {
                    // Consume one attempt from the policy; the gate decides
                    // whether a retry happens at all.
                    let delay = match policy.next_delay() {
                        Some(delay) => delay,
                        None => {
                            pending_reconnect = false;
                            continue;
                        }
                    };

                    // Wait out the backoff, but stay responsive to commands.
                    let sleep_fut = tokio::time::sleep(delay);
                    tokio::pin!(sleep_fut);
                    let mut immediate_connect: Option<oneshot::Sender<Result<()>>> = None;
                    let mut abort_attempt = false;
                    loop {
                        tokio::select! {
                            biased;
                            cmd = cmd_rx.recv() => {
                                match cmd {
                                    Some(ConnCmd::Connect { result_tx }) => {
                                        // Explicit connect preempts the backoff.
                                        immediate_connect = Some(result_tx);
                                        break;
                                    }
                                    Some(ConnCmd::Disconnect { result_tx }) => {
                                        should_reconnect = false;
                                        pending_reconnect = false;
                                        abort_attempt = true;
                                        let _ = result_tx.send(());
                                        break;
                                    }
                                    Some(ConnCmd::Subscribe { result_tx, .. }) => {
                                        let _ = result_tx.send(Ok(None));
                                    }
                                    Some(ConnCmd::Unsubscribe { id }) => {
                                        subs.remove(&id);
                                    }
                                    Some(ConnCmd::Publish { result_tx, .. }) => {
                                        let _ = result_tx.send(Err(BazaarLinkError::TransportError(
                                            "not connected".to_string(),
                                        )));
                                    }
                                    Some(ConnCmd::Shutdown) | None => {
                                        shutdown_requested = true;
                                        abort_attempt = true;
                                        break;
                                    }
                                }
                            }
                            _ = &mut sleep_fut => break,
                        }
                    }
                    if abort_attempt {
                        continue;
                    }

                    let _ = state_tx.send(ConnectionState::Connecting);
                    match establish(&notify_url, &timeouts, &event_handlers).await {
                        Ok(mut ws) => {
                            policy.record_success();
                            should_reconnect = true;
                            pending_reconnect = false;
                            resubscribe_all(&mut ws, &subs).await;
                            connected.store(true, Ordering::SeqCst);
                            let _ = state_tx.send(ConnectionState::Connected);
                            event_handlers.emit_connect();
                            idle_deadline = TokioInstant::now() + keepalive_dur;
                            awaiting_pong = false;
                            pong_deadline = TokioInstant::now() + FAR_FUTURE;
                            ws_stream = Some(ws);
                            if let Some(result_tx) = immediate_connect {
                                let _ = result_tx.send(Ok(()));
                            }
                        }
                        Err(e) => {
                            log::warn!("[bazaar-link] reconnect attempt failed: {}", e);
                            let _ = state_tx.send(ConnectionState::Disconnected);
                            if e.is_authentication() {
                                // Terminal: suppress retries until re-armed.
                                policy.mark_auth_failed();
                                pending_reconnect = false;
                            }
                            if let Some(result_tx) = immediate_connect {
                                let _ = result_tx.send(Err(e));
                            }
                        }
                    }
                } else {
                    // Idle: no connection wanted. Wait for commands.
                    match cmd_rx.recv().await {
                        Some(ConnCmd::Connect { result_tx }) => {
                            let _ = state_tx.send(ConnectionState::Connecting);
                            match establish(&notify_url, &timeouts, &event_handlers).await {
                                Ok(mut ws) => {
                                    policy.record_success();
                                    should_reconnect = true;
                                    resubscribe_all(&mut ws, &subs).await;
                                    connected.store(true, Ordering::SeqCst);
                                    let _ = state_tx.send(ConnectionState::Connected);
                                    event_handlers.emit_connect();
                                    idle_deadline = TokioInstant::now() + keepalive_dur;
                                    awaiting_pong = false;
                                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                                    ws_stream = Some(ws);
                                    let _ = result_tx.send(Ok(()));
                                }
                                Err(e) => {
                                    let _ = state_tx.send(ConnectionState::Disconnected);
                                    if e.is_authentication() {
                                        policy.mark_auth_failed();
                                    } else {
                                        // A transient failure on an explicit
                                        // connect feeds the same bounded retry
                                        // loop as an unrequested closure.
                                        should_reconnect = true;
                                        pending_reconnect = true;
                                    }
                                    let _ = result_tx.send(Err(e));
                                }
                            }
                        }
                        Some(ConnCmd::Disconnect { result_tx }) => {
                            // Already disconnected; idempotent.
                            should_reconnect = false;
                            let _ = result_tx.send(());
                        }
                        Some(ConnCmd::Subscribe { result_tx, .. }) => {
                            let _ = result_tx.send(Ok(None));
                        }
                        Some(ConnCmd::Unsubscribe { id }) => {
                            subs.remove(&id);
                        }
                        Some(ConnCmd::Publish { result_tx, .. }) => {
                            let _ = result_tx.send(Err(BazaarLinkError::TransportError(
                                "not connected".to_string(),
                            )));
                        }
                        Some(ConnCmd::Shutdown) | None => {
                            shutdown_requested = true;
                        }
                    }
                }
            }
        }
    }
}
