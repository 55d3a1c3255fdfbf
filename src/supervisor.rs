//! Connection supervision: one explicit owner for the connection client and
//! its reconnect policy.
//!
//! Constructed once at application start and passed by reference to whatever
//! needs it — there is no ambient global. The supervisor never connects on
//! creation: an unauthenticated startup must not produce a guaranteed-failed
//! attempt against an endpoint that requires a session.

use crate::{
    connection::{ConnectionClient, ConnectionState, SubscriptionHandle},
    error::Result,
    event_handlers::EventHandlers,
    reconnect::ReconnectPolicy,
    timeouts::BazaarLinkTimeouts,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

/// Owns the [`ConnectionClient`] and the shared [`ReconnectPolicy`] and
/// exposes the imperative controls the session controller drives.
pub struct ConnectionSupervisor {
    client: ConnectionClient,
    policy: Arc<ReconnectPolicy>,
    last_error: Arc<RwLock<Option<String>>>,
}

impl ConnectionSupervisor {
    /// Build the supervisor. The connection stays idle until
    /// [`force_connect`](Self::force_connect) is invoked.
    ///
    /// User-supplied event handlers are chained after the supervisor's own
    /// error bookkeeping.
    pub fn new(
        notify_url: String,
        timeouts: BazaarLinkTimeouts,
        policy: Arc<ReconnectPolicy>,
        user_handlers: EventHandlers,
    ) -> Self {
        let last_error: Arc<RwLock<Option<String>>> = Arc::new(RwLock::new(None));

        // Record the most recent fault/closure for the passive indicator,
        // then forward to the user's handlers.
        let handlers = {
            let err_on_protocol = last_error.clone();
            let err_on_transport = last_error.clone();
            let err_on_connect = last_error.clone();
            let user = user_handlers;
            EventHandlers::new()
                .on_connect({
                    let user = user.clone();
                    move || {
                        if let Ok(mut slot) = err_on_connect.write() {
                            *slot = None;
                        }
                        user.emit_connect();
                    }
                })
                .on_disconnect({
                    let user = user.clone();
                    move |reason| {
                        user.emit_disconnect(reason);
                    }
                })
                .on_protocol_error({
                    let user = user.clone();
                    move |fault| {
                        if let Ok(mut slot) = err_on_protocol.write() {
                            *slot = Some(fault.message.clone());
                        }
                        user.emit_protocol_error(fault);
                    }
                })
                .on_transport_error({
                    let user = user.clone();
                    move |fault| {
                        if let Ok(mut slot) = err_on_transport.write() {
                            *slot = Some(fault.message.clone());
                        }
                        user.emit_transport_error(fault);
                    }
                })
        };

        let client = ConnectionClient::new(notify_url, timeouts, policy.clone(), handlers);

        Self {
            client,
            policy,
            last_error,
        }
    }

    /// Re-enable reconnection, then connect.
    ///
    /// This is the hook the session controller calls after every successful
    /// authentication outcome; the enable always completes before the
    /// connect is issued (same call stack, sequential).
    pub async fn force_connect(&self) -> Result<()> {
        self.policy.enable();
        self.client.connect().await
    }

    /// Re-arm the reconnect policy without connecting.
    pub fn enable_reconnect(&self) {
        self.policy.enable();
    }

    /// Latch the reconnect policy off.
    pub fn disable_reconnect(&self) {
        self.policy.disable();
    }

    /// Intentionally close the connection (never triggers a retry).
    pub async fn disconnect(&self) {
        self.client.disconnect().await;
    }

    /// Whether the connection is currently up and acknowledged.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// The most recent connection error message, for the passive
    /// connected/disconnected indicator. Cleared on successful connect.
    pub fn connection_error(&self) -> Option<String> {
        self.last_error.read().ok().and_then(|slot| slot.clone())
    }

    /// Watch receiver for connection-state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.client.state()
    }

    /// Subscribe to a destination on the shared connection.
    ///
    /// Returns `Ok(None)` while disconnected.
    pub async fn subscribe(&self, destination: &str) -> Result<Option<SubscriptionHandle>> {
        self.client.subscribe(destination).await
    }

    /// Publish a payload on the shared connection.
    pub async fn publish(
        &self,
        destination: &str,
        payload: JsonValue,
        headers: Option<HashMap<String, String>>,
    ) -> Result<()> {
        self.client.publish(destination, payload, headers).await
    }

    /// The shared reconnect policy (read access for state inspection).
    pub fn policy(&self) -> &Arc<ReconnectPolicy> {
        &self.policy
    }
}
