//! Connection lifecycle event handlers.
//!
//! Callback-based hooks for monitoring the notification connection:
//!
//! - [`on_connect`](EventHandlers::on_connect): protocol-level `Connected` ack received
//! - [`on_disconnect`](EventHandlers::on_disconnect): transport closed (intentionally or not)
//! - [`on_protocol_error`](EventHandlers::on_protocol_error): server sent an error frame
//! - [`on_transport_error`](EventHandlers::on_transport_error): socket-level failure
//!
//! All handlers are optional and `Send + Sync` so they can be invoked from
//! the background connection task. The UI typically registers a small set of
//! these to drive a passive connected/disconnected indicator.

use std::fmt;
use std::sync::Arc;

/// Reason for a disconnect event.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available.
    pub code: Option<u16>,
    /// Whether the closure was requested via `disconnect()`.
    pub requested: bool,
}

impl DisconnectReason {
    /// An unrequested closure (transport dropped, server closed, timeout).
    pub fn unrequested(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            requested: false,
        }
    }

    /// An intentional closure initiated by the client.
    pub fn requested(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            requested: true,
        }
    }

    /// Attach the WebSocket close code.
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the error handlers.
#[derive(Debug, Clone)]
pub struct ConnectionFault {
    /// Human-readable error message.
    pub message: String,
    /// Whether this fault is recoverable (the reconnect loop may succeed).
    /// Authentication failures are never recoverable locally.
    pub recoverable: bool,
}

impl ConnectionFault {
    /// Create a new connection fault.
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Type alias for the on_connect callback.
pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Type alias for the on_disconnect callback.
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Type alias for the protocol/transport error callbacks.
pub type OnFaultCallback = Arc<dyn Fn(ConnectionFault) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional; register only the ones you need.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_protocol_error: Option<OnFaultCallback>,
    pub(crate) on_transport_error: Option<OnFaultCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_protocol_error", &self.on_protocol_error.is_some())
            .field("on_transport_error", &self.on_transport_error.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the protocol-level `Connected`
    /// acknowledgment is received.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the transport closes.
    ///
    /// The [`DisconnectReason`] says whether the closure was requested via
    /// `disconnect()` or unexpected.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the server sends an error frame.
    pub fn on_protocol_error(
        mut self,
        f: impl Fn(ConnectionFault) + Send + Sync + 'static,
    ) -> Self {
        self.on_protocol_error = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked on socket-level failures.
    pub fn on_transport_error(
        mut self,
        f: impl Fn(ConnectionFault) + Send + Sync + 'static,
    ) -> Self {
        self.on_transport_error = Some(Arc::new(f));
        self
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_protocol_error(&self, fault: ConnectionFault) {
        if let Some(cb) = &self.on_protocol_error {
            cb(fault);
        }
    }

    pub(crate) fn emit_transport_error(&self, fault: ConnectionFault) {
        if let Some(cb) = &self.on_transport_error {
            cb(fault);
        }
    }
}
