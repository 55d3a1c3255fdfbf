use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Client-to-server frames on the notification connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Protocol-level handshake.
    ///
    /// Sent immediately after the socket opens. The session cookie on the
    /// upgrade request carries the credentials; the server answers with
    /// `Connected` or an `Error` frame and the connection is not usable
    /// until the acknowledgment arrives.
    Connect {},

    /// Subscribe to a destination.
    Subscribe {
        /// Client-generated subscription ID used to route inbound messages.
        id: String,
        /// The destination path, e.g. `/user/{id}/queue/payments`.
        destination: String,
    },

    /// Remove a subscription.
    Unsubscribe {
        /// The subscription ID to remove.
        id: String,
    },

    /// Publish a payload to a destination.
    Publish {
        /// The destination path.
        destination: String,
        /// Arbitrary JSON payload.
        payload: JsonValue,
        /// Optional application headers.
        #[serde(skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
    },
}

/// Server-to-client frames on the notification connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake acknowledgment. `connect()` resolves only on this frame.
    Connected {},

    /// Protocol-level error.
    ///
    /// The message text is classified to tell an authentication rejection
    /// apart from a generic protocol failure.
    Error {
        /// Error message.
        message: String,
    },

    /// Server-pushed event for a subscription.
    Message {
        /// The subscription ID this event is routed to.
        subscription_id: String,
        /// The destination the event was published on.
        destination: String,
        /// The event body, e.g. `{"type": "PAY_URL", "url": "..."}`.
        event: JsonValue,
    },
}
