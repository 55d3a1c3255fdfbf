use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// How a payment is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    /// Settled from the user's wallet balance; the process call's own
    /// response is the result.
    Wallet,
    /// Settled at an external provider; the result is a redirect URL
    /// delivered asynchronously over the notification connection.
    DirectRedirect,
}

impl PaymentMethod {
    /// Query-parameter value used by the process endpoint.
    pub fn as_query_value(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "WALLET",
            PaymentMethod::DirectRedirect => "DIRECT",
        }
    }
}

/// Server-side payment record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Created,
    Pending,
    Succeeded,
    Failed,
}

/// A payment record as returned by the payments REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment ID.
    pub id: String,
    /// The order this payment belongs to.
    pub order_id: String,
    /// Current status.
    pub status: PaymentState,
    /// Amount in minor units, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

/// Response of the process/trigger endpoint.
///
/// For wallet payments this carries the authoritative outcome; for redirect
/// payments it is advisory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    /// Status message.
    #[serde(default)]
    pub message: Option<String>,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

/// The one event shape the payment correlator reacts to.
///
/// Deserialization fails for any other `type` tag, which callers treat as
/// "not for me" rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PaymentUrlEvent {
    /// Asynchronously delivered redirect URL for an in-flight payment.
    #[serde(rename = "PAY_URL")]
    PayUrl {
        /// The provider URL to open in a new browsing context.
        url: String,
    },
}

/// Phase of a single payment attempt, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPhase {
    /// Attempt constructed, nothing issued yet.
    Idle,
    /// Resolving or creating the payment record.
    CreatingPayment,
    /// Subscribed and triggered; waiting for the `PAY_URL` event.
    AwaitingUrl,
    /// URL received and handed to the opener; this context is done.
    Redirecting,
    /// Terminal success (wallet settlement or already-succeeded record).
    Succeeded,
    /// Terminal failure.
    Failed,
}

impl PaymentPhase {
    /// Whether the attempt has reached a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentPhase::Redirecting | PaymentPhase::Succeeded | PaymentPhase::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payment_state_wire_format() {
        let record: PaymentRecord = serde_json::from_value(json!({
            "id": "pay_1",
            "order_id": "ord_9",
            "status": "SUCCEEDED"
        }))
        .unwrap();
        assert_eq!(record.status, PaymentState::Succeeded);
        assert!(record.amount.is_none());
    }

    #[test]
    fn test_pay_url_event_parses() {
        let event: PaymentUrlEvent = serde_json::from_value(json!({
            "type": "PAY_URL",
            "url": "https://provider.example/checkout/abc"
        }))
        .unwrap();
        let PaymentUrlEvent::PayUrl { url } = event;
        assert_eq!(url, "https://provider.example/checkout/abc");
    }

    #[test]
    fn test_foreign_event_types_rejected() {
        // Other event types on the same destination must not parse as
        // PaymentUrlEvent; the correlator skips them.
        let result: Result<PaymentUrlEvent, _> = serde_json::from_value(json!({
            "type": "ORDER_SHIPPED",
            "url": "https://irrelevant.example"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(PaymentPhase::Succeeded.is_terminal());
        assert!(PaymentPhase::Failed.is_terminal());
        assert!(PaymentPhase::Redirecting.is_terminal());
        assert!(!PaymentPhase::AwaitingUrl.is_terminal());
        assert!(!PaymentPhase::Idle.is_terminal());
    }
}
