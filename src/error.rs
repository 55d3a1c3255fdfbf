//! Error types for the bazaar-link client.

use thiserror::Error;

/// Errors produced by bazaar-link operations.
#[derive(Error, Debug)]
pub enum BazaarLinkError {
    /// Socket-level failure (connect, read, write, unexpected EOF).
    #[error("transport error: {0}")]
    TransportError(String),

    /// The server rejected or violated the notification protocol
    /// (malformed frame, unexpected handshake response, server-side error
    /// frame that is not an authentication failure).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Classified subset of protocol errors: the handshake or session was
    /// rejected for authentication reasons. Never retried locally — the
    /// session layer must obtain fresh credentials first.
    #[error("authentication failed: {0}")]
    AuthenticationError(String),

    /// A REST call returned a non-success status.
    #[error("request failed: {0}")]
    RequestError(String),

    /// The HTTP client failed before a response was available.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// An operation exceeded its configured deadline.
    #[error("timed out: {0}")]
    TimeoutError(String),

    /// Invalid client configuration (bad URL, missing base_url, ...).
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Bug guard: an internal channel or lock was unavailable.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl BazaarLinkError {
    /// Whether this error is an authentication failure.
    ///
    /// Authentication failures must not be retried by the reconnect loop;
    /// they propagate to the session controller instead.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationError(_))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BazaarLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_authentication() {
        assert!(BazaarLinkError::AuthenticationError("token not found".into())
            .is_authentication());
        assert!(!BazaarLinkError::ProtocolError("bad frame".into()).is_authentication());
        assert!(!BazaarLinkError::TransportError("reset".into()).is_authentication());
    }
}
