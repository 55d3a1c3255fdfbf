//! Timeout configuration for bazaar-link client operations.
//!
//! Centralizes every deadline the client uses: HTTP requests, the WebSocket
//! connect/handshake sequence, keepalives, and the payment-URL correlation
//! wait.

use std::time::Duration;

/// Timeout configuration for bazaar-link client operations.
///
/// # Examples
///
/// ```rust
/// use bazaar_link::BazaarLinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults (recommended)
/// let timeouts = BazaarLinkTimeouts::default();
///
/// // Custom deadlines
/// let timeouts = BazaarLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .payment_url_timeout(Duration::from_secs(60))
///     .build();
///
/// // Aggressive deadlines for local development and tests
/// let timeouts = BazaarLinkTimeouts::fast();
/// ```
#[derive(Debug, Clone)]
pub struct BazaarLinkTimeouts {
    /// Timeout for establishing the socket (TCP + TLS + WebSocket upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Timeout for the protocol-level handshake: the window between sending
    /// the `Connect` frame and receiving the `Connected` acknowledgment.
    /// Default: 5 seconds
    pub handshake_timeout: Duration,

    /// Timeout for REST requests (login, identity confirm, payment calls).
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Keep-alive ping interval for the notification connection.
    /// Set to 0 to disable keepalive pings.
    /// Default: 10 seconds
    pub keepalive_interval: Duration,

    /// Maximum wait for a Pong (or any frame) after a keepalive Ping before
    /// the connection is treated as dead. Set to 0 to disable.
    /// Default: 5 seconds
    pub pong_timeout: Duration,

    /// Maximum wait for the asynchronous `PAY_URL` event after a redirect
    /// payment is triggered. Reaching this deadline fails the attempt — the
    /// wait is never unbounded.
    /// Default: 30 seconds
    pub payment_url_timeout: Duration,

    /// Delay before falling back to navigating the current context when
    /// opening the payment URL in a new context was blocked.
    /// Default: 300 milliseconds
    pub popup_fallback_delay: Duration,
}

impl Default for BazaarLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(5),
            payment_url_timeout: Duration::from_secs(30),
            popup_fallback_delay: Duration::from_millis(300),
        }
    }
}

impl BazaarLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> BazaarLinkTimeoutsBuilder {
        BazaarLinkTimeoutsBuilder::new()
    }

    /// Timeouts optimized for localhost development and integration tests.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
            payment_url_timeout: Duration::from_secs(10),
            popup_fallback_delay: Duration::from_millis(50),
        }
    }

    /// Timeouts suited to high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            payment_url_timeout: Duration::from_secs(90),
            popup_fallback_delay: Duration::from_millis(300),
        }
    }

    /// Check if a duration represents "no timeout" (zero or absurdly large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for [`BazaarLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct BazaarLinkTimeoutsBuilder {
    timeouts: BazaarLinkTimeouts,
}

impl BazaarLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: BazaarLinkTimeouts::default(),
        }
    }

    /// Set the socket establishment timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the protocol handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake_timeout = timeout;
        self
    }

    /// Set the REST request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval. Zero disables keepalives.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the pong timeout. Zero disables the check.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Set the maximum wait for a `PAY_URL` event.
    pub fn payment_url_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.payment_url_timeout = timeout;
        self
    }

    /// Set the popup-blocked fallback delay.
    pub fn popup_fallback_delay(mut self, delay: Duration) -> Self {
        self.timeouts.popup_fallback_delay = delay;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> BazaarLinkTimeouts {
        self.timeouts
    }
}
