//! Main bazaar-link client with builder pattern.
//!
//! Wires the HTTP gateways, the reconnect policy, the connection supervisor
//! and the session controller together. One client per browsing context;
//! the supervisor it owns is the single holder of the notification
//! connection.

use crate::{
    error::{BazaarLinkError, Result},
    event_handlers::EventHandlers,
    models::PaymentMethod,
    payment::{HttpPaymentGateway, PaymentCorrelator, PaymentGateway, UrlOpener},
    reconnect::ReconnectPolicy,
    session::{AuthGateway, HttpAuthGateway, SessionController},
    supervisor::ConnectionSupervisor,
    timeouts::BazaarLinkTimeouts,
};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;

/// The private per-user destination that payment events arrive on.
pub fn payment_destination(user_id: &str) -> String {
    format!("/user/{}/queue/payments", user_id)
}

/// Main bazaar-link client.
///
/// Use [`BazaarLinkClient::builder`] to construct instances.
///
/// # Examples
///
/// ```rust,no_run
/// use bazaar_link::BazaarLinkClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = BazaarLinkClient::builder()
///     .base_url("https://shop.example/api")
///     .build()?;
///
/// // Confirm an existing session and bring the connection up.
/// client.session().bootstrap().await?;
/// # Ok(())
/// # }
/// ```
pub struct BazaarLinkClient {
    supervisor: Arc<ConnectionSupervisor>,
    session: SessionController,
    payment_gateway: Arc<dyn PaymentGateway>,
    timeouts: BazaarLinkTimeouts,
}

impl BazaarLinkClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> BazaarLinkClientBuilder {
        BazaarLinkClientBuilder::new()
    }

    /// The session controller.
    pub fn session(&self) -> &SessionController {
        &self.session
    }

    /// The connection supervisor.
    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// The configured timeouts.
    pub fn timeouts(&self) -> &BazaarLinkTimeouts {
        &self.timeouts
    }

    /// Create a payment correlator for one order.
    ///
    /// The correlator shares this client's connection; the caller runs it
    /// with the session user's [`payment_destination`].
    pub fn payment_correlator(
        &self,
        order_id: impl Into<String>,
        method: PaymentMethod,
        opener: Arc<dyn UrlOpener>,
    ) -> PaymentCorrelator {
        PaymentCorrelator::new(
            self.payment_gateway.clone(),
            self.supervisor.clone(),
            opener,
            self.timeouts.clone(),
            order_id,
            method,
        )
    }
}

/// Derive the notification endpoint URL from the REST base URL:
/// `http(s)` becomes `ws(s)` and the path is the fixed `/notify`.
fn derive_notify_url(base_url: &str) -> Result<String> {
    let mut url = Url::parse(base_url.trim()).map_err(|e| {
        BazaarLinkError::ConfigurationError(format!("invalid base_url '{}': {}", base_url, e))
    })?;

    if url.host_str().is_none() {
        return Err(BazaarLinkError::ConfigurationError(
            "base_url must include a host".to_string(),
        ));
    }

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(BazaarLinkError::ConfigurationError(format!(
                "unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        BazaarLinkError::ConfigurationError("failed to set notification URL scheme".to_string())
    })?;
    url.set_path("/notify");
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.to_string())
}

/// Builder for [`BazaarLinkClient`].
pub struct BazaarLinkClientBuilder {
    base_url: Option<String>,
    notify_url: Option<String>,
    timeouts: BazaarLinkTimeouts,
    event_handlers: EventHandlers,
    reconnect_max_attempts: Option<u32>,
    reconnect_base_delay: Option<Duration>,
}

impl BazaarLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            notify_url: None,
            timeouts: BazaarLinkTimeouts::default(),
            event_handlers: EventHandlers::new(),
            reconnect_max_attempts: None,
            reconnect_base_delay: None,
        }
    }

    /// Set the REST base URL (required).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Override the notification endpoint URL. When unset it is derived
    /// from `base_url` (`ws(s)://host/notify`).
    pub fn notify_url(mut self, url: impl Into<String>) -> Self {
        self.notify_url = Some(url.into());
        self
    }

    /// Set the timeout configuration.
    pub fn timeouts(mut self, timeouts: BazaarLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Register connection lifecycle event handlers.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Override the reconnect ceiling (default 5 attempts).
    pub fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = Some(attempts);
        self
    }

    /// Override the reconnect base delay (default 1 second).
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = Some(delay);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<BazaarLinkClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| BazaarLinkError::ConfigurationError("base_url is required".into()))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let notify_url = match self.notify_url {
            Some(url) => url,
            None => derive_notify_url(&base_url)?,
        };

        // Pooled HTTP client with the session cookie jar; the session token
        // never appears in request bodies.
        let http = reqwest::Client::builder()
            .timeout(self.timeouts.request_timeout)
            .connect_timeout(self.timeouts.connection_timeout)
            .cookie_store(true)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| BazaarLinkError::ConfigurationError(e.to_string()))?;

        let policy = Arc::new(ReconnectPolicy::with_backoff(
            self.reconnect_max_attempts
                .unwrap_or(crate::reconnect::DEFAULT_MAX_RECONNECT_ATTEMPTS),
            self.reconnect_base_delay
                .unwrap_or(crate::reconnect::DEFAULT_RECONNECT_BASE_DELAY),
        ));

        let supervisor = Arc::new(ConnectionSupervisor::new(
            notify_url,
            self.timeouts.clone(),
            policy,
            self.event_handlers,
        ));

        let auth_gateway: Arc<dyn AuthGateway> =
            Arc::new(HttpAuthGateway::new(base_url.clone(), http.clone()));
        let payment_gateway: Arc<dyn PaymentGateway> =
            Arc::new(HttpPaymentGateway::new(base_url, http));

        let session = SessionController::new(auth_gateway, supervisor.clone());

        Ok(BazaarLinkClient {
            supervisor,
            session,
            payment_gateway,
            timeouts: self.timeouts,
        })
    }
}
