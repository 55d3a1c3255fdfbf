//! Payment correlation: drives a single payment attempt and matches the
//! asynchronously delivered payment URL to it.
//!
//! The flow subscribes to the user's private destination *before* triggering
//! backend processing — the transport has no replay, so a listener that
//! arrives after a fast backend response would miss the event forever. The
//! wait for the URL is bounded (`payment_url_timeout`); an unbounded
//! `AwaitingUrl` state is treated as a defect.

use crate::{
    connection::SubscriptionHandle,
    error::{BazaarLinkError, Result},
    models::{PaymentMethod, PaymentPhase, PaymentRecord, PaymentState, PaymentUrlEvent},
    supervisor::ConnectionSupervisor,
    timeouts::BazaarLinkTimeouts,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// REST contract of the payments endpoints.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// `GET /payments/order/{order_id}` — resolves (or lazily creates) the
    /// payment record for an order.
    async fn payment_for_order(&self, order_id: &str) -> Result<PaymentRecord>;
    /// `POST /payments/{id}/process?paymentMethod=...`
    async fn process(&self, payment_id: &str, method: PaymentMethod) -> Result<()>;
    /// `POST /payments/{id}/retry` — issues a fresh record after a failure.
    async fn retry(&self, payment_id: &str) -> Result<PaymentRecord>;
}

/// Browser-effect seam: opening the provider URL.
///
/// The embedding application supplies the implementation; the flow completes
/// in the second browsing context, and any correlation across contexts goes
/// through the backend, never through client memory.
pub trait UrlOpener: Send + Sync {
    /// Open the URL in a new browsing context. Returns `false` when blocked
    /// (popup blocker), in which case the correlator falls back to
    /// navigating the current context after a short delay.
    fn open_new_context(&self, url: &str) -> bool;

    /// Navigate the current context to the URL.
    fn navigate_current(&self, url: &str);
}

/// Terminal outcome of a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The order's payment record was already `SUCCEEDED`; nothing was
    /// subscribed or triggered.
    AlreadySucceeded,
    /// Wallet settlement confirmed by the trigger response itself.
    WalletSucceeded,
    /// The provider URL was received and handed to the opener; completion
    /// is observed in the other browsing context.
    RedirectIssued {
        /// The provider URL that was opened.
        url: String,
    },
}

/// Drives one payment attempt for one order.
///
/// Phases are pushed through a watch channel; the attempt's subscription is
/// cancelled exactly once on any exit path (the handle's cancel is guarded
/// and Drop-backed).
pub struct PaymentCorrelator {
    gateway: Arc<dyn PaymentGateway>,
    supervisor: Arc<ConnectionSupervisor>,
    opener: Arc<dyn UrlOpener>,
    timeouts: BazaarLinkTimeouts,
    order_id: String,
    method: PaymentMethod,
    phase_tx: watch::Sender<PaymentPhase>,
    phase_rx: watch::Receiver<PaymentPhase>,
}

impl PaymentCorrelator {
    /// Create a correlator for one order and method.
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        supervisor: Arc<ConnectionSupervisor>,
        opener: Arc<dyn UrlOpener>,
        timeouts: BazaarLinkTimeouts,
        order_id: impl Into<String>,
        method: PaymentMethod,
    ) -> Self {
        let (phase_tx, phase_rx) = watch::channel(PaymentPhase::Idle);
        Self {
            gateway,
            supervisor,
            opener,
            timeouts,
            order_id: order_id.into(),
            method,
            phase_tx,
            phase_rx,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> PaymentPhase {
        *self.phase_rx.borrow()
    }

    /// Watch receiver for phase transitions.
    pub fn watch_phase(&self) -> watch::Receiver<PaymentPhase> {
        self.phase_rx.clone()
    }

    /// Run the attempt to a terminal phase.
    ///
    /// `destination` is the user's private notification destination (see
    /// [`crate::client::payment_destination`]).
    pub async fn run(&self, destination: &str) -> Result<PaymentOutcome> {
        self.set_phase(PaymentPhase::CreatingPayment);

        let record = match self.gateway.payment_for_order(&self.order_id).await {
            Ok(record) => record,
            Err(e) => {
                self.set_phase(PaymentPhase::Failed);
                return Err(e);
            }
        };

        // Idempotent re-entry: a record that already succeeded short-circuits
        // without a subscription or a new trigger.
        if record.status == PaymentState::Succeeded {
            log::info!(
                "[payment] order {} already settled by payment {}",
                self.order_id,
                record.id
            );
            self.set_phase(PaymentPhase::Succeeded);
            return Ok(PaymentOutcome::AlreadySucceeded);
        }

        // A failed record gets a fresh one before re-processing.
        let record = if record.status == PaymentState::Failed {
            match self.gateway.retry(&record.id).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    self.set_phase(PaymentPhase::Failed);
                    return Err(e);
                }
            }
        } else {
            record
        };

        // Subscribe before triggering; the event is not re-deliverable.
        let subscription = self.supervisor.subscribe(destination).await?;

        match self.method {
            PaymentMethod::Wallet => self.settle_wallet(&record, subscription).await,
            PaymentMethod::DirectRedirect => {
                self.settle_redirect(&record, subscription, destination).await
            }
        }
    }

    // ── wallet path ─────────────────────────────────────────────────────────

    /// Wallet settlement: the trigger call's own response is the result; no
    /// event is awaited and `AwaitingUrl` is never entered.
    async fn settle_wallet(
        &self,
        record: &PaymentRecord,
        mut subscription: Option<SubscriptionHandle>,
    ) -> Result<PaymentOutcome> {
        let result = self.gateway.process(&record.id, PaymentMethod::Wallet).await;
        if let Some(handle) = subscription.as_mut() {
            handle.cancel();
        }
        match result {
            Ok(()) => {
                log::info!("[payment] wallet settlement succeeded for {}", record.id);
                self.set_phase(PaymentPhase::Succeeded);
                Ok(PaymentOutcome::WalletSucceeded)
            }
            Err(e) => {
                // No fallback signal exists for wallet payments.
                self.set_phase(PaymentPhase::Failed);
                Err(e)
            }
        }
    }

    // ── redirect path ───────────────────────────────────────────────────────

    /// Redirect settlement: the authoritative signal is the `PAY_URL` event,
    /// not the trigger's response — a transient trigger failure (e.g. a race
    /// with connection warm-up) is swallowed and the wait continues.
    async fn settle_redirect(
        &self,
        record: &PaymentRecord,
        subscription: Option<SubscriptionHandle>,
        destination: &str,
    ) -> Result<PaymentOutcome> {
        let mut subscription = match subscription {
            Some(handle) => handle,
            None => {
                // Without a listener the URL can never arrive.
                self.set_phase(PaymentPhase::Failed);
                return Err(BazaarLinkError::TransportError(format!(
                    "not connected, cannot await payment URL on {}",
                    destination
                )));
            }
        };

        if let Err(e) = self
            .gateway
            .process(&record.id, PaymentMethod::DirectRedirect)
            .await
        {
            log::warn!(
                "[payment] trigger for {} failed ({}), awaiting event anyway",
                record.id,
                e
            );
        }

        self.set_phase(PaymentPhase::AwaitingUrl);

        let url = match tokio::time::timeout(
            self.timeouts.payment_url_timeout,
            Self::next_payment_url(&mut subscription),
        )
        .await
        {
            Ok(Some(url)) => url,
            Ok(None) => {
                subscription.cancel();
                self.set_phase(PaymentPhase::Failed);
                return Err(BazaarLinkError::TransportError(
                    "subscription closed while awaiting payment URL".to_string(),
                ));
            }
            Err(_) => {
                subscription.cancel();
                self.set_phase(PaymentPhase::Failed);
                return Err(BazaarLinkError::TimeoutError(format!(
                    "no payment URL within {:?}",
                    self.timeouts.payment_url_timeout
                )));
            }
        };

        subscription.cancel();
        self.open_url(&url).await;
        self.set_phase(PaymentPhase::Redirecting);
        log::info!("[payment] redirecting for {}", record.id);
        Ok(PaymentOutcome::RedirectIssued { url })
    }

    /// Consume events until a `PAY_URL` arrives; any other event type on the
    /// destination is skipped, not an error.
    async fn next_payment_url(subscription: &mut SubscriptionHandle) -> Option<String> {
        while let Some(event) = subscription.next().await {
            match serde_json::from_value::<PaymentUrlEvent>(event) {
                Ok(PaymentUrlEvent::PayUrl { url }) => return Some(url),
                Err(_) => {
                    log::debug!("[payment] skipping unrelated event on payment destination");
                }
            }
        }
        None
    }

    /// Open the provider URL in a new context, falling back to the current
    /// one after a short delay when the popup is blocked.
    async fn open_url(&self, url: &str) {
        if self.opener.open_new_context(url) {
            return;
        }
        log::warn!("[payment] new context blocked, falling back to current context");
        tokio::time::sleep(self.timeouts.popup_fallback_delay).await;
        self.opener.navigate_current(url);
    }

    fn set_phase(&self, phase: PaymentPhase) {
        log::debug!("[payment] order {} phase -> {:?}", self.order_id, phase);
        let _ = self.phase_tx.send(phase);
    }
}

/// reqwest implementation of [`PaymentGateway`].
pub struct HttpPaymentGateway {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPaymentGateway {
    /// Create a gateway against a REST base URL.
    pub fn new(base_url: String, http: reqwest::Client) -> Self {
        Self { base_url, http }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("{}", status)
        } else {
            format!("{}: {}", status, body)
        };
        Err(BazaarLinkError::RequestError(message))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn payment_for_order(&self, order_id: &str) -> Result<PaymentRecord> {
        let url = format!("{}/payments/order/{}", self.base_url, order_id);
        let response = Self::check_status(self.http.get(&url).send().await?).await?;
        Ok(response.json::<PaymentRecord>().await?)
    }

    async fn process(&self, payment_id: &str, method: PaymentMethod) -> Result<()> {
        let url = format!(
            "{}/payments/{}/process?paymentMethod={}",
            self.base_url,
            payment_id,
            method.as_query_value()
        );
        Self::check_status(self.http.post(&url).send().await?).await?;
        Ok(())
    }

    async fn retry(&self, payment_id: &str) -> Result<PaymentRecord> {
        let url = format!("{}/payments/{}/retry", self.base_url, payment_id);
        let response = Self::check_status(self.http.post(&url).send().await?).await?;
        Ok(response.json::<PaymentRecord>().await?)
    }
}
