//! Session controller: owns the authenticated-user identity and drives the
//! connection supervisor from authentication outcomes.
//!
//! Every successful identity confirmation re-arms the reconnect policy and
//! requests a connection; a terminal auth failure (failed confirm **and**
//! failed refresh) latches the policy off and tears the connection down.
//! Login failures are handled with lower severity: a rejected login says
//! nothing about the validity of an existing session's tokens, so the
//! reconnect gate is left untouched.

use crate::{
    error::{BazaarLinkError, Result},
    models::{AuthIdentity, Credentials, LoginResponse, Session, UserRecord},
    supervisor::ConnectionSupervisor,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Outcome of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials accepted; the session is confirmed and connected.
    Authenticated,
    /// The server requires a one-time code before the session exists.
    /// The flow is suspended, not failed.
    TwoFactorRequired,
    /// Credentials accepted, but another identity confirmation was already
    /// in progress and will determine the session. Observe the session
    /// state for the result instead of assuming success.
    ConfirmationInFlight,
}

/// REST contract of the auth endpoints, behind a trait so the controller is
/// testable without a server.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// `GET /auth/me`
    async fn confirm_identity(&self) -> Result<AuthIdentity>;
    /// `POST /auth/access-token` — rotates the session token.
    async fn refresh_token(&self) -> Result<()>;
    /// `POST /auth/login`
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse>;
    /// `POST /auth/verify-2fa`
    async fn verify_two_factor(&self, code: &str) -> Result<LoginResponse>;
    /// `POST /auth/logout` — best-effort.
    async fn logout(&self) -> Result<()>;
    /// `POST /auth/clear-cookie` — best-effort.
    async fn clear_cookie(&self) -> Result<()>;
    /// `GET /users/{id}`
    async fn fetch_user(&self, id: &str) -> Result<UserRecord>;
}

/// Clears the single-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns session state and its four mutating operations (bootstrap, login,
/// refresh, logout). All mutation happens inside this controller.
pub struct SessionController {
    gateway: Arc<dyn AuthGateway>,
    supervisor: Arc<ConnectionSupervisor>,
    session: RwLock<Session>,
    /// Single-flight guard: suppresses a concurrent identity confirmation
    /// while one is already in progress. Shared by bootstrap and refresh
    /// since both mutate the same session fields.
    confirm_in_flight: AtomicBool,
}

impl SessionController {
    /// Create a controller bound to a gateway and a supervisor.
    pub fn new(gateway: Arc<dyn AuthGateway>, supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self {
            gateway,
            supervisor,
            session: RwLock::new(Session::default()),
            confirm_in_flight: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current session state.
    pub fn session(&self) -> Session {
        self.read_session()
    }

    /// Whether the session is currently authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.read_session().is_authenticated
    }

    /// Startup path: confirm the existing session, falling back to a token
    /// refresh, and arm the connection on success.
    ///
    /// A confirmation already in progress suppresses this call (single
    /// flight); the suppressed call returns `Ok(())` without side effects.
    pub async fn bootstrap(&self) -> Result<()> {
        if self.confirm_in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("[session] identity confirmation already in flight, skipping");
            return Ok(());
        }
        let _guard = InFlightGuard(&self.confirm_in_flight);

        self.set_loading(true);
        match self.gateway.confirm_identity().await {
            Ok(identity) => self.complete_sign_in(identity).await,
            Err(confirm_err) => {
                log::debug!(
                    "[session] identity confirm failed ({}), trying refresh",
                    confirm_err
                );
                self.refresh_then_confirm().await
            }
        }
    }

    /// Exchange for a new session token, then re-confirm the identity.
    ///
    /// Shares the single-flight guard with [`bootstrap`](Self::bootstrap).
    pub async fn refresh(&self) -> Result<()> {
        if self.confirm_in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("[session] identity confirmation already in flight, skipping");
            return Ok(());
        }
        let _guard = InFlightGuard(&self.confirm_in_flight);

        self.set_loading(true);
        self.refresh_then_confirm().await
    }

    /// Submit credentials.
    ///
    /// The distinguished two-factor response suspends the flow without
    /// touching the session or the reconnect gate. Any other failure records
    /// the error and leaves the session unauthenticated — and the reconnect
    /// policy untouched, since a rejected login does not invalidate an
    /// existing session's tokens.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome> {
        let response = match self.gateway.login(credentials).await {
            Ok(response) => response,
            Err(e) => {
                self.record_error(e.to_string());
                return Err(e);
            }
        };

        if response.requires_two_factor() {
            log::info!("[session] two-factor step required, flow suspended");
            return Ok(LoginOutcome::TwoFactorRequired);
        }

        if self.confirm_and_connect().await? {
            Ok(LoginOutcome::Authenticated)
        } else {
            Ok(LoginOutcome::ConfirmationInFlight)
        }
    }

    /// Complete a suspended login with a one-time code.
    pub async fn verify_two_factor(&self, code: &str) -> Result<LoginOutcome> {
        if let Err(e) = self.gateway.verify_two_factor(code).await {
            self.record_error(e.to_string());
            return Err(e);
        }
        if self.confirm_and_connect().await? {
            Ok(LoginOutcome::Authenticated)
        } else {
            Ok(LoginOutcome::ConfirmationInFlight)
        }
    }

    /// Best-effort server-side invalidation, then unconditional local
    /// teardown. Both server calls are attempted even if the first fails —
    /// logout must not get stuck on a partial server error.
    pub async fn logout(&self) {
        if let Err(e) = self.gateway.logout().await {
            log::warn!("[session] logout call failed: {}", e);
        }
        if let Err(e) = self.gateway.clear_cookie().await {
            log::warn!("[session] clear-cookie call failed: {}", e);
        }

        self.supervisor.disable_reconnect();
        self.supervisor.disconnect().await;
        self.clear_session(None);
        log::info!("[session] logged out");
    }

    // ── internals ───────────────────────────────────────────────────────────

    /// Refresh the token and re-run the identity confirm. Terminal failure
    /// here clears the session and latches reconnection off.
    async fn refresh_then_confirm(&self) -> Result<()> {
        let refreshed = match self.gateway.refresh_token().await {
            Ok(()) => self.gateway.confirm_identity().await,
            Err(e) => Err(e),
        };

        match refreshed {
            Ok(identity) => self.complete_sign_in(identity).await,
            Err(e) => {
                log::warn!("[session] refresh path failed, degrading session: {}", e);
                self.supervisor.disable_reconnect();
                self.supervisor.disconnect().await;
                self.clear_session(Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Confirm the identity after a successful login and arm the connection.
    /// Not single-flight-guarded by the caller side of login; reuses the
    /// shared guard to avoid racing a concurrent bootstrap.
    ///
    /// Returns `Ok(false)` when a confirmation was already in progress, so
    /// callers do not claim an authenticated outcome they did not produce.
    async fn confirm_and_connect(&self) -> Result<bool> {
        if self.confirm_in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("[session] identity confirmation already in flight, skipping");
            return Ok(false);
        }
        let _guard = InFlightGuard(&self.confirm_in_flight);

        self.set_loading(true);
        match self.gateway.confirm_identity().await {
            Ok(identity) => {
                self.complete_sign_in(identity).await?;
                Ok(true)
            }
            Err(e) => {
                self.record_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Store the confirmed identity, fetch the full user record, and arm
    /// the connection: enable first, then connect, always in that order.
    async fn complete_sign_in(&self, identity: AuthIdentity) -> Result<()> {
        let user = match self.gateway.fetch_user(&identity.id).await {
            Ok(user) => user,
            Err(e) => {
                // Leave no half-open state behind: loading must not stick.
                self.record_error(e.to_string());
                return Err(e);
            }
        };

        {
            let mut session = self.write_session();
            session.identity = Some(identity);
            session.user = Some(user);
            session.is_authenticated = true;
            session.loading = false;
            session.error = None;
        }

        self.supervisor.enable_reconnect();
        if let Err(e) = self.supervisor.force_connect().await {
            // Connection problems surface through the passive indicator,
            // not as an authentication failure.
            log::warn!("[session] connect after sign-in failed: {}", e);
        }

        log::info!("[session] authenticated");
        Ok(())
    }

    fn clear_session(&self, error: Option<String>) {
        let mut session = self.write_session();
        session.identity = None;
        session.user = None;
        session.is_authenticated = false;
        session.loading = false;
        session.error = error;
    }

    fn record_error(&self, message: String) {
        let mut session = self.write_session();
        session.loading = false;
        session.error = Some(message);
    }

    fn set_loading(&self, loading: bool) {
        self.write_session().loading = loading;
    }

    fn read_session(&self) -> Session {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn write_session(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// reqwest implementation of [`AuthGateway`].
pub struct HttpAuthGateway {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAuthGateway {
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
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Err(BazaarLinkError::AuthenticationError(message))
        } else {
            Err(BazaarLinkError::RequestError(message))
        }
    }
}

#[async_trait]
impl AuthGateway for HttpAuthGateway {
    async fn confirm_identity(&self) -> Result<AuthIdentity> {
        let url = format!("{}/auth/me", self.base_url);
        let response = Self::check_status(self.http.get(&url).send().await?).await?;
        Ok(response.json::<AuthIdentity>().await?)
    }

    async fn refresh_token(&self) -> Result<()> {
        let url = format!("{}/auth/access-token", self.base_url);
        Self::check_status(self.http.post(&url).send().await?).await?;
        Ok(())
    }

    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse> {
        let url = format!("{}/auth/login", self.base_url);
        let response =
            Self::check_status(self.http.post(&url).json(credentials).send().await?).await?;
        Ok(response.json::<LoginResponse>().await?)
    }

    async fn verify_two_factor(&self, code: &str) -> Result<LoginResponse> {
        let url = format!("{}/auth/verify-2fa", self.base_url);
        let body = serde_json::json!({ "code": code });
        let response = Self::check_status(self.http.post(&url).json(&body).send().await?).await?;
        Ok(response.json::<LoginResponse>().await?)
    }

    async fn logout(&self) -> Result<()> {
        let url = format!("{}/auth/logout", self.base_url);
        Self::check_status(self.http.post(&url).send().await?).await?;
        Ok(())
    }

    async fn clear_cookie(&self) -> Result<()> {
        let url = format!("{}/auth/clear-cookie", self.base_url);
        Self::check_status(self.http.post(&url).send().await?).await?;
        Ok(())
    }

    async fn fetch_user(&self, id: &str) -> Result<UserRecord> {
        let url = format!("{}/users/{}", self.base_url, id);
        let response = Self::check_status(self.http.get(&url).send().await?).await?;
        Ok(response.json::<UserRecord>().await?)
    }
}
