//! # bazaar-link
//!
//! Client SDK for the bazaar storefront's realtime notification layer:
//! session lifecycle, a supervised WebSocket connection with linear-backoff
//! reconnection, and payment correlation over the user's private
//! notification destination.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bazaar_link::{BazaarLinkClient, BazaarLinkTimeouts, Credentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = BazaarLinkClient::builder()
//!     .base_url("https://shop.example/api")
//!     .timeouts(BazaarLinkTimeouts::default())
//!     .build()?;
//!
//! // Confirm a pre-existing session (cookie-based) and connect.
//! client.session().bootstrap().await?;
//!
//! // Or sign in explicitly.
//! let credentials = Credentials {
//!     email: "user@example.com".to_string(),
//!     password: "secret".to_string(),
//! };
//! client.session().login(&credentials).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`ConnectionClient`] owns a background task that holds the WebSocket,
//!   multiplexes subscriptions and performs policy-gated reconnection.
//! - [`ReconnectPolicy`] is the shared retry gate: linear backoff, a hard
//!   attempt ceiling, and a latch that authentication failures flip off.
//! - [`ConnectionSupervisor`] is the single explicit owner of the client and
//!   the policy. It never connects on creation.
//! - [`SessionController`] drives the supervisor from authentication
//!   outcomes (bootstrap, login, refresh, logout).
//! - [`PaymentCorrelator`] runs one payment attempt and correlates the
//!   asynchronously delivered provider URL with it.

mod classify;
mod client;
mod connection;
mod error;
mod event_handlers;
mod models;
mod payment;
mod reconnect;
mod session;
mod supervisor;
mod timeouts;

pub use client::{payment_destination, BazaarLinkClient, BazaarLinkClientBuilder};
pub use connection::{ConnectionClient, ConnectionState, SubscriptionHandle};
pub use error::{BazaarLinkError, Result};
pub use event_handlers::{ConnectionFault, DisconnectReason, EventHandlers};
pub use models::{
    AuthIdentity, ClientFrame, Credentials, LoginResponse, PaymentMethod, PaymentPhase,
    PaymentRecord, PaymentState, PaymentUrlEvent, ProcessResponse, ServerFrame, Session,
    UserRecord, TWO_FACTOR_REQUIRED,
};
pub use payment::{
    HttpPaymentGateway, PaymentCorrelator, PaymentGateway, PaymentOutcome, UrlOpener,
};
pub use reconnect::{
    ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY,
};
pub use session::{AuthGateway, HttpAuthGateway, LoginOutcome, SessionController};
pub use supervisor::ConnectionSupervisor;
pub use timeouts::BazaarLinkTimeouts;
