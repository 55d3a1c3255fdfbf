//! Shared test fixtures: an in-process notification server speaking the wire
//! protocol, and scripted gateway/opener mocks.

#![allow(dead_code)]

use async_trait::async_trait;
use bazaar_link::{
    AuthGateway, AuthIdentity, BazaarLinkError, BazaarLinkTimeouts, ClientFrame,
    ConnectionSupervisor, Credentials, EventHandlers, LoginResponse, PaymentGateway,
    PaymentMethod, PaymentRecord, PaymentState, ReconnectPolicy, Result, ServerFrame, UrlOpener,
    UserRecord,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` until it holds or the deadline passes.
pub async fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn test_supervisor(url: &str, policy: Arc<ReconnectPolicy>) -> Arc<ConnectionSupervisor> {
    Arc::new(ConnectionSupervisor::new(
        url.to_string(),
        BazaarLinkTimeouts::fast(),
        policy,
        EventHandlers::new(),
    ))
}

// ── In-process notification server ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    /// Acknowledge the handshake with `Connected`.
    Accept,
    /// Reject the handshake with an auth-failure error frame and close.
    RejectAuth,
}

struct SubEntry {
    id: String,
    destination: String,
    out_tx: mpsc::UnboundedSender<Message>,
}

/// Minimal notification endpoint for tests: accepts WebSocket upgrades,
/// answers `Connect` frames per the configured mode, tracks subscriptions
/// and lets the test push `Message` frames by destination.
pub struct NotifyServer {
    addr: SocketAddr,
    handshakes: Arc<AtomicUsize>,
    subscribes: Arc<AtomicUsize>,
    subs: Arc<Mutex<Vec<SubEntry>>>,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept_task: JoinHandle<()>,
}

impl NotifyServer {
    pub async fn spawn(mode: HandshakeMode) -> Self {
        Self::spawn_at("127.0.0.1:0".parse().unwrap(), mode).await
    }

    /// Bind a specific address, e.g. to bring an endpoint up at an address a
    /// client is already retrying against.
    pub async fn spawn_at(addr: SocketAddr, mode: HandshakeMode) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handshakes = Arc::new(AtomicUsize::new(0));
        let subscribes = Arc::new(AtomicUsize::new(0));
        let subs: Arc<Mutex<Vec<SubEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_task = {
            let handshakes = handshakes.clone();
            let subscribes = subscribes.clone();
            let subs = subs.clone();
            let conn_tasks = conn_tasks.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let task = tokio::spawn(handle_conn(
                        stream,
                        mode,
                        handshakes.clone(),
                        subscribes.clone(),
                        subs.clone(),
                    ));
                    conn_tasks.lock().unwrap().push(task);
                }
            })
        };

        Self {
            addr,
            handshakes,
            subscribes,
            subs,
            conn_tasks,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/notify", self.addr)
    }

    /// Handshakes completed (Connect frames seen).
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Subscribe frames seen (re-subscriptions included).
    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Push an event to every subscription registered on `destination`.
    /// Returns whether at least one frame was sent.
    pub fn push(&self, destination: &str, event: JsonValue) -> bool {
        let subs = self.subs.lock().unwrap();
        let mut sent = false;
        for entry in subs.iter().filter(|e| e.destination == destination) {
            let frame = ServerFrame::Message {
                subscription_id: entry.id.clone(),
                destination: destination.to_string(),
                event: event.clone(),
            };
            let text = serde_json::to_string(&frame).unwrap();
            sent |= entry.out_tx.send(Message::Text(text.into())).is_ok();
        }
        sent
    }

    /// Drop every live connection but keep listening, so clients can
    /// reconnect.
    pub fn drop_connections(&self) {
        for task in self.conn_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.subs.lock().unwrap().clear();
    }

    /// Stop listening and drop every connection. Reconnect attempts against
    /// the old address fail from here on.
    pub fn kill(&self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

impl Drop for NotifyServer {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn handle_conn(
    stream: TcpStream,
    mode: HandshakeMode,
    handshakes: Arc<AtomicUsize>,
    subscribes: Arc<AtomicUsize>,
    subs: Arc<Mutex<Vec<SubEntry>>>,
) {
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let mut my_sub_ids: Vec<String> = Vec::new();

    'conn: loop {
        tokio::select! {
            out = out_rx.recv() => {
                match out {
                    Some(msg) => {
                        if ws.send(msg).await.is_err() {
                            break 'conn;
                        }
                    }
                    None => break 'conn,
                }
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(ClientFrame::Connect {}) => {
                                handshakes.fetch_add(1, Ordering::SeqCst);
                                let reply = match mode {
                                    HandshakeMode::Accept => ServerFrame::Connected {},
                                    HandshakeMode::RejectAuth => ServerFrame::Error {
                                        message: "token not found".to_string(),
                                    },
                                };
                                let text = serde_json::to_string(&reply).unwrap();
                                if ws.send(Message::Text(text.into())).await.is_err() {
                                    break 'conn;
                                }
                                if mode == HandshakeMode::RejectAuth {
                                    let _ = ws.close(None).await;
                                    break 'conn;
                                }
                            }
                            Ok(ClientFrame::Subscribe { id, destination }) => {
                                subscribes.fetch_add(1, Ordering::SeqCst);
                                my_sub_ids.push(id.clone());
                                subs.lock().unwrap().push(SubEntry {
                                    id,
                                    destination,
                                    out_tx: out_tx.clone(),
                                });
                            }
                            Ok(ClientFrame::Unsubscribe { id }) => {
                                subs.lock().unwrap().retain(|e| e.id != id);
                            }
                            Ok(ClientFrame::Publish { .. }) => {}
                            Err(_) => {}
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break 'conn,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    subs.lock()
        .unwrap()
        .retain(|e| !my_sub_ids.contains(&e.id));
}

// ── Scripted auth gateway ───────────────────────────────────────────────────

fn auth_err() -> BazaarLinkError {
    BazaarLinkError::AuthenticationError("401 Unauthorized: token not found".to_string())
}

/// Scriptable [`AuthGateway`] with per-endpoint call counters.
///
/// Every endpoint succeeds by default; identity-confirm outcomes can be
/// scripted per call.
pub struct MockAuthGateway {
    confirm_script: Mutex<VecDeque<bool>>,
    refresh_ok: AtomicBool,
    login_response: Mutex<Option<LoginResponse>>,
    two_factor_ok: AtomicBool,
    logout_ok: AtomicBool,
    fetch_user_ok: AtomicBool,
    confirm_delay: Mutex<Duration>,
    pub confirm_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub login_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub clear_cookie_calls: AtomicUsize,
}

impl MockAuthGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            confirm_script: Mutex::new(VecDeque::new()),
            refresh_ok: AtomicBool::new(true),
            login_response: Mutex::new(Some(LoginResponse {
                message: "Login successful".to_string(),
                data: None,
            })),
            two_factor_ok: AtomicBool::new(true),
            logout_ok: AtomicBool::new(true),
            fetch_user_ok: AtomicBool::new(true),
            confirm_delay: Mutex::new(Duration::ZERO),
            confirm_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            clear_cookie_calls: AtomicUsize::new(0),
        })
    }

    /// Script the outcome of the next identity confirms; once the script is
    /// exhausted, confirms succeed.
    pub fn script_confirm(&self, outcomes: &[bool]) {
        let mut script = self.confirm_script.lock().unwrap();
        script.clear();
        script.extend(outcomes.iter().copied());
    }

    pub fn set_refresh_ok(&self, ok: bool) {
        self.refresh_ok.store(ok, Ordering::SeqCst);
    }

    /// `None` makes login return an authentication error.
    pub fn set_login_response(&self, response: Option<LoginResponse>) {
        *self.login_response.lock().unwrap() = response;
    }

    pub fn set_logout_ok(&self, ok: bool) {
        self.logout_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_fetch_user_ok(&self, ok: bool) {
        self.fetch_user_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_confirm_delay(&self, delay: Duration) {
        *self.confirm_delay.lock().unwrap() = delay;
    }

    fn identity() -> AuthIdentity {
        AuthIdentity {
            id: "42".to_string(),
            email: Some("user@example.com".to_string()),
            role: Some("customer".to_string()),
        }
    }
}

#[async_trait]
impl AuthGateway for MockAuthGateway {
    async fn confirm_identity(&self) -> Result<AuthIdentity> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.confirm_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let ok = self
            .confirm_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(true);
        if ok {
            Ok(Self::identity())
        } else {
            Err(auth_err())
        }
    }

    async fn refresh_token(&self) -> Result<()> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.refresh_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(auth_err())
        }
    }

    async fn login(&self, _credentials: &Credentials) -> Result<LoginResponse> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BazaarLinkError::AuthenticationError("invalid credentials".to_string()))
    }

    async fn verify_two_factor(&self, _code: &str) -> Result<LoginResponse> {
        if self.two_factor_ok.load(Ordering::SeqCst) {
            Ok(LoginResponse {
                message: "Login successful".to_string(),
                data: None,
            })
        } else {
            Err(BazaarLinkError::AuthenticationError(
                "invalid code".to_string(),
            ))
        }
    }

    async fn logout(&self) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.logout_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BazaarLinkError::RequestError("500 server error".to_string()))
        }
    }

    async fn clear_cookie(&self) -> Result<()> {
        self.clear_cookie_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_user(&self, id: &str) -> Result<UserRecord> {
        if !self.fetch_user_ok.load(Ordering::SeqCst) {
            return Err(BazaarLinkError::RequestError("500 server error".to_string()));
        }
        Ok(UserRecord {
            id: id.to_string(),
            email: Some("user@example.com".to_string()),
            name: Some("Test User".to_string()),
            wallet_balance: Some(5000),
        })
    }
}

// ── Scripted payment gateway ────────────────────────────────────────────────

/// Scriptable [`PaymentGateway`] recording every trigger call.
pub struct MockPaymentGateway {
    record_status: Mutex<PaymentState>,
    process_ok: AtomicBool,
    pub processed: Mutex<Vec<(String, PaymentMethod)>>,
    pub lookup_calls: AtomicUsize,
    pub retry_calls: AtomicUsize,
}

impl MockPaymentGateway {
    pub fn new(status: PaymentState) -> Arc<Self> {
        Arc::new(Self {
            record_status: Mutex::new(status),
            process_ok: AtomicBool::new(true),
            processed: Mutex::new(Vec::new()),
            lookup_calls: AtomicUsize::new(0),
            retry_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_process_ok(&self, ok: bool) {
        self.process_ok.store(ok, Ordering::SeqCst);
    }

    pub fn process_calls(&self) -> usize {
        self.processed.lock().unwrap().len()
    }

    pub fn processed_ids(&self) -> Vec<String> {
        self.processed
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn payment_for_order(&self, order_id: &str) -> Result<PaymentRecord> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentRecord {
            id: "pay_1".to_string(),
            order_id: order_id.to_string(),
            status: *self.record_status.lock().unwrap(),
            amount: Some(1000),
        })
    }

    async fn process(&self, payment_id: &str, method: PaymentMethod) -> Result<()> {
        self.processed
            .lock()
            .unwrap()
            .push((payment_id.to_string(), method));
        if self.process_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BazaarLinkError::RequestError(
                "402 payment processing failed".to_string(),
            ))
        }
    }

    async fn retry(&self, _payment_id: &str) -> Result<PaymentRecord> {
        self.retry_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentRecord {
            id: "pay_2".to_string(),
            order_id: "ord_9".to_string(),
            status: PaymentState::Created,
            amount: Some(1000),
        })
    }
}

// ── Recording URL opener ────────────────────────────────────────────────────

/// [`UrlOpener`] that records calls; new-context opens can be made to fail
/// like a popup blocker.
pub struct MockOpener {
    allow_new_context: AtomicBool,
    pub open_attempts: Mutex<Vec<String>>,
    pub navigated: Mutex<Vec<String>>,
}

impl MockOpener {
    pub fn new(allow_new_context: bool) -> Arc<Self> {
        Arc::new(Self {
            allow_new_context: AtomicBool::new(allow_new_context),
            open_attempts: Mutex::new(Vec::new()),
            navigated: Mutex::new(Vec::new()),
        })
    }

    pub fn open_attempts(&self) -> Vec<String> {
        self.open_attempts.lock().unwrap().clone()
    }

    pub fn navigated(&self) -> Vec<String> {
        self.navigated.lock().unwrap().clone()
    }
}

impl UrlOpener for MockOpener {
    fn open_new_context(&self, url: &str) -> bool {
        self.open_attempts.lock().unwrap().push(url.to_string());
        self.allow_new_context.load(Ordering::SeqCst)
    }

    fn navigate_current(&self, url: &str) {
        self.navigated.lock().unwrap().push(url.to_string());
    }
}
