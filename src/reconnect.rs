//! Bounded-attempt reconnection policy with an authentication latch.
//!
//! Wraps the connection task's retry decisions in one gate:
//!
//! - Linear backoff (`base_delay * attempts`), hard ceiling at
//!   `max_attempts` — never an infinite retry loop.
//! - `auth_failed` is a terminal latch: once set, no attempt is scheduled
//!   until [`enable`](ReconnectPolicy::enable) re-arms the policy.
//!
//! `enable()` and `disable()` are the only entry points that mutate the
//! gate; the session controller invokes them based on authentication
//! outcome. The connection task only consumes attempts via
//! [`next_delay`](ReconnectPolicy::next_delay) and reports results.

use std::sync::Mutex;
use std::time::Duration;

/// Default hard ceiling on consecutive reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base delay; attempt `n` waits `n * base`.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug)]
struct PolicyState {
    attempts: u32,
    allowed: bool,
    auth_failed: bool,
}

/// Reconnection gate shared between the connection task and the supervisor.
///
/// Invariant: `auth_failed` implies `!allowed`.
#[derive(Debug)]
pub struct ReconnectPolicy {
    state: Mutex<PolicyState>,
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectPolicy {
    /// Create a policy with the default ceiling and backoff.
    pub fn new() -> Self {
        Self::with_backoff(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY)
    }

    /// Create a policy with a custom ceiling and base delay.
    pub fn with_backoff(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            state: Mutex::new(PolicyState {
                attempts: 0,
                allowed: true,
                auth_failed: false,
            }),
            max_attempts,
            base_delay,
        }
    }

    /// Re-arm the policy: clears the attempt counter and the auth latch.
    ///
    /// Called by the session controller on every successful identity
    /// confirmation, before a connect is requested.
    pub fn enable(&self) {
        let mut state = self.lock();
        state.attempts = 0;
        state.auth_failed = false;
        state.allowed = true;
        log::debug!("[reconnect] policy enabled");
    }

    /// Shut the gate permanently until `enable()` is called again.
    ///
    /// Called by the session controller on terminal auth failure.
    pub fn disable(&self) {
        let mut state = self.lock();
        state.allowed = false;
        state.auth_failed = true;
        log::debug!("[reconnect] policy disabled");
    }

    /// Consume one reconnect attempt.
    ///
    /// Returns the delay to wait before the attempt, or `None` when no
    /// attempt may be made: the gate is shut, the auth latch is set, or the
    /// ceiling is reached (which shuts the gate as a side effect).
    pub fn next_delay(&self) -> Option<Duration> {
        let mut state = self.lock();
        if !state.allowed || state.auth_failed {
            return None;
        }
        if state.attempts >= self.max_attempts {
            log::warn!(
                "[reconnect] ceiling of {} attempts reached, giving up",
                self.max_attempts
            );
            state.allowed = false;
            return None;
        }
        state.attempts += 1;
        let delay = self.base_delay.saturating_mul(state.attempts);
        log::info!(
            "[reconnect] scheduling attempt {} of {} in {:?}",
            state.attempts,
            self.max_attempts,
            delay
        );
        Some(delay)
    }

    /// Reset the attempt counter after a successful connect.
    pub fn record_success(&self) {
        self.lock().attempts = 0;
    }

    /// Latch the policy off after a classified authentication failure.
    ///
    /// Unlike [`disable`], this is invoked from inside the connection task
    /// when the handshake itself is rejected for auth reasons.
    pub fn mark_auth_failed(&self) {
        let mut state = self.lock();
        state.auth_failed = true;
        state.allowed = false;
        log::warn!("[reconnect] authentication failure latched, retries suppressed");
    }

    /// Whether retries are currently allowed.
    pub fn is_allowed(&self) -> bool {
        self.lock().allowed
    }

    /// Whether the authentication latch is set.
    pub fn auth_failed(&self) -> bool {
        self.lock().auth_failed
    }

    /// Number of attempts consumed since the last success or `enable()`.
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PolicyState> {
        // A poisoned lock means a panic mid-update; the state is a trio of
        // scalars so continuing with the latest values is sound.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
