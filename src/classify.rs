//! Classification of protocol error messages.
//!
//! The notification endpoint reports handshake rejections as plain error
//! frames with a message string, so telling an auth-rejected handshake apart
//! from a generic failure comes down to matching that text. The matching
//! strategy lives in this one function so call sites never depend on it; if
//! the protocol ever grows a structured error code, only this module changes.

/// Message fragments that mark a protocol error as an authentication failure.
const AUTH_FAILURE_PATTERNS: &[&str] = &[
    "token not found",
    "unauthorized",
    "access denied",
    "forbidden",
    "invalid token",
    "expired token",
];

/// Whether a protocol error message describes an authentication failure.
///
/// Authentication failures are terminal for the reconnect loop: retrying
/// with the same credentials cannot succeed.
pub(crate) fn is_auth_failure_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    AUTH_FAILURE_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}
