use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The distinguished login response message that suspends the flow pending a
/// one-time-code step instead of failing it.
pub const TWO_FACTOR_REQUIRED: &str = "Two-factor authentication required";

/// The identity returned by the identity-confirm endpoint (`GET /auth/me`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthIdentity {
    /// User ID.
    pub id: String,
    /// Email, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Role, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Full user record (`GET /users/{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// User ID.
    pub id: String,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Wallet balance in minor units, when exposed.
    #[serde(default)]
    pub wallet_balance: Option<i64>,
}

/// Login credentials.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Login response (`POST /auth/login`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Status message; [`TWO_FACTOR_REQUIRED`] marks the suspended branch.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl LoginResponse {
    /// Whether this response requires the one-time-code step.
    pub fn requires_two_factor(&self) -> bool {
        self.message == TWO_FACTOR_REQUIRED
    }
}

/// Authenticated-session state owned by the session controller.
///
/// `is_authenticated` and `user` are always set and cleared together.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Confirmed identity, when authenticated.
    pub identity: Option<AuthIdentity>,
    /// Full user record, when authenticated.
    pub user: Option<UserRecord>,
    /// Whether the session is currently authenticated.
    pub is_authenticated: bool,
    /// Whether an identity confirmation is in progress.
    pub loading: bool,
    /// Last auth error surfaced to the UI, if any.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_two_factor_detection() {
        let response = LoginResponse {
            message: TWO_FACTOR_REQUIRED.to_string(),
            data: None,
        };
        assert!(response.requires_two_factor());

        let response = LoginResponse {
            message: "Login successful".to_string(),
            data: None,
        };
        assert!(!response.requires_two_factor());
    }

    #[test]
    fn test_identity_ignores_extra_fields() {
        let identity: AuthIdentity = serde_json::from_value(json!({
            "id": "42",
            "email": "a@example.com",
            "created_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(identity.id, "42");
        assert_eq!(identity.email.as_deref(), Some("a@example.com"));
        assert!(identity.role.is_none());
    }

    #[test]
    fn test_default_session_is_unauthenticated() {
        let session = Session::default();
        assert!(!session.is_authenticated);
        assert!(session.user.is_none());
        assert!(session.identity.is_none());
    }
}
