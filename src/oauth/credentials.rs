use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::codec::{flexible_u64, flexible_u64_opt};

/// Device code challenge returned by the identity provider
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeviceCodeChallenge {
    pub user_code: String,
    pub device_code: String,
    pub verification_url: String,
    #[serde(deserialize_with = "flexible_u64")]
    pub expires_in: u64,
    #[serde(deserialize_with = "flexible_u64")]
    pub interval: u64,
    /// Human readable instructions for the user
    #[serde(default)]
    pub message: String,
}

impl DeviceCodeChallenge {
    /// Number of token polls allowed before the challenge expires.
    /// Zero when the challenge expires before the first interval elapses.
    pub fn max_poll_attempts(&self) -> u64 {
        self.expires_in / self.poll_interval().as_secs()
    }

    /// Declared polling interval, never shorter than one second
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }
}

/// Successful response from the token endpoint
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenResponse {
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(deserialize_with = "flexible_u64")]
    pub expires_in: u64,
    #[serde(default, deserialize_with = "flexible_u64_opt")]
    pub ext_expires_in: Option<u64>,
    #[serde(default, deserialize_with = "flexible_u64_opt")]
    pub not_before: Option<u64>,
    #[serde(default)]
    pub resource: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Error (or pending) response from the token endpoint
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TokenErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_codes: Vec<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

impl TokenErrorResponse {
    /// Provider description, falling back to the bare error code
    pub fn description(&self) -> String {
        self.error_description
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Access and refresh tokens held for the lifetime of a session
#[derive(Clone, PartialEq)]
pub struct AuthTokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_seconds: u64,
    obtained_at: Instant,
}

impl std::fmt::Debug for AuthTokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}

impl AuthTokenSet {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_seconds: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in_seconds,
            obtained_at: Instant::now(),
        }
    }

    /// Check if the access token has outlived its declared lifetime
    pub fn is_expired(&self) -> bool {
        self.obtained_at.elapsed() >= Duration::from_secs(self.expires_in_seconds)
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.trim().is_empty()
    }
}

impl From<TokenResponse> for AuthTokenSet {
    fn from(response: TokenResponse) -> Self {
        AuthTokenSet::new(
            response.access_token,
            response.refresh_token,
            response.expires_in,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_with_string_encoded_numbers() {
        let json = r#"{
            "user_code": "FGH123",
            "device_code": "dev-code",
            "verification_url": "https://microsoft.com/devicelogin",
            "expires_in": "900",
            "interval": "5",
            "message": "To sign in, use a web browser"
        }"#;

        let challenge: DeviceCodeChallenge = serde_json::from_str(json).unwrap();
        assert_eq!(challenge.expires_in, 900);
        assert_eq!(challenge.interval, 5);
        assert_eq!(challenge.max_poll_attempts(), 180);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let challenge = DeviceCodeChallenge {
            user_code: "A".to_string(),
            device_code: "B".to_string(),
            verification_url: "https://example.test".to_string(),
            expires_in: 3,
            interval: 0,
            message: String::new(),
        };

        assert_eq!(challenge.poll_interval(), Duration::from_secs(1));
        assert_eq!(challenge.max_poll_attempts(), 3);
    }

    #[test]
    fn test_challenge_shorter_than_interval_allows_no_polls() {
        let challenge = DeviceCodeChallenge {
            user_code: "A".to_string(),
            device_code: "B".to_string(),
            verification_url: "https://example.test".to_string(),
            expires_in: 3,
            interval: 5,
            message: String::new(),
        };

        assert_eq!(challenge.max_poll_attempts(), 0);
    }

    #[test]
    fn test_token_response_tolerates_azure_v1_strings() {
        let json = r#"{
            "token_type": "Bearer",
            "scope": "user_impersonation",
            "expires_in": "3599",
            "ext_expires_in": "3599",
            "not_before": "1700000000",
            "resource": "https://management.core.windows.net/",
            "access_token": "at",
            "refresh_token": "rt",
            "id_token": "it"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.expires_in, 3599);
        assert_eq!(response.not_before, Some(1_700_000_000));

        let tokens = AuthTokenSet::from(response);
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token, "rt");
        assert!(!tokens.is_expired());
    }

    #[test]
    fn test_debug_output_redacts_tokens() {
        let tokens = AuthTokenSet::new("secret-access", "secret-refresh", 60);
        let debug = format!("{:?}", tokens);
        assert!(!debug.contains("secret"));
    }
}
