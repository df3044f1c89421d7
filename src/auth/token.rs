//! OAuth token type shared by the store, the authorization flow and refresh.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Refresh when the access token has less than this many seconds left
pub const EXPIRY_SKEW_SECS: i64 = 300;

/// Bearer credential for one account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Access token
    pub access_token: String,

    /// Refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Expiry timestamp (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// True if the token has no more than `secs` seconds of validity left.
    /// Tokens without an expiry never expire.
    pub fn expires_within(&self, secs: i64) -> bool {
        match self.expiry {
            Some(expiry) => expiry.saturating_sub(now_unix()) <= secs,
            None => false,
        }
    }
}

// Keeps secrets out of logs and error chains.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Token response from the OAuth token endpoint
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<i64>,
}

impl TokenResponse {
    /// Convert to a stored token. Refresh responses usually omit the
    /// refresh token, in which case `previous_refresh` is kept.
    pub(crate) fn into_token(self, previous_refresh: Option<String>) -> Token {
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            token_type: self.token_type,
            expiry: self.expires_in.map(|secs| now_unix().saturating_add(secs)),
        }
    }
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
