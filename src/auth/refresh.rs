//! Token refresh
//!
//! [`OAuthTokenSource`] refreshes an expired access token with the refresh
//! token grant. [`RefreshingTokenSource`] wraps any source and writes every
//! newly seen token back to the credential store.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::auth::flow::ClientCredentials;
use crate::auth::store::CredentialStore;
use crate::auth::token::{Token, TokenResponse, EXPIRY_SKEW_SECS};
use crate::error::{AuthError, GoogleMcpError, Result};

/// Something that can hand out a currently valid token
pub trait TokenSource: Send + Sync {
    /// Return a valid token, refreshing it first if needed
    fn token(&self) -> impl Future<Output = Result<Token>> + Send;
}

/// Base refresher for one account: returns the current token until it is
/// about to expire, then runs the refresh token grant. The client
/// credentials file is only read on the first refresh.
pub struct OAuthTokenSource {
    account: String,
    http: reqwest::Client,
    credentials_path: PathBuf,
    credentials: OnceCell<ClientCredentials>,
    current: Mutex<Token>,
}

impl OAuthTokenSource {
    pub fn new(
        account: impl Into<String>,
        http: reqwest::Client,
        credentials_path: impl Into<PathBuf>,
        token: Token,
    ) -> Self {
        Self {
            account: account.into(),
            http,
            credentials_path: credentials_path.into(),
            credentials: OnceCell::new(),
            current: Mutex::new(token),
        }
    }

    async fn credentials(&self) -> Result<&ClientCredentials> {
        self.credentials
            .get_or_try_init(|| ClientCredentials::load(&self.credentials_path))
            .await
    }

    /// Refresh the access token using the refresh token
    async fn refresh(&self, token: &Token) -> Result<Token> {
        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            GoogleMcpError::Auth(AuthError::MissingRefreshToken {
                account: self.account.clone(),
            })
        })?;
        let credentials = self.credentials().await?;

        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let refresh_failed =
            |message: String| GoogleMcpError::Auth(AuthError::TokenRefreshFailed { message });

        let response = self
            .http
            .post(&credentials.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| refresh_failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(refresh_failed(format!("{}: {}", status, text)));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| refresh_failed(e.to_string()))?;
        debug!(account = %self.account, "access token refreshed");
        Ok(token_response.into_token(Some(refresh_token)))
    }
}

impl TokenSource for OAuthTokenSource {
    async fn token(&self) -> Result<Token> {
        let mut current = self.current.lock().await;
        if current.expires_within(EXPIRY_SKEW_SECS) {
            let refreshed = self.refresh(&current).await?;
            *current = refreshed;
        }
        Ok(current.clone())
    }
}

/// Write-through wrapper persisting refreshed tokens for one account
pub struct RefreshingTokenSource<S> {
    account: String,
    base: S,
    store: Arc<CredentialStore>,
    last_seen: Mutex<String>,
}

impl<S: TokenSource> RefreshingTokenSource<S> {
    /// `current` is the token the store holds right now
    pub fn new(
        account: impl Into<String>,
        base: S,
        store: Arc<CredentialStore>,
        current: &Token,
    ) -> Self {
        Self {
            account: account.into(),
            base,
            store,
            last_seen: Mutex::new(current.access_token.clone()),
        }
    }

    /// Account this source serves
    pub fn account(&self) -> &str {
        &self.account
    }
}

impl<S: TokenSource> TokenSource for RefreshingTokenSource<S> {
    async fn token(&self) -> Result<Token> {
        let token = self.base.token().await?;

        let mut last_seen = self.last_seen.lock().await;
        if *last_seen != token.access_token {
            *last_seen = token.access_token.clone();
            // Best effort: the caller still gets the valid token. A lost
            // write means the next process start reuses the old refresh token.
            if let Err(e) = self.store.update_token(&self.account, token.clone()).await {
                warn!(
                    account = %self.account,
                    error = %e,
                    "failed to persist refreshed token"
                );
            }
        }

        Ok(token)
    }
}
