//! Google API client
//!
//! Authenticates each request with a token from an account's token source.

use serde::Deserialize;

use crate::auth::{Token, TokenSource};
use crate::config::google::{GMAIL_API_BASE_URL, USER_ID};
use crate::error::{GoogleMcpError, Result};

/// Gmail profile response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Primary address of the mailbox
    pub email_address: String,

    #[serde(default)]
    pub messages_total: Option<u64>,

    #[serde(default)]
    pub threads_total: Option<u64>,
}

/// Google API client
#[derive(Clone)]
pub struct GoogleClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GoogleClient {
    /// Create a new client against the public Gmail endpoint
    pub fn new(http_client: reqwest::Client) -> Self {
        Self::with_base_url(http_client, GMAIL_API_BASE_URL)
    }

    /// Create a client against another Gmail-compatible endpoint
    pub fn with_base_url(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }

    /// Fetch the mailbox profile of the account behind `source`
    pub async fn profile<S: TokenSource>(&self, source: &S) -> Result<Profile> {
        let token = source.token().await?;
        self.profile_with_token(&token).await
    }

    /// Fetch the mailbox profile with an already valid token
    pub async fn profile_with_token(&self, token: &Token) -> Result<Profile> {
        let url = format!("{}/users/{}/profile", self.base_url, USER_ID);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(GoogleMcpError::Api {
                message: format!("Failed to get profile ({}): {}", status, text),
            })
        }
    }
}
