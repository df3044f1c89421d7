//! Multi-account OAuth credentials
//!
//! - [`store`]: durable record of named accounts and their tokens
//! - [`resolver`]: account selector ("name" or "all") resolution
//! - [`flow`]: interactive browser authorization for a new account
//! - [`refresh`]: token sources that refresh and write back tokens

pub mod flow;
pub mod refresh;
pub mod resolver;
pub mod store;
pub mod token;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::Result;

pub use flow::{browser_presenter, AuthorizationFlow, ClientCredentials, UrlPresenter};
pub use refresh::{OAuthTokenSource, RefreshingTokenSource, TokenSource};
pub use resolver::{AccountSelector, ALL_ACCOUNTS};
pub use store::{Account, CredentialStore};
pub use token::Token;

/// Token source handed to API consumers
pub type AccountTokenSource = RefreshingTokenSource<OAuthTokenSource>;

/// Entry point for everything account related. Built once at startup and
/// shared by reference with every consumer.
pub struct AccountManager {
    config: Config,
    store: Arc<CredentialStore>,
    http: reqwest::Client,
    presenter: UrlPresenter,
}

impl AccountManager {
    /// Load the credential store named by `config`
    pub async fn new(config: Config) -> Result<Self> {
        let store = CredentialStore::open(&config.accounts_path).await?;
        Ok(Self {
            config,
            store: Arc::new(store),
            http: reqwest::Client::new(),
            presenter: browser_presenter(),
        })
    }

    /// Replace how the authorization URL reaches the operator
    pub fn with_presenter(mut self, presenter: UrlPresenter) -> Self {
        self.presenter = presenter;
        self
    }

    /// Underlying credential store
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Name to email for every account
    pub async fn list_accounts(&self) -> BTreeMap<String, String> {
        self.store.list_accounts().await
    }

    /// Resolve an account selector to account names
    pub async fn resolve(&self, selector: &str) -> Result<Vec<String>> {
        self.store.resolve(selector).await
    }

    /// Delete an account and its token
    pub async fn remove_account(&self, name: &str) -> Result<()> {
        self.store.remove_account(name).await
    }

    /// Token source for one account; refreshed tokens are written back.
    /// Client credentials are only needed once a refresh is due.
    pub async fn token_source(&self, name: &str) -> Result<AccountTokenSource> {
        let token = self.store.token(name).await?;
        let base = OAuthTokenSource::new(
            name,
            self.http.clone(),
            &self.config.client_credentials_path,
            token.clone(),
        );
        Ok(RefreshingTokenSource::new(
            name,
            base,
            self.store.clone(),
            &token,
        ))
    }

    /// Authorize `name` with the configured scopes
    pub async fn authenticate(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let scopes = self.config.scopes.clone();
        self.authenticate_with_scopes(name, scopes, cancel).await
    }

    /// Authorize `name` interactively and commit the resulting token.
    /// On any failure the store is left unchanged.
    pub async fn authenticate_with_scopes(
        &self,
        name: &str,
        scopes: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let credentials = ClientCredentials::load(&self.config.client_credentials_path).await?;
        let flow = AuthorizationFlow::new(self.http.clone(), credentials, scopes)
            .with_timeout(self.config.auth_timeout)
            .with_presenter(self.presenter.clone());

        info!(account = name, "starting authorization");
        let token = flow.run(cancel).await?;
        self.store.upsert_account(name, token).await
    }
}
