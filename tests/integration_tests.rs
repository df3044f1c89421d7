//! Integration tests for the Google MCP Server
//!
//! These tests run the account lifecycle end to end against a local mock of
//! the OAuth token endpoint and the Gmail profile endpoint. The browser is
//! simulated by a presenter that calls the redirect URL itself.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::extract::Form;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use google_mcp_server::auth::{AccountManager, CredentialStore, TokenSource, UrlPresenter};
use google_mcp_server::config::Config;
use google_mcp_server::error::{AccountError, AuthError, GoogleMcpError};
use google_mcp_server::google::GoogleClient;
use google_mcp_server::local::LocalFiles;
use google_mcp_server::mcp::tools::ToolHandler;

async fn token_endpoint(Form(form): Form<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
    let field = |key: &str| form.get(key).map(String::as_str);

    match (field("grant_type"), field("code"), field("refresh_token")) {
        (Some("authorization_code"), Some("abc"), _) => (
            StatusCode::OK,
            Json(json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "token_type": "Bearer",
                "expires_in": 3600
            })),
        ),
        (Some("refresh_token"), _, Some("refresh-1")) => (
            StatusCode::OK,
            Json(json!({
                "access_token": "access-2",
                "token_type": "Bearer",
                "expires_in": 3600
            })),
        ),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant"})),
        ),
    }
}

async fn profile_endpoint(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("Bearer access-"))
        .unwrap_or(false);

    if authorized {
        (
            StatusCode::OK,
            Json(json!({
                "emailAddress": "work@example.com",
                "messagesTotal": 12,
                "threadsTotal": 7
            })),
        )
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})))
    }
}

/// Start the mock Google endpoints; returns their base URL
async fn spawn_google_mock() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/token", post(token_endpoint))
        .route("/gmail/v1/users/me/profile", get(profile_endpoint));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn write_client_credentials(config_dir: &Path, base_url: &str) {
    std::fs::create_dir_all(config_dir).unwrap();
    let credentials = json!({
        "installed": {
            "client_id": "test-client-id",
            "client_secret": "test-secret",
            "auth_uri": format!("{}/auth", base_url),
            "token_uri": format!("{}/token", base_url),
            "redirect_uris": ["http://localhost"]
        }
    });
    std::fs::write(
        config_dir.join("client_secret.json"),
        credentials.to_string(),
    )
    .unwrap();
}

fn query_param(url: &str, key: &str) -> String {
    let query = url.split_once('?').map(|(_, q)| q).unwrap_or_default();
    query
        .split('&')
        .find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then(|| urlencoding::decode(v).unwrap().into_owned())
        })
        .unwrap()
}

/// Plays the operator's browser: follows the redirect with `params`
fn simulated_browser(params: &'static str) -> UrlPresenter {
    Arc::new(move |url: &str| {
        let callback = format!(
            "{}?{}&state={}",
            query_param(url, "redirect_uri"),
            params,
            query_param(url, "state")
        );
        tokio::spawn(async move {
            let _ = reqwest::get(&callback).await;
        });
    })
}

async fn manager(config_dir: &Path, params: &'static str) -> AccountManager {
    AccountManager::new(Config::with_dir(config_dir))
        .await
        .unwrap()
        .with_presenter(simulated_browser(params))
}

mod account_lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_authorize_resolve_and_refresh() {
        let base_url = spawn_google_mock().await;
        let dir = tempfile::tempdir().unwrap();
        write_client_credentials(dir.path(), &base_url);
        let accounts = manager(dir.path(), "code=abc").await;

        accounts
            .authenticate("work", &CancellationToken::new())
            .await
            .unwrap();

        let listed = accounts.list_accounts().await;
        assert_eq!(listed.keys().cloned().collect::<Vec<_>>(), vec!["work".to_string()]);
        assert_eq!(accounts.resolve("all").await.unwrap(), vec!["work".to_string()]);

        let stored = accounts.store().token("work").await.unwrap();
        assert_eq!(stored.access_token, "access-1");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));

        // Force the base refresher to fetch a new access token
        let mut expired = stored.clone();
        expired.expiry = Some(0);
        accounts.store().update_token("work", expired).await.unwrap();

        let source = accounts.token_source("work").await.unwrap();
        let token = source.token().await.unwrap();
        assert_eq!(token.access_token, "access-2");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));

        assert_eq!(
            accounts.store().token("work").await.unwrap().access_token,
            "access-2"
        );
        let reloaded = CredentialStore::open(dir.path().join("accounts.json"))
            .await
            .unwrap();
        assert_eq!(reloaded.token("work").await.unwrap().access_token, "access-2");
    }

    #[tokio::test]
    async fn test_denied_consent_leaves_store_unchanged() {
        let base_url = spawn_google_mock().await;
        let dir = tempfile::tempdir().unwrap();
        write_client_credentials(dir.path(), &base_url);
        let accounts = manager(dir.path(), "error=access_denied").await;

        let err = accounts
            .authenticate("work", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GoogleMcpError::Auth(AuthError::AccessDenied { .. })));
        assert!(accounts.list_accounts().await.is_empty());
        assert!(!dir.path().join("accounts.json").exists());
    }

    #[tokio::test]
    async fn test_failed_exchange_leaves_store_unchanged() {
        let base_url = spawn_google_mock().await;
        let dir = tempfile::tempdir().unwrap();
        write_client_credentials(dir.path(), &base_url);
        let accounts = manager(dir.path(), "code=wrong").await;

        let err = accounts
            .authenticate("work", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GoogleMcpError::Auth(AuthError::TokenExchangeFailed { .. })
        ));
        assert!(accounts.list_accounts().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_client_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = manager(dir.path(), "code=abc").await;

        let err = accounts
            .authenticate("work", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GoogleMcpError::Auth(AuthError::ClientCredentialsNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_account() {
        let base_url = spawn_google_mock().await;
        let dir = tempfile::tempdir().unwrap();
        write_client_credentials(dir.path(), &base_url);
        let accounts = manager(dir.path(), "code=abc").await;
        let cancel = CancellationToken::new();

        accounts.authenticate("personal", &cancel).await.unwrap();
        accounts.authenticate("work", &cancel).await.unwrap();
        accounts.remove_account("personal").await.unwrap();

        assert!(matches!(
            accounts.remove_account("personal").await,
            Err(GoogleMcpError::Account(AccountError::NotFound { .. }))
        ));
        let reloaded = CredentialStore::open(dir.path().join("accounts.json"))
            .await
            .unwrap();
        assert_eq!(reloaded.account_names().await, vec!["work".to_string()]);
    }
}

mod tool_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_profile_fans_out_and_records_email() {
        let base_url = spawn_google_mock().await;
        let dir = tempfile::tempdir().unwrap();
        write_client_credentials(dir.path(), &base_url);
        let accounts = Arc::new(manager(dir.path(), "code=abc").await);
        let cancel = CancellationToken::new();
        accounts.authenticate("personal", &cancel).await.unwrap();
        accounts.authenticate("work", &cancel).await.unwrap();

        let google = GoogleClient::with_base_url(
            reqwest::Client::new(),
            format!("{}/gmail/v1", base_url),
        );
        let handler = ToolHandler::new(accounts.clone(), google, Arc::new(LocalFiles::disabled()));

        let result = handler
            .call_tool("get_profile", json!({"account": "all"}))
            .await;
        assert!(!result.is_error, "{}", result.first_text());
        assert!(result.first_text().contains("personal: work@example.com"));
        assert!(result.first_text().contains("work: work@example.com (12 messages, 7 threads)"));

        let listed = accounts.list_accounts().await;
        assert_eq!(listed.get("work").map(String::as_str), Some("work@example.com"));
        assert_eq!(listed.get("personal").map(String::as_str), Some("work@example.com"));
    }
}
