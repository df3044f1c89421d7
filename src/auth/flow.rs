//! Interactive OAuth authorization
//!
//! One run binds a loopback listener on an OS-assigned port, hands the
//! authorization URL to the operator, waits for exactly one callback (or
//! cancellation, or timeout), tears the listener down and exchanges the code.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::token::{Token, TokenResponse};
use crate::config::DEFAULT_AUTH_TIMEOUT_SECS;
use crate::error::{AuthError, GoogleMcpError, Result};

/// Path of the local redirect endpoint
pub const CALLBACK_PATH: &str = "/callback";

/// How long a shut-down listener may take to drain before it is aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const SUCCESS_PAGE: &str = "<html><body><h1>Authorization complete</h1><p>You can close this window.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Authorization failed</h1><p>Check the terminal for details.</p></body></html>";
const STATE_MISMATCH_PAGE: &str = "<html><body><h1>Invalid request</h1><p>State parameter did not match.</p></body></html>";
const ALREADY_HANDLED_PAGE: &str = "<html><body><h1>Already handled</h1><p>This authorization has already completed.</p></body></html>";

/// OAuth client credentials ("installed application" descriptor)
#[derive(Clone, Deserialize)]
pub struct ClientCredentials {
    /// Client ID
    pub client_id: String,

    /// Client secret
    pub client_secret: String,

    /// Auth URI
    pub auth_uri: String,

    /// Token URI
    pub token_uri: String,

    /// Redirect URIs registered for the client
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Client credentials file format (can be "installed" or "web")
#[derive(Deserialize)]
struct ClientCredentialsFile {
    #[serde(alias = "web")]
    installed: Option<ClientCredentials>,
}

impl ClientCredentials {
    /// Load client credentials from the administrator-supplied file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GoogleMcpError::Auth(AuthError::ClientCredentialsNotFound {
                    path: path.display().to_string(),
                }));
            }
            Err(e) => return Err(e.into()),
        };

        let invalid = |message: String| {
            GoogleMcpError::Auth(AuthError::InvalidClientCredentials {
                path: path.display().to_string(),
                message,
            })
        };

        let file: ClientCredentialsFile =
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        file.installed
            .ok_or_else(|| invalid("expected an 'installed' or 'web' client".to_string()))
    }
}

/// Receives the authorization URL that the operator must visit
pub type UrlPresenter = Arc<dyn Fn(&str) + Send + Sync>;

/// Print the URL to stderr and try to open it in a browser
pub fn browser_presenter() -> UrlPresenter {
    Arc::new(|url: &str| {
        eprintln!("\nPlease visit this URL to authorize the account:");
        eprintln!("{}\n", url);

        if let Err(e) = open::that(url) {
            eprintln!("Could not open browser automatically: {}", e);
            eprintln!("Please open the URL manually.");
        }
    })
}

/// One interactive authorization handshake
pub struct AuthorizationFlow {
    http: reqwest::Client,
    credentials: ClientCredentials,
    scopes: Vec<String>,
    timeout: Duration,
    presenter: UrlPresenter,
}

impl AuthorizationFlow {
    /// Create a flow for the given client and scope set
    pub fn new(http: reqwest::Client, credentials: ClientCredentials, scopes: Vec<String>) -> Self {
        Self {
            http,
            credentials,
            scopes,
            timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            presenter: browser_presenter(),
        }
    }

    /// Limit how long to wait for the callback
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the default browser presenter
    pub fn with_presenter(mut self, presenter: UrlPresenter) -> Self {
        self.presenter = presenter;
        self
    }

    /// Generate the authorization URL
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            self.credentials.auth_uri,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }

    /// Run the handshake and return the exchanged token.
    /// Nothing is persisted here; committing is the caller's job.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Token> {
        let (code, redirect_uri) = self.wait_for_code(cancel).await?;

        info!("received authorization code, exchanging for tokens");
        tokio::select! {
            token = self.exchange_code(&code, &redirect_uri) => token,
            _ = cancel.cancelled() => Err(GoogleMcpError::Auth(AuthError::Cancelled)),
        }
    }

    /// Serve the callback endpoint until one outcome is known, then tear it down
    async fn wait_for_code(&self, cancel: &CancellationToken) -> Result<(String, String)> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .map_err(listener_error)?;
        let port = listener.local_addr().map_err(listener_error)?.port();
        let redirect_uri = format!("http://127.0.0.1:{}{}", port, CALLBACK_PATH);
        let state = Uuid::new_v4().simple().to_string();

        let (tx, rx) = oneshot::channel();
        let app = callback_router(state.clone(), tx);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        (self.presenter)(&self.authorization_url(&redirect_uri, &state));
        info!(port, "waiting for authorization callback");

        let outcome = tokio::select! {
            received = rx => received.unwrap_or_else(|_| Err(AuthError::CallbackListener {
                message: "listener stopped before a callback arrived".to_string(),
            })),
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            _ = tokio::time::sleep(self.timeout) => Err(AuthError::TimedOut {
                secs: self.timeout.as_secs(),
            }),
        };

        let _ = shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "callback listener exited with error"),
            Ok(_) => debug!(port, "callback listener stopped"),
            Err(_) => {
                server.abort();
                debug!(port, "callback listener aborted after grace period");
            }
        }

        let code = outcome?;
        Ok((code, redirect_uri))
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Token> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let exchange_failed = |message: String| {
            GoogleMcpError::Auth(AuthError::TokenExchangeFailed { message })
        };

        let response = self
            .http
            .post(&self.credentials.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| exchange_failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(exchange_failed(format!("{}: {}", status, text)));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| exchange_failed(e.to_string()))?;
        Ok(token_response.into_token(None))
    }
}

fn listener_error(e: std::io::Error) -> GoogleMcpError {
    GoogleMcpError::Auth(AuthError::CallbackListener {
        message: e.to_string(),
    })
}

type CallbackOutcome = std::result::Result<String, AuthError>;

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    sender: Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>,
}

fn callback_router(expected_state: String, sender: oneshot::Sender<CallbackOutcome>) -> Router {
    let state = CallbackState {
        expected_state: expected_state.into(),
        sender: Arc::new(Mutex::new(Some(sender))),
    };
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .with_state(state)
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    if params.get("state").map(String::as_str) != Some(&*state.expected_state) {
        warn!("ignoring authorization callback with mismatched state");
        return (StatusCode::BAD_REQUEST, Html(STATE_MISMATCH_PAGE));
    }

    let outcome = match (params.get("error"), params.get("code")) {
        (Some(error), _) => Err(AuthError::AccessDenied {
            error: error.clone(),
        }),
        (None, Some(code)) if !code.is_empty() => Ok(code.clone()),
        _ => Err(AuthError::NoAuthCode),
    };
    let page = if outcome.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };

    let sender = state.sender.lock().ok().and_then(|mut slot| slot.take());
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
            (StatusCode::OK, Html(page))
        }
        None => (StatusCode::CONFLICT, Html(ALREADY_HANDLED_PAGE)),
    }
}
