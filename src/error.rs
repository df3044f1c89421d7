//! Error types for the Google MCP Server
//!
//! This module defines the error hierarchy for all operations in the server.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the Google MCP Server
#[derive(Error, Debug)]
pub enum GoogleMcpError {
    /// OAuth authorization and token errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Account lookup and token record errors
    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local filesystem sandbox errors
    #[error("Local file error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Google API errors
    #[error("Google API error: {message}")]
    Api { message: String },

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// OAuth authorization and token errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error(
        "OAuth client credentials not found at {path}. Create a \"Desktop app\" OAuth client in \
         the Google Cloud console (APIs & Services > Credentials), download its JSON and save it \
         to that path, or point GOOGLE_MCP_CLIENT_CREDENTIALS at it"
    )]
    ClientCredentialsNotFound { path: String },

    #[error("Invalid OAuth client credentials in {path}: {message}")]
    InvalidClientCredentials { path: String, message: String },

    #[error("OAuth callback listener failed: {message}")]
    CallbackListener { message: String },

    #[error("Authorization denied: {error}")]
    AccessDenied { error: String },

    #[error("No authorization code provided")]
    NoAuthCode,

    #[error("Token exchange failed: {message}")]
    TokenExchangeFailed { message: String },

    #[error("Failed to refresh access token: {message}")]
    TokenRefreshFailed { message: String },

    #[error("Token expired and no refresh token is stored for account '{account}'")]
    MissingRefreshToken { account: String },

    #[error("Authorization cancelled")]
    Cancelled,

    #[error("Authorization timed out after {secs} seconds")]
    TimedOut { secs: u64 },
}

/// Account lookup and token record errors
#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Account not found: {name}")]
    NotFound { name: String },

    #[error("No accounts configured. Run 'google-mcp accounts add <name>' first")]
    NoAccountsConfigured,

    #[error("Malformed token record {path}: {message}")]
    MalformedRecord { path: String, message: String },

    #[error("Token record {path} has unsupported version {version}")]
    UnsupportedVersion { path: String, version: u64 },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Home directory not found, set GOOGLE_MCP_CONFIG_DIR")]
    HomeNotFound,

    #[error("Failed to create config directory {path}: {source}")]
    DirCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid local directory spec '{spec}': {message}")]
    InvalidLocalDir { spec: String, message: String },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnvVar { var: String, value: String },
}

/// Local filesystem sandbox errors
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("local access not enabled")]
    Disabled,

    #[error("local access has been closed")]
    Closed,

    #[error("Invalid local directory {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("Path '{path}' is outside every allowed directory")]
    OutsideSandbox { path: String },

    #[error("'{path}' not found in any allowed directory")]
    NotFound { path: String },

    #[error("No read-write directory accepts '{path}'")]
    NoWritableDirectory { path: String },

    #[error("Allowed directory {path} was replaced after startup")]
    RootReplaced { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// MCP protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },
}

/// Result type alias for Google MCP operations
pub type Result<T> = std::result::Result<T, GoogleMcpError>;
