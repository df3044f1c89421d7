//! Configuration management for the Google MCP Server
//!
//! Handles paths, environment variables, and sandbox directory specs.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, GoogleMcpError, Result};
use crate::local::{AccessMode, LocalDir};

/// File name of the token record inside the config directory
pub const ACCOUNTS_FILE: &str = "accounts.json";

/// Default file name of the OAuth client credentials
pub const CLIENT_CREDENTIALS_FILE: &str = "client_secret.json";

/// Default time to wait for the operator to finish authorization
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 300;

/// Configuration for the Google MCP Server
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for storing configuration files
    pub config_dir: PathBuf,

    /// Path to OAuth client credentials
    pub client_credentials_path: PathBuf,

    /// Path to stored accounts and tokens
    pub accounts_path: PathBuf,

    /// Scopes requested when adding an account
    pub scopes: Vec<String>,

    /// How long `accounts add` waits for the browser callback
    pub auth_timeout: Duration,

    /// Approved local directories, in search order
    pub local_dirs: Vec<LocalDir>,
}

impl Config {
    /// Create a configuration from the environment. Never touches the disk.
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var("GOOGLE_MCP_CONFIG_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .ok_or(GoogleMcpError::Config(ConfigError::HomeNotFound))?
                .join(".google-mcp"),
        };

        let mut config = Self::with_dir(config_dir);

        if let Ok(path) = std::env::var("GOOGLE_MCP_CLIENT_CREDENTIALS") {
            config.client_credentials_path = PathBuf::from(path);
        }

        if let Ok(value) = std::env::var("GOOGLE_MCP_AUTH_TIMEOUT_SECS") {
            let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidEnvVar {
                var: "GOOGLE_MCP_AUTH_TIMEOUT_SECS".to_string(),
                value: value.clone(),
            })?;
            config.auth_timeout = Duration::from_secs(secs);
        }

        if let Ok(value) = std::env::var("GOOGLE_MCP_LOCAL_DIRS") {
            config.local_dirs = parse_local_dirs(&value)?;
        }

        Ok(config)
    }

    /// Configuration rooted at `config_dir` with default values everywhere else
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            client_credentials_path: config_dir.join(CLIENT_CREDENTIALS_FILE),
            accounts_path: config_dir.join(ACCOUNTS_FILE),
            config_dir,
            scopes: google::DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            local_dirs: Vec::new(),
        }
    }

    /// Check if OAuth client credentials exist
    pub fn client_credentials_exist(&self) -> bool {
        self.client_credentials_path.exists()
    }
}

/// Parse a comma-separated list of `PATH[:ro|:rw]` entries
pub fn parse_local_dirs(value: &str) -> Result<Vec<LocalDir>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<LocalDir>().map_err(GoogleMcpError::from))
        .collect()
}

impl FromStr for LocalDir {
    type Err = ConfigError;

    fn from_str(spec: &str) -> std::result::Result<Self, Self::Err> {
        let (path, mode) = match spec.rsplit_once(':') {
            Some((path, "ro")) => (path, AccessMode::ReadOnly),
            Some((path, "rw")) => (path, AccessMode::ReadWrite),
            _ => (spec, AccessMode::ReadOnly),
        };

        let path = PathBuf::from(path);
        if !path.is_absolute() {
            return Err(ConfigError::InvalidLocalDir {
                spec: spec.to_string(),
                message: "path must be absolute".to_string(),
            });
        }

        Ok(LocalDir { path, mode })
    }
}

/// Google API constants
pub mod google {
    /// Base URL for Gmail API
    pub const GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

    /// User ID for the authenticated user
    pub const USER_ID: &str = "me";

    /// Scopes requested for every new account
    pub const DEFAULT_SCOPES: &[&str] = &[
        "openid",
        "email",
        "https://www.googleapis.com/auth/gmail.modify",
        "https://www.googleapis.com/auth/drive",
        "https://www.googleapis.com/auth/calendar",
    ];
}
