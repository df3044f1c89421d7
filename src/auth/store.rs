//! Credential store
//!
//! Durable record of named accounts and their tokens. The in-memory map is
//! guarded by a read/write lock; every mutation is applied to a copy,
//! persisted, and only then published, all under the exclusive lock.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::auth::resolver::{self, AccountSelector};
use crate::auth::token::Token;
use crate::error::{AccountError, ConfigError, GoogleMcpError, Result};

/// Current on-disk record version
pub const RECORD_VERSION: u32 = 1;

/// A named, authorized identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Email address, resolved lazily after authorization
    #[serde(default)]
    pub email: String,

    /// OAuth token
    pub token: Token,
}

type AccountMap = BTreeMap<String, Account>;

#[derive(Deserialize)]
struct VersionedRecord {
    accounts: AccountMap,
}

#[derive(Serialize)]
struct RecordRef<'a> {
    version: u32,
    accounts: &'a AccountMap,
}

/// Durable, lock-guarded store of all accounts
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    accounts: RwLock<AccountMap>,
}

impl CredentialStore {
    /// Load the store from `path`. A missing file yields an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let accounts = read_record(&path).await?;
        debug!(path = %path.display(), accounts = accounts.len(), "loaded credential store");
        Ok(Self {
            path,
            accounts: RwLock::new(accounts),
        })
    }

    /// Path of the durable record
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory state with the durable record
    pub async fn reload(&self) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        *accounts = read_record(&self.path).await?;
        Ok(())
    }

    /// Name to email for every stored account (email may be empty)
    pub async fn list_accounts(&self) -> BTreeMap<String, String> {
        self.accounts
            .read()
            .await
            .iter()
            .map(|(name, account)| (name.clone(), account.email.clone()))
            .collect()
    }

    /// Names of every stored account
    pub async fn account_names(&self) -> Vec<String> {
        self.accounts.read().await.keys().cloned().collect()
    }

    /// Current token of the named account
    pub async fn token(&self, name: &str) -> Result<Token> {
        self.accounts
            .read()
            .await
            .get(name)
            .map(|account| account.token.clone())
            .ok_or_else(|| not_found(name))
    }

    /// Resolve an account selector against the current snapshot
    pub async fn resolve(&self, selector: &str) -> Result<Vec<String>> {
        let selector = AccountSelector::parse(selector);
        let accounts = self.accounts.read().await;
        Ok(resolver::resolve(&selector, &accounts)?)
    }

    /// Insert or overwrite an account with a freshly authorized token
    pub async fn upsert_account(&self, name: &str, token: Token) -> Result<()> {
        self.mutate(|accounts| {
            accounts.insert(
                name.to_string(),
                Account {
                    email: String::new(),
                    token,
                },
            );
            Ok(())
        })
        .await?;
        info!(account = name, "account saved");
        Ok(())
    }

    /// Replace the token of an existing account
    pub async fn update_token(&self, name: &str, token: Token) -> Result<()> {
        self.mutate(|accounts| {
            let account = accounts.get_mut(name).ok_or_else(|| not_found(name))?;
            account.token = token;
            Ok(())
        })
        .await
    }

    /// Record the email address of an existing account
    pub async fn set_email(&self, name: &str, email: &str) -> Result<()> {
        self.mutate(|accounts| {
            let account = accounts.get_mut(name).ok_or_else(|| not_found(name))?;
            account.email = email.to_string();
            Ok(())
        })
        .await
    }

    /// Delete an account
    pub async fn remove_account(&self, name: &str) -> Result<()> {
        self.mutate(|accounts| {
            accounts.remove(name).map(|_| ()).ok_or_else(|| not_found(name))
        })
        .await?;
        info!(account = name, "account removed");
        Ok(())
    }

    /// Apply `f` to a copy of the map, persist it, then publish it.
    /// On any failure the in-memory state is left untouched.
    async fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AccountMap) -> Result<()>,
    {
        let mut accounts = self.accounts.write().await;
        let mut next = accounts.clone();
        f(&mut next)?;
        self.persist(&next).await?;
        *accounts = next;
        Ok(())
    }

    /// Write the record through a 0600 temporary file and rename it into place
    async fn persist(&self, accounts: &AccountMap) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(dir).await?;
        }

        let content = serde_json::to_vec_pretty(&RecordRef {
            version: RECORD_VERSION,
            accounts,
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        // The temporary file may predate this process with wider bits.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!(path = %self.path.display(), accounts = accounts.len(), "credential store saved");
        Ok(())
    }
}

fn not_found(name: &str) -> GoogleMcpError {
    GoogleMcpError::Account(AccountError::NotFound {
        name: name.to_string(),
    })
}

async fn create_private_dir(dir: &Path) -> Result<()> {
    if tokio::fs::metadata(dir).await.is_ok() {
        return Ok(());
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);

    builder.create(dir).await.map_err(|source| {
        GoogleMcpError::Config(ConfigError::DirCreationFailed {
            path: dir.display().to_string(),
            source,
        })
    })
}

async fn read_record(path: &Path) -> Result<AccountMap> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(AccountMap::new()),
        Err(e) => return Err(e.into()),
    };

    let record: Value = serde_json::from_str(&content).map_err(|e| malformed(path, e))?;

    // A numeric top-level `version` marks the versioned layout. The legacy
    // layout maps names straight to account objects.
    match record.get("version").and_then(Value::as_u64) {
        Some(version) if version > u64::from(RECORD_VERSION) => {
            Err(GoogleMcpError::Account(AccountError::UnsupportedVersion {
                path: path.display().to_string(),
                version,
            }))
        }
        Some(_) => serde_json::from_value::<VersionedRecord>(record)
            .map(|record| record.accounts)
            .map_err(|e| malformed(path, e)),
        None => serde_json::from_value(record).map_err(|e| malformed(path, e)),
    }
}

fn malformed(path: &Path, e: serde_json::Error) -> GoogleMcpError {
    GoogleMcpError::Account(AccountError::MalformedRecord {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
