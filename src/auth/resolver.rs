//! Account selector resolution
//!
//! Pure functions over a store snapshot; no I/O.

use std::collections::BTreeMap;

use crate::error::AccountError;

/// Reserved selector that fans out to every configured account
pub const ALL_ACCOUNTS: &str = "all";

/// Parsed account selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSelector {
    /// Every stored account
    All,
    /// One account by name
    Named(String),
}

impl AccountSelector {
    /// Only the exact string `all` is special; anything else names an account.
    pub fn parse(selector: &str) -> Self {
        if selector == ALL_ACCOUNTS {
            Self::All
        } else {
            Self::Named(selector.to_string())
        }
    }
}

/// Resolve `selector` to concrete account names
pub fn resolve<V>(
    selector: &AccountSelector,
    accounts: &BTreeMap<String, V>,
) -> Result<Vec<String>, AccountError> {
    match selector {
        AccountSelector::Named(name) if accounts.contains_key(name) => Ok(vec![name.clone()]),
        AccountSelector::Named(name) => Err(AccountError::NotFound { name: name.clone() }),
        AccountSelector::All if accounts.is_empty() => Err(AccountError::NoAccountsConfigured),
        AccountSelector::All => Ok(accounts.keys().cloned().collect()),
    }
}
