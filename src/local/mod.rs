//! Sandboxed local filesystem access
//!
//! Tool handlers may only touch files below a small, ordered set of
//! administrator-approved directories. Each directory is read-only or
//! read-write; relative paths are tried against each in order.

pub mod files;
pub mod roots;

use std::path::PathBuf;

pub use files::{DirEntry, FileStat, LocalFiles};
pub use roots::RootSet;

/// Whether a sandbox directory accepts writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        self == AccessMode::ReadWrite
    }
}

/// One configured sandbox directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDir {
    /// Absolute, pre-existing directory
    pub path: PathBuf,

    /// Access mode
    pub mode: AccessMode,
}

impl LocalDir {
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: AccessMode::ReadOnly,
        }
    }

    pub fn read_write(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: AccessMode::ReadWrite,
        }
    }
}
