//! Sandbox root set
//!
//! Every approved directory is validated, canonicalized and held open once
//! at construction. Each request is re-checked against the canonical root:
//! the relative path may not climb above the root lexically, and the real
//! path of whatever it resolves to (symlinks followed) must stay under it.
//! On unix the held directory handle also detects a root that was moved
//! away and replaced after startup.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::info;

use crate::error::SandboxError;
use crate::local::{AccessMode, LocalDir};

/// Result of trying one request against one root
#[derive(Debug)]
pub(crate) enum Attempt<T> {
    /// Satisfied by this root
    Hit(T),
    /// Nothing there; try the next root
    Miss,
    /// Would leave this root; try the next root
    Escape,
    /// Exists but could not be used
    Failed(SandboxError),
}

impl<T> Attempt<T> {
    pub(crate) fn and_then<U>(self, f: impl FnOnce(T) -> Attempt<U>) -> Attempt<U> {
        match self {
            Attempt::Hit(value) => f(value),
            Attempt::Miss => Attempt::Miss,
            Attempt::Escape => Attempt::Escape,
            Attempt::Failed(e) => Attempt::Failed(e),
        }
    }
}

pub(crate) fn io_failure<T>(path: &Path, source: io::Error) -> Attempt<T> {
    Attempt::Failed(SandboxError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// One approved directory and its boundary
#[derive(Debug)]
pub struct SandboxRoot {
    path: PathBuf,
    canonical: PathBuf,
    mode: AccessMode,
    // Closed when the root is dropped
    handle: fs::File,
}

impl SandboxRoot {
    fn open(dir: &LocalDir) -> Result<Self, SandboxError> {
        let invalid = |reason: String| SandboxError::InvalidRoot {
            path: dir.path.clone(),
            reason,
        };

        if !dir.path.is_absolute() {
            return Err(invalid("path must be absolute".to_string()));
        }

        let metadata = fs::metadata(&dir.path).map_err(|e| invalid(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }

        let canonical = fs::canonicalize(&dir.path).map_err(|e| invalid(e.to_string()))?;
        let handle = fs::File::open(&canonical).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            path: dir.path.clone(),
            canonical,
            mode: dir.mode,
            handle,
        })
    }

    /// Fails once the canonical path no longer names the directory that was
    /// opened at construction.
    fn check_identity(&self) -> Result<(), SandboxError> {
        let io_error = |source| SandboxError::Io {
            path: self.path.clone(),
            source,
        };
        let held = self.handle.metadata().map_err(io_error)?;
        let current = fs::metadata(&self.canonical).map_err(io_error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if (held.dev(), held.ino()) != (current.dev(), current.ino()) {
                return Err(SandboxError::RootReplaced {
                    path: self.path.clone(),
                });
            }
        }
        #[cfg(not(unix))]
        {
            if held.is_dir() != current.is_dir() {
                return Err(SandboxError::RootReplaced {
                    path: self.path.clone(),
                });
            }
        }

        Ok(())
    }

    /// Directory as configured
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// True if an already canonical path lies in this root's subtree
    pub(crate) fn contains(&self, resolved: &Path) -> bool {
        resolved.starts_with(&self.canonical)
    }

    /// Join `rel` onto the canonical root without touching the disk.
    /// Absolute paths and `..` climbing above the root give `None`.
    fn join_lexically(&self, rel: &str) -> Option<PathBuf> {
        let mut joined = self.canonical.clone();
        let mut depth = 0usize;

        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => {
                    joined.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return None;
                    }
                    joined.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        Some(joined)
    }

    /// Real path of an existing file or directory inside this root
    pub(crate) fn resolve_existing(&self, rel: &str) -> Attempt<PathBuf> {
        if let Err(e) = self.check_identity() {
            return Attempt::Failed(e);
        }
        let Some(joined) = self.join_lexically(rel) else {
            return Attempt::Escape;
        };

        match fs::canonicalize(&joined) {
            Ok(resolved) if self.contains(&resolved) => Attempt::Hit(resolved),
            Ok(_) => Attempt::Escape,
            Err(e) if e.kind() == ErrorKind::NotFound => Attempt::Miss,
            Err(e) => io_failure(&joined, e),
        }
    }

    /// Real path a write to `rel` would land on. The parent directory must
    /// already exist inside the root; a symlink in the final position must
    /// point at an existing file inside the root.
    pub(crate) fn resolve_for_write(&self, rel: &str) -> Attempt<PathBuf> {
        if let Err(e) = self.check_identity() {
            return Attempt::Failed(e);
        }
        let Some(joined) = self.join_lexically(rel) else {
            return Attempt::Escape;
        };
        if joined == self.canonical {
            return io_failure(
                &joined,
                io::Error::new(ErrorKind::InvalidInput, "cannot write to a directory"),
            );
        }
        let (Some(parent), Some(name)) = (joined.parent(), joined.file_name()) else {
            return Attempt::Miss;
        };

        let parent = match fs::canonicalize(parent) {
            Ok(parent) if self.contains(&parent) => parent,
            Ok(_) => return Attempt::Escape,
            Err(e) if e.kind() == ErrorKind::NotFound => return Attempt::Miss,
            Err(e) => return io_failure(parent, e),
        };
        let target = parent.join(name);

        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(&target) {
                Ok(resolved) if self.contains(&resolved) && !resolved.is_dir() => {
                    Attempt::Hit(resolved)
                }
                Ok(resolved) if self.contains(&resolved) => io_failure(
                    &target,
                    io::Error::new(ErrorKind::InvalidInput, "is a directory"),
                ),
                // Dangling or outside: the destination cannot be verified.
                _ => Attempt::Escape,
            },
            Ok(meta) if meta.is_dir() => io_failure(
                &target,
                io::Error::new(ErrorKind::InvalidInput, "is a directory"),
            ),
            Ok(_) => Attempt::Hit(target),
            Err(e) if e.kind() == ErrorKind::NotFound => Attempt::Hit(target),
            Err(e) => io_failure(&target, e),
        }
    }
}

/// Ordered, immutable set of sandbox roots
#[derive(Debug)]
pub struct RootSet {
    // `None` once closed
    roots: RwLock<Option<Vec<SandboxRoot>>>,
    enabled: bool,
}

impl RootSet {
    /// Validate and open every directory; any invalid entry fails the whole set.
    /// An empty list gives a disabled set.
    pub fn new(dirs: &[LocalDir]) -> Result<Self, SandboxError> {
        let roots = dirs
            .iter()
            .map(SandboxRoot::open)
            .collect::<Result<Vec<_>, _>>()?;

        for root in &roots {
            info!(path = %root.path.display(), mode = ?root.mode, "local directory enabled");
        }

        Ok(Self {
            enabled: !roots.is_empty(),
            roots: RwLock::new(Some(roots)),
        })
    }

    /// Set with no directories; every operation fails
    pub fn disabled() -> Self {
        Self {
            roots: RwLock::new(Some(Vec::new())),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Release every root and its directory handle. Later operations fail
    /// with [`SandboxError::Closed`].
    pub fn close(&self) {
        self.roots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Run `f` over the live roots
    pub(crate) fn with_roots<T>(
        &self,
        f: impl FnOnce(&[SandboxRoot]) -> Result<T, SandboxError>,
    ) -> Result<T, SandboxError> {
        if !self.enabled {
            return Err(SandboxError::Disabled);
        }

        let roots = self.roots.read().unwrap_or_else(PoisonError::into_inner);
        match roots.as_deref() {
            Some(roots) => f(roots),
            None => Err(SandboxError::Closed),
        }
    }
}
