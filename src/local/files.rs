//! Sandboxed file accessor
//!
//! Every operation tries the configured directories in order; the first
//! directory that satisfies the request wins and is reported back. A path
//! that escapes one directory only disqualifies that directory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::SandboxError;
use crate::local::roots::{io_failure, Attempt, RootSet, SandboxRoot};
use crate::local::LocalDir;

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Metadata of a file or directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Read/write access confined to the approved directories
#[derive(Debug)]
pub struct LocalFiles {
    roots: RootSet,
}

impl LocalFiles {
    /// Open every directory; fails if any of them is invalid
    pub fn new(dirs: &[LocalDir]) -> Result<Self, SandboxError> {
        Ok(Self {
            roots: RootSet::new(dirs)?,
        })
    }

    /// Accessor with local access turned off
    pub fn disabled() -> Self {
        Self {
            roots: RootSet::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.roots.is_enabled()
    }

    /// Release the directory handles
    pub fn close(&self) {
        self.roots.close();
    }

    /// Read a whole file. Returns the bytes and the directory it came from.
    pub fn read_file(&self, rel: &str) -> Result<(Vec<u8>, PathBuf), SandboxError> {
        self.search(rel, false, |root| {
            existing_file(root, rel).and_then(|path| match fs::read(&path) {
                Ok(bytes) => Attempt::Hit(bytes),
                Err(e) => io_failure(&path, e),
            })
        })
    }

    /// Open a file for reading
    pub fn open_file(&self, rel: &str) -> Result<(File, PathBuf), SandboxError> {
        self.search(rel, false, |root| {
            existing_file(root, rel).and_then(|path| match File::open(&path) {
                Ok(file) => Attempt::Hit(file),
                Err(e) => io_failure(&path, e),
            })
        })
    }

    /// Metadata of a file or directory
    pub fn stat(&self, rel: &str) -> Result<(FileStat, PathBuf), SandboxError> {
        self.search(rel, false, |root| {
            root.resolve_existing(rel)
                .and_then(|path| match fs::metadata(&path) {
                    Ok(meta) => Attempt::Hit(FileStat {
                        name: display_name(rel, root.path()),
                        is_dir: meta.is_dir(),
                        size: meta.len(),
                    }),
                    Err(e) => io_failure(&path, e),
                })
        })
    }

    /// List a directory; an empty path lists the directory root.
    /// Entries are sorted by name.
    pub fn list_dir(&self, rel: &str) -> Result<(Vec<DirEntry>, PathBuf), SandboxError> {
        self.search(rel, false, |root| {
            root.resolve_existing(rel).and_then(|path| {
                if !path.is_dir() {
                    return Attempt::Miss;
                }
                match read_entries(root, &path) {
                    Ok(entries) => Attempt::Hit(entries),
                    Err(e) => io_failure(&path, e),
                }
            })
        })
    }

    /// Write a whole file into the first read-write directory that accepts
    /// the path. Returns that directory.
    pub fn write_file(&self, rel: &str, data: &[u8]) -> Result<PathBuf, SandboxError> {
        self.search(rel, true, |root| {
            root.resolve_for_write(rel)
                .and_then(|path| match fs::write(&path, data) {
                    Ok(()) => Attempt::Hit(()),
                    Err(e) => io_failure(&path, e),
                })
        })
        .map(|((), dir)| dir)
    }

    fn search<T>(
        &self,
        rel: &str,
        writable_only: bool,
        attempt: impl Fn(&SandboxRoot) -> Attempt<T>,
    ) -> Result<(T, PathBuf), SandboxError> {
        self.roots.with_roots(|roots| {
            let mut tried = 0usize;
            let mut escaped = 0usize;
            let mut failure = None;

            for root in roots
                .iter()
                .filter(|root| !writable_only || root.mode().is_writable())
            {
                tried += 1;
                match attempt(root) {
                    Attempt::Hit(value) => {
                        debug!(path = rel, dir = %root.path().display(), "local path resolved");
                        return Ok((value, root.path().to_path_buf()));
                    }
                    Attempt::Miss => {}
                    Attempt::Escape => {
                        escaped += 1;
                        debug!(path = rel, dir = %root.path().display(), "path escapes directory, skipping");
                    }
                    Attempt::Failed(e) => {
                        debug!(path = rel, dir = %root.path().display(), error = %e, "local path unusable, skipping");
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                }
            }

            let path = rel.to_string();
            if tried == 0 {
                return Err(SandboxError::NoWritableDirectory { path });
            }
            if let Some(e) = failure {
                return Err(e);
            }
            if escaped == tried {
                return Err(SandboxError::OutsideSandbox { path });
            }
            Err(SandboxError::NotFound { path })
        })
    }
}

fn existing_file(root: &SandboxRoot, rel: &str) -> Attempt<PathBuf> {
    root.resolve_existing(rel)
        .and_then(|path| if path.is_file() { Attempt::Hit(path) } else { Attempt::Miss })
}

fn display_name(rel: &str, root: &Path) -> String {
    Path::new(rel)
        .file_name()
        .or_else(|| root.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_entries(root: &SandboxRoot, dir: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let mut meta = entry.metadata()?;

        // Links are described by their target only while it stays inside.
        if meta.file_type().is_symlink() {
            if let Ok(target) = fs::canonicalize(entry.path()) {
                if root.contains(&target) {
                    meta = fs::metadata(&target)?;
                }
            }
        }

        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size: meta.len(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// base/
    ///   d/file.txt, d/subdir/inner.txt
    ///   outside/x
    struct Fixture {
        _base: tempfile::TempDir,
        d: PathBuf,
        outside: PathBuf,
    }

    fn fixture() -> Fixture {
        let base = tempfile::tempdir().unwrap();
        let d = base.path().join("d");
        let outside = base.path().join("outside");
        fs::create_dir_all(d.join("subdir")).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(d.join("file.txt"), "inside").unwrap();
        fs::write(d.join("subdir/inner.txt"), "inner").unwrap();
        fs::write(outside.join("x"), "secret").unwrap();
        Fixture {
            _base: base,
            d,
            outside,
        }
    }

    #[test]
    fn test_read_inside_directory() {
        let fx = fixture();
        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d)]).unwrap();

        let (bytes, dir) = files.read_file("file.txt").unwrap();
        assert_eq!(bytes, b"inside");
        assert_eq!(dir, fx.d);

        let (bytes, _) = files.read_file("subdir/../subdir/inner.txt").unwrap();
        assert_eq!(bytes, b"inner");
    }

    #[test]
    fn test_escapes_are_rejected() {
        let fx = fixture();
        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d)]).unwrap();

        for path in ["../outside/x", "/etc/passwd", "subdir/../../outside/x"] {
            let err = files.read_file(path).unwrap_err();
            assert!(
                matches!(err, SandboxError::OutsideSandbox { .. }),
                "{} gave {:?}",
                path,
                err
            );
        }
        assert!(files.stat("../outside").is_err());
        assert!(files.list_dir("..").is_err());
        assert!(files.open_file("../outside/x").is_err());
    }

    #[test]
    fn test_missing_file() {
        let fx = fixture();
        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d)]).unwrap();
        assert!(matches!(
            files.read_file("nope.txt"),
            Err(SandboxError::NotFound { .. })
        ));
        // Directories are not files
        assert!(matches!(
            files.read_file("subdir"),
            Err(SandboxError::NotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks() {
        use std::os::unix::fs::symlink;

        let fx = fixture();
        symlink(fx.outside.join("x"), fx.d.join("abs-out")).unwrap();
        symlink("../outside/x", fx.d.join("rel-out")).unwrap();
        symlink("subdir/../../outside/x", fx.d.join("chain-out")).unwrap();
        symlink(&fx.outside, fx.d.join("dir-out")).unwrap();
        symlink(fx.d.join("file.txt"), fx.d.join("good")).unwrap();
        symlink("subdir/inner.txt", fx.d.join("good-rel")).unwrap();

        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d)]).unwrap();

        for path in ["abs-out", "rel-out", "chain-out", "dir-out/x"] {
            assert!(files.read_file(path).is_err(), "{} was readable", path);
        }
        assert!(files.list_dir("dir-out").is_err());

        assert_eq!(files.read_file("good").unwrap().0, b"inside");
        assert_eq!(files.read_file("good-rel").unwrap().0, b"inner");
    }

    #[test]
    fn test_read_only_directory_refuses_writes() {
        let fx = fixture();
        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d)]).unwrap();

        let err = files.write_file("new.txt", b"data").unwrap_err();
        assert!(matches!(err, SandboxError::NoWritableDirectory { .. }));
        assert!(files.write_file("file.txt", b"data").is_err());
        assert!(!fx.d.join("new.txt").exists());
        assert_eq!(fs::read(fx.d.join("file.txt")).unwrap(), b"inside");
    }

    #[test]
    fn test_fallthrough_between_directories() {
        let fx = fixture();
        let d2 = fx.outside.clone();
        fs::write(d2.join("only2.txt"), "two").unwrap();
        fs::create_dir(d2.join("sub2")).unwrap();
        fs::write(d2.join("sub2/a.txt"), "a").unwrap();

        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d), LocalDir::read_write(&d2)])
            .unwrap();

        let (bytes, dir) = files.read_file("only2.txt").unwrap();
        assert_eq!(bytes, b"two");
        assert_eq!(dir, d2);

        let (entries, dir) = files.list_dir("sub2").unwrap();
        assert_eq!(dir, d2);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");

        // Present in both: the first directory wins
        fs::write(d2.join("file.txt"), "shadowed").unwrap();
        let (bytes, dir) = files.read_file("file.txt").unwrap();
        assert_eq!(bytes, b"inside");
        assert_eq!(dir, fx.d);
    }

    #[test]
    fn test_write_goes_to_read_write_directory() {
        let fx = fixture();
        let d2 = fx.outside.clone();
        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d), LocalDir::read_write(&d2)])
            .unwrap();

        let dir = files.write_file("new.txt", b"fresh").unwrap();
        assert_eq!(dir, d2);
        assert_eq!(fs::read(d2.join("new.txt")).unwrap(), b"fresh");
        assert!(!fx.d.join("new.txt").exists());

        assert!(files.write_file("../d/new.txt", b"x").is_err());
        assert!(files.write_file("missing-dir/new.txt", b"x").is_err());
        assert!(files.write_file("", b"x").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_symlink() {
        use std::os::unix::fs::symlink;

        let fx = fixture();
        symlink(fx.outside.join("x"), fx.d.join("abs-out")).unwrap();
        symlink(&fx.outside, fx.d.join("dir-out")).unwrap();
        symlink("file.txt", fx.d.join("good")).unwrap();
        symlink("nowhere", fx.d.join("dangling")).unwrap();

        let files = LocalFiles::new(&[LocalDir::read_write(&fx.d)]).unwrap();

        assert!(files.write_file("abs-out", b"pwned").is_err());
        assert!(files.write_file("dir-out/y", b"pwned").is_err());
        assert!(files.write_file("dangling", b"pwned").is_err());
        assert_eq!(fs::read(fx.outside.join("x")).unwrap(), b"secret");
        assert!(!fx.outside.join("y").exists());

        files.write_file("good", b"updated").unwrap();
        assert_eq!(fs::read(fx.d.join("file.txt")).unwrap(), b"updated");
    }

    #[test]
    fn test_list_dir_root_and_stat() {
        let fx = fixture();
        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d)]).unwrap();

        let (entries, _) = files.list_dir("").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["file.txt", "subdir"]);
        assert!(!entries[0].is_dir);
        assert_eq!(entries[0].size, 6);
        assert!(entries[1].is_dir);

        let (stat, _) = files.stat("file.txt").unwrap();
        assert_eq!(
            stat,
            FileStat {
                name: "file.txt".to_string(),
                is_dir: false,
                size: 6
            }
        );
        assert!(files.stat("subdir").unwrap().0.is_dir);
    }

    #[test]
    fn test_open_file() {
        use std::io::Read;

        let fx = fixture();
        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d)]).unwrap();

        let (mut file, _) = files.open_file("subdir/inner.txt").unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "inner");
    }

    #[test]
    fn test_disabled_accessor() {
        let files = LocalFiles::disabled();
        assert!(!files.is_enabled());

        assert!(matches!(files.read_file("a"), Err(SandboxError::Disabled)));
        assert!(matches!(files.write_file("a", b"x"), Err(SandboxError::Disabled)));
        assert!(matches!(files.open_file("a"), Err(SandboxError::Disabled)));
        assert!(matches!(files.stat("a"), Err(SandboxError::Disabled)));
        assert!(matches!(files.list_dir(""), Err(SandboxError::Disabled)));

        let empty = LocalFiles::new(&[]).unwrap();
        assert!(matches!(empty.read_file("a"), Err(SandboxError::Disabled)));
    }

    #[test]
    fn test_operations_after_close() {
        let fx = fixture();
        let files = LocalFiles::new(&[LocalDir::read_only(&fx.d)]).unwrap();
        files.close();
        assert!(matches!(files.read_file("file.txt"), Err(SandboxError::Closed)));
        assert!(matches!(files.list_dir(""), Err(SandboxError::Closed)));
    }
}
