//! Persistent storage the engine checks artifacts against.
//!
//! The resolver only ever asks whether a path exists. Removal is used by the
//! companion cleanup in [`BuildGraph::clean`](crate::BuildGraph::clean).

use std::collections::HashSet;
use std::fs;
use std::io;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

/// A backend exposing an existence predicate for artifact paths.
pub trait Storage {
    /// Whether `path` is currently present. Never cached by the engine.
    fn exists(&self, path: &Utf8Path) -> bool;

    /// Delete `path`, whatever it is.
    fn remove(&self, path: &Utf8Path) -> io::Result<()>;
}

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystem;

impl Storage for FileSystem {
    fn exists(&self, path: &Utf8Path) -> bool {
        path.exists()
    }

    fn remove(&self, path: &Utf8Path) -> io::Result<()> {
        if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}

/// In-process storage holding a set of present paths.
///
/// Useful when artifacts are not files at all, e.g. rows in a database that
/// recipes record here once produced.
#[derive(Debug, Default)]
pub struct Memory {
    paths: Mutex<HashSet<Utf8PathBuf>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as present.
    pub fn insert(&self, path: impl Into<Utf8PathBuf>) {
        self.lock().insert(path.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Utf8PathBuf>> {
        // A poisoned set is still a valid set of paths.
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for Memory {
    fn exists(&self, path: &Utf8Path) -> bool {
        self.lock().contains(path)
    }

    /// Removes `path` and everything stored underneath it.
    fn remove(&self, path: &Utf8Path) -> io::Result<()> {
        let mut paths = self.lock();
        let before = paths.len();
        paths.retain(|p| !p.starts_with(path));

        if paths.len() == before {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{path} is not stored"),
            ));
        }

        Ok(())
    }
}
