//! Shadow workspace access.
//!
//! The shell and the WASI bridge never touch the host filesystem directly.
//! Everything goes through a [`Workspace`], whose paths are always
//! normalized, slash-separated and relative to the workspace root:
//!
//! - `""` is the root itself
//! - no leading `/`
//! - no `.` or `..` segments
//! - no NUL bytes
//!
//! Two implementations ship with the crate:
//! - [`InMemoryWorkspace`] - a map of files, used by tests and ephemeral sessions
//! - [`LocalWorkspace`] - a real host directory, which also enables the
//!   bridge's mount fast path

mod local;
mod memory;

pub use local::LocalWorkspace;
pub use memory::InMemoryWorkspace;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during workspace operations
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// File or directory not found
    #[error("{0}: No such file or directory")]
    NotFound(String),
    /// A directory was required
    #[error("{0}: Not a directory")]
    NotADirectory(String),
    /// A regular file was required
    #[error("{0}: Is a directory")]
    IsADirectory(String),
    /// Path failed normalization
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error from a custom backend
    #[error("workspace error: {0}")]
    Backend(String),
}

/// Kind of a workspace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
}

/// Result of [`Workspace::stat`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Entry kind
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
}

impl Stat {
    /// Whether this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (a single path segment)
    pub name: String,
    /// Entry kind
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

impl DirEntry {
    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// The persistent store commands read and write through.
///
/// All paths passed in are already normalized (see [`normalize_path`]).
/// Implementations may still validate them.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Read a file's full contents.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, WorkspaceError>;

    /// Create or replace a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), WorkspaceError>;

    /// Delete a file. Deleting a missing file is not an error.
    async fn delete_file(&self, path: &str) -> Result<(), WorkspaceError>;

    /// Stat a path, `None` if it does not exist.
    async fn stat(&self, path: &str) -> Result<Option<Stat>, WorkspaceError>;

    /// List a directory, sorted by name.
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, WorkspaceError>;

    /// Host directory backing this workspace, when there is a real one.
    ///
    /// When present, guest programs may mount it directly instead of going
    /// through a snapshot.
    fn host_dir(&self) -> Option<PathBuf> {
        None
    }
}

/// Normalize a sandbox-relative path.
///
/// Empty and `.` segments are dropped. Anything containing `..`, a leading
/// `/` or a NUL byte is rejected.
pub fn normalize_path(path: &str) -> Result<String, WorkspaceError> {
    if path.contains('\0') || path.starts_with('/') {
        return Err(WorkspaceError::InvalidPath(path.to_string()));
    }
    let mut parts = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(WorkspaceError::InvalidPath(path.to_string())),
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Join a normalized directory path and an entry name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Split a normalized path into `(parent, name)`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}
