//! Workspace backed by a real host directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{DirEntry, EntryKind, Stat, Workspace, WorkspaceError, normalize_path};

/// Workspace rooted at a host directory.
///
/// Symlinks are never followed: a path with a symlinked component is
/// reported as missing by `stat`, skipped by `list_dir` and refused with
/// [`WorkspaceError::InvalidPath`] by everything else. The check runs
/// before each operation, so a link planted concurrently by another host
/// process is not caught.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    /// Use an existing directory as the workspace root.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(WorkspaceError::NotADirectory(root.display().to_string()));
        }
        Ok(Self { root })
    }

    /// Root directory on the host.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host location of `path`, or `None` when one of its existing
    /// components is a symlink.
    async fn host_path(&self, path: &str) -> Result<(String, Option<PathBuf>), WorkspaceError> {
        let path = normalize_path(path)?;
        let mut host = self.root.clone();
        let mut probing = true;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            host.push(segment);
            if !probing {
                continue;
            }
            match tokio::fs::symlink_metadata(&host).await {
                Ok(meta) if meta.file_type().is_symlink() => return Ok((path, None)),
                Ok(_) => {}
                // Nothing below a missing component exists yet.
                Err(_) => probing = false,
            }
        }
        Ok((path, Some(host)))
    }

    async fn contained_path(&self, path: &str) -> Result<(String, PathBuf), WorkspaceError> {
        match self.host_path(path).await? {
            (path, Some(host)) => Ok((path, host)),
            (path, None) => {
                tracing::warn!(%path, "Refusing path through a symlink");
                Err(WorkspaceError::InvalidPath(path))
            }
        }
    }
}

fn map_io(path: &str, err: std::io::Error) -> WorkspaceError {
    match err.kind() {
        ErrorKind::NotFound => WorkspaceError::NotFound(path.to_string()),
        ErrorKind::NotADirectory => WorkspaceError::NotADirectory(path.to_string()),
        ErrorKind::IsADirectory => WorkspaceError::IsADirectory(path.to_string()),
        _ => WorkspaceError::Io(err),
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, WorkspaceError> {
        let (path, host) = self.contained_path(path).await?;
        match tokio::fs::symlink_metadata(&host).await {
            Ok(meta) if meta.is_dir() => return Err(WorkspaceError::IsADirectory(path)),
            Ok(_) => {}
            Err(e) => return Err(map_io(&path, e)),
        }
        tokio::fs::read(&host).await.map_err(|e| map_io(&path, e))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), WorkspaceError> {
        let (path, host) = self.contained_path(path).await?;
        if path.is_empty() {
            return Err(WorkspaceError::IsADirectory(path));
        }
        if let Some(parent) = host.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(&path, e))?;
        }
        tokio::fs::write(&host, data)
            .await
            .map_err(|e| map_io(&path, e))
    }

    async fn delete_file(&self, path: &str) -> Result<(), WorkspaceError> {
        let (path, host) = self.contained_path(path).await?;
        match tokio::fs::remove_file(&host).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(&path, e)),
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<Stat>, WorkspaceError> {
        let (path, Some(host)) = self.host_path(path).await? else {
            return Ok(None);
        };
        match tokio::fs::symlink_metadata(&host).await {
            Ok(meta) if meta.is_dir() => Ok(Some(Stat {
                kind: EntryKind::Directory,
                size: 0,
            })),
            Ok(meta) => Ok(Some(Stat {
                kind: EntryKind::File,
                size: meta.len(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_io(&path, e)),
        }
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, WorkspaceError> {
        let (path, host) = self.contained_path(path).await?;
        let mut reader = tokio::fs::read_dir(&host)
            .await
            .map_err(|e| map_io(&path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| map_io(&path, e))? {
            let file_type = entry.file_type().await.map_err(|e| map_io(&path, e))?;
            if file_type.is_symlink() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!("Skipping non UTF-8 entry in {}", host.display());
                continue;
            };
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(DirEntry { name, kind });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn host_dir(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}
