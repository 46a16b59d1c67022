//! In-memory workspace.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DirEntry, EntryKind, Stat, Workspace, WorkspaceError, normalize_path, split_path};

/// Workspace held entirely in memory.
///
/// Directories are implicit in file paths; [`InMemoryWorkspace::create_dir`]
/// records empty ones explicitly.
#[derive(Debug, Default)]
pub struct InMemoryWorkspace {
    inner: RwLock<Tree>,
}

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl Tree {
    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() || self.dirs.contains(path) {
            return true;
        }
        let prefix = format!("{path}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
            || self
                .dirs
                .range(prefix.clone()..)
                .next()
                .is_some_and(|k| k.starts_with(&prefix))
    }

    /// Every ancestor of `path` must be a directory (or absent).
    fn check_parents(&self, path: &str) -> Result<(), WorkspaceError> {
        let mut current = path;
        while let Some(idx) = current.rfind('/') {
            current = &current[..idx];
            if self.files.contains_key(current) {
                return Err(WorkspaceError::NotADirectory(current.to_string()));
            }
        }
        Ok(())
    }
}

impl InMemoryWorkspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a workspace pre-populated with files.
    pub fn with_files<I, P, D>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, D)>,
        P: Into<String>,
        D: Into<Vec<u8>>,
    {
        let tree = Tree {
            files: files
                .into_iter()
                .map(|(p, d)| (p.into(), d.into()))
                .collect(),
            dirs: BTreeSet::new(),
        };
        Self {
            inner: RwLock::new(tree),
        }
    }

    /// Record an (possibly empty) directory.
    pub async fn create_dir(&self, path: &str) -> Result<(), WorkspaceError> {
        let path = normalize_path(path)?;
        let mut tree = self.inner.write().await;
        if tree.files.contains_key(&path) {
            return Err(WorkspaceError::NotADirectory(path));
        }
        tree.check_parents(&path)?;
        tree.dirs.insert(path);
        Ok(())
    }

    /// Copy of every file, keyed by path.
    pub async fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.inner.read().await.files.clone()
    }
}

#[async_trait]
impl Workspace for InMemoryWorkspace {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, WorkspaceError> {
        let path = normalize_path(path)?;
        let tree = self.inner.read().await;
        match tree.files.get(&path) {
            Some(data) => Ok(data.clone()),
            None if tree.is_dir(&path) => Err(WorkspaceError::IsADirectory(path)),
            None => Err(WorkspaceError::NotFound(path)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), WorkspaceError> {
        let path = normalize_path(path)?;
        let mut tree = self.inner.write().await;
        if path.is_empty() || tree.is_dir(&path) {
            return Err(WorkspaceError::IsADirectory(path));
        }
        tree.check_parents(&path)?;
        tree.files.insert(path, data.to_vec());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), WorkspaceError> {
        let path = normalize_path(path)?;
        let mut tree = self.inner.write().await;
        if tree.files.remove(&path).is_none() && tree.is_dir(&path) {
            return Err(WorkspaceError::IsADirectory(path));
        }
        // Keep the parent visible after its last file goes away.
        let (parent, _) = split_path(&path);
        if !parent.is_empty() && !tree.is_dir(parent) {
            tree.dirs.insert(parent.to_string());
        }
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Option<Stat>, WorkspaceError> {
        let path = normalize_path(path)?;
        let tree = self.inner.read().await;
        if let Some(data) = tree.files.get(&path) {
            return Ok(Some(Stat {
                kind: EntryKind::File,
                size: data.len() as u64,
            }));
        }
        if tree.is_dir(&path) {
            return Ok(Some(Stat {
                kind: EntryKind::Directory,
                size: 0,
            }));
        }
        Ok(None)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, WorkspaceError> {
        let path = normalize_path(path)?;
        let tree = self.inner.read().await;
        if tree.files.contains_key(&path) {
            return Err(WorkspaceError::NotADirectory(path));
        }
        if !tree.is_dir(&path) {
            return Err(WorkspaceError::NotFound(path));
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut entries: BTreeMap<String, EntryKind> = BTreeMap::new();
        let children = tree
            .files
            .keys()
            .chain(tree.dirs.iter())
            .filter_map(|key| key.strip_prefix(prefix.as_str()));
        for rest in children {
            match rest.split_once('/') {
                Some((dir, _)) => {
                    entries.insert(dir.to_string(), EntryKind::Directory);
                }
                None if !rest.is_empty() => {
                    let kind = if tree.files.contains_key(&format!("{prefix}{rest}")) {
                        EntryKind::File
                    } else {
                        EntryKind::Directory
                    };
                    entries.entry(rest.to_string()).or_insert(kind);
                }
                None => {}
            }
        }
        Ok(entries
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let ws = InMemoryWorkspace::new();
        ws.write_file("notes/today.txt", b"hello").await.unwrap();
        assert_eq!(ws.read_file("notes/today.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_implicit_directories() {
        let ws = InMemoryWorkspace::with_files([("src/a.txt", "a"), ("src/lib/b.rs", "b")]);
        let stat = ws.stat("src").await.unwrap().unwrap();
        assert!(stat.is_dir());

        let entries = ws.list_dir("src").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "lib"]);
        assert!(entries[1].is_dir());
    }

    #[tokio::test]
    async fn test_root_listing() {
        let ws = InMemoryWorkspace::with_files([("b.txt", "b"), ("a/x", "x")]);
        let names: Vec<_> = ws
            .list_dir("")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["a", "b.txt"]);
    }

    #[tokio::test]
    async fn test_missing_and_wrong_kind() {
        let ws = InMemoryWorkspace::with_files([("a.txt", "a")]);
        assert!(ws.stat("nope").await.unwrap().is_none());
        assert!(matches!(
            ws.read_file("nope").await,
            Err(WorkspaceError::NotFound(_))
        ));
        assert!(matches!(
            ws.list_dir("a.txt").await,
            Err(WorkspaceError::NotADirectory(_))
        ));
        assert!(matches!(
            ws.write_file("a.txt/b", b"x").await,
            Err(WorkspaceError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_keeps_parent_directory() {
        let ws = InMemoryWorkspace::with_files([("dir/only.txt", "x")]);
        ws.delete_file("dir/only.txt").await.unwrap();
        assert!(ws.stat("dir").await.unwrap().unwrap().is_dir());
        assert!(ws.list_dir("dir").await.unwrap().is_empty());
        // deleting again is fine
        ws.delete_file("dir/only.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_unnormalized_paths() {
        let ws = InMemoryWorkspace::new();
        assert!(matches!(
            ws.write_file("../x", b"x").await,
            Err(WorkspaceError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_dir() {
        let ws = InMemoryWorkspace::new();
        ws.create_dir("empty").await.unwrap();
        let entries = ws.list_dir("").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir());
    }
}
