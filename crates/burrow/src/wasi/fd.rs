//! Descriptor table and in-memory file tree for one guest execution.

use std::collections::{BTreeMap, BTreeSet};

use super::abi::{Errno, filetype};
use crate::workspace::{join_path, split_path};

/// First descriptor handed out by `path_open`.
pub const FIRST_OPEN_FD: u32 = 4;

/// The preopened root directory.
pub const PREOPEN_FD: u32 = 3;

/// An open descriptor. Stdio (0–2) never appears in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FdEntry {
    /// Directory handle
    Dir {
        /// Snapshot path of the directory
        path: String,
        /// Name reported by `fd_prestat_dir_name` for preopens
        name: String,
    },
    /// Regular file handle
    File {
        /// Snapshot path of the file
        path: String,
        /// Current read/write offset
        offset: u64,
        /// Writes go to the end regardless of offset
        append: bool,
    },
}

/// Descriptor arena. Numbers start at [`FIRST_OPEN_FD`] and are never
/// reused within one execution.
///
/// The preopen at fd 3 is the invocation cwd, not the workspace root.
/// Guest paths resolve beneath it, so files above the cwd are unreachable
/// and `..` past it is `EINVAL`.
#[derive(Debug)]
pub struct FdTable {
    entries: BTreeMap<u32, FdEntry>,
    next: u32,
    root: String,
}

impl FdTable {
    /// Table with `root` preopened as `.` at fd 3.
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let mut entries = BTreeMap::new();
        entries.insert(
            PREOPEN_FD,
            FdEntry::Dir {
                path: root.clone(),
                name: ".".to_string(),
            },
        );
        Self {
            entries,
            next: FIRST_OPEN_FD,
            root,
        }
    }

    /// Snapshot path of the preopened root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Look a descriptor up.
    pub fn get(&self, fd: u32) -> Option<&FdEntry> {
        self.entries.get(&fd)
    }

    /// Look a descriptor up mutably.
    pub fn get_mut(&mut self, fd: u32) -> Option<&mut FdEntry> {
        self.entries.get_mut(&fd)
    }

    /// Install an entry under the next free number.
    pub fn insert(&mut self, entry: FdEntry) -> Result<u32, Errno> {
        let fd = self.next;
        self.next = self.next.checked_add(1).ok_or(Errno::Overflow)?;
        self.entries.insert(fd, entry);
        Ok(fd)
    }

    /// Close a descriptor.
    pub fn remove(&mut self, fd: u32) -> Option<FdEntry> {
        self.entries.remove(&fd)
    }

    /// Resolve `path` relative to directory descriptor `dirfd`.
    ///
    /// `.` and `..` fold lexically. Absolute paths, NUL bytes and anything
    /// that climbs out of the preopened root are `EINVAL`.
    pub fn resolve(&self, dirfd: u32, path: &str) -> Result<String, Errno> {
        let base = match self.get(dirfd) {
            Some(FdEntry::Dir { path, .. }) => path,
            Some(FdEntry::File { .. }) => return Err(Errno::Notdir),
            None => return Err(Errno::Badf),
        };
        if path.starts_with('/') || path.contains('\0') {
            return Err(Errno::Inval);
        }
        let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    parts.pop().ok_or(Errno::Inval)?;
                }
                name => parts.push(name),
            }
        }
        let resolved = parts.join("/");
        if !is_within(&resolved, &self.root) {
            return Err(Errno::Inval);
        }
        Ok(resolved)
    }
}

fn is_within(path: &str, root: &str) -> bool {
    root.is_empty()
        || path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Flat `path -> bytes` file set. Directories are implied by file paths,
/// plus any created explicitly during the run.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl SnapshotFs {
    /// Wrap a snapshot.
    pub fn new(files: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            files,
            dirs: BTreeSet::new(),
        }
    }

    /// The file set, discarding empty directories.
    pub fn into_files(self) -> BTreeMap<String, Vec<u8>> {
        self.files
    }

    /// Whether `path` is a regular file.
    pub fn is_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Whether `path` is a directory.
    pub fn is_dir(&self, path: &str) -> bool {
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

    /// Filetype of `path`, if it exists.
    pub fn filetype(&self, path: &str) -> Option<u8> {
        if self.is_file(path) {
            Some(filetype::REGULAR_FILE)
        } else if self.is_dir(path) {
            Some(filetype::DIRECTORY)
        } else {
            None
        }
    }

    /// File contents.
    pub fn file(&self, path: &str) -> Option<&Vec<u8>> {
        self.files.get(path)
    }

    /// Mutable file contents.
    pub fn file_mut(&mut self, path: &str) -> Option<&mut Vec<u8>> {
        self.files.get_mut(path)
    }

    /// Create or replace a file. The parent must be a directory.
    pub fn create_file(&mut self, path: &str) -> Result<(), Errno> {
        let (parent, _) = split_path(path);
        if self.is_file(parent) {
            return Err(Errno::Notdir);
        }
        if !self.is_dir(parent) {
            return Err(Errno::Noent);
        }
        self.files.insert(path.to_string(), Vec::new());
        Ok(())
    }

    /// Record a directory.
    pub fn create_dir(&mut self, path: &str) -> Result<(), Errno> {
        if path.is_empty() || self.filetype(path).is_some() {
            return Err(Errno::Exist);
        }
        let (parent, _) = split_path(path);
        if !self.is_dir(parent) {
            return Err(if self.is_file(parent) {
                Errno::Notdir
            } else {
                Errno::Noent
            });
        }
        self.dirs.insert(path.to_string());
        Ok(())
    }

    /// Record `path` and all its ancestors as directories.
    pub fn ensure_dir(&mut self, path: &str) {
        if self.is_dir(path) {
            return;
        }
        let mut current = String::new();
        for segment in path.split('/') {
            current = join_path(&current, segment);
            self.dirs.insert(current.clone());
        }
    }

    /// Delete a file.
    pub fn remove_file(&mut self, path: &str) -> Result<(), Errno> {
        if self.files.remove(path).is_some() {
            return Ok(());
        }
        Err(if self.is_dir(path) {
            Errno::Isdir
        } else {
            Errno::Noent
        })
    }

    /// Immediate children of `dir` as `(name, filetype)`, sorted by name.
    pub fn list(&self, dir: &str) -> Vec<(String, u8)> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let mut children: BTreeMap<String, u8> = BTreeMap::new();
        let mut add = |key: &str, is_file: bool| {
            let Some(rest) = key.strip_prefix(&prefix) else {
                return;
            };
            match rest.split_once('/') {
                Some((name, _)) => {
                    children.insert(name.to_string(), filetype::DIRECTORY);
                }
                None if !rest.is_empty() => {
                    let kind = if is_file {
                        filetype::REGULAR_FILE
                    } else {
                        filetype::DIRECTORY
                    };
                    children.entry(rest.to_string()).or_insert(kind);
                }
                None => {}
            }
        };
        for key in self.files.keys() {
            add(key, true);
        }
        for key in &self.dirs {
            add(key, false);
        }
        children.into_iter().collect()
    }
}

/// Stable inode number for a snapshot path.
pub fn inode(path: &str) -> u64 {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in path.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fs(files: &[&str]) -> SnapshotFs {
        SnapshotFs::new(files.iter().map(|p| (p.to_string(), Vec::new())).collect())
    }

    #[test]
    fn test_fd_numbers_are_monotonic() {
        let mut table = FdTable::new("");
        let a = table.insert(FdEntry::Dir {
            path: String::new(),
            name: String::new(),
        });
        let a = a.unwrap();
        assert_eq!(a, FIRST_OPEN_FD);
        table.remove(a);
        let b = table
            .insert(FdEntry::File {
                path: "x".into(),
                offset: 0,
                append: false,
            })
            .unwrap();
        assert_eq!(b, FIRST_OPEN_FD + 1);
        assert!(table.get(a).is_none());
    }

    #[test]
    fn test_resolve_stays_inside_root() {
        let table = FdTable::new("work");
        assert_eq!(table.resolve(PREOPEN_FD, "a.txt").unwrap(), "work/a.txt");
        assert_eq!(table.resolve(PREOPEN_FD, "./x/../b").unwrap(), "work/b");
        assert_eq!(table.resolve(PREOPEN_FD, "."), Ok("work".to_string()));
        assert_eq!(table.resolve(PREOPEN_FD, ".."), Err(Errno::Inval));
        assert_eq!(table.resolve(PREOPEN_FD, "../../etc"), Err(Errno::Inval));
        assert_eq!(table.resolve(PREOPEN_FD, "/etc"), Err(Errno::Inval));
        assert_eq!(table.resolve(PREOPEN_FD, "a\0b"), Err(Errno::Inval));
        assert_eq!(table.resolve(99, "a"), Err(Errno::Badf));
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("anything", ""));
        assert!(is_within("work", "work"));
        assert!(is_within("work/a", "work"));
        assert!(!is_within("workshop", "work"));
    }

    #[test]
    fn test_snapshot_directories() {
        let mut fs = fs(&["a.txt", "src/b.rs", "src/deep/c.rs"]);
        assert!(fs.is_dir(""));
        assert!(fs.is_dir("src"));
        assert!(fs.is_dir("src/deep"));
        assert!(!fs.is_dir("sr"));
        assert!(!fs.is_dir("a.txt"));
        assert_eq!(
            fs.list(""),
            [
                ("a.txt".to_string(), filetype::REGULAR_FILE),
                ("src".to_string(), filetype::DIRECTORY)
            ]
        );
        assert_eq!(fs.list("src").len(), 2);

        fs.create_dir("empty").unwrap();
        assert!(fs.is_dir("empty"));
        assert_eq!(fs.create_dir("empty"), Err(Errno::Exist));
        assert_eq!(fs.create_dir("nope/x"), Err(Errno::Noent));
        assert_eq!(fs.create_file("a.txt/x"), Err(Errno::Notdir));
        assert_eq!(fs.remove_file("src"), Err(Errno::Isdir));
        assert_eq!(fs.remove_file("missing"), Err(Errno::Noent));
    }
}
