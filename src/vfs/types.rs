use chrono::{DateTime, Utc};
use fuser::FUSE_ROOT_ID;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-local node identifier, stable for the lifetime of the metadata store.
pub type LocalId = u64;

/// The filesystem root. Matches the inode number the kernel uses for the root.
pub const ROOT_ID: LocalId = FUSE_ROOT_ID;

/// Content of a file node as known to the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    /// Key of the bytes in the content cache.
    pub fingerprint: String,
    pub size: u64,
    /// Local content has not been confirmed uploaded yet.
    #[serde(default)]
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File(FileContent),
}

/// A snapshot of one node of the cached tree.
///
/// Nodes are plain values: the adapter receives clones taken under a single
/// lock of the metadata store, so every field comes from the same version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: LocalId,
    /// `None` only for the root.
    pub parent: Option<LocalId>,
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub kind: NodeKind,
}

impl Node {
    pub fn root() -> Self {
        Node {
            id: ROOT_ID,
            parent: None,
            name: String::new(),
            last_modified: Utc::now(),
            kind: NodeKind::Folder,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }

    /// File content, or `None` for folders.
    pub fn content(&self) -> Option<&FileContent> {
        match &self.kind {
            NodeKind::File(content) => Some(content),
            NodeKind::Folder => None,
        }
    }

    pub fn content_mut(&mut self) -> Option<&mut FileContent> {
        match &mut self.kind {
            NodeKind::File(content) => Some(content),
            NodeKind::Folder => None,
        }
    }

    /// Byte length reported to the kernel: zero for folders.
    pub fn size(&self) -> u64 {
        self.content().map_or(0, |c| c.size)
    }
}

/// Structural violations reported by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    NotEmpty,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    /// A folder would become its own descendant.
    InvalidMove,
}

impl ConflictKind {
    pub fn errno(self) -> i32 {
        match self {
            ConflictKind::NotEmpty => libc::ENOTEMPTY,
            ConflictKind::AlreadyExists => libc::EEXIST,
            ConflictKind::NotADirectory => libc::ENOTDIR,
            ConflictKind::IsADirectory => libc::EISDIR,
            ConflictKind::InvalidMove => libc::EINVAL,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::NotEmpty => write!(f, "directory not empty"),
            ConflictKind::AlreadyExists => write!(f, "name already exists"),
            ConflictKind::NotADirectory => write!(f, "not a directory"),
            ConflictKind::IsADirectory => write!(f, "is a directory"),
            ConflictKind::InvalidMove => write!(f, "cannot move a folder into itself"),
        }
    }
}

/// Errors returned by adapter operations, independent of the kernel channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("not found")]
    NotFound,

    /// Content is not cached yet; the caller may retry.
    #[error("content not ready")]
    NotReady,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("conflict: {0}")]
    Conflict(ConflictKind),
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotReady => libc::EAGAIN,
            FsError::Io(_) => libc::EIO,
            FsError::Conflict(kind) => kind.errno(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_fuse_root() {
        let root = Node::root();
        assert_eq!(root.id, 1);
        assert!(root.is_folder());
        assert!(root.parent.is_none());
        assert_eq!(root.size(), 0);
    }

    #[test]
    fn test_file_capabilities() {
        let node = Node {
            id: 7,
            parent: Some(ROOT_ID),
            name: "notes.txt".to_string(),
            last_modified: Utc::now(),
            kind: NodeKind::File(FileContent {
                fingerprint: "abc".to_string(),
                size: 42,
                dirty: false,
            }),
        };

        assert!(!node.is_folder());
        assert_eq!(node.content().map(|c| c.fingerprint.as_str()), Some("abc"));
        assert_eq!(node.size(), 42);
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::NotReady.errno(), libc::EAGAIN);
        assert_eq!(FsError::Io("boom".into()).errno(), libc::EIO);
        assert_eq!(
            FsError::Conflict(ConflictKind::NotEmpty).errno(),
            libc::ENOTEMPTY
        );
        assert_eq!(
            FsError::Conflict(ConflictKind::AlreadyExists).errno(),
            libc::EEXIST
        );
    }
}
