//! Local caches shared by the filesystem adapter and the sync engine.
//!
//! The adapter only talks to the [`MetadataCache`] and [`ContentCache`]
//! traits. [`MetaStore`] and [`BlobStore`] are the implementations used by
//! the binary; both are safe for many concurrent callers.

pub mod content;
pub mod metadata;

pub use content::BlobStore;
pub use metadata::{MetaStore, RemoteEntry};

use crate::vfs::types::{ConflictKind, LocalId, Node};
use thiserror::Error;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("node not found")]
    NotFound,

    #[error("content of node {0} is not cached")]
    NotReady(LocalId),

    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache state: {0}")]
    Corrupt(String),
}

/// Fingerprint and byte length of a file after a content change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentVersion {
    pub fingerprint: String,
    pub size: u64,
}

/// Base content a write or truncate applies to.
#[derive(Debug, Clone, Copy)]
pub struct BaseContent<'a> {
    pub fingerprint: &'a str,
    pub size: u64,
}

/// Local view of the remote directory tree.
///
/// Every method is a single indivisible request: implementations apply each
/// mutation atomically with respect to all other callers.
pub trait MetadataCache: Send + Sync {
    fn node(&self, id: LocalId) -> CacheResult<Node>;

    /// First child of `parent` named `name`, in enumeration order.
    fn child_by_name(&self, parent: LocalId, name: &str) -> CacheResult<Node>;

    fn children(&self, parent: LocalId) -> CacheResult<Vec<Node>>;

    fn create_local(
        &self,
        parent: LocalId,
        name: &str,
        size: u64,
        is_dir: bool,
    ) -> CacheResult<Node>;

    fn move_node(
        &self,
        parent: LocalId,
        old_name: &str,
        new_parent: LocalId,
        new_name: &str,
        size_hint: Option<u64>,
    ) -> CacheResult<()>;

    fn remove(&self, parent: LocalId, name: &str, is_dir: bool) -> CacheResult<()>;

    /// Record new content for a file and mark it dirty.
    fn update_content(&self, id: LocalId, version: &ContentVersion) -> CacheResult<Node>;
}

/// Downloaded and locally written file bytes.
pub trait ContentCache: Send + Sync {
    /// Read up to `len` bytes at `offset`. Fails with `NotReady` if the
    /// content for `fingerprint` is not fully cached.
    fn read(&self, id: LocalId, fingerprint: &str, offset: u64, len: usize)
        -> CacheResult<Vec<u8>>;

    /// Apply `data` at `offset` on top of `base`, all or nothing.
    fn write(
        &self,
        id: LocalId,
        base: BaseContent<'_>,
        offset: u64,
        data: &[u8],
    ) -> CacheResult<ContentVersion>;

    fn truncate(&self, id: LocalId, base: BaseContent<'_>, size: u64)
        -> CacheResult<ContentVersion>;
}
