use dashmap::DashMap;
use fuser::FileType;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

use super::types::{FsError, LocalId, Node};
use crate::cache::{BaseContent, CacheError, ContentCache, MetadataCache};
use crate::error::{DriveError, Result};
use crate::sync::SyncEngine;

/// Names the OS probes for on every mounted volume. They never exist on the
/// remote, so lookups for them are answered without touching the cache.
pub const DEFAULT_RESERVED_NAMES: &[&str] = &[
    "._.",
    "._*",
    ".hidden",
    ".DS_Store",
    "mach_kernel",
    "Backups.backupdb",
    ".Spotlight-V100",
    ".Trashes",
    ".metadata_never_index",
];

pub const FOLDER_PERM: u16 = 0o774;
pub const FILE_PERM: u16 = 0o664;

const STALE_READ_RETRIES: usize = 4;

/// How directory enumeration failures are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingMode {
    /// A failed enumeration looks like an empty directory.
    #[default]
    BestEffort,
    /// A failed enumeration is an I/O error.
    Strict,
}

#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Glob patterns matched against single path components.
    pub reserved_names: Vec<String>,
    pub listing: ListingMode,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        AdapterOptions {
            reserved_names: DEFAULT_RESERVED_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            listing: ListingMode::default(),
        }
    }
}

/// Kernel-facing attributes of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub id: LocalId,
    pub kind: FileType,
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub id: LocalId,
    pub name: String,
    pub kind: FileType,
}

/// Children of a folder, consumed once.
pub struct DirListing {
    nodes: std::vec::IntoIter<Node>,
}

impl DirListing {
    fn empty() -> Self {
        DirListing {
            nodes: Vec::new().into_iter(),
        }
    }
}

impl Iterator for DirListing {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        self.nodes.next().map(|node| DirEntry {
            id: node.id,
            kind: file_type(&node),
            name: node.name,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.nodes.size_hint()
    }
}

pub fn file_type(node: &Node) -> FileType {
    if node.is_folder() {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

/// Translates filesystem requests into metadata and content cache calls.
///
/// Every operation takes `&self`. Structural changes are single cache
/// calls, so they are atomic with respect to each other and to the sync
/// engine. Content changes of one node are serialized by a per-node lock.
pub struct DriveAdapter {
    meta: Arc<dyn MetadataCache>,
    content: Arc<dyn ContentCache>,
    sync: Arc<dyn SyncEngine>,
    reserved: Vec<glob::Pattern>,
    listing: ListingMode,
    write_locks: DashMap<LocalId, Arc<Mutex<()>>>,
    uid: u32,
    gid: u32,
}

impl DriveAdapter {
    pub fn new(
        meta: Arc<dyn MetadataCache>,
        content: Arc<dyn ContentCache>,
        sync: Arc<dyn SyncEngine>,
        options: AdapterOptions,
    ) -> Result<Self> {
        let reserved = options
            .reserved_names
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| {
                    DriveError::Config(format!("Invalid reserved name pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<glob::Pattern>>>()?;

        Ok(DriveAdapter {
            meta,
            content,
            sync,
            reserved,
            listing: options.listing,
            write_locks: DashMap::new(),
            uid: nix::unistd::geteuid().as_raw(),
            gid: nix::unistd::getegid().as_raw(),
        })
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.iter().any(|p| p.matches(name))
    }

    pub fn attributes(&self, node: &Node) -> NodeAttr {
        NodeAttr {
            id: node.id,
            kind: file_type(node),
            perm: if node.is_folder() {
                FOLDER_PERM
            } else {
                FILE_PERM
            },
            uid: self.uid,
            gid: self.gid,
            size: node.size(),
            mtime: node.last_modified.into(),
        }
    }

    pub fn node(&self, id: LocalId) -> std::result::Result<Node, FsError> {
        self.meta.node(id).map_err(|_| FsError::NotFound)
    }

    /// Absence and cache failures both read as `NotFound`.
    pub fn lookup(&self, parent: LocalId, name: &str) -> std::result::Result<Node, FsError> {
        if self.is_reserved(name) {
            return Err(FsError::NotFound);
        }
        self.meta.child_by_name(parent, name).map_err(|e| {
            if !matches!(e, CacheError::NotFound) {
                tracing::debug!("lookup({}, {:?}) failed: {}", parent, name, e);
            }
            FsError::NotFound
        })
    }

    pub fn create(&self, parent: LocalId, name: &str) -> std::result::Result<Node, FsError> {
        self.meta
            .create_local(parent, name, 0, false)
            .map_err(|e| FsError::Io(e.to_string()))
    }

    pub fn make_directory(
        &self,
        parent: LocalId,
        name: &str,
    ) -> std::result::Result<Node, FsError> {
        self.meta
            .create_local(parent, name, 0, true)
            .map_err(|e| FsError::Io(e.to_string()))
    }

    /// Children of `parent` according to the configured [`ListingMode`].
    pub fn read_directory(&self, parent: LocalId) -> std::result::Result<DirListing, FsError> {
        match self.listing {
            ListingMode::Strict => self.try_read_directory(parent),
            ListingMode::BestEffort => Ok(self.try_read_directory(parent).unwrap_or_else(|e| {
                tracing::warn!("Listing folder {} failed, reporting it empty: {}", parent, e);
                DirListing::empty()
            })),
        }
    }

    pub fn try_read_directory(
        &self,
        parent: LocalId,
    ) -> std::result::Result<DirListing, FsError> {
        let nodes = self
            .meta
            .children(parent)
            .map_err(|e| FsError::Io(e.to_string()))?;
        Ok(DirListing {
            nodes: nodes.into_iter(),
        })
    }

    pub fn rename(
        &self,
        old_parent: LocalId,
        old_name: &str,
        new_parent: LocalId,
        new_name: &str,
    ) -> std::result::Result<(), FsError> {
        self.meta
            .move_node(old_parent, old_name, new_parent, new_name, None)
            .map_err(|e| match e {
                CacheError::Conflict(kind) => FsError::Conflict(kind),
                other => FsError::Io(other.to_string()),
            })
    }

    pub fn remove(
        &self,
        parent: LocalId,
        name: &str,
        is_dir: bool,
    ) -> std::result::Result<(), FsError> {
        self.meta.remove(parent, name, is_dir).map_err(|e| match e {
            CacheError::NotFound => FsError::NotFound,
            CacheError::Conflict(kind) => FsError::Conflict(kind),
            other => FsError::Io(other.to_string()),
        })
    }

    /// Up to `length` bytes at `offset`. Uncached content is reported as
    /// `NotReady` and queued for download; no bytes are ever made up.
    ///
    /// A snapshot whose version was already superseded by later writes is
    /// re-read from the current node.
    pub fn read(
        &self,
        node: &Node,
        offset: u64,
        length: u32,
    ) -> std::result::Result<Vec<u8>, FsError> {
        let mut current = node.clone();
        for _ in 0..STALE_READ_RETRIES {
            match self.read_version(&current, offset, length) {
                Err(FsError::NotReady) => {
                    let Ok(latest) = self.meta.node(node.id) else {
                        return Err(FsError::NotFound);
                    };
                    if latest.content().map(|c| &c.fingerprint)
                        == current.content().map(|c| &c.fingerprint)
                    {
                        self.sync.request_fetch(node.id);
                        return Err(FsError::NotReady);
                    }
                    current = latest;
                }
                other => return other,
            }
        }
        self.sync.request_fetch(node.id);
        Err(FsError::NotReady)
    }

    fn read_version(
        &self,
        node: &Node,
        offset: u64,
        length: u32,
    ) -> std::result::Result<Vec<u8>, FsError> {
        let Some(content) = node.content() else {
            return Err(FsError::Io(format!("node {} is a folder", node.id)));
        };
        if offset >= content.size {
            return Ok(Vec::new());
        }
        let len = (length as u64).min(content.size - offset) as usize;

        match self.content.read(node.id, &content.fingerprint, offset, len) {
            Ok(mut bytes) => {
                bytes.truncate(len);
                Ok(bytes)
            }
            Err(CacheError::NotReady(_)) => Err(FsError::NotReady),
            Err(e) => Err(FsError::Io(e.to_string())),
        }
    }

    /// Apply `data` at `offset`. Returns the number of bytes written, which
    /// is always all of them.
    pub fn write(&self, id: LocalId, offset: u64, data: &[u8]) -> std::result::Result<u32, FsError> {
        let written = u32::try_from(data.len())
            .map_err(|_| FsError::Io(format!("write of {} bytes is too large", data.len())))?;
        self.with_write_lock(id, || {
            self.change_content(id, |content, base| content.write(id, base, offset, data))
        })?;
        Ok(written)
    }

    /// Set the file length, zero-filling growth.
    pub fn truncate(&self, id: LocalId, size: u64) -> std::result::Result<Node, FsError> {
        self.with_write_lock(id, || {
            let node = self.node(id)?;
            if node.content().is_some_and(|c| c.size == size) {
                return Ok(node);
            }
            self.change_content(id, |content, base| content.truncate(id, base, size))
        })
    }

    /// Run `change` against the current content of `id` and record the
    /// result. Must be called with the node's write lock held.
    fn change_content<F>(&self, id: LocalId, change: F) -> std::result::Result<Node, FsError>
    where
        F: FnOnce(&dyn ContentCache, BaseContent<'_>) -> crate::cache::CacheResult<crate::cache::ContentVersion>,
    {
        let node = self.node(id)?;
        let Some(current) = node.content() else {
            return Err(FsError::Io(format!("node {} is a folder", id)));
        };
        let base = BaseContent {
            fingerprint: &current.fingerprint,
            size: current.size,
        };

        let version = change(self.content.as_ref(), base).map_err(|e| self.content_error(id, e))?;
        let updated = self
            .meta
            .update_content(id, &version)
            .map_err(|e| match e {
                CacheError::NotFound => FsError::NotFound,
                other => FsError::Io(other.to_string()),
            })?;
        self.sync.notify_dirty(id);
        Ok(updated)
    }

    fn content_error(&self, id: LocalId, e: CacheError) -> FsError {
        match e {
            CacheError::NotReady(_) => {
                self.sync.request_fetch(id);
                FsError::NotReady
            }
            CacheError::NotFound => FsError::NotFound,
            other => FsError::Io(other.to_string()),
        }
    }

    fn with_write_lock<T>(&self, id: LocalId, f: impl FnOnce() -> T) -> T {
        let lock = self
            .write_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        // Only the map and this call still hold it: nobody is waiting
        self.write_locks
            .remove_if(&id, |_, l| Arc::strong_count(l) == 2);
        result
    }

    #[cfg(test)]
    pub(crate) fn write_locks_count(&self) -> usize {
        self.write_locks.len()
    }
}
