//! Synchronization between the local caches and the remote account.

mod engine;
pub mod remote;

pub use engine::{SyncOptions, Syncer};
pub use remote::{DirRemote, Remote};

use crate::error::Result;
use crate::vfs::types::LocalId;

/// Events the filesystem adapter and the CLI send to the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A read hit uncached content; download it ahead of the next pass.
    FetchRequested(LocalId),
    /// Local content changed and must be uploaded.
    Dirty(LocalId),
    FullPass,
}

/// The engine reconciling the caches with the remote store.
///
/// `request_fetch` and `notify_dirty` are called from filesystem request
/// handlers and must never block.
pub trait SyncEngine: Send + Sync {
    /// Run one reconciliation pass. `blocking` runs it on the calling
    /// thread; otherwise it is queued for the background loop.
    fn sync(&self, blocking: bool) -> Result<()>;

    /// Begin the background loop.
    fn start(&self) -> Result<()>;

    fn request_fetch(&self, id: LocalId);

    fn notify_dirty(&self, id: LocalId);
}
