pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod lock;
pub mod mount;
pub mod sync;
pub mod vfs;

pub use cache::{BlobStore, ContentCache, MetaStore, MetadataCache};
pub use config::{load_config, save_config, Config};
pub use error::{DriveError, Result};
pub use mount::{MountController, MountState, MountSubstrate, ShutdownOutcome};
pub use sync::{SyncEngine, Syncer};
pub use vfs::{DriveAdapter, DriveFs, FsError};
