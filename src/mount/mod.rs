//! Mounting, serving and tearing down the filesystem.

pub mod controller;
mod fuse;

pub use controller::{termination_signal, MountController, MountState, ShutdownOutcome};
pub use fuse::FuseSubstrate;

use crate::error::Result;
use std::path::Path;

/// The OS facility that attaches a filesystem to a directory.
///
/// `mount` and `unmount` must be callable from any thread while another
/// thread is blocked in `serve`.
pub trait MountSubstrate: Send + Sync + 'static {
    type Fs: Send + 'static;
    type Session: Send + 'static;

    fn mount(&self, path: &Path, fs: Self::Fs) -> Result<Self::Session>;

    /// Dispatch kernel requests until the filesystem is unmounted.
    fn serve(&self, session: Self::Session) -> Result<()>;

    fn unmount(&self, path: &Path) -> Result<()>;
}
