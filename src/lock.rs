use crate::config::get_lock_path;
use crate::error::{DriveError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Exclusive claim on a data directory, released on drop.
///
/// Two instances sharing one metadata snapshot and blob store would
/// overwrite each other's state.
pub struct InstanceLock {
    file: File,
}

impl InstanceLock {
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = get_lock_path(data_dir);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                DriveError::Config(format!("Failed to open lock file {}: {}", path.display(), e))
            })?;

        file.try_lock_exclusive()
            .map_err(|_| DriveError::Locked(data_dir.to_path_buf()))?;
        tracing::debug!("Acquired lock {}", path.display());
        Ok(InstanceLock { file })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release instance lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_instance_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let first = InstanceLock::acquire(dir.path()).unwrap();

        assert!(matches!(
            InstanceLock::acquire(dir.path()),
            Err(DriveError::Locked(_))
        ));

        drop(first);
        assert!(InstanceLock::acquire(dir.path()).is_ok());
    }
}
