use crate::error::{DriveError, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub fn expand_tilde(path: &str) -> PathBuf {
    let path = path.trim();
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

/// The data directory: `explicit` if given, then `DRIVEFUSE_DATA_DIR`, then
/// the platform data directory.
pub fn get_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(expand_tilde(&dir.to_string_lossy()));
    }
    if let Ok(env_dir) = std::env::var("DRIVEFUSE_DATA_DIR") {
        return Ok(expand_tilde(&env_dir));
    }

    let project_dirs = ProjectDirs::from("com", "drivefuse", "drivefuse").ok_or_else(|| {
        DriveError::Config("Could not determine data directory".to_string())
    })?;
    Ok(project_dirs.data_dir().to_path_buf())
}

pub fn get_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

pub fn get_metadata_path(data_dir: &Path) -> PathBuf {
    data_dir.join("metadata.json")
}

pub fn get_blob_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("blobs")
}

pub fn get_lock_path(data_dir: &Path) -> PathBuf {
    data_dir.join("drivefuse.lock")
}

pub fn get_default_remote_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("remote")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_data_dir_wins() {
        let dir = get_data_dir(Some(Path::new("/tmp/drivefuse-data"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/drivefuse-data"));
        assert_eq!(
            get_config_path(&dir),
            PathBuf::from("/tmp/drivefuse-data/config.toml")
        );
    }

    #[test]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap();
        assert_eq!(expand_tilde("~/drive"), PathBuf::from(&home).join("drive"));
        assert_eq!(expand_tilde("~"), PathBuf::from(&home));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}
