use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::cache::RemoteEntry;
use crate::error::{DriveError, Result};

/// The remote account as seen by the sync engine.
///
/// Paths are relative to the account root. Versions are opaque strings that
/// change whenever the remote content changes.
pub trait Remote: Send + Sync {
    fn list(&self) -> Result<Vec<RemoteEntry>>;

    fn download(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replace the content at `path`, returning the new version.
    fn upload(&self, path: &Path, bytes: &[u8]) -> Result<String>;

    fn create_dir(&self, path: &Path) -> Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn remove(&self, path: &Path) -> Result<()>;
}

/// A directory tree standing in for the remote account.
pub struct DirRemote {
    root: PathBuf,
}

const UPLOAD_SUFFIX: &str = ".drivefuse-upload";

impl DirRemote {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            DriveError::Remote(format!(
                "Failed to create remote root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(DirRemote {
            root: root.to_path_buf(),
        })
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(DriveError::Remote(format!(
                "Refusing non-relative remote path {}",
                path.display()
            )));
        }
        Ok(self.root.join(path))
    }

    fn version_of(meta: &fs::Metadata) -> String {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("{}-{}", meta.len(), mtime)
    }
}

fn remote_err(action: &str, path: &Path, e: io::Error) -> DriveError {
    DriveError::Remote(format!("Failed to {} {}: {}", action, path.display(), e))
}

impl Remote for DirRemote {
    fn list(&self) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| DriveError::Remote(format!("Failed to list: {}", e)))?;
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(UPLOAD_SUFFIX) {
                continue;
            }
            let file_type = entry.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                continue;
            }
            let meta = entry
                .metadata()
                .map_err(|e| DriveError::Remote(format!("Failed to stat: {}", e)))?;
            let path = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| DriveError::Remote(e.to_string()))?
                .to_path_buf();
            entries.push(RemoteEntry {
                path,
                is_dir: file_type.is_dir(),
                size: if file_type.is_dir() { 0 } else { meta.len() },
                version: if file_type.is_dir() {
                    "dir".to_string()
                } else {
                    Self::version_of(&meta)
                },
            });
        }
        Ok(entries)
    }

    fn download(&self, path: &Path) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|e| remote_err("download", path, e))
    }

    fn upload(&self, path: &Path, bytes: &[u8]) -> Result<String> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| remote_err("upload", path, e))?;
        }
        let mut tmp = full.clone().into_os_string();
        tmp.push(UPLOAD_SUFFIX);
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, bytes)
            .and_then(|_| fs::rename(&tmp, &full))
            .map_err(|e| {
                let _ = fs::remove_file(&tmp);
                remote_err("upload", path, e)
            })?;
        let meta = fs::metadata(&full).map_err(|e| remote_err("upload", path, e))?;
        Ok(Self::version_of(&meta))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).map_err(|e| remote_err("create", path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let src = self.resolve(from)?;
        let dest = self.resolve(to)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| remote_err("rename", to, e))?;
        }
        fs::rename(&src, &dest).map_err(|e| remote_err("rename", from, e))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path)?;
        let result = match fs::symlink_metadata(&full) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&full),
            Ok(_) => fs::remove_file(&full),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(remote_err("remove", path, e)),
        }
    }
}
