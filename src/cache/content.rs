use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::{BaseContent, CacheError, CacheResult, ContentCache, ContentVersion};
use crate::vfs::types::LocalId;

/// File bytes stored as immutable blobs under `<root>/<id>/<fingerprint>`.
///
/// A blob only appears under its final name once it is complete, so its
/// existence means the content is fully cached. Changes are staged in a
/// temporary file and renamed into place.
pub struct BlobStore {
    root: PathBuf,
    next_tmp: AtomicU64,
}

impl BlobStore {
    pub fn open(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let store = BlobStore {
            root: root.to_path_buf(),
            next_tmp: AtomicU64::new(0),
        };
        store.remove_partials();
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hex SHA-256 of `bytes`, the fingerprint of locally produced content.
    pub fn fingerprint(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn contains(&self, id: LocalId, fingerprint: &str) -> bool {
        self.blob_path(id, fingerprint)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Whole content of a cached blob.
    pub fn load(&self, id: LocalId, fingerprint: &str) -> CacheResult<Vec<u8>> {
        if fingerprint.is_empty() {
            return Ok(Vec::new());
        }
        match fs::read(self.blob_path(id, fingerprint)?) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CacheError::NotReady(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Store downloaded content under `fingerprint`.
    pub fn store(&self, id: LocalId, fingerprint: &str, bytes: &[u8]) -> CacheResult<()> {
        let dest = self.blob_path(id, fingerprint)?;
        let tmp = self.temp_path(id)?;
        let result = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, &dest));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop one superseded version of a node.
    pub fn discard(&self, id: LocalId, fingerprint: &str) {
        let Ok(path) = self.blob_path(id, fingerprint) else {
            return;
        };
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::debug!("Failed to discard blob {}: {}", path.display(), e);
            }
        }
    }

    /// Drop every cached version of a node.
    pub fn evict(&self, id: LocalId) {
        let dir = self.node_dir(id);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to evict blobs of node {}: {}", id, e);
            }
        }
    }

    fn node_dir(&self, id: LocalId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn blob_path(&self, id: LocalId, fingerprint: &str) -> CacheResult<PathBuf> {
        let valid = !fingerprint.is_empty()
            && !fingerprint.starts_with('.')
            && fingerprint
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.');
        if !valid {
            return Err(CacheError::Corrupt(format!(
                "invalid fingerprint {:?} for node {}",
                fingerprint, id
            )));
        }
        Ok(self.node_dir(id).join(fingerprint))
    }

    fn temp_path(&self, id: LocalId) -> io::Result<PathBuf> {
        let dir = self.node_dir(id);
        fs::create_dir_all(&dir)?;
        let n = self.next_tmp.fetch_add(1, Ordering::Relaxed);
        Ok(dir.join(format!(".{}.partial", n)))
    }

    /// Remove versions of a node other than `keep`.
    pub fn retain(&self, id: LocalId, keep: &[&str]) {
        let Ok(entries) = fs::read_dir(self.node_dir(id)) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || keep.contains(&name.as_ref()) {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::debug!("Failed to remove blob {}: {}", entry.path().display(), e);
            }
        }
    }

    /// Leftovers of writes interrupted by a crash.
    fn remove_partials(&self) {
        for entry in walkdir::WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .flatten()
        {
            if entry.file_name().to_string_lossy().ends_with(".partial") {
                let _ = fs::remove_file(entry.path());
            }
        }
    }

    /// Stage a copy of `base`, let `apply` modify it, then commit it under
    /// its new fingerprint. The base blob is never touched.
    fn rewrite<F>(&self, id: LocalId, base: BaseContent<'_>, keep_base: bool, apply: F)
        -> CacheResult<ContentVersion>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let source = if keep_base && base.size > 0 {
            let path = self.blob_path(id, base.fingerprint)?;
            if !path.is_file() {
                return Err(CacheError::NotReady(id));
            }
            Some(path)
        } else {
            None
        };

        let tmp = self.temp_path(id)?;
        let staged = (|| -> CacheResult<ContentVersion> {
            if let Some(source) = &source {
                fs::copy(source, &tmp)?;
            }
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(source.is_none())
                .open(&tmp)?;
            apply(&mut file)?;

            let size = file.metadata()?.len();
            file.seek(SeekFrom::Start(0))?;
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            let fingerprint = hex::encode(hasher.finalize());

            fs::rename(&tmp, self.blob_path(id, &fingerprint)?)?;
            Ok(ContentVersion { fingerprint, size })
        })();

        match staged {
            Ok(version) => {
                // Keep the base so readers holding the previous snapshot still succeed
                self.retain(id, &[version.fingerprint.as_str(), base.fingerprint]);
                Ok(version)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }
}

impl ContentCache for BlobStore {
    fn read(
        &self,
        id: LocalId,
        fingerprint: &str,
        offset: u64,
        len: usize,
    ) -> CacheResult<Vec<u8>> {
        let path = self.blob_path(id, fingerprint)?;
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotReady(id));
            }
            Err(e) => return Err(e.into()),
        };

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write(
        &self,
        id: LocalId,
        base: BaseContent<'_>,
        offset: u64,
        data: &[u8],
    ) -> CacheResult<ContentVersion> {
        self.rewrite(id, base, true, |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)
        })
    }

    fn truncate(
        &self,
        id: LocalId,
        base: BaseContent<'_>,
        size: u64,
    ) -> CacheResult<ContentVersion> {
        self.rewrite(id, base, size > 0, |file| file.set_len(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: BaseContent<'static> = BaseContent {
        fingerprint: "",
        size: 0,
    };

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(&dir.path().join("blobs")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, store) = store();
        let v = store.write(2, EMPTY, 0, b"hello").unwrap();

        assert_eq!(v.size, 5);
        assert_eq!(v.fingerprint, BlobStore::fingerprint(b"hello"));
        assert_eq!(store.read(2, &v.fingerprint, 0, 5).unwrap(), b"hello");
        assert_eq!(store.read(2, &v.fingerprint, 3, 10).unwrap(), b"lo");
    }

    #[test]
    fn test_sparse_write_zero_fills_gap() {
        let (_dir, store) = store();
        let v1 = store.write(2, EMPTY, 0, b"ab").unwrap();
        let v2 = store
            .write(
                2,
                BaseContent {
                    fingerprint: &v1.fingerprint,
                    size: v1.size,
                },
                5,
                b"z",
            )
            .unwrap();

        assert_eq!(v2.size, 6);
        assert_eq!(
            store.read(2, &v2.fingerprint, 0, 16).unwrap(),
            b"ab\0\0\0z".to_vec()
        );
    }

    #[test]
    fn test_overwrite_keeps_other_ranges() {
        let (_dir, store) = store();
        let v1 = store.write(2, EMPTY, 0, b"0123456789").unwrap();
        let v2 = store
            .write(
                2,
                BaseContent {
                    fingerprint: &v1.fingerprint,
                    size: v1.size,
                },
                3,
                b"xy",
            )
            .unwrap();

        assert_eq!(store.read(2, &v2.fingerprint, 0, 10).unwrap(), b"012xy56789");
        // The base version stays readable for concurrent readers
        assert_eq!(store.read(2, &v1.fingerprint, 0, 10).unwrap(), b"0123456789");
    }

    #[test]
    fn test_read_missing_blob_is_not_ready() {
        let (_dir, store) = store();
        let err = store.read(9, "deadbeef", 0, 4).unwrap_err();
        assert!(matches!(err, CacheError::NotReady(9)));
    }

    #[test]
    fn test_write_on_uncached_base_is_not_ready() {
        let (_dir, store) = store();
        let base = BaseContent {
            fingerprint: "remote-v1",
            size: 100,
        };
        let err = store.write(4, base, 0, b"x").unwrap_err();
        assert!(matches!(err, CacheError::NotReady(4)));
    }

    #[test]
    fn test_truncate() {
        let (_dir, store) = store();
        let v1 = store.write(2, EMPTY, 0, b"hello world").unwrap();
        let base = BaseContent {
            fingerprint: &v1.fingerprint,
            size: v1.size,
        };

        let v2 = store.truncate(2, base, 5).unwrap();
        assert_eq!(v2.size, 5);
        assert_eq!(store.read(2, &v2.fingerprint, 0, 64).unwrap(), b"hello");

        // Truncating to zero never needs the base
        let uncached = BaseContent {
            fingerprint: "remote-v9",
            size: 50,
        };
        let v3 = store.truncate(3, uncached, 0).unwrap();
        assert_eq!(v3.size, 0);
    }

    #[test]
    fn test_retain_drops_previous_versions() {
        let (_dir, store) = store();
        store.store(5, "v1", b"one").unwrap();
        store.store(5, "v2", b"two").unwrap();
        assert!(store.contains(5, "v1"));

        store.retain(5, &["v2"]);

        assert!(!store.contains(5, "v1"));
        assert_eq!(store.load(5, "v2").unwrap(), b"two");
        assert!(matches!(store.load(5, "v1"), Err(CacheError::NotReady(5))));
    }

    #[test]
    fn test_rejects_path_like_fingerprints() {
        let (_dir, store) = store();
        assert!(matches!(
            store.read(1, "../escape", 0, 1),
            Err(CacheError::Corrupt(_))
        ));
    }

    #[test]
    fn test_open_removes_partials() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blobs");
        fs::create_dir_all(root.join("7")).unwrap();
        fs::write(root.join("7/.0.partial"), b"junk").unwrap();

        let _store = BlobStore::open(&root).unwrap();
        assert!(!root.join("7/.0.partial").exists());
    }
}
