use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use drivefuse::cache::{BlobStore, MetaStore};
use drivefuse::sync::{DirRemote, SyncOptions, Syncer};
use drivefuse::vfs::{AdapterOptions, DriveAdapter, LocalId};
use drivefuse::SyncEngine;
use tempfile::TempDir;

/// Get the path to the drivefuse binary for testing.
#[allow(dead_code)]
pub fn get_drivefuse_path() -> PathBuf {
    assert_cmd::cargo::cargo_bin!("drivefuse").to_path_buf()
}

/// Sync engine stand-in that only records what the adapter asked for.
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingSync {
    pub fetches: Mutex<Vec<LocalId>>,
    pub dirty: Mutex<Vec<LocalId>>,
}

impl SyncEngine for RecordingSync {
    fn sync(&self, _blocking: bool) -> drivefuse::Result<()> {
        Ok(())
    }

    fn start(&self) -> drivefuse::Result<()> {
        Ok(())
    }

    fn request_fetch(&self, id: LocalId) {
        self.fetches.lock().unwrap().push(id);
    }

    fn notify_dirty(&self, id: LocalId) {
        self.dirty.lock().unwrap().push(id);
    }
}

/// Isolated data directory, remote directory and caches for one test.
/// Used by various test files - #[allow(dead_code)] because not all tests use all fields.
#[allow(dead_code)]
pub struct TestDrive {
    pub temp_dir: TempDir,
    pub data_dir: PathBuf,
    pub remote_root: PathBuf,
    pub meta: Arc<MetaStore>,
    pub blobs: Arc<BlobStore>,
}

impl Default for TestDrive {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl TestDrive {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let data_dir = temp_dir.path().join("data");
        let remote_root = temp_dir.path().join("remote");
        std::fs::create_dir_all(&remote_root).expect("Failed to create remote dir");

        let meta = Arc::new(
            MetaStore::open(&data_dir.join("metadata.json"), false)
                .expect("Failed to open metadata"),
        );
        let blobs =
            Arc::new(BlobStore::open(&data_dir.join("blobs")).expect("Failed to open blobs"));

        TestDrive {
            temp_dir,
            data_dir,
            remote_root,
            meta,
            blobs,
        }
    }

    /// Reopen the caches from disk, as a restarted process would.
    pub fn reopen(&mut self) {
        self.meta = Arc::new(
            MetaStore::open(&self.data_dir.join("metadata.json"), false)
                .expect("Failed to reopen metadata"),
        );
        self.blobs =
            Arc::new(BlobStore::open(&self.data_dir.join("blobs")).expect("Failed to reopen blobs"));
    }

    pub fn write_remote(&self, rel: &str, content: &[u8]) {
        let path = self.remote_root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create remote parent");
        }
        std::fs::write(path, content).expect("Failed to write remote file");
    }

    pub fn remote_path(&self, rel: &str) -> PathBuf {
        self.remote_root.join(rel)
    }

    pub fn syncer(&self) -> Arc<Syncer> {
        let remote = Arc::new(DirRemote::new(&self.remote_root).expect("Failed to open remote"));
        Arc::new(Syncer::new(
            self.meta.clone(),
            self.blobs.clone(),
            remote,
            SyncOptions {
                interval: Duration::from_secs(3600),
                debounce: Duration::from_millis(50),
            },
        ))
    }

    pub fn adapter(&self, sync: Arc<dyn SyncEngine>) -> DriveAdapter {
        DriveAdapter::new(
            self.meta.clone(),
            self.blobs.clone(),
            sync,
            AdapterOptions::default(),
        )
        .expect("Failed to build adapter")
    }
}

/// Poll `check` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}

#[allow(dead_code)]
pub fn read_to_string(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}
