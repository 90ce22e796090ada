use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::remote::Remote;
use super::{SyncEngine, SyncEvent};
use crate::cache::{BlobStore, MetaStore, MetadataCache};
use crate::error::{DriveError, Result};
use crate::vfs::types::LocalId;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Time between full passes of the background loop.
    pub interval: Duration,
    /// Quiet period after the last local change before uploading.
    pub debounce: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            interval: Duration::from_secs(30),
            debounce: Duration::from_millis(2000),
        }
    }
}

/// Reconciles [`MetaStore`] and [`BlobStore`] with a [`Remote`].
///
/// Local changes are pushed before the remote listing is pulled, so a pass
/// never mistakes an unsynced local change for a remote deletion.
pub struct Syncer {
    inner: Arc<Inner>,
    tx: UnboundedSender<SyncEvent>,
    rx: Mutex<Option<UnboundedReceiver<SyncEvent>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    meta: Arc<MetaStore>,
    blobs: Arc<BlobStore>,
    remote: Arc<dyn Remote>,
    options: SyncOptions,
    pass_lock: Mutex<()>,
}

impl Syncer {
    pub fn new(
        meta: Arc<MetaStore>,
        blobs: Arc<BlobStore>,
        remote: Arc<dyn Remote>,
        options: SyncOptions,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Syncer {
            inner: Arc::new(Inner {
                meta,
                blobs,
                remote,
                options,
                pass_lock: Mutex::new(()),
            }),
            tx,
            rx: Mutex::new(Some(rx)),
            task: Mutex::new(None),
        }
    }

    /// Stop the background loop and push outstanding local changes.
    pub async fn finish(&self) -> Result<()> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = inner.pass_lock.lock();
            inner.push();
            inner.meta.save().map_err(DriveError::from)
        })
        .await
        .map_err(|e| DriveError::Sync(format!("Final sync task failed: {}", e)))?
    }
}

impl SyncEngine for Syncer {
    fn sync(&self, blocking: bool) -> Result<()> {
        if blocking {
            return self.inner.full_pass();
        }
        self.tx
            .send(SyncEvent::FullPass)
            .map_err(|_| DriveError::Sync("Sync loop is not running".to_string()))
    }

    fn start(&self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| DriveError::Sync("No async runtime to run the sync loop".to_string()))?;
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| DriveError::Sync("Sync loop already started".to_string()))?;
        let task = handle.spawn(run_loop(self.inner.clone(), rx));
        *self.task.lock() = Some(task);
        tracing::info!(
            "Sync loop started (interval {:?}, debounce {:?})",
            self.inner.options.interval,
            self.inner.options.debounce
        );
        Ok(())
    }

    fn request_fetch(&self, id: LocalId) {
        if self.tx.send(SyncEvent::FetchRequested(id)).is_err() {
            tracing::debug!("Dropped fetch request for node {}", id);
        }
    }

    fn notify_dirty(&self, id: LocalId) {
        if self.tx.send(SyncEvent::Dirty(id)).is_err() {
            tracing::debug!("Dropped dirty notification for node {}", id);
        }
    }
}

async fn run_loop(inner: Arc<Inner>, mut rx: UnboundedReceiver<SyncEvent>) {
    let debounce = inner.options.debounce;
    let period = inner.options.interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut pending: HashSet<LocalId> = HashSet::new();
    let mut last_change: Option<Instant> = None;

    loop {
        let timeout = match last_change {
            Some(instant) => debounce.saturating_sub(instant.elapsed()),
            None => Duration::from_secs(86400),
        };

        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(SyncEvent::FetchRequested(id)) => {
                        run_blocking(&inner, move |inner| inner.fetch(id)).await;
                    }
                    Some(SyncEvent::Dirty(id)) => {
                        pending.insert(id);
                        last_change = Some(Instant::now());
                    }
                    Some(SyncEvent::FullPass) => {
                        run_blocking(&inner, |inner| inner.full_pass()).await;
                        pending.clear();
                        last_change = None;
                    }
                    None => {
                        tracing::debug!("Sync channel closed, leaving loop");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(timeout), if last_change.is_some() => {
                tracing::debug!("Debounce expired, pushing {} changed nodes", pending.len());
                run_blocking(&inner, |inner| {
                    let _guard = inner.pass_lock.lock();
                    inner.push();
                    inner.meta.save().map_err(DriveError::from)
                })
                .await;
                pending.clear();
                last_change = None;
            }
            _ = ticker.tick() => {
                run_blocking(&inner, |inner| inner.full_pass()).await;
            }
        }
    }
}

/// Sync failures are logged and retried on the next pass.
async fn run_blocking<F>(inner: &Arc<Inner>, f: F)
where
    F: FnOnce(&Inner) -> Result<()> + Send + 'static,
{
    let inner = inner.clone();
    match tokio::task::spawn_blocking(move || f(&inner)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Sync failed: {}", e),
        Err(e) => tracing::warn!("Sync task panicked: {}", e),
    }
}

impl Inner {
    fn full_pass(&self) -> Result<()> {
        let _guard = self.pass_lock.lock();
        let started = Instant::now();

        self.push();
        let fetched = self.pull()?;
        self.prefetch();
        self.meta.save()?;

        tracing::debug!(
            "Sync pass finished in {:?}, {} files changed remotely",
            started.elapsed(),
            fetched
        );
        Ok(())
    }

    /// Send local changes to the remote. Each failed item is left pending.
    fn push(&self) {
        for id in self.meta.take_dropped() {
            tracing::debug!("Evicting cached content of removed node {}", id);
            self.blobs.evict(id);
        }

        // Bounded so a move the remote keeps rejecting cannot spin forever
        for _ in 0..self.meta.len() {
            let Some((id, from, to)) = self.meta.next_pending_move() else {
                break;
            };
            match self.remote.rename(&from, &to) {
                Ok(()) => {
                    tracing::debug!(
                        "Moved node {} from {} to {}",
                        id,
                        from.display(),
                        to.display()
                    );
                    self.meta.mark_moved(&from, &to);
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    break;
                }
            }
        }

        // After moves, so content moved out of a removed folder survives
        for path in self.meta.removable_tombstones() {
            match self.remote.remove(&path) {
                Ok(()) => {
                    tracing::debug!("Removed {} remotely", path.display());
                    self.meta.clear_tombstone(&path);
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }

        for (id, path) in self.meta.pending_folders() {
            match self.remote.create_dir(&path) {
                Ok(()) => self.meta.mark_folder_synced(id, &path),
                Err(e) => tracing::warn!("{}", e),
            }
        }

        for (node, path) in self.meta.dirty_files() {
            let Some(content) = node.content() else {
                continue;
            };
            let bytes = match self.blobs.load(node.id, &content.fingerprint) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Cannot upload {}: {}", path.display(), e);
                    continue;
                }
            };
            match self.remote.upload(&path, &bytes) {
                Ok(version) => {
                    tracing::debug!("Uploaded {} ({} bytes)", path.display(), bytes.len());
                    self.meta
                        .mark_uploaded(node.id, &content.fingerprint, &path, version);
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }
    }

    /// Merge the remote listing into the metadata store. Returns the number
    /// of files whose content changed remotely.
    fn pull(&self) -> Result<usize> {
        let mut entries = self.remote.list()?;
        // Parents sort before their children
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let previous: HashMap<LocalId, String> = self
            .meta
            .files()
            .into_iter()
            .filter_map(|n| Some((n.id, n.content()?.fingerprint.clone())))
            .collect();

        let mut changed = Vec::new();
        let mut listed: HashSet<PathBuf> = HashSet::with_capacity(entries.len());
        for entry in &entries {
            listed.insert(entry.path.clone());
            match self.meta.apply_remote_entry(entry) {
                Ok(Some(id)) => changed.push(id),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping remote entry {}: {}", entry.path.display(), e),
            }
        }

        for id in &changed {
            if let Some(old) = previous.get(id) {
                self.blobs.discard(*id, old);
            }
        }

        for id in self.meta.apply_remote_deletions(&listed) {
            tracing::debug!("Node {} was deleted remotely", id);
            self.blobs.evict(id);
        }

        Ok(changed.len())
    }

    /// Download every clean file whose current content is not cached.
    fn prefetch(&self) {
        for node in self.meta.files() {
            let Some(content) = node.content() else {
                continue;
            };
            if content.dirty || self.blobs.contains(node.id, &content.fingerprint) {
                continue;
            }
            if let Err(e) = self.fetch(node.id) {
                tracing::warn!("Failed to fetch node {}: {}", node.id, e);
            }
        }
    }

    fn fetch(&self, id: LocalId) -> Result<()> {
        let node = self.meta.node(id)?;
        let Some(content) = node.content() else {
            return Ok(());
        };
        if content.dirty
            || content.fingerprint.is_empty()
            || self.blobs.contains(id, &content.fingerprint)
        {
            return Ok(());
        }
        let Some(path) = self.meta.remote_path(id) else {
            return Ok(());
        };

        let bytes = self.remote.download(&path)?;
        self.blobs.store(id, &content.fingerprint, &bytes)?;
        tracing::debug!(
            "Fetched {} ({} bytes) for node {}",
            path.display(),
            bytes.len(),
            id
        );
        Ok(())
    }
}
