use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{BlobStore, MetaStore};
use crate::commands::Context;
use crate::config::{get_blob_dir, get_metadata_path};
use crate::error::{DriveError, Result};
use crate::lock::InstanceLock;
use crate::mount::{termination_signal, FuseSubstrate, MountController, ShutdownOutcome};
use crate::sync::{DirRemote, Remote, SyncEngine, SyncOptions, Syncer};
use crate::vfs::{AdapterOptions, DriveAdapter, DriveFs};

/// Sync, mount and serve until the filesystem goes away. Returns the
/// process exit code.
pub async fn run_mount(ctx: &Context, blocksync: bool) -> Result<i32> {
    let _lock = InstanceLock::acquire(&ctx.data_dir)?;
    let config = &ctx.config;

    let meta = Arc::new(MetaStore::open(
        &get_metadata_path(&ctx.data_dir),
        config.metadata.unique_names,
    )?);
    let blobs = Arc::new(BlobStore::open(&get_blob_dir(&ctx.data_dir))?);
    let remote: Arc<dyn Remote> = Arc::new(DirRemote::new(&ctx.remote_root)?);
    tracing::info!("Synchronizing with {}", ctx.remote_root.display());

    let syncer = Arc::new(Syncer::new(
        meta.clone(),
        blobs.clone(),
        remote,
        SyncOptions {
            interval: config.sync.get_interval(),
            debounce: config.sync.get_debounce(),
        },
    ));

    if blocksync || config.sync.blocking_on_start {
        tracing::info!("Running blocking sync before mounting");
        let blocking = syncer.clone();
        tokio::task::spawn_blocking(move || blocking.sync(true))
            .await
            .map_err(|e| DriveError::Sync(format!("Blocking sync task failed: {}", e)))??;
    }
    syncer.start()?;

    let adapter = Arc::new(DriveAdapter::new(
        meta.clone(),
        blobs,
        syncer.clone(),
        AdapterOptions {
            reserved_names: config.fuse.get_ignored_names(),
            listing: config.fuse.listing,
        },
    )?);
    let fs = DriveFs::new(
        adapter,
        Duration::from_secs(config.fuse.get_ttl_secs()),
        tokio::runtime::Handle::current(),
    );

    let grace = config.shutdown.get_grace();
    let controller = Arc::new(MountController::new(
        FuseSubstrate,
        ctx.mount_point.clone(),
        grace,
    ));
    let session = controller.mount(fs)?;

    let (served_tx, mut served_rx) = tokio::sync::oneshot::channel();
    let serving = controller.clone();
    std::thread::spawn(move || {
        let _ = served_tx.send(serving.serve(session));
    });

    let outcome = tokio::select! {
        served = &mut served_rx => {
            if let Ok(Err(e)) = served {
                tracing::warn!("{}", e);
            }
            tracing::info!("Filesystem was unmounted externally");
            ShutdownOutcome::Unmounted
        }
        outcome = controller.shutdown_on(termination_signal()) => {
            if outcome == ShutdownOutcome::Unmounted {
                // Let the session drain before the final push
                let _ = tokio::time::timeout(grace, &mut served_rx).await;
            }
            outcome
        }
    };

    let outcome = match outcome {
        ShutdownOutcome::Unmounted => finish_within(syncer.finish(), grace, &meta).await,
        ShutdownOutcome::Forced => {
            save_metadata(&meta);
            ShutdownOutcome::Forced
        }
    };

    Ok(outcome.exit_code())
}

/// Run the final push, giving up after `grace`. A push that does not finish
/// in time leaves its files dirty for the next start.
async fn finish_within<F>(finish: F, grace: Duration, meta: &MetaStore) -> ShutdownOutcome
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(grace, finish).await {
        Ok(Ok(())) => ShutdownOutcome::Unmounted,
        Ok(Err(e)) => {
            tracing::warn!("Final sync failed: {}", e);
            ShutdownOutcome::Unmounted
        }
        Err(_) => {
            tracing::warn!("Final sync did not finish within {:?}, exiting", grace);
            save_metadata(meta);
            ShutdownOutcome::Forced
        }
    }
}

fn save_metadata(meta: &MetaStore) {
    if let Err(e) = meta.save() {
        tracing::warn!("Failed to save metadata: {}", e);
    }
}
