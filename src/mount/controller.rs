use parking_lot::Mutex;
use std::fs::DirBuilder;
use std::future::Future;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::MountSubstrate;
use crate::error::{DriveError, Result};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);

const MOUNT_POINT_MODE: u32 = 0o774;
const STATE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
    /// The unmount did not finish within the grace period.
    ForcedExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Unmounted,
    Forced,
}

impl ShutdownOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownOutcome::Unmounted => 0,
            ShutdownOutcome::Forced => 1,
        }
    }
}

/// Owns the mount of one mount point and its teardown.
pub struct MountController<S: MountSubstrate> {
    substrate: Arc<S>,
    mount_point: PathBuf,
    grace: Duration,
    state: Mutex<MountState>,
}

impl<S: MountSubstrate> MountController<S> {
    pub fn new(substrate: S, mount_point: PathBuf, grace: Duration) -> Self {
        MountController {
            substrate: Arc::new(substrate),
            mount_point,
            grace,
            state: Mutex::new(MountState::Unmounted),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn state(&self) -> MountState {
        *self.state.lock()
    }

    fn transition(&self, from: &[MountState], to: MountState) -> Result<()> {
        let mut state = self.state.lock();
        if !from.contains(&state) {
            return Err(DriveError::Mount(format!(
                "Cannot move from {:?} to {:?}",
                *state, to
            )));
        }
        tracing::debug!("Mount state {:?} -> {:?}", *state, to);
        *state = to;
        Ok(())
    }

    /// Attach `fs` to the mount point, clearing a stale mount left behind by
    /// an earlier run first.
    pub fn mount(&self, fs: S::Fs) -> Result<S::Session> {
        self.transition(&[MountState::Unmounted], MountState::Mounting)?;

        // A stale mount point fails to stat; the unmount below clears it
        if let Err(e) = DirBuilder::new()
            .recursive(true)
            .mode(MOUNT_POINT_MODE)
            .create(&self.mount_point)
        {
            tracing::debug!(
                "Could not create mount point {}: {}",
                self.mount_point.display(),
                e
            );
        }

        if let Err(e) = self.substrate.unmount(&self.mount_point) {
            tracing::debug!("Pre-mount unmount ignored: {}", e);
        }

        match self.substrate.mount(&self.mount_point, fs) {
            Ok(session) => {
                self.transition(&[MountState::Mounting], MountState::Mounted)?;
                tracing::info!("Mounted at {}", self.mount_point.display());
                Ok(session)
            }
            Err(e) => {
                *self.state.lock() = MountState::Unmounted;
                Err(e)
            }
        }
    }

    /// Block serving kernel requests until the filesystem is unmounted.
    pub fn serve(&self, session: S::Session) -> Result<()> {
        let result = self.substrate.serve(session);
        let mut state = self.state.lock();
        if *state != MountState::ForcedExit {
            *state = MountState::Unmounted;
        }
        result
    }

    /// Failures are logged and returned, never fatal.
    pub fn unmount(&self) -> Result<()> {
        self.substrate.unmount(&self.mount_point).map_err(|e| {
            tracing::warn!("{}", e);
            e
        })
    }

    /// Wait for `signal`, then unmount. Gives up once the grace period
    /// elapses, leaving the caller to exit with [`ShutdownOutcome::exit_code`].
    pub async fn shutdown_on<F>(&self, signal: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        signal.await;
        if self
            .transition(&[MountState::Mounted], MountState::Unmounting)
            .is_err()
        {
            return ShutdownOutcome::Unmounted;
        }
        tracing::info!(
            "Shutting down, unmounting {}",
            self.mount_point.display()
        );

        let deadline = tokio::time::Instant::now() + self.grace;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let substrate = self.substrate.clone();
        let path = self.mount_point.clone();
        // A busy mount can block unmount indefinitely, so it gets its own thread
        std::thread::spawn(move || {
            let _ = tx.send(substrate.unmount(&path));
        });

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(Ok(()))) => return ShutdownOutcome::Unmounted,
            Ok(Ok(Err(e))) => tracing::warn!("{}", e),
            Ok(Err(_)) => tracing::warn!("Unmount thread exited without a result"),
            Err(_) => return self.force(),
        }

        // The unmount failed; the mount may still go away on its own
        while tokio::time::Instant::now() < deadline {
            if self.state() == MountState::Unmounted {
                return ShutdownOutcome::Unmounted;
            }
            tokio::time::sleep(STATE_POLL).await;
        }
        self.force()
    }

    fn force(&self) -> ShutdownOutcome {
        match self.transition(&[MountState::Unmounting], MountState::ForcedExit) {
            Ok(()) => {
                tracing::warn!(
                    "Couldn't unmount {} within {:?}, unmount it manually",
                    self.mount_point.display(),
                    self.grace
                );
                ShutdownOutcome::Forced
            }
            Err(_) => ShutdownOutcome::Unmounted,
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            None
        }
    };
    let sigterm = async {
        match terminate.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Cannot listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
        _ = sigterm => {}
    }
    tracing::info!("Received termination signal");
}
