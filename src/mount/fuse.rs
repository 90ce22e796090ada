use std::path::Path;
use std::process::Command;

use super::MountSubstrate;
use crate::error::{DriveError, Result};
use crate::vfs::DriveFs;

/// Kernel mounts through `fuser`.
pub struct FuseSubstrate;

impl MountSubstrate for FuseSubstrate {
    type Fs = DriveFs;
    type Session = fuser::Session<DriveFs>;

    fn mount(&self, path: &Path, fs: DriveFs) -> Result<Self::Session> {
        let options = [
            fuser::MountOption::FSName("drivefuse".to_string()),
            fuser::MountOption::AutoUnmount,
        ];
        tracing::info!("Mounting FUSE filesystem at {}", path.display());
        fuser::Session::new(fs, path, &options).map_err(|e| {
            DriveError::Mount(format!("Failed to mount {}: {}", path.display(), e))
        })
    }

    fn serve(&self, mut session: Self::Session) -> Result<()> {
        session
            .run()
            .map_err(|e| DriveError::Mount(format!("FUSE session failed: {}", e)))?;
        tracing::info!("FUSE filesystem unmounted");
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        let attempts: Vec<Command> = if cfg!(target_os = "macos") {
            let mut diskutil = Command::new("diskutil");
            diskutil.args(["unmount", "force"]).arg(path);
            vec![diskutil]
        } else {
            let mut fusermount = Command::new("fusermount");
            fusermount.arg("-u").arg(path);
            let mut umount = Command::new("umount");
            umount.arg(path);
            vec![fusermount, umount]
        };

        let mut last_error = String::from("no unmount command available");
        for mut command in attempts {
            let program = command.get_program().to_string_lossy().into_owned();
            match command.output() {
                Ok(output) if output.status.success() => return Ok(()),
                Ok(output) => {
                    last_error = format!(
                        "{} exited with {}: {}",
                        program,
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Err(e) => last_error = format!("failed to run {}: {}", program, e),
            }
            tracing::debug!("Unmount attempt failed: {}", last_error);
        }

        Err(DriveError::Mount(format!(
            "Failed to unmount {}: {}",
            path.display(),
            last_error
        )))
    }
}
