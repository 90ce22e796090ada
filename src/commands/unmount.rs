use crate::commands::Context;
use crate::error::Result;
use crate::mount::{FuseSubstrate, MountController};

pub fn run_unmount(ctx: &Context) -> Result<()> {
    let controller = MountController::new(
        FuseSubstrate,
        ctx.mount_point.clone(),
        ctx.config.shutdown.get_grace(),
    );
    controller.unmount()?;
    println!("Unmounted {}", ctx.mount_point.display());
    Ok(())
}
