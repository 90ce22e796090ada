use crate::cli::ConfigAction;
use crate::commands::Context;
use crate::config::get_config_path;
use crate::error::Result;

pub fn handle_config_command(ctx: &Context, action: Option<ConfigAction>) -> Result<()> {
    let config_path = get_config_path(&ctx.data_dir);
    match action {
        Some(ConfigAction::Path) => {
            println!("Config location: {}", config_path.display());
        }
        None | Some(ConfigAction::Show) => {
            let config = &ctx.config;
            println!("Config file: {}", config_path.display());
            println!();
            println!("Current configuration:");
            println!("  data_dir: {}", ctx.data_dir.display());
            println!("  mount_point: {}", ctx.mount_point.display());
            println!("  Remote:");
            println!("    root: {}", ctx.remote_root.display());
            println!("  Sync:");
            println!("    interval_secs: {}", config.sync.get_interval().as_secs());
            println!(
                "    debounce_ms: {}",
                config.sync.get_debounce().as_millis()
            );
            println!("    blocking_on_start: {}", config.sync.blocking_on_start);
            println!("  Fuse:");
            println!("    ttl_secs: {}", config.fuse.get_ttl_secs());
            println!("    ignored_names: {:?}", config.fuse.get_ignored_names());
            println!("    listing: {:?}", config.fuse.listing);
            println!("  Shutdown:");
            println!(
                "    grace_ms: {}",
                config.shutdown.get_grace().as_millis()
            );
            println!("  Metadata:");
            println!("    unique_names: {}", config.metadata.unique_names);
        }
    }
    Ok(())
}
