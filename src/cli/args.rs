use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "drivefuse")]
#[command(about = "Mount a synchronized remote drive as a local filesystem")]
pub struct Args {
    #[arg(long, global = true, help = "Path of the data directory")]
    pub datadir: Option<PathBuf>,

    #[arg(long, global = true, help = "Mount point")]
    pub mountpoint: Option<PathBuf>,

    #[arg(long, global = true, help = "Run a blocking sync before mounting")]
    pub blocksync: bool,

    #[arg(long, global = true, help = "Directory to synchronize with")]
    pub remote: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Sync and mount the drive (default)")]
    Mount,
    #[command(about = "Unmount a drive left mounted by a previous run")]
    Unmount,
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    #[command(about = "Show current configuration values")]
    Show,
    #[command(about = "Show config file path")]
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults_to_mount() {
        let args = Args::parse_from(["drivefuse", "--blocksync"]);
        assert!(args.blocksync);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["drivefuse", "unmount", "--mountpoint", "/mnt/d"]);
        assert!(matches!(args.command, Some(Commands::Unmount)));
        assert_eq!(args.mountpoint, Some(PathBuf::from("/mnt/d")));
    }
}
