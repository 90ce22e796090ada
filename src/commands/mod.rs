pub mod config;
pub mod mount;
pub mod unmount;

pub use config::handle_config_command;
pub use mount::run_mount;
pub use unmount::run_unmount;

use crate::cli::Args;
use crate::config::{expand_tilde, get_data_dir, get_default_remote_dir, load_config, Config};
use crate::error::Result;
use std::path::PathBuf;

/// Command line flags merged over the config file.
#[derive(Debug, Clone)]
pub struct Context {
    pub data_dir: PathBuf,
    pub config: Config,
    pub mount_point: PathBuf,
    pub remote_root: PathBuf,
}

impl Context {
    pub fn resolve(args: &Args) -> Result<Self> {
        let data_dir = get_data_dir(args.datadir.as_deref())?;
        let config = load_config(&data_dir)?;

        let mount_point = match &args.mountpoint {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => expand_tilde(&config.get_mount_point()),
        };
        let remote_root = match (&args.remote, &config.remote.root) {
            (Some(path), _) => expand_tilde(&path.to_string_lossy()),
            (None, Some(root)) => expand_tilde(root),
            (None, None) => get_default_remote_dir(&data_dir),
        };

        Ok(Context {
            data_dir,
            config,
            mount_point,
            remote_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let mut config = Config::default();
        config.mount_point = Some("/from/config".to_string());
        config.remote.root = Some("/remote/from/config".to_string());
        crate::config::save_config(&data_dir, &config).unwrap();

        let args = Args::parse_from([
            "drivefuse",
            "--datadir",
            data_dir.to_str().unwrap(),
            "--mountpoint",
            "/from/flag",
        ]);
        let ctx = Context::resolve(&args).unwrap();

        assert_eq!(ctx.data_dir, data_dir);
        assert_eq!(ctx.mount_point, PathBuf::from("/from/flag"));
        assert_eq!(ctx.remote_root, PathBuf::from("/remote/from/config"));
    }

    #[test]
    fn test_remote_defaults_into_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::parse_from(["drivefuse", "--datadir", dir.path().to_str().unwrap()]);
        let ctx = Context::resolve(&args).unwrap();
        assert_eq!(ctx.remote_root, dir.path().join("remote"));
    }
}
