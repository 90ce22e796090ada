use crate::error::Result;
use crate::vfs::ListingMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteConfig {
    /// Directory standing in for the remote account. Defaults to
    /// `<datadir>/remote`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub blocking_on_start: bool,
}

impl SyncConfig {
    pub fn get_interval(&self) -> Duration {
        Duration::from_secs(
            self.interval_secs
                .unwrap_or_else(super::default_sync_interval_secs),
        )
    }

    pub fn get_debounce(&self) -> Duration {
        Duration::from_millis(
            self.debounce_ms
                .unwrap_or_else(super::default_sync_debounce_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FuseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// Glob patterns of names answered with "not found" without a cache lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored_names: Option<Vec<String>>,
    #[serde(default)]
    pub listing: ListingMode,
}

impl FuseConfig {
    pub fn get_ttl_secs(&self) -> u64 {
        self.ttl_secs.unwrap_or_else(super::default_fuse_ttl_secs)
    }

    pub fn get_ignored_names(&self) -> Vec<String> {
        self.ignored_names
            .clone()
            .unwrap_or_else(super::default_ignored_names)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShutdownConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_ms: Option<u64>,
}

impl ShutdownConfig {
    pub fn get_grace(&self) -> Duration {
        Duration::from_millis(
            self.grace_ms
                .unwrap_or_else(super::default_shutdown_grace_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataConfig {
    /// Reject creating a second entry with an existing name in one folder.
    #[serde(default)]
    pub unique_names: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub fuse: FuseConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl Config {
    pub fn get_mount_point(&self) -> String {
        self.mount_point
            .clone()
            .unwrap_or_else(super::default_mount_point)
    }
}

const MIN_SYNC_INTERVAL_SECS: u64 = 5;
const MAX_DEBOUNCE_MS: u64 = 60000;
const MAX_GRACE_MS: u64 = 30000;

/// Values that cannot work are errors; merely odd ones are warnings.
pub fn validate_config(config: &Config) -> Result<()> {
    if config.sync.interval_secs == Some(0) {
        return Err(crate::error::DriveError::Config(
            "sync.interval_secs must be greater than zero".to_string(),
        ));
    }

    let interval = config.sync.get_interval().as_secs();
    if interval < MIN_SYNC_INTERVAL_SECS {
        eprintln!(
            "Warning: sync.interval_secs ({}) is below the recommended minimum of {}s. \
             The remote will be listed very frequently.",
            interval, MIN_SYNC_INTERVAL_SECS
        );
    }

    let debounce_ms = config.sync.get_debounce().as_millis() as u64;
    if debounce_ms > MAX_DEBOUNCE_MS {
        eprintln!(
            "Warning: sync.debounce_ms ({}) is above the recommended maximum of {}ms. \
             Local changes will be uploaded with a long delay.",
            debounce_ms, MAX_DEBOUNCE_MS
        );
    }

    let grace_ms = config.shutdown.get_grace().as_millis() as u64;
    if grace_ms > MAX_GRACE_MS {
        eprintln!(
            "Warning: shutdown.grace_ms ({}) is above {}ms. \
             A stuck unmount will delay exit for that long.",
            grace_ms, MAX_GRACE_MS
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.get_mount_point(), "~/drivefuse");
        assert_eq!(config.sync.get_interval(), Duration::from_secs(30));
        assert_eq!(config.sync.get_debounce(), Duration::from_millis(2000));
        assert!(!config.sync.blocking_on_start);
        assert_eq!(config.fuse.get_ttl_secs(), 1);
        assert!(config
            .fuse
            .get_ignored_names()
            .contains(&".DS_Store".to_string()));
        assert_eq!(config.fuse.listing, ListingMode::BestEffort);
        assert_eq!(config.shutdown.get_grace(), Duration::from_secs(3));
        assert!(!config.metadata.unique_names);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            mount_point = "/mnt/drive"

            [remote]
            root = "/srv/drive"

            [sync]
            interval_secs = 60
            blocking_on_start = true

            [fuse]
            ignored_names = ["*.tmp"]
            listing = "strict"

            [shutdown]
            grace_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.get_mount_point(), "/mnt/drive");
        assert_eq!(config.remote.root.as_deref(), Some("/srv/drive"));
        assert_eq!(config.sync.get_interval(), Duration::from_secs(60));
        assert_eq!(config.sync.get_debounce(), Duration::from_millis(2000));
        assert!(config.sync.blocking_on_start);
        assert_eq!(config.fuse.get_ignored_names(), vec!["*.tmp".to_string()]);
        assert_eq!(config.fuse.listing, ListingMode::Strict);
        assert_eq!(config.shutdown.get_grace(), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.sync.interval_secs = Some(0);
        assert!(validate_config(&config).is_err());
    }
}
