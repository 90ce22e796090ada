pub mod paths;
pub mod persistence;
pub mod schema;

pub use paths::*;
pub use persistence::*;
pub use schema::*;

fn default_mount_point() -> String {
    "~/drivefuse".to_string()
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_sync_debounce_ms() -> u64 {
    2000
}

fn default_fuse_ttl_secs() -> u64 {
    1
}

fn default_ignored_names() -> Vec<String> {
    crate::vfs::adapter::DEFAULT_RESERVED_NAMES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_shutdown_grace_ms() -> u64 {
    3000
}
