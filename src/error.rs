use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriveError>;

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Data directory {0} is in use by another drivefuse instance")]
    Locked(PathBuf),
}

impl From<serde_json::Error> for DriveError {
    fn from(err: serde_json::Error) -> Self {
        DriveError::Json(err.to_string())
    }
}
