use crate::error::{DriveError, Result};
use std::path::Path;

use crate::config::paths::*;
use crate::config::schema::*;

/// Load `<data_dir>/config.toml`, writing the defaults there on first run.
pub fn load_config(data_dir: &Path) -> Result<Config> {
    let config_path = get_config_path(data_dir);

    let config = if !config_path.exists() {
        save_config(data_dir, &Config::default())?;
        tracing::info!("Created default config at {}", config_path.display());
        Config::default()
    } else {
        let toml_content = std::fs::read_to_string(&config_path)
            .map_err(|e| DriveError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&toml_content)
            .map_err(|e| DriveError::Config(format!("Failed to parse config: {}", e)))?
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn save_config(data_dir: &Path, config: &Config) -> Result<()> {
    std::fs::create_dir_all(data_dir).map_err(|e| {
        DriveError::Config(format!(
            "Failed to create data directory {}: {}",
            data_dir.display(),
            e
        ))
    })?;
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| DriveError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(get_config_path(data_dir), toml_str)
        .map_err(|e| DriveError::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}
