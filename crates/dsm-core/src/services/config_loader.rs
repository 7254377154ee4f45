use std::path::Path;

use crate::error::{ManagerError, Result};
use crate::models::ManagerConfig;

pub const CONFIG_FILENAME: &str = "dsm.yaml";

pub fn load(root: &Path) -> Result<ManagerConfig> {
    let config_path = root.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Err(ManagerError::ConfigNotFound(config_path));
    }
    let contents = std::fs::read_to_string(&config_path)?;
    let config: ManagerConfig = if contents.trim().is_empty() {
        ManagerConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|e| ManagerError::InvalidConfig(e.to_string()))?
    };
    validate(&config)?;
    Ok(config)
}

/// Like [`load`], but a missing file means "use the defaults".
pub fn load_or_default(root: &Path) -> Result<ManagerConfig> {
    match load(root) {
        Ok(config) => Ok(config),
        Err(ManagerError::ConfigNotFound(path)) => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(ManagerConfig::default())
        }
        Err(e) => Err(e),
    }
}

fn validate(config: &ManagerConfig) -> Result<()> {
    if config.session_name.trim().is_empty() {
        return Err(ManagerError::InvalidConfig(
            "session_name must not be empty".into(),
        ));
    }
    if config.session_name.contains([':', '.']) {
        return Err(ManagerError::InvalidConfig(format!(
            "session_name '{}' must not contain ':' or '.'",
            config.session_name
        )));
    }
    if config.engine.trim().is_empty() {
        return Err(ManagerError::InvalidConfig("engine must not be empty".into()));
    }
    if config.default_internal_port == 0 {
        return Err(ManagerError::InvalidConfig(
            "default_internal_port must be between 1 and 65535".into(),
        ));
    }
    if config.command_timeout_secs == 0 || config.pull_timeout_secs == 0 {
        return Err(ManagerError::InvalidConfig(
            "timeouts must be at least one second".into(),
        ));
    }
    Ok(())
}
