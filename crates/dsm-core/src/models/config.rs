use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings read from `dsm.yaml`. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Name of the shared tmux session that hosts every service window.
    pub session_name: String,
    /// Container engine executable.
    pub engine: String,
    /// Execution mode passed to `<engine> setup --execmode`.
    pub exec_mode: String,
    /// Path inside containers where each service's data directory is bound.
    pub mount_path: String,
    /// Internal port assumed when an image declares none.
    pub default_internal_port: u16,
    pub command_timeout_secs: u64,
    pub pull_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            session_name: "dsm".into(),
            engine: "udocker".into(),
            exec_mode: "F1".into(),
            mount_path: "/data".into(),
            default_internal_port: 80,
            command_timeout_secs: 30,
            pull_timeout_secs: 900,
        }
    }
}

impl ManagerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

/// On-disk layout under the state root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    pub root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$DSM_HOME`, then `$HOME/.dsm`, then `./.dsm`.
    pub fn from_env() -> Self {
        if let Some(home) = std::env::var_os("DSM_HOME").filter(|v| !v.is_empty()) {
            return Self::new(home);
        }
        match std::env::var_os("HOME").filter(|v| !v.is_empty()) {
            Some(home) => Self::new(Path::new(&home).join(".dsm")),
            None => Self::new(".dsm"),
        }
    }

    pub fn services_dir(&self) -> PathBuf {
        self.root.join("services")
    }

    pub fn data_root(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn data_dir_for(&self, service: &str) -> PathBuf {
        self.data_root().join(service)
    }

    /// Where a reinstall prepares the new data dir before swapping it in.
    pub fn staged_data_dir_for(&self, service: &str) -> PathBuf {
        self.data_root().join(format!(".{service}.staged"))
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("dsm.yaml")
    }

    pub fn log_file_name(&self) -> &'static str {
        "dsm-debug.log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = StateLayout::new("/tmp/dsm");
        assert_eq!(layout.services_dir(), PathBuf::from("/tmp/dsm/services"));
        assert_eq!(
            layout.data_dir_for("nginx"),
            PathBuf::from("/tmp/dsm/data/nginx")
        );
        assert_eq!(layout.config_file(), PathBuf::from("/tmp/dsm/dsm.yaml"));
    }

    #[test]
    fn timeouts_are_seconds() {
        let config = ManagerConfig {
            command_timeout_secs: 5,
            pull_timeout_secs: 60,
            ..Default::default()
        };
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.pull_timeout(), Duration::from_secs(60));
    }
}
