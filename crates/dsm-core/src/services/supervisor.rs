use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ManagerError, Result};
use crate::models::{StartOutcome, StopOutcome, UnitStatus};

/// A long-lived multiplexed terminal process that holds named units.
#[async_trait]
pub trait SessionHost: Send + Sync {
    async fn session_exists(&self, host: &str) -> Result<bool>;

    async fn create_session(&self, host: &str) -> Result<()>;

    /// Unit names in host order. Empty when the host does not exist.
    async fn list_units(&self, host: &str) -> Result<Vec<String>>;

    async fn create_unit(&self, host: &str, name: &str) -> Result<()>;

    async fn rename_unit(&self, host: &str, old_name: &str, new_name: &str) -> Result<()>;

    /// Killing a unit that does not exist succeeds.
    async fn kill_unit(&self, host: &str, name: &str) -> Result<()>;

    async fn send_command(&self, host: &str, unit: &str, command: &str) -> Result<()>;

    /// Hand the operator's terminal to the host, focused on `unit`.
    async fn attach(&self, host: &str, unit: &str) -> Result<()>;
}

/// Owns the mapping from services to units inside one shared host.
///
/// Holds no state of its own: every answer comes from the host.
pub struct SessionSupervisor {
    host: Arc<dyn SessionHost>,
    host_id: String,
}

impl SessionSupervisor {
    pub fn new(host: Arc<dyn SessionHost>, host_id: impl Into<String>) -> Self {
        Self {
            host,
            host_id: host_id.into(),
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Create `unit` and submit `command` to it. Never creates a second unit
    /// with the same name.
    pub async fn start(&self, unit: &str, command: &str) -> Result<StartOutcome> {
        if self.host.session_exists(&self.host_id).await? {
            let units = self.host.list_units(&self.host_id).await?;
            if units.iter().any(|u| u == unit) {
                tracing::info!(unit, "unit already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            self.host.create_unit(&self.host_id, unit).await?;
        } else {
            tracing::info!(host = %self.host_id, "creating session host");
            self.host.create_session(&self.host_id).await?;
            let units = self.host.list_units(&self.host_id).await?;
            let first = units.first().ok_or_else(|| {
                ManagerError::Tmux(format!("new session '{}' has no window", self.host_id))
            })?;
            self.host.rename_unit(&self.host_id, first, unit).await?;
        }

        if let Err(e) = self.host.send_command(&self.host_id, unit, command).await {
            tracing::warn!(unit, error = %e, "command not delivered, removing unit");
            self.host.kill_unit(&self.host_id, unit).await.ok();
            return Err(e);
        }
        tracing::info!(unit, "unit started");
        Ok(StartOutcome::Started)
    }

    pub async fn stop(&self, unit: &str) -> Result<StopOutcome> {
        if self.status(unit).await? == UnitStatus::Absent {
            return Ok(StopOutcome::NotRunning);
        }
        self.host.kill_unit(&self.host_id, unit).await?;
        tracing::info!(unit, "unit stopped");
        Ok(StopOutcome::Stopped)
    }

    pub async fn status(&self, unit: &str) -> Result<UnitStatus> {
        if self.units().await?.iter().any(|u| u == unit) {
            Ok(UnitStatus::Running)
        } else {
            Ok(UnitStatus::Absent)
        }
    }

    /// Every unit currently in the host; empty if the host is not running.
    pub async fn units(&self) -> Result<Vec<String>> {
        if !self.host.session_exists(&self.host_id).await? {
            return Ok(Vec::new());
        }
        self.host.list_units(&self.host_id).await
    }

    pub async fn attach(&self, unit: &str) -> Result<()> {
        if self.status(unit).await? == UnitStatus::Absent {
            return Err(ManagerError::InvalidInput(format!(
                "'{unit}' is not running"
            )));
        }
        self.host.attach(&self.host_id, unit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn supervisor(host: &Arc<FakeHost>) -> SessionSupervisor {
        SessionSupervisor::new(host.clone(), "dsm")
    }

    #[tokio::test]
    async fn status_is_absent_without_host() {
        let host = Arc::new(FakeHost::new());
        assert_eq!(
            supervisor(&host).status("nginx").await.unwrap(),
            UnitStatus::Absent
        );
    }

    #[tokio::test]
    async fn first_start_creates_host_and_renames_first_window() {
        let host = Arc::new(FakeHost::new());
        let sup = supervisor(&host);

        let outcome = sup.start("nginx", "udocker run nginx").await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(host.units(), vec!["nginx"]);
        assert_eq!(sup.status("nginx").await.unwrap(), UnitStatus::Running);
        assert_eq!(
            host.sent_commands(),
            vec![("nginx".to_string(), "udocker run nginx".to_string())]
        );
    }

    #[tokio::test]
    async fn second_start_adds_a_unit() {
        let host = Arc::new(FakeHost::new());
        let sup = supervisor(&host);
        sup.start("nginx", "a").await.unwrap();
        sup.start("redis", "b").await.unwrap();
        assert_eq!(host.units(), vec!["nginx", "redis"]);
    }

    #[tokio::test]
    async fn starting_running_unit_is_a_noop() {
        let host = Arc::new(FakeHost::new());
        let sup = supervisor(&host);
        sup.start("nginx", "a").await.unwrap();

        let outcome = sup.start("nginx", "a").await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyRunning);
        assert_eq!(host.units(), vec!["nginx"]);
        assert_eq!(host.sent_commands().len(), 1);
    }

    #[tokio::test]
    async fn stop_kills_unit_and_is_idempotent() {
        let host = Arc::new(FakeHost::new());
        let sup = supervisor(&host);
        sup.start("nginx", "a").await.unwrap();
        sup.start("redis", "b").await.unwrap();

        assert_eq!(sup.stop("nginx").await.unwrap(), StopOutcome::Stopped);
        assert_eq!(sup.stop("nginx").await.unwrap(), StopOutcome::NotRunning);
        assert_eq!(sup.status("nginx").await.unwrap(), UnitStatus::Absent);
        assert_eq!(sup.status("redis").await.unwrap(), UnitStatus::Running);
    }

    #[tokio::test]
    async fn stopping_last_unit_tears_down_host() {
        let host = Arc::new(FakeHost::new());
        let sup = supervisor(&host);
        sup.start("nginx", "a").await.unwrap();
        sup.stop("nginx").await.unwrap();
        assert!(!host.session_present());

        // the next start recreates the host
        sup.start("nginx", "a").await.unwrap();
        assert_eq!(host.units(), vec!["nginx"]);
    }

    #[tokio::test]
    async fn failed_command_delivery_removes_unit() {
        let host = Arc::new(FakeHost::new());
        host.fail_send(true);
        let sup = supervisor(&host);

        assert!(sup.start("nginx", "a").await.is_err());
        assert_eq!(sup.status("nginx").await.unwrap(), UnitStatus::Absent);
    }

    #[tokio::test]
    async fn attach_requires_running_unit() {
        let host = Arc::new(FakeHost::new());
        let sup = supervisor(&host);
        assert!(matches!(
            sup.attach("nginx").await,
            Err(ManagerError::InvalidInput(_))
        ));
        sup.start("nginx", "a").await.unwrap();
        sup.attach("nginx").await.unwrap();
        assert_eq!(host.attached(), vec!["nginx"]);
    }
}
