use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::error::{ManagerError, Result};
use crate::models::{
    derive_service_name, normalize_image_ref, normalize_label, Drift, InstallOutcome,
    InternalPortSource, ManagerConfig, RemoveOutcome, RunOutcome, ServiceRecord, ServiceStatus,
    StartOutcome, StateLayout, StopOutcome, UnitStatus,
};
use crate::services::config_loader;

use super::engine::{ContainerEngine, UdockerEngine};
use super::ports::PortAllocator;
use super::registry::ServiceRegistry;
use super::supervisor::{SessionHost, SessionSupervisor};
use super::tmux::TmuxHost;

/// Operator input for the install workflow. Everything but `image` is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallRequest {
    pub image: String,
    pub name: Option<String>,
    pub internal_port: Option<u16>,
    pub external_port: Option<u16>,
    pub window_name: Option<String>,
    /// Replace an existing service of the same name.
    pub overwrite: bool,
}

impl InstallRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }
}

/// Resolved names for one install attempt.
struct InstallPlan<'a> {
    request: &'a InstallRequest,
    image: &'a str,
    name: &'a str,
    window_name: &'a str,
    /// The record an overwrite will replace.
    replacing: Option<&'a ServiceRecord>,
}

/// What an install attempt has created so far, undone in reverse on failure.
#[derive(Default)]
struct InstallRollback {
    container: Option<String>,
    data_dir: Option<PathBuf>,
}

impl InstallRollback {
    async fn undo(self, engine: &dyn ContainerEngine) {
        if let Some(dir) = self.data_dir {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "rollback: data dir not removed");
            }
        }
        if let Some(container) = self.container {
            if let Err(e) = engine.remove(&container).await {
                tracing::warn!(container = %container, error = %e, "rollback: container not removed");
            }
        }
    }
}

/// Install, run, stop, remove and list services.
///
/// Mutating workflows are serialised by `mutation`; the registry lock itself
/// is only held for the in-memory update, so listing never waits on a pull.
pub struct ServiceManager {
    layout: StateLayout,
    config: ManagerConfig,
    registry: RwLock<ServiceRegistry>,
    mutation: Mutex<()>,
    allocator: PortAllocator,
    supervisor: SessionSupervisor,
    engine: Arc<dyn ContainerEngine>,
}

impl ServiceManager {
    pub async fn open(
        layout: StateLayout,
        config: ManagerConfig,
        engine: Arc<dyn ContainerEngine>,
        host: Arc<dyn SessionHost>,
        allocator: PortAllocator,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(layout.data_root()).await?;
        let registry = ServiceRegistry::open(&layout.services_dir()).await?;
        let supervisor = SessionSupervisor::new(host, config.session_name.clone());
        Ok(Self {
            layout,
            config,
            registry: RwLock::new(registry),
            mutation: Mutex::new(()),
            allocator,
            supervisor,
            engine,
        })
    }

    /// Wire the real collaborators: udocker, tmux and the OS listener table.
    pub async fn open_default(layout: StateLayout) -> Result<Self> {
        let config = config_loader::load_or_default(&layout.root)?;
        let engine = Arc::new(UdockerEngine::from_config(&config));
        let host = Arc::new(TmuxHost::new(config.command_timeout()));
        let allocator = PortAllocator::system(config.command_timeout());
        Self::open(layout, config, engine, host, allocator).await
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub async fn get(&self, name: &str) -> Result<ServiceRecord> {
        self.registry.read().await.get(name).cloned()
    }

    pub async fn records(&self) -> Vec<ServiceRecord> {
        self.registry.read().await.list()
    }

    async fn reserved_ports(&self) -> HashSet<u16> {
        self.registry.read().await.external_ports()
    }

    /// Ports held by every record except `name`'s own.
    async fn reserved_ports_except(&self, name: &str) -> HashSet<u16> {
        let registry = self.registry.read().await;
        registry
            .list()
            .into_iter()
            .filter(|r| r.name != name)
            .map(|r| r.external_port)
            .collect()
    }

    /// Next free external port at or after `internal_port`.
    pub async fn port_suggestion(&self, internal_port: u16) -> u16 {
        let reserved = self.reserved_ports().await;
        self.allocator
            .find_free_port(u32::from(internal_port), &reserved)
            .await
    }

    pub async fn is_port_free(&self, port: u16) -> bool {
        let reserved = self.reserved_ports().await;
        self.allocator.is_port_free(port, &reserved).await
    }

    /// A port is usable if no other record holds it and nothing listens on
    /// it, unless the listener is the service being replaced.
    async fn port_usable(
        &self,
        port: u16,
        reserved: &HashSet<u16>,
        replacing: Option<&ServiceRecord>,
    ) -> bool {
        if replacing.is_some_and(|old| old.external_port == port) {
            return !reserved.contains(&port);
        }
        self.allocator.is_port_free(port, reserved).await
    }

    /// Install a service. With `overwrite`, an existing service of the same
    /// name keeps running until the new one is fully installed and recorded;
    /// only then are its unit, container, image and data dir retired.
    pub async fn install(&self, request: InstallRequest) -> Result<InstallOutcome> {
        let image = normalize_image_ref(&request.image)?;
        let name = match request.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => normalize_label(name)?,
            _ => derive_service_name(&image)?,
        };
        let window_name = match request.window_name.as_deref().map(str::trim) {
            Some(window) if !window.is_empty() => normalize_label(window)?,
            _ => name.clone(),
        };
        if request.internal_port == Some(0) || request.external_port == Some(0) {
            return Err(ManagerError::InvalidInput(
                "ports must be between 1 and 65535".into(),
            ));
        }

        let _guard = self.mutation.lock().await;

        let replacing = match self.get(&name).await {
            Ok(existing) if request.overwrite => Some(existing),
            Ok(_) => return Err(ManagerError::ServiceAlreadyExists(name)),
            Err(ManagerError::ServiceNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if replacing.is_some() {
            tracing::info!(service = %name, "reinstalling existing service");
        }

        // Reject conflicts before touching the engine
        {
            let registry = self.registry.read().await;
            if let Some(owner) = registry
                .list()
                .into_iter()
                .find(|r| r.name != name && r.window_name == window_name)
            {
                return Err(ManagerError::WindowAlreadyUsed {
                    window: window_name,
                    owner: owner.name,
                });
            }
        }
        if let Some(port) = request.external_port {
            let reserved = self.reserved_ports_except(&name).await;
            if !self.port_usable(port, &reserved, replacing.as_ref()).await {
                let suggestion = self
                    .allocator
                    .find_free_port(u32::from(port) + 1, &reserved)
                    .await;
                return Err(ManagerError::PortUnavailable { port, suggestion });
            }
        }

        tracing::info!(service = %name, image = %image, "pulling image");
        self.engine.pull(&image).await?;

        let mut rollback = InstallRollback::default();
        let plan = InstallPlan {
            request: &request,
            image: &image,
            name: &name,
            window_name: &window_name,
            replacing: replacing.as_ref(),
        };
        match self.install_steps(&plan, &mut rollback).await {
            Ok(outcome) => {
                if let Some(old) = &replacing {
                    self.retire(old, &outcome.record).await;
                }
                tracing::info!(
                    service = %name,
                    port = outcome.record.external_port,
                    "service installed"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "install failed, rolling back");
                rollback.undo(self.engine.as_ref()).await;
                Err(e)
            }
        }
    }

    async fn install_steps(
        &self,
        plan: &InstallPlan<'_>,
        rollback: &mut InstallRollback,
    ) -> Result<InstallOutcome> {
        let name = plan.name;
        let container_name = match plan.replacing {
            Some(old) if old.container == name => format!("{name}.1"),
            _ => name.to_string(),
        };
        let container = self.engine.create(&container_name, plan.image).await?;
        rollback.container = Some(container.clone());
        self.engine.setup(&container, &self.config.exec_mode).await?;

        let (internal_port, internal_port_source) = match plan.request.internal_port {
            Some(port) => (port, InternalPortSource::Explicit),
            None => self.detect_internal_port(&container).await,
        };

        let reserved = self.reserved_ports_except(name).await;
        let external_port = match (plan.request.external_port, plan.replacing) {
            (Some(port), _) => port,
            (None, Some(old)) => old.external_port,
            (None, None) => {
                self.allocator
                    .find_free_port(u32::from(internal_port), &reserved)
                    .await
            }
        };
        if !self.port_usable(external_port, &reserved, plan.replacing).await {
            return Err(ManagerError::PortUnavailable {
                port: external_port,
                suggestion: self
                    .allocator
                    .find_free_port(u32::from(external_port) + 1, &reserved)
                    .await,
            });
        }

        let data_dir = self.layout.data_dir_for(name);
        if plan.replacing.is_some() {
            let staged = self.layout.staged_data_dir_for(name);
            match tokio::fs::remove_dir_all(&staged).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tokio::fs::create_dir_all(&staged).await?;
            rollback.data_dir = Some(staged);
        } else if !tokio::fs::try_exists(&data_dir).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&data_dir).await?;
            rollback.data_dir = Some(data_dir.clone());
        }

        let record = ServiceRecord {
            name: name.to_string(),
            image: plan.image.to_string(),
            container,
            external_port,
            internal_port,
            data_dir,
            window_name: plan.window_name.to_string(),
            mount_path: self.config.mount_path.clone(),
            installed_at: Utc::now(),
        };
        self.registry
            .write()
            .await
            .create(record.clone(), plan.replacing.is_some())
            .await?;

        Ok(InstallOutcome {
            record,
            internal_port_source,
        })
    }

    /// Tear down what a replaced record owned once its successor is recorded,
    /// then move the staged data dir into place. Failures only warn: the new
    /// record is already authoritative.
    async fn retire(&self, old: &ServiceRecord, new: &ServiceRecord) {
        match self.supervisor.stop(&old.window_name).await {
            Ok(_) => {}
            Err(e) => tracing::warn!(service = %old.name, error = %e, "old unit not stopped"),
        }
        if old.container != new.container {
            if let Err(e) = self.engine.remove(&old.container).await {
                tracing::warn!(container = %old.container, error = %e, "old container not removed");
            }
        }

        let image_in_use = self
            .registry
            .read()
            .await
            .list()
            .iter()
            .any(|r| r.image == old.image);
        if !image_in_use {
            if let Err(e) = self.engine.remove_image(&old.image).await {
                tracing::warn!(image = %old.image, error = %e, "old image not removed");
            }
        }

        match tokio::fs::remove_dir_all(&old.data_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %old.data_dir.display(), error = %e, "old data dir not removed");
            }
        }
        let staged = self.layout.staged_data_dir_for(&new.name);
        if let Err(e) = tokio::fs::rename(&staged, &new.data_dir).await {
            tracing::warn!(
                from = %staged.display(),
                to = %new.data_dir.display(),
                error = %e,
                "staged data dir not moved, creating an empty one"
            );
            if let Err(e) = tokio::fs::create_dir_all(&new.data_dir).await {
                tracing::warn!(dir = %new.data_dir.display(), error = %e, "data dir not created");
            }
        }
    }

    async fn detect_internal_port(&self, container: &str) -> (u16, InternalPortSource) {
        match self.engine.inspect(container).await {
            Ok(info) => {
                if let Some(&port) = info.exposed_ports.first() {
                    return (port, InternalPortSource::Detected);
                }
                tracing::warn!(
                    container,
                    default = self.config.default_internal_port,
                    "image declares no port, using default"
                );
            }
            Err(e) => {
                tracing::warn!(
                    container,
                    error = %e,
                    default = self.config.default_internal_port,
                    "port detection failed, using default"
                );
            }
        }
        (
            self.config.default_internal_port,
            InternalPortSource::Defaulted,
        )
    }

    pub async fn run(&self, name: &str) -> Result<RunOutcome> {
        let _guard = self.mutation.lock().await;
        let record = self.get(name).await?;
        let command = self.engine.run_command(&record);
        match self.supervisor.start(&record.window_name, &command).await? {
            StartOutcome::Started => Ok(RunOutcome::Started {
                access: record.access_address(),
            }),
            StartOutcome::AlreadyRunning => Ok(RunOutcome::AlreadyRunning),
        }
    }

    /// Stop a service's unit without removing anything. Unknown names are not
    /// running by definition.
    pub async fn stop(&self, name: &str) -> Result<StopOutcome> {
        let _guard = self.mutation.lock().await;
        let record = match self.get(name).await {
            Ok(record) => record,
            Err(ManagerError::ServiceNotFound(_)) => {
                tracing::debug!(service = name, "stop of unknown service");
                return Ok(StopOutcome::NotRunning);
            }
            Err(e) => return Err(e),
        };
        self.supervisor.stop(&record.window_name).await
    }

    pub async fn remove(&self, name: &str) -> Result<RemoveOutcome> {
        let _guard = self.mutation.lock().await;
        self.remove_locked(name).await
    }

    /// Tear down unit, container, image and data dir, then always delete the
    /// record. Collaborator failures are collected into `PartialTeardown`.
    async fn remove_locked(&self, name: &str) -> Result<RemoveOutcome> {
        let record = match self.get(name).await {
            Ok(record) => record,
            Err(ManagerError::ServiceNotFound(_)) => return Ok(RemoveOutcome::NotInstalled),
            Err(e) => return Err(e),
        };
        let mut failures = Vec::new();

        if let Err(e) = self.supervisor.stop(&record.window_name).await {
            failures.push(format!("stop unit: {e}"));
        }
        if let Err(e) = self.engine.remove(&record.container).await {
            failures.push(format!("remove container: {e}"));
        }

        let image_shared = self
            .registry
            .read()
            .await
            .list()
            .iter()
            .any(|r| r.name != record.name && r.image == record.image);
        if image_shared {
            tracing::debug!(image = %record.image, "image still used, keeping it");
        } else if let Err(e) = self.engine.remove_image(&record.image).await {
            tracing::warn!(image = %record.image, error = %e, "image not removed");
        }

        match tokio::fs::remove_dir_all(&record.data_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => failures.push(format!(
                "remove data dir {}: {e}",
                record.data_dir.display()
            )),
        }

        self.registry.write().await.delete(&record.name).await?;

        if failures.is_empty() {
            tracing::info!(service = %record.name, "service removed");
            Ok(RemoveOutcome::Removed)
        } else {
            tracing::warn!(service = %record.name, ?failures, "service removed with teardown failures");
            Err(ManagerError::PartialTeardown {
                name: record.name,
                failures,
            })
        }
    }

    /// Every record with the live status of its unit.
    pub async fn list(&self) -> Vec<ServiceStatus> {
        let records = self.records().await;
        let units: HashSet<String> = match self.supervisor.units().await {
            Ok(units) => units.into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "session host query failed, reporting all absent");
                HashSet::new()
            }
        };
        records
            .into_iter()
            .map(|record| {
                let status = if units.contains(&record.window_name) {
                    UnitStatus::Running
                } else {
                    UnitStatus::Absent
                };
                ServiceStatus { record, status }
            })
            .collect()
    }

    pub async fn status(&self, name: &str) -> Result<UnitStatus> {
        let record = self.get(name).await?;
        self.supervisor.status(&record.window_name).await
    }

    pub async fn attach(&self, name: &str) -> Result<()> {
        let record = self.get(name).await?;
        self.supervisor.attach(&record.window_name).await
    }

    /// Compare the registry against the filesystem, the engine and the host.
    /// Read-only: nothing is repaired.
    pub async fn check(&self) -> Result<Vec<Drift>> {
        let records = self.records().await;
        let mut drift = Vec::new();

        for record in &records {
            if !tokio::fs::try_exists(&record.data_dir).await.unwrap_or(false) {
                drift.push(Drift::MissingDataDir {
                    service: record.name.clone(),
                    path: record.data_dir.clone(),
                });
            }
            if let Err(e) = self.engine.inspect(&record.container).await {
                drift.push(Drift::ContainerUnresolvable {
                    service: record.name.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let owned: HashSet<&str> = records.iter().map(|r| r.window_name.as_str()).collect();
        for unit in self.supervisor.units().await? {
            if !owned.contains(unit.as_str()) {
                drift.push(Drift::OrphanUnit { unit });
            }
        }
        Ok(drift)
    }
}
