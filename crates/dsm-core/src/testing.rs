//! In-memory collaborators for exercising the manager without udocker,
//! tmux or real sockets.

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ManagerError, Result};
use crate::models::ServiceRecord;
use crate::services::engine::{build_run_command, ContainerEngine, ContainerInfo};
use crate::services::ports::ListenerProbe;
use crate::services::supervisor::SessionHost;

/// A listener probe with a fixed answer.
pub struct StaticProbe {
    ports: Option<HashSet<u16>>,
}

impl StaticProbe {
    pub fn listening(ports: &[u16]) -> Self {
        Self {
            ports: Some(ports.iter().copied().collect()),
        }
    }

    pub fn unavailable() -> Self {
        Self { ports: None }
    }
}

#[async_trait]
impl ListenerProbe for StaticProbe {
    async fn listening_ports(&self) -> Option<HashSet<u16>> {
        self.ports.clone()
    }
}

#[derive(Default)]
struct EngineState {
    images: BTreeSet<String>,
    containers: BTreeSet<String>,
    calls: Vec<String>,
    exposed_ports: Vec<u16>,
    fail_pull: bool,
    fail_create: bool,
    fail_setup: bool,
    fail_remove: bool,
    fail_remove_image: bool,
    fail_inspect: bool,
}

/// A container engine that keeps images and containers in memory.
///
/// Every call is logged as `"<verb> <arg>"` so tests can assert ordering.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exposed_ports(ports: &[u16]) -> Self {
        let engine = Self::default();
        engine.lock().exposed_ports = ports.to_vec();
        engine
    }

    pub fn fail_pull(&self, fail: bool) {
        self.lock().fail_pull = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.lock().fail_create = fail;
    }

    pub fn fail_setup(&self, fail: bool) {
        self.lock().fail_setup = fail;
    }

    pub fn fail_remove(&self, fail: bool) {
        self.lock().fail_remove = fail;
    }

    pub fn fail_remove_image(&self, fail: bool) {
        self.lock().fail_remove_image = fail;
    }

    pub fn fail_inspect(&self, fail: bool) {
        self.lock().fail_inspect = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn images(&self) -> Vec<String> {
        self.lock().images.iter().cloned().collect()
    }

    pub fn containers(&self) -> Vec<String> {
        self.lock().containers.iter().cloned().collect()
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.lock().containers.contains(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn engine_failure(verb: &str, arg: &str) -> ManagerError {
    ManagerError::Engine(format!("udocker {verb} {arg} failed (simulated)"))
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn pull(&self, image: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("pull {image}"));
        if state.fail_pull {
            return Err(engine_failure("pull", image));
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create(&self, container_name: &str, image: &str) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(format!("create {container_name}"));
        if state.fail_create
            || !state.images.contains(image)
            || state.containers.contains(container_name)
        {
            return Err(engine_failure("create", container_name));
        }
        state.containers.insert(container_name.to_string());
        Ok(container_name.to_string())
    }

    async fn setup(&self, container: &str, _mode: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("setup {container}"));
        if state.fail_setup {
            return Err(engine_failure("setup", container));
        }
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("rm {container}"));
        if state.fail_remove {
            return Err(engine_failure("rm", container));
        }
        state.containers.remove(container);
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("rmi {image}"));
        if state.fail_remove_image {
            return Err(engine_failure("rmi", image));
        }
        state.images.remove(image);
        Ok(())
    }

    async fn inspect(&self, container: &str) -> Result<ContainerInfo> {
        let mut state = self.lock();
        state.calls.push(format!("inspect {container}"));
        if state.fail_inspect || !state.containers.contains(container) {
            return Err(engine_failure("inspect", container));
        }
        Ok(ContainerInfo {
            exposed_ports: state.exposed_ports.clone(),
        })
    }

    fn run_command(&self, record: &ServiceRecord) -> String {
        build_run_command("udocker", record)
    }
}

#[derive(Default)]
struct HostState {
    session: Option<Vec<String>>,
    sent: Vec<(String, String)>,
    attached: Vec<String>,
    fail_send: bool,
    fail_list: bool,
}

/// A session host that models one tmux-like session as a list of window names.
///
/// A fresh session starts with a single window called `bash`; killing the
/// last window ends the session.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> Vec<String> {
        self.lock().session.clone().unwrap_or_default()
    }

    pub fn session_present(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn sent_commands(&self) -> Vec<(String, String)> {
        self.lock().sent.clone()
    }

    pub fn attached(&self) -> Vec<String> {
        self.lock().attached.clone()
    }

    pub fn fail_send(&self, fail: bool) {
        self.lock().fail_send = fail;
    }

    /// Make every query fail, as when the tmux binary is missing.
    pub fn fail_list(&self, fail: bool) {
        self.lock().fail_list = fail;
    }

    /// Add a window no service owns.
    pub fn add_unit(&self, name: &str) {
        self.lock()
            .session
            .get_or_insert_with(Vec::new)
            .push(name.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn host_failure(action: &str) -> ManagerError {
    ManagerError::Tmux(format!("tmux {action} failed (simulated)"))
}

#[async_trait]
impl SessionHost for FakeHost {
    async fn session_exists(&self, _host: &str) -> Result<bool> {
        let state = self.lock();
        if state.fail_list {
            return Err(host_failure("has-session"));
        }
        Ok(state.session.is_some())
    }

    async fn create_session(&self, _host: &str) -> Result<()> {
        let mut state = self.lock();
        if state.session.is_some() {
            return Err(host_failure("new-session"));
        }
        state.session = Some(vec!["bash".to_string()]);
        Ok(())
    }

    async fn list_units(&self, _host: &str) -> Result<Vec<String>> {
        let state = self.lock();
        if state.fail_list {
            return Err(host_failure("list-windows"));
        }
        Ok(state.session.clone().unwrap_or_default())
    }

    async fn create_unit(&self, _host: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        let windows = state
            .session
            .as_mut()
            .ok_or_else(|| host_failure("new-window"))?;
        windows.push(name.to_string());
        Ok(())
    }

    async fn rename_unit(&self, _host: &str, old_name: &str, new_name: &str) -> Result<()> {
        let mut state = self.lock();
        let window = state
            .session
            .as_mut()
            .and_then(|windows| windows.iter_mut().find(|w| w.as_str() == old_name))
            .ok_or_else(|| host_failure("rename-window"))?;
        *window = new_name.to_string();
        Ok(())
    }

    async fn kill_unit(&self, _host: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(windows) = state.session.as_mut() {
            windows.retain(|w| w != name);
            if windows.is_empty() {
                state.session = None;
            }
        }
        Ok(())
    }

    async fn send_command(&self, _host: &str, unit: &str, command: &str) -> Result<()> {
        let mut state = self.lock();
        if state.fail_send {
            return Err(host_failure("send-keys"));
        }
        state.sent.push((unit.to_string(), command.to_string()));
        Ok(())
    }

    async fn attach(&self, _host: &str, unit: &str) -> Result<()> {
        self.lock().attached.push(unit.to_string());
        Ok(())
    }
}

/// Write an executable `/bin/sh` script standing in for an external program.
#[cfg(unix)]
pub fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
