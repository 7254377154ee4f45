// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ratatui::{backend::TestBackend, Terminal};

use dsm_core::models::{ManagerConfig, ServiceRecord, ServiceStatus, StateLayout, UnitStatus};
use dsm_core::services::ports::PortAllocator;
use dsm_core::services::service_manager::ServiceManager;
use dsm_core::testing::{FakeEngine, FakeHost, StaticProbe};
use dsm_tui::app::App;
use dsm_tui::ui;

/// Render the app to a string using a TestBackend of the given dimensions.
pub fn render_to_string(app: &App, width: u16, height: u16) -> String {
    let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
    terminal.draw(|f| ui::render(f, app, None)).unwrap();
    terminal.backend().to_string()
}

/// Render the app with a fixed `now` for deterministic timestamps.
pub fn render_to_string_at(app: &App, width: u16, height: u16, now: DateTime<Utc>) -> String {
    let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
    terminal.draw(|f| ui::render(f, app, Some(now))).unwrap();
    terminal.backend().to_string()
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
}

/// Build a ServiceStatus with the given name, external port and status.
pub fn make_service(name: &str, external_port: u16, status: UnitStatus) -> ServiceStatus {
    ServiceStatus {
        record: ServiceRecord {
            name: name.to_string(),
            image: format!("library/{name}:latest"),
            container: name.to_string(),
            external_port,
            internal_port: 80,
            data_dir: PathBuf::from(format!("/srv/dsm/data/{name}")),
            window_name: name.to_string(),
            mount_path: "/data".into(),
            installed_at: fixed_now() - chrono::Duration::minutes(135),
        },
        status,
    }
}

/// A manager wired to in-memory collaborators, plus handles to inspect them.
pub struct FakeManager {
    pub dir: tempfile::TempDir,
    pub engine: Arc<FakeEngine>,
    pub host: Arc<FakeHost>,
    pub manager: Arc<ServiceManager>,
}

pub async fn fake_manager(listening: &[u16]) -> FakeManager {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_exposed_ports(&[80]));
    let host = Arc::new(FakeHost::new());
    let manager = ServiceManager::open(
        StateLayout::new(dir.path()),
        ManagerConfig::default(),
        engine.clone(),
        host.clone(),
        PortAllocator::new(StaticProbe::listening(listening)),
    )
    .await
    .unwrap();
    FakeManager {
        dir,
        engine,
        host,
        manager: Arc::new(manager),
    }
}
