mod common;

use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;

use dsm_core::models::UnitStatus;
use dsm_tui::app::{App, ConfirmAction, InstallField, Mode};
use dsm_tui::event::AppEvent;
use dsm_tui::keys::handle_key;

use common::fake_manager;

fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> AppEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event in time")
        .expect("channel open")
}

/// Wait for the status message a spawned workflow reports.
async fn next_message(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Result<String, String> {
    loop {
        match next_event(rx).await {
            AppEvent::Info(msg) => return Ok(msg),
            AppEvent::Error(msg) => return Err(msg),
            _ => {}
        }
    }
}

#[tokio::test]
async fn install_dialog_submits_request() {
    let fake = fake_manager(&[]).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut app = App::new();

    handle_key(&mut app, key(KeyCode::Char('i')), &fake.manager, &tx).await;
    assert_eq!(app.mode, Mode::InstallDialog);
    for c in "nginx".chars() {
        handle_key(&mut app, key(KeyCode::Char(c)), &fake.manager, &tx).await;
    }
    handle_key(&mut app, key(KeyCode::Enter), &fake.manager, &tx).await;
    assert!(matches!(app.mode, Mode::Loading(_)));

    let msg = next_message(&mut rx).await.unwrap();
    assert_eq!(msg, "Installed 'nginx' on localhost:3000");
    assert_eq!(fake.manager.get("nginx").await.unwrap().external_port, 3000);
}

#[tokio::test]
async fn tab_out_of_internal_port_suggests_external() {
    let fake = fake_manager(&[8080]).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut app = App::new();
    app.open_install_dialog();
    app.install_form.focus = InstallField::InternalPort;

    for c in "8080".chars() {
        handle_key(&mut app, key(KeyCode::Char(c)), &fake.manager, &tx).await;
    }
    handle_key(&mut app, key(KeyCode::Tab), &fake.manager, &tx).await;

    assert_eq!(app.install_form.focus, InstallField::ExternalPort);
    assert_eq!(app.install_form.external_port, "8081");
}

#[tokio::test]
async fn invalid_port_keeps_dialog_open() {
    let fake = fake_manager(&[]).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut app = App::new();
    app.open_install_dialog();
    app.install_form.image = "nginx".into();
    app.install_form.internal_port = "99999".into();

    handle_key(&mut app, key(KeyCode::Enter), &fake.manager, &tx).await;
    assert_eq!(app.mode, Mode::InstallDialog);
    assert!(app.install_form.error.is_some());
    assert!(fake.engine.calls().is_empty());
}

#[tokio::test]
async fn taken_port_comes_back_as_conflict() {
    let fake = fake_manager(&[7000]).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut app = App::new();
    app.open_install_dialog();
    app.install_form.image = "nginx".into();
    app.install_form.external_port = "7000".into();

    handle_key(&mut app, key(KeyCode::Enter), &fake.manager, &tx).await;
    match next_event(&mut rx).await {
        AppEvent::PortConflict { suggestion, .. } => assert_eq!(suggestion, 7001),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn existing_name_asks_before_reinstall() {
    let fake = fake_manager(&[]).await;
    fake.manager
        .install(dsm_core::services::service_manager::InstallRequest::new("nginx"))
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut app = App::new();
    app.open_install_dialog();
    app.install_form.image = "nginx:1.25".into();

    handle_key(&mut app, key(KeyCode::Enter), &fake.manager, &tx).await;
    match next_event(&mut rx).await {
        AppEvent::ReinstallPrompt { name, request } => {
            assert_eq!(name, "nginx");
            assert!(request.overwrite);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn run_then_remove_selected_service() {
    let fake = fake_manager(&[]).await;
    fake.manager
        .install(dsm_core::services::service_manager::InstallRequest::new("nginx"))
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut app = App::new();
    app.set_services(fake.manager.list().await);

    handle_key(&mut app, key(KeyCode::Char('r')), &fake.manager, &tx).await;
    assert_eq!(
        next_message(&mut rx).await.unwrap(),
        "Started nginx on localhost:3000"
    );
    assert_eq!(fake.host.units(), vec!["nginx"]);

    handle_key(&mut app, key(KeyCode::Char('d')), &fake.manager, &tx).await;
    assert!(matches!(
        app.mode,
        Mode::ConfirmDialog {
            action: ConfirmAction::RemoveService(_),
            ..
        }
    ));
    handle_key(&mut app, key(KeyCode::Char('y')), &fake.manager, &tx).await;
    assert_eq!(next_message(&mut rx).await.unwrap(), "Removed nginx");
    assert!(fake.host.units().is_empty());
    assert!(fake.manager.records().await.is_empty());
}

#[tokio::test]
async fn attach_requires_running_service() {
    let fake = fake_manager(&[]).await;
    fake.manager
        .install(dsm_core::services::service_manager::InstallRequest::new("nginx"))
        .await
        .unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut app = App::new();
    app.set_services(fake.manager.list().await);

    handle_key(&mut app, key(KeyCode::Char('a')), &fake.manager, &tx).await;
    assert_eq!(app.attach_target, None);
    assert_eq!(app.status_message.as_deref(), Some("nginx is not running"));

    fake.manager.run("nginx").await.unwrap();
    app.set_services(fake.manager.list().await);
    assert_eq!(app.services[0].status, UnitStatus::Running);
    handle_key(&mut app, key(KeyCode::Char('a')), &fake.manager, &tx).await;
    assert_eq!(app.attach_target.as_deref(), Some("nginx"));
}

#[tokio::test]
async fn quit_asks_only_when_something_runs() {
    let fake = fake_manager(&[]).await;
    let (tx, _rx) = mpsc::unbounded_channel();

    let mut app = App::new();
    handle_key(&mut app, key(KeyCode::Char('q')), &fake.manager, &tx).await;
    assert!(app.should_quit);

    fake.manager
        .install(dsm_core::services::service_manager::InstallRequest::new("nginx"))
        .await
        .unwrap();
    fake.manager.run("nginx").await.unwrap();
    let mut app = App::new();
    app.set_services(fake.manager.list().await);
    handle_key(&mut app, key(KeyCode::Char('q')), &fake.manager, &tx).await;
    assert!(!app.should_quit);
    assert!(matches!(
        app.mode,
        Mode::ConfirmDialog {
            action: ConfirmAction::Quit,
            ..
        }
    ));
}

#[tokio::test]
async fn check_reports_drift() {
    let fake = fake_manager(&[]).await;
    fake.host.add_unit("stray");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut app = App::new();

    handle_key(&mut app, key(KeyCode::Char('c')), &fake.manager, &tx).await;
    match next_event(&mut rx).await {
        AppEvent::CheckDone(drift) => assert_eq!(drift.len(), 1),
        other => panic!("unexpected event: {other:?}"),
    }
}
