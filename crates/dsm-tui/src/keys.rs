use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;

use dsm_core::models::{InternalPortSource, RemoveOutcome, RunOutcome, StopOutcome, UnitStatus};
use dsm_core::services::service_manager::{InstallRequest, ServiceManager};
use dsm_core::ManagerError;

use crate::app::{App, ConfirmAction, InstallField, Mode};
use crate::event::AppEvent;

/// Handle a key event, dispatching based on current mode.
pub async fn handle_key(
    app: &mut App,
    key: KeyEvent,
    manager: &Arc<ServiceManager>,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
) {
    tracing::debug!(mode = ?app.mode, key = ?key.code, "handle_key");
    match &app.mode {
        Mode::ServiceList => handle_service_list(app, key, manager, event_tx),
        Mode::InstallDialog => handle_install_dialog(app, key, manager, event_tx).await,
        Mode::ConfirmDialog { .. } => handle_confirm_dialog(app, key, manager, event_tx),
        Mode::HelpDialog => handle_help_dialog(app, key),
        Mode::CheckReport => handle_check_report(app, key),
        Mode::Loading(_) => {}
    }
}

// ─── Service List Mode ──────────────────────────────────────────────────

fn handle_service_list(
    app: &mut App,
    key: KeyEvent,
    manager: &Arc<ServiceManager>,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
) {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            let running = app.running_count();
            if running == 0 {
                app.should_quit = true;
            } else {
                app.mode = Mode::ConfirmDialog {
                    message: format!(
                        "Quit? {running} running service(s) keep running in tmux session '{}'.",
                        app.session_name
                    ),
                    action: ConfirmAction::Quit,
                };
            }
        }
        KeyCode::Up => app.select_prev(),
        KeyCode::Down | KeyCode::Char('j') => app.select_next(),
        KeyCode::Char('i') => app.open_install_dialog(),
        KeyCode::Char('r') | KeyCode::Char('s') => {
            if let Some(service) = app.selected_service() {
                let name = service.record.name.clone();
                let tx = event_tx.clone();
                let manager = Arc::clone(manager);
                tokio::spawn(async move {
                    let result = match manager.run(&name).await {
                        Ok(RunOutcome::Started { access }) => {
                            Ok(format!("Started {name} on {access}"))
                        }
                        Ok(RunOutcome::AlreadyRunning) => Ok(format!("{name} is already running")),
                        Err(e) => Err(format!("Run failed: {e}")),
                    };
                    report(&tx, &manager, result).await;
                });
            }
        }
        KeyCode::Char('k') => {
            if let Some(service) = app.selected_service() {
                let name = service.record.name.clone();
                let tx = event_tx.clone();
                let manager = Arc::clone(manager);
                tokio::spawn(async move {
                    let result = match manager.stop(&name).await {
                        Ok(StopOutcome::Stopped) => Ok(format!("Stopped {name}")),
                        Ok(StopOutcome::NotRunning) => Ok(format!("{name} was not running")),
                        Err(e) => Err(format!("Stop failed: {e}")),
                    };
                    report(&tx, &manager, result).await;
                });
            }
        }
        KeyCode::Char('d') => {
            if let Some(service) = app.selected_service() {
                app.mode = Mode::ConfirmDialog {
                    message: format!(
                        "Remove service '{}'? This deletes its container, image and data directory.",
                        service.record.name
                    ),
                    action: ConfirmAction::RemoveService(service.record.name.clone()),
                };
            }
        }
        KeyCode::Char('a') => {
            if let Some(service) = app.selected_service() {
                if service.status == UnitStatus::Running {
                    app.attach_target = Some(service.record.name.clone());
                } else {
                    let msg = format!("{} is not running", service.record.name);
                    app.set_status(msg);
                }
            }
        }
        KeyCode::Char('c') => {
            app.mode = Mode::Loading("Checking services...".into());
            let tx = event_tx.clone();
            let manager = Arc::clone(manager);
            tokio::spawn(async move {
                match manager.check().await {
                    Ok(drift) => {
                        let _ = tx.send(AppEvent::CheckDone(drift));
                    }
                    Err(e) => {
                        let _ = tx.send(AppEvent::Error(format!("Check failed: {e}")));
                    }
                }
            });
        }
        KeyCode::Char('?') => {
            app.mode = Mode::HelpDialog;
        }
        _ => {}
    }
}

// ─── Install Dialog ─────────────────────────────────────────────────────

async fn handle_install_dialog(
    app: &mut App,
    key: KeyEvent,
    manager: &Arc<ServiceManager>,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
) {
    match key.code {
        KeyCode::Esc => {
            app.mode = Mode::ServiceList;
        }
        KeyCode::Tab => {
            if app.install_form.focus == InstallField::InternalPort {
                prefill_external_port(app, manager).await;
            }
            app.install_form.focus = app.install_form.focus.next();
        }
        KeyCode::BackTab => {
            app.install_form.focus = app.install_form.focus.prev();
        }
        KeyCode::Enter => match app.install_form.to_request() {
            Ok(request) => launch_install(app, request, manager, event_tx),
            Err(msg) => app.install_form.error = Some(msg),
        },
        KeyCode::Backspace => app.install_form.pop_char(),
        KeyCode::Char(c) => app.install_form.push_char(c),
        _ => {}
    }
}

/// Suggest an external port once the internal one is known.
async fn prefill_external_port(app: &mut App, manager: &Arc<ServiceManager>) {
    if !app.install_form.external_port.trim().is_empty() {
        return;
    }
    let internal = app
        .install_form
        .internal_port
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|p| *p > 0)
        .unwrap_or(manager.config().default_internal_port);
    let suggestion = manager.port_suggestion(internal).await;
    app.install_form.external_port = suggestion.to_string();
}

fn launch_install(
    app: &mut App,
    request: InstallRequest,
    manager: &Arc<ServiceManager>,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
) {
    app.mode = Mode::Loading(format!("Installing {}...", request.image.trim()));
    let tx = event_tx.clone();
    let manager = Arc::clone(manager);

    tokio::spawn(async move {
        match manager.install(request.clone()).await {
            Ok(outcome) => {
                let record = &outcome.record;
                let mut msg = format!(
                    "Installed '{}' on {}",
                    record.name,
                    record.access_address()
                );
                if outcome.internal_port_source == InternalPortSource::Defaulted {
                    msg.push_str(&format!(
                        " (image declares no port, assumed {})",
                        record.internal_port
                    ));
                }
                report(&tx, &manager, Ok(msg)).await;
            }
            Err(ManagerError::PortUnavailable { port, suggestion }) => {
                let _ = tx.send(AppEvent::PortConflict {
                    message: format!("Port {port} is not available, try {suggestion}"),
                    suggestion,
                });
            }
            Err(ManagerError::ServiceAlreadyExists(name)) if !request.overwrite => {
                let mut request = request;
                request.overwrite = true;
                let _ = tx.send(AppEvent::ReinstallPrompt { name, request });
            }
            Err(e) => report(&tx, &manager, Err(format!("Install failed: {e}"))).await,
        }
    });
}

// ─── Other Dialog Handlers ──────────────────────────────────────────────

fn handle_confirm_dialog(
    app: &mut App,
    key: KeyEvent,
    manager: &Arc<ServiceManager>,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('n') => {
            app.mode = Mode::ServiceList;
        }
        KeyCode::Char('y') | KeyCode::Enter => {
            let Mode::ConfirmDialog { action, .. } = &app.mode else {
                return;
            };
            match action.clone() {
                ConfirmAction::Quit => {
                    app.should_quit = true;
                }
                ConfirmAction::RemoveService(name) => {
                    let tx = event_tx.clone();
                    let manager = Arc::clone(manager);
                    app.mode = Mode::Loading(format!("Removing {name}..."));
                    tokio::spawn(async move {
                        let result = match manager.remove(&name).await {
                            Ok(RemoveOutcome::Removed) => Ok(format!("Removed {name}")),
                            Ok(RemoveOutcome::NotInstalled) => {
                                Ok(format!("{name} was not installed"))
                            }
                            Err(e) => Err(format!("Remove failed: {e}")),
                        };
                        report(&tx, &manager, result).await;
                    });
                }
                ConfirmAction::Reinstall(request) => {
                    launch_install(app, request, manager, event_tx);
                }
            }
        }
        _ => {}
    }
}

fn handle_help_dialog(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('?') => {
            app.mode = Mode::ServiceList;
        }
        _ => {}
    }
}

fn handle_check_report(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') | KeyCode::Char('c') => {
            app.mode = Mode::ServiceList;
        }
        _ => {}
    }
}

/// Send the outcome of a workflow, followed by the refreshed service list.
async fn report(
    tx: &mpsc::UnboundedSender<AppEvent>,
    manager: &ServiceManager,
    result: Result<String, String>,
) {
    let _ = tx.send(AppEvent::Services(manager.list().await));
    let _ = match result {
        Ok(msg) => tx.send(AppEvent::Info(msg)),
        Err(msg) => tx.send(AppEvent::Error(msg)),
    };
}
