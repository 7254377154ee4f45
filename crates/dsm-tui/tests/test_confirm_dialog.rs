mod common;

use dsm_core::services::service_manager::InstallRequest;
use dsm_tui::app::{App, ConfirmAction, Mode};

use common::render_to_string;

#[test]
fn confirm_remove() {
    let mut app = App::new();
    app.mode = Mode::ConfirmDialog {
        message: "Remove service 'nginx'?".into(),
        action: ConfirmAction::RemoveService("nginx".into()),
    };
    let output = render_to_string(&app, 80, 24);
    assert!(output.contains(" Remove "));
    assert!(output.contains("Remove service 'nginx'?"));
    assert!(output.contains("[Y]es"));
}

#[test]
fn confirm_reinstall() {
    let mut app = App::new();
    app.mode = Mode::ConfirmDialog {
        message: "Reinstall nginx?".into(),
        action: ConfirmAction::Reinstall(InstallRequest::new("nginx")),
    };
    let output = render_to_string(&app, 80, 24);
    assert!(output.contains(" Reinstall "));
}

#[test]
fn confirm_quit() {
    let mut app = App::new();
    app.mode = Mode::ConfirmDialog {
        message: "Quit?".into(),
        action: ConfirmAction::Quit,
    };
    let output = render_to_string(&app, 80, 24);
    assert!(output.contains(" Quit "));
}

#[test]
fn loading_installing() {
    let mut app = App::new();
    app.mode = Mode::Loading("Installing nginx...".into());
    let output = render_to_string(&app, 80, 24);
    assert!(output.contains("Installing nginx..."));
}
