mod common;

use dsm_core::models::UnitStatus;
use dsm_tui::app::{App, Mode};

use common::{make_service, render_to_string};

#[test]
fn help_dialog_renders() {
    let mut app = App::new();
    app.services
        .push(make_service("nginx", 3000, UnitStatus::Absent));
    app.mode = Mode::HelpDialog;
    let output = render_to_string(&app, 80, 30);
    assert!(output.contains(" Help "));
    assert!(output.contains("Install a service"));
    assert!(output.contains("Attach to window in 'dsm'"));
    assert!(output.contains("[Esc]close"));
}

#[test]
fn help_dialog_narrow_terminal() {
    let mut app = App::new();
    app.mode = Mode::HelpDialog;
    let output = render_to_string(&app, 60, 30);
    assert!(output.contains("Remove service"));
}
