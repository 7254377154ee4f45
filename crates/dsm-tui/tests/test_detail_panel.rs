mod common;

use dsm_core::models::UnitStatus;
use dsm_tui::app::App;

use common::{fixed_now, make_service, render_to_string_at};

#[test]
fn running_service_shows_access_address() {
    let mut app = App::new();
    app.services
        .push(make_service("nginx", 3000, UnitStatus::Running));
    let output = render_to_string_at(&app, 120, 30, fixed_now());
    assert!(output.contains("Running"));
    assert!(output.contains("localhost:3000"));
    assert!(output.contains("3000 -> 80"));
    assert!(output.contains("/srv/dsm/data/nginx -> /data"));
}

#[test]
fn stopped_service_has_no_access_line() {
    let mut app = App::new();
    app.services
        .push(make_service("redis", 3001, UnitStatus::Absent));
    let output = render_to_string_at(&app, 120, 30, fixed_now());
    assert!(output.contains("Absent"));
    assert!(!output.contains("localhost:3001"));
}

#[test]
fn install_age_is_relative_to_now() {
    let mut app = App::new();
    app.services
        .push(make_service("nginx", 3000, UnitStatus::Absent));
    let output = render_to_string_at(&app, 120, 30, fixed_now());
    assert!(output.contains("2025-06-15 09:45"));
    assert!(output.contains("2h 15m ago"));
}
