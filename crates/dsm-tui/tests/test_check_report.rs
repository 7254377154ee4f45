mod common;

use std::path::PathBuf;

use dsm_core::models::Drift;
use dsm_tui::app::{App, Mode};

use common::render_to_string;

#[test]
fn clean_report() {
    let mut app = App::new();
    app.mode = Mode::CheckReport;
    let output = render_to_string(&app, 100, 30);
    assert!(output.contains(" Consistency Check "));
    assert!(output.contains("agree"));
}

#[test]
fn drift_is_listed() {
    let mut app = App::new();
    app.mode = Mode::CheckReport;
    app.drift = vec![
        Drift::MissingDataDir {
            service: "nginx".into(),
            path: PathBuf::from("/srv/dsm/data/nginx"),
        },
        Drift::OrphanUnit {
            unit: "stray".into(),
        },
    ];
    let output = render_to_string(&app, 120, 30);
    assert!(output.contains("nginx"));
    assert!(output.contains("stray"));
}
