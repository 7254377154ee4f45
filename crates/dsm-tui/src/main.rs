use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;

use dsm_core::models::StateLayout;
use dsm_core::services::service_manager::ServiceManager;

use dsm_tui::app::{App, ConfirmAction, InstallField, Mode};
use dsm_tui::cli::{self, Cli};
use dsm_tui::event::{spawn_input_task, spawn_tick_task, AppEvent, InputGate};
use dsm_tui::{keys, ui};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Cli::parse();
    let layout = args
        .root
        .clone()
        .map(StateLayout::new)
        .unwrap_or_else(StateLayout::from_env);

    // Subcommands log to stderr; the TUI logs to a file only when asked.
    let _guard = if args.debug || args.headless.is_some() {
        Some(setup_debug_logging(&layout)?)
    } else {
        if args.command.is_some() {
            setup_stderr_logging();
        }
        None
    };

    let manager = Arc::new(ServiceManager::open_default(layout).await?);

    if let Some(command) = args.command {
        return cli::execute(&manager, command, &mut io::stdout()).await;
    }
    match args.headless {
        Some(script_path) => run_headless(script_path, manager).await,
        None => run_interactive(manager).await,
    }
}

/// Configure file-based tracing to `dsm-debug.log` in the state directory.
/// Returns the guard that must be held alive for the duration of the program.
fn setup_debug_logging(
    layout: &StateLayout,
) -> color_eyre::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&layout.root)?;
    let file_appender = tracing_appender::rolling::never(&layout.root, layout.log_file_name());
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_ansi(false)
        .init();

    Ok(guard)
}

fn setup_stderr_logging() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .init();
}

fn new_app(manager: &ServiceManager) -> App {
    let mut app = App::new();
    app.session_name = manager.config().session_name.clone();
    app
}

/// Run the normal interactive TUI with crossterm backend.
async fn run_interactive(manager: Arc<ServiceManager>) -> color_eyre::Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let input_gate = InputGate::default();
    let _input_task = spawn_input_task(event_tx.clone(), input_gate.clone());
    let _tick_task = spawn_tick_task(event_tx.clone());

    // Initialize terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = new_app(&manager);
    app.set_services(manager.list().await);

    // Main event loop
    loop {
        terminal.draw(|f| ui::render(f, &app, None))?;

        if let Some(name) = app.attach_target.take() {
            attach(&mut terminal, &manager, &input_gate, &mut app, &name).await;
            app.set_services(manager.list().await);
            continue;
        }

        if let Ok(event) = event_rx.try_recv() {
            process_event(&mut app, event, &manager, &event_tx).await;
        } else {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}

/// Run headless mode: read scripted input, render to TestBackend, dump frames to stdout.
async fn run_headless(
    script_path: PathBuf,
    manager: Arc<ServiceManager>,
) -> color_eyre::Result<()> {
    use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyEventState, KeyModifiers};
    use ratatui::backend::TestBackend;

    let script = std::fs::read_to_string(&script_path)?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();
    // No input task; keys come from the script
    let _tick_task = spawn_tick_task(event_tx.clone());

    let backend = TestBackend::new(120, 40);
    let mut terminal = Terminal::new(backend)?;
    let mut app = new_app(&manager);
    app.set_services(manager.list().await);

    for raw_line in script.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if line == "quit" {
            break;
        }

        if line == "screenshot" {
            headless_screenshot(&mut terminal, &app, None)?;
            continue;
        }

        if let Some(label) = line.strip_prefix("screenshot:") {
            headless_screenshot(&mut terminal, &app, Some(label.trim()))?;
            continue;
        }

        if let Some(ms_str) = line.strip_prefix("wait:") {
            let ms: u64 = ms_str.trim().parse().unwrap_or(100);
            headless_wait(&mut app, &mut event_rx, &manager, &event_tx, ms).await;
            continue;
        }

        if let Some(text) = line.strip_prefix("type:") {
            for ch in text.chars() {
                let key_event = KeyEvent::new(KeyCode::Char(ch), KeyModifiers::NONE);
                keys::handle_key(&mut app, key_event, &manager, &event_tx).await;
            }
            continue;
        }

        if let Some(key_str) = line.strip_prefix("key:") {
            let trimmed = key_str.trim();

            let (modifiers, key_name) = if let Some(rest) = trimmed.strip_prefix("shift+") {
                (KeyModifiers::SHIFT, rest)
            } else {
                (KeyModifiers::NONE, trimmed)
            };

            let mut chars = key_name.chars();
            let key_code = match key_name {
                "enter" => KeyCode::Enter,
                "esc" => KeyCode::Esc,
                "tab" => KeyCode::Tab,
                "backtab" => KeyCode::BackTab,
                "up" => KeyCode::Up,
                "down" => KeyCode::Down,
                "backspace" => KeyCode::Backspace,
                _ => match (chars.next(), chars.next()) {
                    (Some(ch), None) if modifiers.contains(KeyModifiers::SHIFT) => {
                        KeyCode::Char(ch.to_ascii_uppercase())
                    }
                    (Some(ch), None) => KeyCode::Char(ch),
                    _ => {
                        eprintln!("headless: unknown key '{key_name}'");
                        continue;
                    }
                },
            };

            let final_modifiers = if key_name == "backtab" {
                KeyModifiers::SHIFT
            } else {
                modifiers
            };

            let key_event = KeyEvent {
                code: key_code,
                modifiers: final_modifiers,
                kind: KeyEventKind::Press,
                state: KeyEventState::NONE,
            };
            keys::handle_key(&mut app, key_event, &manager, &event_tx).await;
            continue;
        }

        eprintln!("headless: unknown command '{line}'");
    }

    Ok(())
}

/// Render the current app state to the TestBackend and dump frame text to stdout.
fn headless_screenshot(
    terminal: &mut Terminal<ratatui::backend::TestBackend>,
    app: &App,
    label: Option<&str>,
) -> color_eyre::Result<()> {
    if let Some(label) = label {
        println!("=== {label} ===");
    }
    terminal.draw(|f| ui::render(f, app, None))?;
    let buf = terminal.backend().buffer();
    for y in 0..buf.area.height {
        let mut line = String::new();
        for x in 0..buf.area.width {
            line.push_str(buf[(x, y)].symbol());
        }
        println!("{}", line.trim_end());
    }
    Ok(())
}

/// Process async events during a `wait:` command.
async fn headless_wait(
    app: &mut App,
    event_rx: &mut mpsc::UnboundedReceiver<AppEvent>,
    manager: &Arc<ServiceManager>,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
    ms: u64,
) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(ms);
    while tokio::time::Instant::now() < deadline {
        while let Ok(event) = event_rx.try_recv() {
            process_event(app, event, manager, event_tx).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Process a single AppEvent, updating app state accordingly.
async fn process_event(
    app: &mut App,
    event: AppEvent,
    manager: &Arc<ServiceManager>,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
) {
    match event {
        AppEvent::Key(key) => {
            if key.kind == crossterm::event::KeyEventKind::Press {
                keys::handle_key(app, key, manager, event_tx).await;
            }
        }
        AppEvent::Tick => {
            app.set_services(manager.list().await);
        }
        AppEvent::Services(services) => {
            app.set_services(services);
        }
        AppEvent::Error(msg) => {
            tracing::debug!(error = %msg, "event_error");
            app.set_status(format!("Error: {msg}"));
            if matches!(app.mode, Mode::Loading(_)) {
                app.mode = Mode::ServiceList;
            }
        }
        AppEvent::Info(msg) => {
            tracing::debug!(info = %msg, "event_info");
            app.set_status(msg);
            if matches!(app.mode, Mode::Loading(_)) {
                app.mode = Mode::ServiceList;
            }
        }
        AppEvent::PortConflict {
            message,
            suggestion,
        } => {
            app.install_form.external_port = suggestion.to_string();
            app.install_form.focus = InstallField::ExternalPort;
            app.install_form.error = Some(message);
            app.mode = Mode::InstallDialog;
        }
        AppEvent::ReinstallPrompt { name, request } => {
            app.mode = Mode::ConfirmDialog {
                message: format!(
                    "Service '{name}' already exists. Reinstall it? Its container and data directory will be deleted."
                ),
                action: ConfirmAction::Reinstall(request),
            };
        }
        AppEvent::CheckDone(drift) => {
            app.set_status(if drift.is_empty() {
                "Check: no drift found".to_string()
            } else {
                format!("Check: {} issue(s) found", drift.len())
            });
            app.drift = drift;
            app.mode = Mode::CheckReport;
        }
    }
}

/// Hand the terminal to tmux, focused on the service's window, then restore.
async fn attach(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    manager: &ServiceManager,
    input_gate: &InputGate,
    app: &mut App,
    name: &str,
) {
    input_gate.pause().await;
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();

    let result = manager.attach(name).await;

    let _ = enable_raw_mode();
    let _ = execute!(terminal.backend_mut(), EnterAlternateScreen);
    let _ = terminal.hide_cursor();
    let _ = terminal.clear();
    input_gate.resume();

    if let Err(e) = result {
        app.set_status(format!("Error: attach failed: {e}"));
    }
}
