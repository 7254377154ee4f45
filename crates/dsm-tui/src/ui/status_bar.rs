use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use crate::app::{App, Mode};

pub fn render(f: &mut Frame, area: Rect, app: &App) {
    // First line: status message or blank
    let status_line = if let Some(ref msg) = app.status_message {
        let color = if msg.starts_with("Error") || msg.contains("failed") {
            Color::Red
        } else {
            Color::Green
        };
        Line::from(Span::styled(format!(" {msg}"), Style::default().fg(color)))
    } else {
        Line::from("")
    };

    // Second line: context-sensitive hotkey hints
    let hints = match &app.mode {
        Mode::InstallDialog => Line::from(vec![
            hint("Tab", "next"),
            Span::raw(" "),
            hint("Enter", "install"),
            Span::raw(" "),
            hint("Esc", "cancel"),
        ]),
        Mode::ConfirmDialog { .. } => Line::from(vec![hint("Y", "es"), Span::raw(" "), hint("N", "o")]),
        Mode::HelpDialog | Mode::CheckReport => Line::from(vec![hint("Esc", "close")]),
        Mode::Loading(_) => Line::from(""),
        Mode::ServiceList => Line::from(vec![
            hint("I", "nstall"),
            Span::raw(" "),
            hint("R", "un"),
            Span::raw(" "),
            hint("K", "ill"),
            Span::raw(" "),
            hint("D", "elete"),
            Span::raw(" "),
            hint("A", "ttach"),
            Span::raw(" "),
            hint("C", "heck"),
            Span::raw(" "),
            hint("?", "help"),
            Span::raw(" "),
            hint("Q", "uit"),
        ]),
    };

    let widget = Paragraph::new(vec![status_line, hints]);
    f.render_widget(widget, area);
}

fn hint(key: &str, label: &str) -> Span<'static> {
    Span::styled(
        format!("[{key}]{label}"),
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
}
