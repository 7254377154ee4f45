use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;

use dsm_core::models::Drift;

use crate::app::App;
use crate::ui::layout::centered_rect;

pub fn render(f: &mut Frame, app: &App) {
    let area = centered_rect(70, 60, f.area());
    f.render_widget(Clear, area);

    let color = if app.drift.is_empty() {
        Color::Green
    } else {
        Color::Yellow
    };
    let block = Block::default()
        .title(" Consistency Check ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));

    let mut lines: Vec<Line> = if app.drift.is_empty() {
        vec![Line::from(Span::styled(
            " Registry, data directories, containers and windows agree.",
            Style::default().fg(Color::Green),
        ))]
    } else {
        app.drift.iter().map(drift_line).collect()
    };
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        " Esc close",
        Style::default().fg(Color::DarkGray),
    )));

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);
}

fn drift_line(drift: &Drift) -> Line<'static> {
    let tag = match drift {
        Drift::MissingDataDir { .. } => "data",
        Drift::ContainerUnresolvable { .. } => "container",
        Drift::OrphanUnit { .. } => "window",
    };
    Line::from(vec![
        Span::styled(format!(" {tag:<10}"), Style::default().fg(Color::Yellow)),
        Span::styled(drift.to_string(), Style::default().fg(Color::White)),
    ])
}
