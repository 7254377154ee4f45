use chrono::{DateTime, Utc};
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

use dsm_core::models::{ServiceStatus, UnitStatus};

use crate::app::App;

pub fn render_with_now(f: &mut Frame, area: Rect, app: &App, now: DateTime<Utc>) {
    let block = Block::default()
        .title(" Details ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let Some(service) = app.selected_service() else {
        let empty = Paragraph::new(" No services installed. Press i to install one.").block(block);
        f.render_widget(empty, area);
        return;
    };

    let lines = build_detail_lines(service, now);
    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);
}

fn build_detail_lines(service: &ServiceStatus, now: DateTime<Utc>) -> Vec<Line<'static>> {
    let record = &service.record;
    let mut lines = vec![
        detail_line("Name", &record.name, Color::White),
        detail_line("Image", &record.image, Color::White),
        detail_line(
            "Status",
            &format!("{:?}", service.status),
            status_color(service.status),
        ),
    ];

    if service.status == UnitStatus::Running {
        lines.push(detail_line("Access", &record.access_address(), Color::Cyan));
    }

    lines.push(detail_line(
        "Ports",
        &format!("{} -> {}", record.external_port, record.internal_port),
        Color::White,
    ));
    lines.push(detail_line("Container", &record.container, Color::White));
    lines.push(detail_line("Window", &record.window_name, Color::White));
    lines.push(detail_line(
        "Data",
        &format!("{} -> {}", record.data_dir.display(), record.mount_path),
        Color::DarkGray,
    ));

    let age = now.signed_duration_since(record.installed_at);
    lines.push(detail_line(
        "Installed",
        &format!(
            "{} ({} ago)",
            record.installed_at.format("%Y-%m-%d %H:%M"),
            format_duration(age)
        ),
        Color::DarkGray,
    ));

    lines
}

fn format_duration(d: chrono::Duration) -> String {
    let total_secs = d.num_seconds().max(0);
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let mins = (total_secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins:02}m")
    } else if mins > 0 {
        format!("{mins}m")
    } else {
        format!("{total_secs}s")
    }
}

fn detail_line(label: &str, value: &str, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("  {label:<10} "),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(value.to_string(), Style::default().fg(color)),
    ])
}

fn status_color(status: UnitStatus) -> Color {
    match status {
        UnitStatus::Running => Color::Green,
        UnitStatus::Absent => Color::DarkGray,
    }
}
