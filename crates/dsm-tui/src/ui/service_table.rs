use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState};
use ratatui::Frame;

use dsm_core::models::UnitStatus;

use crate::app::App;

pub fn render(f: &mut Frame, area: Rect, app: &App) {
    let name_width = app
        .services
        .iter()
        .map(|s| s.record.name.chars().count())
        .max()
        .unwrap_or(0)
        .min(24);

    let items: Vec<ListItem> = app
        .services
        .iter()
        .map(|service| {
            let record = &service.record;
            let line = Line::from(vec![
                Span::raw(" "),
                status_icon(service.status),
                Span::raw(" "),
                Span::styled(
                    format!("{:<name_width$}", truncate(&record.name, 24)),
                    Style::default().fg(Color::White),
                ),
                Span::raw("  "),
                Span::styled(
                    format!(":{}", record.external_port),
                    Style::default().fg(Color::DarkGray),
                ),
            ]);
            ListItem::new(line)
        })
        .collect();

    let title = format!(" Services ({}) ", app.services.len());
    let list = List::new(items)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Rgb(0x1A, 0x3A, 0x5C))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut state = ListState::default();
    if !app.services.is_empty() {
        state.select(Some(app.selected_index));
    }

    f.render_stateful_widget(list, area, &mut state);
}

fn status_icon(status: UnitStatus) -> Span<'static> {
    match status {
        UnitStatus::Running => Span::styled("▶", Style::default().fg(Color::Green)),
        UnitStatus::Absent => Span::styled("■", Style::default().fg(Color::DarkGray)),
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        value.to_string()
    } else {
        let truncated: String = value.chars().take(max_len - 3).collect();
        format!("{truncated}...")
    }
}
