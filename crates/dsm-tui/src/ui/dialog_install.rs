use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::Frame;

use crate::app::{App, InstallField};
use crate::ui::layout::centered_rect;

const FIELDS: [(InstallField, &str, &str); 5] = [
    (InstallField::Image, "Image", "e.g. nginx:latest"),
    (InstallField::Name, "Name", "derived from image"),
    (InstallField::InternalPort, "Internal port", "detected from image"),
    (InstallField::ExternalPort, "External port", "next free port"),
    (InstallField::Window, "Window", "same as name"),
];

pub fn render(f: &mut Frame, app: &App) {
    let area = centered_rect(60, 60, f.area());
    f.render_widget(Clear, area);

    let block = Block::default()
        .title(" Install Service ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut constraints: Vec<Constraint> = FIELDS.iter().map(|_| Constraint::Length(1)).collect();
    constraints.push(Constraint::Length(1)); // blank
    constraints.push(Constraint::Min(1)); // error
    constraints.push(Constraint::Length(1)); // help text

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(constraints)
        .split(inner);

    let form = &app.install_form;
    for (row, (field, label, placeholder)) in FIELDS.iter().enumerate() {
        let focused = form.focus == *field;
        let value = match field {
            InstallField::Image => &form.image,
            InstallField::Name => &form.name,
            InstallField::InternalPort => &form.internal_port,
            InstallField::ExternalPort => &form.external_port,
            InstallField::Window => &form.window,
        };

        let value_span = if value.is_empty() && !focused {
            Span::styled(
                placeholder.to_string(),
                Style::default().fg(Color::DarkGray),
            )
        } else {
            let cursor = if focused { "_" } else { "" };
            Span::styled(format!("{value}{cursor}"), field_style(focused))
        };

        f.render_widget(
            Paragraph::new(Line::from(vec![
                Span::styled(format!(" {label:<14} "), label_style(focused)),
                value_span,
            ])),
            chunks[row],
        );
    }

    if let Some(ref error) = form.error {
        f.render_widget(
            Paragraph::new(Span::styled(
                format!(" {error}"),
                Style::default().fg(Color::Red),
            )),
            chunks[FIELDS.len() + 1],
        );
    }

    let help = Line::from(vec![
        Span::styled(" Tab", Style::default().fg(Color::Yellow)),
        Span::styled(" next field  ", Style::default().fg(Color::DarkGray)),
        Span::styled("Enter", Style::default().fg(Color::Yellow)),
        Span::styled(" install  ", Style::default().fg(Color::DarkGray)),
        Span::styled("Esc", Style::default().fg(Color::Yellow)),
        Span::styled(" cancel", Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(Paragraph::new(help), chunks[FIELDS.len() + 2]);
}

fn label_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    }
}

fn field_style(focused: bool) -> Style {
    if focused {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
    } else {
        Style::default().fg(Color::White)
    }
}
