use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;

use crate::app::App;
use crate::ui::layout::centered_rect;

pub fn render(f: &mut Frame, app: &App) {
    let area = centered_rect(65, 80, f.area());
    f.render_widget(Clear, area);

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let lines = vec![
        section_header("Services"),
        key_line("I", "Install a service"),
        key_line("R / S", "Run in tmux window"),
        key_line("K", "Stop (kill window)"),
        key_line("D", "Remove service"),
        key_line("A", &format!("Attach to window in '{}'", app.session_name)),
        key_line("C", "Check registry consistency"),
        key_line("Up/Down/J", "Select"),
        key_line("?", "Show this help"),
        key_line("Q / Esc", "Quit"),
        Line::from(""),
        section_header("Install Dialog"),
        key_line("Tab", "Next field (suggests a port)"),
        key_line("Shift+Tab", "Previous field"),
        key_line("Enter", "Install"),
        key_line("Esc", "Cancel"),
    ];

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);
}

fn section_header(title: &str) -> Line<'static> {
    Line::from(Span::styled(
        format!("  {title}"),
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    ))
}

fn key_line(key: &str, desc: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("    {key:<12}"),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(desc.to_string(), Style::default().fg(Color::White)),
    ])
}
