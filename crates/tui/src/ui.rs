use std::time::Duration;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use marcher_core::types::{EngineStatus, Mode, SlotOutcome};

use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(f.area())
    } else {
        Layout::default().constraints([Constraint::Percentage(100)]).split(f.area())
    };

    let status = app.status.lock().unwrap().clone();
    let (banner_label, banner_bg) = banner(&status, app.engine_running());

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    let width = left[0].width as usize;
    let pad_left = width.saturating_sub(banner_label.len()) / 2;
    let centered = format!("{:<width$}", format!("{}{}", " ".repeat(pad_left), banner_label), width = width);
    f.render_widget(
        Paragraph::new(Line::from(Span::styled(
            centered,
            Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
        ))),
        left[0],
    );

    let panel = Paragraph::new(status_lines(&status, app.started.elapsed())).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(panel, left[1]);

    if app.log_visible && chunks.len() > 1 {
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let scroll = app.log_scroll.min(total.saturating_sub(visible_height));
        let start = total.saturating_sub(visible_height + scroll);
        let end = total.saturating_sub(scroll);
        let log_lines: Vec<Line> = app.log_messages[start..end].iter().map(|m| parse_log_line(m)).collect();

        let log_panel = Paragraph::new(log_lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(log_panel, chunks[1]);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn banner(status: &EngineStatus, running: bool) -> (&'static str, Color) {
    if !running {
        ("STOPPED (q to quit)", Color::DarkGray)
    } else if !status.device_online {
        ("DEVICE OFFLINE - waiting", Color::Red)
    } else {
        match status.mode {
            Mode::Hunting => ("HUNTING", Color::Green),
            Mode::Idle => ("IDLE", Color::LightBlue),
        }
    }
}

fn outcome_color(o: SlotOutcome) -> Color {
    match o {
        SlotOutcome::Marched => Color::Green,
        SlotOutcome::NoRally => Color::DarkGray,
        SlotOutcome::Next => Color::Cyan,
        SlotOutcome::Refresh => Color::Yellow,
        SlotOutcome::Error => Color::Red,
    }
}

fn field<'a>(name: &'a str, value: String, color: Color) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!(" {:<10}", name), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(color)),
    ])
}

fn status_lines(s: &EngineStatus, uptime: Duration) -> Vec<Line<'static>> {
    let secs = uptime.as_secs();
    let mut lines = vec![
        Line::from(""),
        field("device", if s.device_online { "online".into() } else { "offline".into() }, if s.device_online { Color::Green } else { Color::Red }),
        field("task", s.current_task.clone().unwrap_or_else(|| "-".into()), Color::Yellow),
        field("passes", s.passes.to_string(), Color::White),
        field("marched", s.marched_total.to_string(), Color::Green),
        field("uptime", format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60), Color::White),
        Line::from(""),
        Line::from(Span::styled(" recent slots", Style::default().fg(Color::White).add_modifier(Modifier::BOLD))),
    ];
    if s.recent.is_empty() {
        lines.push(Line::from(Span::styled("   none yet", Style::default().fg(Color::DarkGray))));
    }
    for (slot, outcome) in s.recent.iter().rev() {
        lines.push(Line::from(vec![
            Span::styled(format!("   slot {} ", slot), Style::default().fg(Color::DarkGray)),
            Span::styled(outcome.to_string(), Style::default().fg(outcome_color(*outcome))),
        ]));
    }
    if let Some(err) = &s.last_error {
        lines.push(Line::from(""));
        lines.push(field("last err", err.clone(), Color::Red));
    }
    lines
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }

    let (level, prefix, timestamp, message) = (parts[0], parts[1], parts[3], parts[4]);
    let color = match parts[2].parse::<u8>().unwrap_or(0) {
        1 => Color::DarkGray,  // COLOR_GRAY
        2 => Color::LightBlue, // COLOR_BLUE
        3 => Color::Green,     // COLOR_GREEN
        4 => Color::Magenta,   // COLOR_MAGENTA
        _ => Color::White,
    };

    let mut spans = vec![Span::styled(timestamp, Style::default().fg(Color::DarkGray)), Span::raw(" ")];
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }
    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(color)));
    Line::from(spans)
}
