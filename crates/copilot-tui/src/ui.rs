use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use copilot_core::{ChatMessage, ChatRole, Phase};
use crate::app::App;

/// Render `**bold**` runs; everything else is literal
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// Rows a line occupies once wrapped to `width` columns
fn wrapped_height(line: &Line, width: u16) -> usize {
    let width = width.max(1) as usize;
    line.width().div_ceil(width).max(1)
}

fn transcript_lines(messages: &[ChatMessage], phase: Phase, animation_frame: u8) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = Vec::new();
    let last = messages.len().saturating_sub(1);

    for (i, msg) in messages.iter().enumerate() {
        match msg.role {
            ChatRole::User => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                lines.extend(msg.content.lines().map(|l| Line::from(l.to_string())));
            }
            ChatRole::Assistant => {
                lines.push(Line::from(Span::styled(
                    "Co-pilot:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));

                if i == last && phase.is_busy() && msg.content.is_empty() {
                    // Animated ellipsis: cycles through ".", "..", "..."
                    let dots = ".".repeat((animation_frame as usize) + 1);
                    lines.push(Line::from(Span::styled(
                        format!("Thinking{}", dots),
                        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                    )));
                } else if msg.failed {
                    lines.push(Line::from(Span::styled(
                        msg.content.clone(),
                        Style::default().fg(Color::Red),
                    )));
                } else {
                    lines.extend(msg.content.lines().map(parse_markdown_line));
                }
            }
        }
        lines.push(Line::default());
    }

    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let context = match app.controller.context_id() {
        Some(id) => format!(" [project {}]", id),
        None => String::new(),
    };

    let title = Line::from(vec![
        Span::styled(" Delivery Co-pilot ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(context, Style::default().fg(Color::White)),
        Span::raw(" "),
        Span::styled(
            format!("{} v{}", app.base_url, env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let phase = app.phase();
    let lines = app
        .controller
        .read(|messages| transcript_lines(messages, phase, app.animation_frame));

    let inner_width = area.width.saturating_sub(2);
    app.chat_height = area.height.saturating_sub(2);

    let total: usize = lines.iter().map(|l| wrapped_height(l, inner_width)).sum();
    let total = u16::try_from(total).unwrap_or(u16::MAX);
    app.max_scroll = total.saturating_sub(app.chat_height);
    if app.follow || app.scroll > app.max_scroll {
        app.scroll = app.max_scroll;
    }

    let border_color = if phase.is_busy() { Color::Yellow } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Conversation ");

    let text = if lines.is_empty() {
        Text::from(Span::styled(
            "Ask about delivery risk, blockers, or team load...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(lines)
    };

    let chat = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Ask ");

    // Horizontal scrolling keeps the cursor visible; inner width excludes borders
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;

    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    let cursor_x = (cursor_pos - scroll_offset) as u16;
    frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let phase = app.phase();
    let mode_style = match phase {
        Phase::Sending | Phase::Streaming => Style::default().bg(Color::Yellow).fg(Color::Black),
        Phase::Failed => Style::default().bg(Color::Red).fg(Color::White),
        _ => Style::default().bg(Color::Blue).fg(Color::White),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut spans = vec![Span::styled(
        format!(" {} ", phase.label().to_uppercase()),
        mode_style,
    )];

    if let Some(meta) = app.latest_meta() {
        let route = [meta.intent, meta.task_type]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" / ");
        if !route.is_empty() {
            spans.push(Span::styled(format!(" {} ", route), Style::default().fg(Color::Magenta)));
        }
    }

    if let Some(status) = &app.status {
        spans.push(Span::styled(format!(" {} ", status), Style::default().fg(Color::Gray)));
    }

    let hints = if phase.is_busy() {
        vec![("Esc", "stop"), ("PgUp/PgDn", "scroll"), ("^C", "quit")]
    } else {
        vec![("Enter", "send"), ("^L", "clear"), ("PgUp/PgDn", "scroll"), ("^C", "quit")]
    };
    for (key, label) in hints {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bold_runs() {
        let line = parse_markdown_line("p1 is **at risk** today");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "at risk");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_unclosed_bold_is_literal() {
        let line = parse_markdown_line("**open");
        assert_eq!(line.spans.len(), 1);
        assert_eq!(line.spans[0].content, "**open");
    }

    #[test]
    fn test_thinking_placeholder_while_busy() {
        let messages = vec![ChatMessage::user("q"), ChatMessage::assistant("")];
        let lines = transcript_lines(&messages, Phase::Sending, 2);
        assert!(lines.iter().any(|l| l.to_string() == "Thinking..."));

        let lines = transcript_lines(&messages, Phase::Idle, 2);
        assert!(!lines.iter().any(|l| l.to_string().starts_with("Thinking")));
    }

    fn is_red(line: &Line) -> bool {
        line.spans.iter().any(|s| s.style.fg == Some(Color::Red))
    }

    #[test]
    fn test_only_failed_replies_are_red() {
        let mut failed = ChatMessage::assistant("Error: router offline");
        failed.failed = true;
        let answer = ChatMessage::assistant("Error: codes seen this sprint are all 4xx");
        let messages = vec![ChatMessage::user("q"), failed, ChatMessage::user("q2"), answer];

        let lines = transcript_lines(&messages, Phase::Idle, 0);
        let red: Vec<String> = lines.iter().filter(|l| is_red(l)).map(|l| l.to_string()).collect();
        assert_eq!(red, vec!["Error: router offline"]);
    }

    #[test]
    fn test_wrapped_height() {
        let line = Line::from("abcdefghij");
        assert_eq!(wrapped_height(&line, 4), 3);
        assert_eq!(wrapped_height(&Line::default(), 4), 1);
    }
}
