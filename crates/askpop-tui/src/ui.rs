use askpop_core::{PopupSession, Region};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, InputMode, COPIED_TEXT};

const POPUP_WIDTH: u16 = 72;
const EXPANDED_HEIGHT: u16 = 24;
const MAX_PROMPT_ROWS: usize = 5;

/// Parse inline markup: **bold** and `code`
fn parse_inline(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut plain = String::new();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut inner = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == '*' && chars.peek() == Some(&'*') {
                        chars.next();
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if closed && !inner.is_empty() {
                    flush(&mut spans, &mut plain);
                    spans.push(Span::styled(inner, Style::default().add_modifier(Modifier::BOLD)));
                } else {
                    plain.push_str("**");
                    plain.push_str(&inner);
                }
            }
            '`' => {
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '`' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if closed && !inner.is_empty() {
                    flush(&mut spans, &mut plain);
                    spans.push(Span::styled(inner, code_style()));
                } else {
                    plain.push('`');
                    plain.push_str(&inner);
                }
            }
            _ => plain.push(c),
        }
    }
    flush(&mut spans, &mut plain);

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn flush(spans: &mut Vec<Span<'static>>, plain: &mut String) {
    if !plain.is_empty() {
        spans.push(Span::raw(std::mem::take(plain)));
    }
}

fn code_style() -> Style {
    Style::default().fg(Color::Green).bg(Color::Black)
}

/// Render a response: headings, fenced code blocks, and inline markup
fn render_markdown(text: &str) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut in_code = false;

    for raw in text.lines() {
        if let Some(fence) = raw.trim_start().strip_prefix("```") {
            in_code = !in_code;
            let lang = fence.trim();
            if in_code && !lang.is_empty() {
                lines.push(Line::from(Span::styled(
                    lang.to_string(),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            }
            continue;
        }

        if in_code {
            lines.push(Line::from(Span::styled(raw.to_string(), code_style())));
            continue;
        }

        let trimmed = raw.trim_start();
        let heading = trimmed.trim_start_matches('#');
        if trimmed.starts_with('#') && heading.starts_with(' ') {
            lines.push(Line::from(Span::styled(
                heading.trim().to_string(),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
        } else {
            lines.push(parse_inline(raw));
        }
    }
    lines
}

/// Body of the last fenced code block in `text`, if it has one
pub fn last_code_block(text: &str) -> Option<String> {
    let mut last = None;
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(block) => last = Some(block.join("\n")),
                None => current = Some(Vec::new()),
            }
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }
    // An unterminated fence still holds code
    if let Some(block) = current {
        last = Some(block.join("\n"));
    }
    last.filter(|code| !code.trim().is_empty())
}

/// The popup's top border row, which doubles as its drag handle
pub fn handle_region(popup: Rect) -> Region {
    Region {
        x: i32::from(popup.x),
        y: i32::from(popup.y),
        width: popup.width,
        height: 1,
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    render_backdrop(app, frame, area);

    if app.session.is_some() {
        render_popup(app, frame, area);
        if app.input_mode == InputMode::AttachPath {
            render_attach_input(app, frame, area);
        }
    } else {
        app.popup_area = None;
        app.history_area = None;
    }
}

fn render_backdrop(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let dim = Style::default().fg(Color::DarkGray);

    let mut lines = vec![
        Line::from(Span::styled("askpop", Style::default().add_modifier(Modifier::BOLD))),
        Line::default(),
        Line::from(vec![
            Span::styled("Ctrl+Space", key_style),
            Span::styled(" ask anything   ", dim),
            Span::styled("q", key_style),
            Span::styled(" quit", dim),
        ]),
        Line::from(Span::styled(format!("model: {}", app.model), dim)),
    ];
    if !app.api_configured {
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            "No Gemini API key found. Set GEMINI_API_KEY or add it to the config file.",
            Style::default().fg(Color::Red),
        )));
    }

    let height = (lines.len() as u16).min(area.height);
    let y = area.y + area.height.saturating_sub(height) * 3 / 4;
    let hint_area = Rect::new(area.x, y, area.width, height);
    frame.render_widget(
        Paragraph::new(lines).alignment(ratatui::layout::Alignment::Center),
        hint_area,
    );
}

fn render_popup(app: &mut App, frame: &mut Frame, area: Rect) {
    let Some(session) = app.session.as_mut() else {
        return;
    };

    let width = POPUP_WIDTH.min(area.width);
    let inner_width = width.saturating_sub(2) as usize;

    let prompt_rows = session.draft().prompt.split('\n').count().clamp(1, MAX_PROMPT_ROWS) as u16;
    let image_rows = u16::from(session.draft().image.is_some());
    let input_height = prompt_rows + image_rows + 1;

    let height = if session.is_expanded() {
        EXPANDED_HEIGHT.max(input_height + 6)
    } else {
        input_height + 2
    }
    .min(area.height);

    session.place_initial(area.width, area.height, width);
    session.set_bounds(area.width, area.height, width, height);

    let position = session.position();
    let popup = Rect::new(
        area.x + position.x.max(0) as u16,
        area.y + position.y.max(0) as u16,
        width,
        height,
    );
    app.popup_area = Some(popup);
    session.set_handle_region(handle_region(popup));

    let title_hint = |label: &str, active: bool| {
        let style = if active {
            Style::default().fg(Color::Black).bg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        Span::styled(label.to_string(), style)
    };
    let border_color = if session.is_dragging() { Color::Yellow } else { Color::Cyan };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(Line::from(vec![
            Span::styled(" Ask AI ", Style::default().add_modifier(Modifier::BOLD)),
            Span::styled(format!("{} ", app.model), Style::default().fg(Color::DarkGray)),
        ]))
        .title_top(
            Line::from(vec![
                title_hint(" ^N new ", false),
                title_hint(" ^R history ", session.is_showing_history()),
                title_hint(" Esc ✕ ", false),
            ])
            .right_aligned(),
        );

    let inner = block.inner(popup);
    frame.render_widget(Clear, popup);
    frame.render_widget(block, popup);

    let (body_area, input_area) = if session.is_expanded() {
        let [body, separator, input] = Layout::vertical([
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(input_height),
        ])
        .areas(inner);
        frame.render_widget(
            Block::default()
                .borders(Borders::TOP)
                .border_style(Style::default().fg(Color::DarkGray)),
            separator,
        );
        (Some(body), input)
    } else {
        (None, inner)
    };

    app.history_area = None;
    if let Some(body) = body_area {
        render_body(app, frame, body);
    }
    render_input(app, frame, input_area, inner_width);
}

fn render_body(app: &mut App, frame: &mut Frame, area: Rect) {
    let Some(session) = app.session.as_ref() else {
        return;
    };

    if session.is_showing_history() {
        if session.history().is_empty() {
            frame.render_widget(
                Paragraph::new(Span::styled("No history yet.", Style::default().fg(Color::DarkGray))),
                area,
            );
            return;
        }

        let items: Vec<ListItem> = session
            .history()
            .iter()
            .map(|query| {
                let first_line = query.prompt.lines().next().unwrap_or_default();
                let mut spans = vec![
                    Span::styled(
                        query.timestamp.format("%H:%M ").to_string(),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::raw(first_line.to_string()),
                ];
                if query.image.is_some() {
                    spans.push(Span::styled(" [image]", Style::default().fg(Color::Magenta)));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();

        let list = List::new(items)
            .highlight_style(
                Style::default()
                    .bg(Color::Cyan)
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");

        app.history_area = Some(area);
        frame.render_stateful_widget(list, area, &mut app.history_state);
        return;
    }

    if session.is_submitting() {
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat(usize::from(app.animation_frame) + 1);
        let lines = vec![
            Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )),
            Line::from(Span::styled("Ctrl+S to stop", Style::default().fg(Color::DarkGray))),
        ];
        frame.render_widget(Paragraph::new(lines), area);
        return;
    }

    let text = if session.is_showing_response() {
        let mut lines = render_markdown(session.visible_response());
        if session.is_cancelled() {
            lines = lines
                .into_iter()
                .map(|line| line.style(Style::default().fg(Color::Yellow)))
                .collect();
        }
        Text::from(lines)
    } else {
        Text::from(Span::styled("How can I help?", Style::default().fg(Color::DarkGray)))
    };

    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .scroll((app.response_scroll, 0));
    frame.render_widget(paragraph, area);
}

/// Visible prompt rows plus the cursor's (column, row) inside them
fn prompt_view(prompt: &str, cursor: usize, width: usize, max_rows: usize) -> (Vec<String>, (usize, usize)) {
    let before: String = prompt.chars().take(cursor).collect();
    let row = before.matches('\n').count();
    let col = before.rsplit('\n').next().map(|s| s.chars().count()).unwrap_or(0);

    let row_offset = row.saturating_sub(max_rows.saturating_sub(1));
    let col_offset = if width > 0 && col >= width { col - width + 1 } else { 0 };

    let rows = prompt
        .split('\n')
        .skip(row_offset)
        .take(max_rows)
        .map(|line| line.chars().skip(col_offset).take(width).collect())
        .collect();

    (rows, (col - col_offset, row - row_offset))
}

fn render_input(app: &App, frame: &mut Frame, area: Rect, width: usize) {
    let Some(session) = app.session.as_ref() else {
        return;
    };
    let draft = session.draft();

    let image_rows = u16::from(draft.image.is_some());
    let [image_area, prompt_area, hint_area] = Layout::vertical([
        Constraint::Length(image_rows),
        Constraint::Min(1),
        Constraint::Length(1),
    ])
    .areas(area);

    if let Some(image) = &draft.image {
        let kind = image.mime_type().unwrap_or("image");
        let size_kb = image.approx_len() as f64 / 1024.0;
        frame.render_widget(
            Paragraph::new(Line::from(vec![
                Span::styled(
                    format!("[{} · {:.1} KB]", kind, size_kb),
                    Style::default().fg(Color::Magenta),
                ),
                Span::styled(" ^X remove", Style::default().fg(Color::DarkGray)),
            ])),
            image_area,
        );
    }

    if draft.prompt.is_empty() {
        frame.render_widget(
            Paragraph::new(Span::styled("How can I help?", Style::default().fg(Color::DarkGray))),
            prompt_area,
        );
        if app.input_mode == InputMode::Prompt && !session.is_showing_history() {
            frame.set_cursor_position((prompt_area.x, prompt_area.y));
        }
    } else {
        let (rows, (col, row)) = prompt_view(
            &draft.prompt,
            draft.cursor(),
            width,
            usize::from(prompt_area.height.max(1)),
        );
        let lines: Vec<Line> = rows.into_iter().map(Line::from).collect();
        frame.render_widget(Paragraph::new(lines).style(Style::default().fg(Color::Cyan)), prompt_area);

        if app.input_mode == InputMode::Prompt && !session.is_showing_history() {
            frame.set_cursor_position((prompt_area.x + col as u16, prompt_area.y + row as u16));
        }
    }

    frame.render_widget(Paragraph::new(hint_line(app, session)), hint_area);
}

fn hint_line(app: &App, session: &PopupSession) -> Line<'static> {
    let dim = Style::default().fg(Color::DarkGray);

    if let Some(status) = &app.status {
        let color = if status == COPIED_TEXT { Color::Green } else { Color::Red };
        return Line::from(Span::styled(status.clone(), Style::default().fg(color)));
    }

    let mic = if !session.speech_supported() {
        Span::styled("mic unavailable", dim)
    } else if session.is_listening() {
        Span::styled("● listening ^L", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("○ mic ^L", dim)
    };

    let send = if session.can_submit() {
        Span::styled("Enter send", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("Enter send", dim)
    };

    let mut spans = vec![mic, Span::styled("  ^O img  ^V paste", dim)];
    if session.is_showing_response() {
        spans.push(Span::styled("  ^Y copy", dim));
    }
    spans.push(Span::styled("  Alt+⏎ newline  ", dim));
    spans.push(send);
    Line::from(spans)
}

fn render_attach_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 5;

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height.min(area.height));

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Attach Image ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Image file path. Enter to attach, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    // Keep the end of a long path visible
    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let width = usize::from(input_area.width.max(1));
    let len = app.path_input.chars().count();
    let skip = (len + 1).saturating_sub(width);
    let visible: String = app.path_input.chars().skip(skip).collect();

    frame.render_widget(Paragraph::new(visible).style(Style::default().fg(Color::Cyan)), input_area);
    frame.set_cursor_position((input_area.x + (len - skip) as u16, input_area.y));
}
