use std::ops::Range;

use clap::ValueEnum;
use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
};
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use crate::app::App;
use crate::chat::Exchange;
use crate::render::RenderSnapshot;
use crate::scanner::SegmentKind;

pub const SPINNER: [char; 4] = ['◢', '◣', '◤', '◥'];

const BANNER: [&str; 6] = [
    r"  _______ _    _ _____ _   _ _  ________ _____     _____ _    _       _______ ",
    r" |__   __| |  | |_   _| \ | | |/ /  ____|  __ \   / ____| |  | |   /\|__   __|",
    r"    | |  | |__| | | | |  \| | ' /| |__  | |__) | | |    | |__| |  /  \  | |   ",
    r"    | |  |  __  | | | | . ` |  < |  __| |  _  /  | |    |  __  | / /\ \ | |   ",
    r"    | |  | |  | |_| |_| |\  | . \| |____| | \ \  | |____| |  | |/ ____ \| |   ",
    r"    |_|  |_|  |_|_____|_| \_|_|\_\______|_|  \_\  \_____|_|  |_/_/    \_\_|   ",
];

/// How the reasoning region is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingView {
    /// Bordered, dimmed pane that follows the newest reasoning
    #[default]
    Expanded,
    /// One status line with the reasoning size
    Collapsed,
    /// Not drawn at all
    Hidden,
}

impl ThinkingView {
    pub fn next(self) -> Self {
        match self {
            ThinkingView::Expanded => ThinkingView::Collapsed,
            ThinkingView::Collapsed => ThinkingView::Hidden,
            ThinkingView::Hidden => ThinkingView::Expanded,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ThinkingView::Expanded => "expanded",
            ThinkingView::Collapsed => "collapsed",
            ThinkingView::Hidden => "hidden",
        }
    }
}

/// Screen regions for one frame. Derived from the terminal area and the
/// current content on every redraw, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenLayout {
    pub header: Rect,
    pub thinking: Option<Rect>,
    pub answer: Rect,
    pub input: Rect,
    pub footer: Rect,
}

pub fn compute_layout(area: Rect, view: ThinkingView, thinking_lines: usize) -> ScreenLayout {
    // header + input box + footer
    let body = area.height.saturating_sub(5);

    let thinking_height = if thinking_lines == 0 || body < 6 {
        0
    } else {
        match view {
            ThinkingView::Expanded => {
                let max = (body * 2 / 5).max(3);
                (thinking_lines.min(u16::MAX as usize) as u16)
                    .saturating_add(2)
                    .min(max)
            }
            ThinkingView::Collapsed => 1,
            ThinkingView::Hidden => 0,
        }
    };

    let [header, thinking, answer, input, footer] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(thinking_height),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    ScreenLayout {
        header,
        thinking: (thinking_height > 0).then_some(thinking),
        answer,
        input,
        footer,
    }
}

/// Wrap text to `width` display columns, preferring to break after a space.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();

    for raw in text.split('\n') {
        let raw = raw.trim_end_matches('\r').replace('\t', "    ");
        let mut line = String::new();
        let mut line_width = 0;

        for ch in raw.chars() {
            let ch_width = ch.width().unwrap_or(0);
            if line_width + ch_width > width && !line.is_empty() {
                // A space at the break point is swallowed by the break
                if ch == ' ' {
                    out.push(std::mem::take(&mut line));
                    line_width = 0;
                    continue;
                }
                match line.rfind(' ').filter(|&idx| idx + 1 < line.len()) {
                    Some(idx) => {
                        let rest = line.split_off(idx + 1);
                        out.push(std::mem::take(&mut line));
                        line_width = display_width(&rest);
                        line = rest;
                    }
                    None => {
                        out.push(std::mem::take(&mut line));
                        line_width = 0;
                    }
                }
            }
            line.push(ch);
            line_width += ch_width;
        }
        out.push(line);
    }

    out
}

fn display_width(text: &str) -> usize {
    text.chars().map(|c| c.width().unwrap_or(0)).sum()
}

/// Rows of a `len`-row document visible in `height` rows, `scroll_back`
/// rows up from the bottom.
pub fn tail_window(len: usize, height: usize, scroll_back: usize) -> Range<usize> {
    let max_back = len.saturating_sub(height);
    let end = len - scroll_back.min(max_back);
    end.saturating_sub(height)..end
}

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str, base: Style) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            // Push any accumulated plain text
            if !current_text.is_empty() {
                spans.push(Span::styled(std::mem::take(&mut current_text), base));
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
                spans.push(Span::styled(bold_text, base.add_modifier(Modifier::BOLD)));
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
        spans.push(Span::styled(current_text, base));
    }

    Line::from(spans)
}

fn push_wrapped(lines: &mut Vec<Line<'static>>, text: &str, width: usize, style: Style) {
    for row in wrap_text(text, width) {
        lines.push(Line::from(Span::styled(row, style)));
    }
}

fn push_answer(lines: &mut Vec<Line<'static>>, text: &str, width: usize) {
    // Blank lines right after a think block are not part of the visible answer
    let text = text.trim_start_matches(['\n', '\r']);
    for row in wrap_text(text, width) {
        lines.push(parse_markdown_line(&row, Style::default()));
    }
}

fn you_label() -> Line<'static> {
    Line::from(Span::styled(
        "You:",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ))
}

fn ai_label() -> Line<'static> {
    Line::from(Span::styled(
        "AI:",
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    ))
}

fn push_exchange(lines: &mut Vec<Line<'static>>, exchange: &Exchange, width: usize) {
    lines.push(you_label());
    push_wrapped(lines, &exchange.prompt, width, Style::default().fg(Color::Cyan));
    lines.push(Line::default());
    lines.push(ai_label());
    if !exchange.answer.trim().is_empty() {
        push_answer(lines, &exchange.answer, width);
    }
    if let Some(notice) = exchange.notice() {
        push_wrapped(
            lines,
            &notice,
            width,
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        );
    }
    lines.push(Line::default());
}

fn push_banner(lines: &mut Vec<Line<'static>>, app: &App, width: usize) {
    let banner_width = BANNER.iter().map(|l| display_width(l)).max().unwrap_or(0);
    if width >= banner_width {
        for row in BANNER {
            lines.push(Line::from(Span::styled(row, Style::default().fg(Color::Cyan).bold())));
        }
    } else {
        lines.push(Line::from(Span::styled(
            "THINKER CHAT",
            Style::default().fg(Color::Cyan).bold(),
        )));
    }
    lines.push(Line::from("-".repeat(banner_width.min(width))));

    let dim = Style::default().fg(Color::DarkGray);
    let settings = &app.conversation.settings;
    push_wrapped(
        lines,
        "Enter 'q' or 'quit' to exit. Enter '/clear' to reset the chat.",
        width,
        dim,
    );
    push_wrapped(lines, &format!("Model: {}", settings.model), width, dim);
    push_wrapped(
        lines,
        &format!(
            "Max Tokens: {}, Temp: {}, Seed: {}",
            settings.max_tokens, settings.temperature, settings.seed
        ),
        width,
        dim,
    );
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    let snapshot = app.session.snapshot();

    let thinking_text = snapshot.thinking_text.trim_matches(['\n', '\r']);
    let thinking_lines = if thinking_text.is_empty() {
        Vec::new()
    } else {
        wrap_text(thinking_text, area.width.saturating_sub(2) as usize)
    };

    let layout = compute_layout(area, app.thinking_view, thinking_lines.len());

    render_header(app, frame, layout.header);
    if let Some(thinking_area) = layout.thinking {
        render_thinking(app, &snapshot, &thinking_lines, frame, thinking_area);
    }
    render_answer(app, &snapshot, frame, layout.answer);
    render_input(app, frame, layout.input);
    render_footer(app, frame, layout.footer);
}

fn spinner_symbol(app: &App) -> char {
    SPINNER[(app.spinner_frame / 3) % SPINNER.len()]
}

fn is_thinking_now(app: &App, snapshot: &RenderSnapshot) -> bool {
    app.session.is_streaming() && snapshot.active_kind != Some(SegmentKind::Answer)
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let settings = &app.conversation.settings;
    let title = Line::from(vec![
        Span::styled(" Thinker Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!(" {} ", settings.model), Style::default().fg(Color::Yellow)),
        Span::styled(
            format!(
                " max {} · temp {} · seed {} ",
                settings.max_tokens, settings.temperature, settings.seed
            ),
            Style::default().fg(Color::Gray),
        ),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_thinking(
    app: &App,
    snapshot: &RenderSnapshot,
    thinking_lines: &[String],
    frame: &mut Frame,
    area: Rect,
) {
    let dim = Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC);
    let active = is_thinking_now(app, snapshot);

    if app.thinking_view == ThinkingView::Collapsed {
        let marker = if active {
            format!("{} Thinking", spinner_symbol(app))
        } else {
            "▸ Thought".to_string()
        };
        let line = Line::from(vec![
            Span::styled(marker, Style::default().fg(Color::Magenta)),
            Span::styled(format!(" ({} lines, Tab to expand)", thinking_lines.len()), dim),
        ]);
        frame.render_widget(Paragraph::new(line), area);
        return;
    }

    let title = if active {
        format!(" Thinking {} ", spinner_symbol(app))
    } else {
        " Thinking ".to_string()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title);

    // Reasoning always follows its newest line
    let height = area.height.saturating_sub(2) as usize;
    let window = tail_window(thinking_lines.len(), height, 0);
    let lines: Vec<Line> = thinking_lines[window]
        .iter()
        .map(|row| Line::from(Span::styled(row.clone(), dim)))
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_answer(app: &mut App, snapshot: &RenderSnapshot, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(format!(" {} ", app.conversation.settings.model));

    let width = area.width.saturating_sub(2) as usize;
    let height = area.height.saturating_sub(2) as usize;
    app.answer_height = height;

    let mut lines: Vec<Line<'static>> = Vec::new();
    if app.conversation.transcript.is_empty() && !app.session.is_streaming() {
        push_banner(&mut lines, app, width);
    }
    for exchange in &app.conversation.transcript {
        push_exchange(&mut lines, exchange, width);
    }

    if app.session.is_streaming() {
        lines.push(you_label());
        let prompt = app.conversation.pending_prompt.clone().unwrap_or_default();
        push_wrapped(&mut lines, &prompt, width, Style::default().fg(Color::Cyan));
        lines.push(Line::default());
        lines.push(ai_label());
        if snapshot.answer_text.trim().is_empty() {
            // Thinking indicator until the answer starts
            lines.push(Line::from(Span::styled(
                format!("Thinking {}", spinner_symbol(app)),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        } else {
            push_answer(&mut lines, &snapshot.answer_text, width);
        }
    }

    let total = lines.len();
    app.answer_scroll = app.answer_scroll.min(total.saturating_sub(height));
    let window = tail_window(total, height, app.answer_scroll);
    let start = window.start;
    let visible: Vec<Line> = lines.drain(window).collect();

    frame.render_widget(Paragraph::new(visible).block(block), area);

    if total > height {
        let mut scrollbar_state = ScrollbarState::new(total.saturating_sub(height)).position(start);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            area,
            &mut scrollbar_state,
        );
    }
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let streaming = app.session.is_streaming();
    let (border_color, title) = if streaming {
        (Color::DarkGray, " Streaming... (Esc to stop) ")
    } else {
        (Color::Yellow, " >> ")
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let (visible_text, cursor_x) = input_window(&app.input, app.cursor, inner_width);

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    if inner_width > 0 {
        frame.set_cursor_position((area.x + cursor_x as u16 + 1, area.y + 1));
    }
}

/// Slice of `input` that fits in `width` columns with the cursor (a char
/// index) kept visible, plus the cursor column inside that slice.
fn input_window(input: &str, cursor: usize, width: usize) -> (String, usize) {
    if width == 0 {
        return (String::new(), 0);
    }
    let widths: Vec<usize> = input.chars().map(|c| c.width().unwrap_or(0)).collect();
    let cursor_col: usize = widths.iter().take(cursor).sum();

    // Drop chars from the left until the cursor column fits
    let mut skip = 0;
    let mut skipped_cols = 0;
    while cursor_col - skipped_cols >= width && skip < widths.len() {
        skipped_cols += widths[skip];
        skip += 1;
    }

    let mut used = 0;
    let visible: String = input
        .chars()
        .zip(&widths)
        .skip(skip)
        .take_while(|&(_, w)| {
            used += *w;
            used <= width
        })
        .map(|(c, _)| c)
        .collect();

    (visible, cursor_col - skipped_cols)
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut hints = if app.session.is_streaming() {
        vec![
            Span::styled(" Esc ", key_style),
            Span::styled(" stop ", label_style),
        ]
    } else {
        vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" /clear ", key_style),
            Span::styled(" reset ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" quit ", label_style),
        ]
    };
    hints.extend(vec![
        Span::styled(" Tab ", key_style),
        Span::styled(format!(" thinking: {} ", app.thinking_view.label()), label_style),
        Span::styled(" PgUp/PgDn ", key_style),
        Span::styled(" scroll ", label_style),
    ]);

    if let Some(notice) = &app.notice {
        hints.push(Span::styled(
            format!("  {}", notice),
            Style::default().fg(Color::Yellow),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(hints)), area);
}
