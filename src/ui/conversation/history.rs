//! Conversation history display component

use crate::conversation::{Message, Role};
use chrono::Local;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Something shown in the history pane
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    /// Part of the stored transcript
    Message(Message),
    /// Local note (help, command feedback), never sent anywhere
    Note(String),
}

/// Conversation history display component
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
    streaming_message: Option<String>,
    /// Lines scrolled up from the bottom
    scroll_offset: usize,
}

impl ConversationHistory {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from an existing transcript
    pub fn from_transcript(transcript: &[Message]) -> Self {
        Self {
            entries: transcript.iter().cloned().map(HistoryEntry::Message).collect(),
            ..Self::default()
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.entries.push(HistoryEntry::Message(message));
        self.scroll_to_bottom();
    }

    pub fn push_note(&mut self, note: impl Into<String>) {
        self.entries.push(HistoryEntry::Note(note.into()));
        self.scroll_to_bottom();
    }

    /// Set the current streaming message
    pub fn set_streaming_message(&mut self, message: &str) {
        self.streaming_message = Some(message.to_string());
        self.scroll_to_bottom();
    }

    /// Clear the streaming message
    pub fn clear_streaming_message(&mut self) {
        self.streaming_message = None;
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    /// Clear all messages
    pub fn clear(&mut self) {
        self.entries.clear();
        self.streaming_message = None;
        self.scroll_offset = 0;
    }

    #[allow(dead_code)]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[allow(dead_code)]
    pub fn streaming_message(&self) -> Option<&str> {
        self.streaming_message.as_deref()
    }

    fn role_header(role: Role, when: &str) -> Line<'static> {
        let (icon, color) = match role {
            Role::User => ("👤", Color::Blue),
            Role::Assistant => ("🩺", Color::Green),
        };
        Line::from(vec![
            Span::styled(
                format!("{} {}", icon, role.display_name()),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {}", when), Style::default().fg(Color::DarkGray)),
        ])
    }

    fn content_lines(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
        wrap_text(text, width.saturating_sub(2))
            .into_iter()
            .map(|line| Line::from(vec![Span::raw("  "), Span::styled(line, style)]))
            .collect()
    }

    /// Every line of the history, top to bottom
    fn all_lines(&self, width: usize) -> Vec<Line<'static>> {
        let mut lines = Vec::new();
        for entry in &self.entries {
            match entry {
                HistoryEntry::Message(message) => {
                    let when = message
                        .timestamp
                        .with_timezone(&Local)
                        .format("%H:%M:%S")
                        .to_string();
                    lines.push(Self::role_header(message.role, &when));
                    lines.extend(Self::content_lines(
                        &message.content,
                        width,
                        content_style(message.role),
                    ));
                }
                HistoryEntry::Note(note) => {
                    lines.extend(Self::content_lines(
                        note,
                        width,
                        Style::default().fg(Color::Yellow),
                    ));
                }
            }
            lines.push(Line::default());
        }

        if let Some(text) = &self.streaming_message {
            lines.push(Self::role_header(Role::Assistant, "typing..."));
            lines.extend(Self::content_lines(text, width, content_style(Role::Assistant)));
        }

        lines
    }
}

fn content_style(role: Role) -> Style {
    match role {
        Role::User => Style::default().fg(Color::White),
        Role::Assistant => Style::default().fg(Color::Green),
    }
}

/// Wrap text to the given display width, keeping explicit line breaks.
///
/// Breaks at the last space when there is one, otherwise mid-word, which is
/// what CJK text needs.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return text.split('\n').map(str::to_string).collect();
    }

    let mut lines = Vec::new();
    for raw in text.split('\n') {
        let mut line = String::new();
        let mut line_width = 0;
        for c in raw.chars() {
            let w = c.width().unwrap_or(0);
            if line_width + w > width && !line.is_empty() {
                if c == ' ' {
                    lines.push(std::mem::take(&mut line));
                    line_width = 0;
                    continue;
                }
                match line.rfind(' ').filter(|pos| *pos > 0) {
                    Some(pos) => {
                        let rest = line.split_off(pos + 1);
                        lines.push(line.trim_end().to_string());
                        line = rest;
                        line_width = line.width();
                    }
                    None => {
                        lines.push(std::mem::take(&mut line));
                        line_width = 0;
                    }
                }
            }
            line.push(c);
            line_width += w;
        }
        lines.push(line);
    }

    lines
}

impl Widget for &ConversationHistory {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title("💬 Conversation");

        let inner_area = block.inner(area);
        block.render(area, buf);

        if self.entries.is_empty() && self.streaming_message.is_none() {
            let welcome_lines = [
                Line::from(vec![Span::styled(
                    "Welcome to VitalHealth AI 🩺",
                    Style::default().fg(Color::Green),
                )]),
                Line::default(),
                Line::from(vec![Span::styled(
                    "Describe your symptoms or paste a check-up report below.",
                    Style::default().fg(Color::Gray),
                )]),
                Line::default(),
                Line::from(vec![Span::styled(
                    "Type /help for tips and commands.",
                    Style::default().fg(Color::DarkGray),
                )]),
            ];

            for (i, line) in welcome_lines.iter().enumerate() {
                if i < inner_area.height as usize {
                    buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
                }
            }
            return;
        }

        let all_lines = self.all_lines(inner_area.width as usize);

        // bottom-anchored window, shifted up by the scroll offset
        let height = inner_area.height as usize;
        let max_offset = all_lines.len().saturating_sub(height);
        let offset = self.scroll_offset.min(max_offset);
        let end = all_lines.len() - offset;
        let start = end.saturating_sub(height);

        for (i, line) in all_lines[start..end].iter().enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
        }
    }
}
