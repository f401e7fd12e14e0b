use crate::ui::conversation::commands::{
    CommandEntry, ParsedCommand, command_entries, parse_slash_command,
};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Result returned when the user interacts with the conversation composer
#[derive(Debug, PartialEq)]
pub enum ConversationResult {
    Submitted(String),
    Command(ParsedCommand),
    None,
}

/// State for the text area within the composer
#[derive(Debug, Clone, Default)]
pub struct TextAreaState {
    pub content: String,
    /// Cursor position counted in characters
    pub cursor: usize,
}

impl TextAreaState {
    fn byte_index(&self, char_pos: usize) -> usize {
        self.content
            .char_indices()
            .nth(char_pos)
            .map(|(idx, _)| idx)
            .unwrap_or(self.content.len())
    }

    fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let idx = self.byte_index(self.cursor);
        self.content.insert(idx, c);
        self.cursor += 1;
    }

    fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        let idx = self.byte_index(self.cursor);
        self.content.remove(idx);
        true
    }

    fn delete(&mut self) -> bool {
        if self.cursor >= self.char_len() {
            return false;
        }
        let idx = self.byte_index(self.cursor);
        self.content.remove(idx);
        true
    }

    fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.content)
    }
}

/// Conversation composer for user input
#[derive(Debug, Clone)]
pub struct ConversationComposer {
    state: TextAreaState,
    placeholder: String,
    has_focus: bool,
    command_entries: Vec<CommandEntry>,
    filtered_commands: Vec<CommandEntry>,
    show_command_palette: bool,
    selected_command: Option<usize>,
}

impl ConversationComposer {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            state: TextAreaState::default(),
            placeholder: placeholder.into(),
            has_focus: true,
            command_entries: command_entries(),
            filtered_commands: Vec::new(),
            show_command_palette: false,
            selected_command: None,
        }
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent) -> ConversationResult {
        if key.kind != KeyEventKind::Press {
            return ConversationResult::None;
        }

        match key.code {
            KeyCode::Enter => {
                if key.modifiers.contains(KeyModifiers::SHIFT) {
                    self.state.insert_char('\n');
                } else if self.show_command_palette
                    && parse_slash_command(&self.state.content).is_none()
                    && self.apply_selected_command()
                {
                    return ConversationResult::None;
                } else if !self.state.content.trim().is_empty() {
                    let content = self.state.take();
                    self.close_command_palette();
                    return match parse_slash_command(&content) {
                        Some(command) => ConversationResult::Command(command),
                        None => ConversationResult::Submitted(content.trim().to_string()),
                    };
                }
            }
            KeyCode::Up if self.show_command_palette => self.move_command_selection(-1),
            KeyCode::Down if self.show_command_palette => self.move_command_selection(1),
            KeyCode::Esc if self.show_command_palette => self.close_command_palette(),
            KeyCode::Tab if self.show_command_palette => {
                self.apply_selected_command();
            }
            KeyCode::Char(c) => {
                if key.modifiers.contains(KeyModifiers::CONTROL) {
                    return ConversationResult::None;
                }
                self.state.insert_char(c);
                self.sync_command_palette();
            }
            KeyCode::Backspace => {
                if self.state.backspace() {
                    self.sync_command_palette();
                }
            }
            KeyCode::Delete => {
                if self.state.delete() {
                    self.sync_command_palette();
                }
            }
            KeyCode::Left => {
                self.state.cursor = self.state.cursor.saturating_sub(1);
            }
            KeyCode::Right => {
                if self.state.cursor < self.state.char_len() {
                    self.state.cursor += 1;
                }
            }
            KeyCode::Home => self.state.cursor = 0,
            KeyCode::End => self.state.cursor = self.state.char_len(),
            _ => {}
        }

        ConversationResult::None
    }

    /// Open, refresh or close the palette to match the current input
    fn sync_command_palette(&mut self) {
        let content = &self.state.content;
        let wants_palette = content.starts_with('/') && !content.contains(char::is_whitespace);
        match (wants_palette, self.show_command_palette) {
            (true, false) => {
                self.show_command_palette = true;
                self.selected_command = Some(0);
                self.refresh_command_palette();
            }
            (true, true) => self.refresh_command_palette(),
            (false, true) => self.close_command_palette(),
            (false, false) => {}
        }
    }

    fn close_command_palette(&mut self) {
        self.show_command_palette = false;
        self.filtered_commands.clear();
        self.selected_command = None;
    }

    fn refresh_command_palette(&mut self) {
        let query = self.state.content.trim_start_matches('/').to_lowercase();
        self.filtered_commands = self
            .command_entries
            .iter()
            .filter(|entry| query.is_empty() || entry.keyword.starts_with(&query))
            .copied()
            .collect();

        self.selected_command = if self.filtered_commands.is_empty() {
            None
        } else {
            let index = self.selected_command.unwrap_or(0);
            Some(index.min(self.filtered_commands.len() - 1))
        };
    }

    fn move_command_selection(&mut self, delta: isize) {
        if self.filtered_commands.is_empty() {
            self.selected_command = None;
            return;
        }

        let len = self.filtered_commands.len() as isize;
        let current = self.selected_command.unwrap_or(0) as isize;
        self.selected_command = Some((current + delta).rem_euclid(len) as usize);
    }

    fn apply_selected_command(&mut self) -> bool {
        let Some(entry) = self
            .selected_command
            .and_then(|index| self.filtered_commands.get(index).copied())
        else {
            return false;
        };

        self.state.content = format!("/{}", entry.keyword);
        self.state.cursor = self.state.char_len();
        self.close_command_palette();
        true
    }

    /// Insert pasted text at the cursor
    pub fn insert_str(&mut self, text: &str) {
        for c in text.chars().filter(|c| *c != '\r') {
            self.state.insert_char(c);
        }
        self.sync_command_palette();
    }

    /// Set focus state
    pub fn set_focus(&mut self, has_focus: bool) {
        self.has_focus = has_focus;
    }

    #[allow(dead_code)]
    pub fn content(&self) -> &str {
        &self.state.content
    }

    #[allow(dead_code)]
    pub fn is_palette_open(&self) -> bool {
        self.show_command_palette
    }

    pub fn clear(&mut self) {
        self.state.take();
        self.close_command_palette();
    }
}

impl Widget for &ConversationComposer {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = if self.has_focus {
            "✏️  Ask a health question (Enter to send, Shift+Enter for new line, / for commands)"
        } else {
            "⏳ Waiting for the answer..."
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .style(if self.has_focus {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Gray)
            });

        let inner_area = block.inner(area);
        block.render(area, buf);

        if self.state.content.is_empty() {
            let placeholder_line = Line::from(vec![Span::styled(
                self.placeholder.as_str(),
                Style::default().fg(Color::DarkGray),
            )]);
            buf.set_line(inner_area.x, inner_area.y, &placeholder_line, inner_area.width);
        } else {
            let mut content = self.state.content.clone();
            if self.has_focus {
                content.insert(self.state.byte_index(self.state.cursor), '▌');
            }

            // keep the cursor's end of long input visible
            let lines: Vec<&str> = content.split('\n').collect();
            let skip = lines.len().saturating_sub(inner_area.height as usize);
            for (i, line_text) in lines.iter().skip(skip).enumerate() {
                let line = Line::from(vec![Span::raw(*line_text)]);
                buf.set_line(inner_area.x, inner_area.y + i as u16, &line, inner_area.width);
            }
        }

        if self.show_command_palette && !self.filtered_commands.is_empty() {
            let palette_height = (self.filtered_commands.len().min(5) + 2) as u16;
            let palette_area = Rect {
                x: area.x,
                y: area.y.saturating_sub(palette_height),
                width: area.width,
                height: palette_height.min(area.y),
            };
            if palette_area.height < 3 {
                return;
            }

            let block = Block::default()
                .borders(Borders::ALL)
                .title("Commands")
                .style(Style::default().fg(Color::Blue));
            let inner = block.inner(palette_area);
            block.render(palette_area, buf);

            for (index, entry) in self.filtered_commands.iter().enumerate() {
                if index >= inner.height as usize {
                    break;
                }

                let style = if self.selected_command == Some(index) {
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Cyan)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };

                let line = Line::from(vec![
                    Span::styled(format!("/{}", entry.keyword), style),
                    Span::styled(" - ", Style::default().fg(Color::DarkGray)),
                    Span::styled(entry.description, Style::default().fg(Color::Gray)),
                ]);

                buf.set_line(inner.x, inner.y + index as u16, &line, inner.width);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::conversation::commands::SlashCommand;

    fn press(composer: &mut ConversationComposer, code: KeyCode) -> ConversationResult {
        composer.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(composer: &mut ConversationComposer, text: &str) {
        for c in text.chars() {
            press(composer, KeyCode::Char(c));
        }
    }

    #[test]
    fn enter_submits_trimmed_text() {
        let mut composer = ConversationComposer::new("ask...");
        type_text(&mut composer, "  headache  ");
        assert_eq!(
            press(&mut composer, KeyCode::Enter),
            ConversationResult::Submitted("headache".to_string())
        );
        assert_eq!(composer.content(), "");
    }

    #[test]
    fn blank_input_is_not_submitted() {
        let mut composer = ConversationComposer::new("ask...");
        type_text(&mut composer, "   ");
        assert_eq!(press(&mut composer, KeyCode::Enter), ConversationResult::None);
    }

    #[test]
    fn editing_handles_multibyte_text() {
        let mut composer = ConversationComposer::new("ask...");
        type_text(&mut composer, "头疼");
        press(&mut composer, KeyCode::Left);
        type_text(&mut composer, "很");
        assert_eq!(composer.content(), "头很疼");
        press(&mut composer, KeyCode::Backspace);
        press(&mut composer, KeyCode::Delete);
        assert_eq!(composer.content(), "头");
    }

    #[test]
    fn palette_completes_and_submits_command() {
        let mut composer = ConversationComposer::new("ask...");
        type_text(&mut composer, "/ne");
        assert!(composer.is_palette_open());

        assert_eq!(press(&mut composer, KeyCode::Tab), ConversationResult::None);
        assert_eq!(composer.content(), "/new");
        assert!(!composer.is_palette_open());

        match press(&mut composer, KeyCode::Enter) {
            ConversationResult::Command(parsed) => assert_eq!(parsed.command, SlashCommand::New),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn complete_command_submits_with_palette_open() {
        let mut composer = ConversationComposer::new("ask...");
        type_text(&mut composer, "/bye");
        assert!(composer.is_palette_open());

        match press(&mut composer, KeyCode::Enter) {
            ConversationResult::Command(parsed) => assert_eq!(parsed.command, SlashCommand::Bye),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!composer.is_palette_open());
    }

    #[test]
    fn palette_closes_when_input_is_not_a_command() {
        let mut composer = ConversationComposer::new("ask...");
        type_text(&mut composer, "/");
        assert!(composer.is_palette_open());
        press(&mut composer, KeyCode::Backspace);
        assert!(!composer.is_palette_open());
    }

    #[test]
    fn paste_keeps_line_breaks() {
        let mut composer = ConversationComposer::new("ask...");
        composer.insert_str("blood pressure:\r\n140/90");
        assert_eq!(composer.content(), "blood pressure:\n140/90");
        assert!(!composer.is_palette_open());
    }

    #[test]
    fn shift_enter_inserts_newline() {
        let mut composer = ConversationComposer::new("ask...");
        type_text(&mut composer, "a");
        composer.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::SHIFT));
        type_text(&mut composer, "b");
        assert_eq!(composer.content(), "a\nb");
    }
}
