use crate::conversation::{ConversationState, Message};
use crate::llm::{ChatClient, TurnOutcome, TurnPhase};
use crate::surface::{Surface, reset_conversation};
use crate::ui::conversation::{
    ConversationComposer, ConversationHistory, ConversationResult, ParsedCommand, SlashCommand,
    get_help_text,
};
use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    Frame, Terminal,
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

const PLACEHOLDER: &str = "e.g. I've had headaches every afternoon and my blood pressure is 140/90...";

/// Actions that can be requested by the conversation manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationAction {
    None,
    Exit,
}

/// One-line message shown above the composer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusNotice {
    Info(String),
    Error(String),
}

/// Everything drawn on screen
pub struct ChatView {
    history: ConversationHistory,
    composer: ConversationComposer,
    phase: TurnPhase,
    notice: Option<StatusNotice>,
    conversation_id: String,
}

impl ChatView {
    fn new(state: &ConversationState) -> Self {
        Self {
            history: ConversationHistory::from_transcript(state.transcript()),
            composer: ConversationComposer::new(PLACEHOLDER),
            phase: TurnPhase::Idle,
            notice: None,
            conversation_id: state.conversation_id().to_string(),
        }
    }

    pub fn draw(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Title
                Constraint::Min(5),    // History
                Constraint::Length(1), // Status
                Constraint::Length(5), // Composer
            ])
            .split(frame.size());

        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " 🩺 VitalHealth AI ",
                Style::default()
                    .fg(Color::White)
                    .bg(Color::Blue)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                "  smart health consultation assistant",
                Style::default().fg(Color::Gray),
            ),
        ]));
        frame.render_widget(title, chunks[0]);
        frame.render_widget(&self.history, chunks[1]);
        frame.render_widget(Paragraph::new(self.status_line()), chunks[2]);
        frame.render_widget(&self.composer, chunks[3]);
    }

    fn status_line(&self) -> Line<'static> {
        let mut spans = match &self.notice {
            Some(StatusNotice::Error(text)) => vec![Span::styled(
                format!(" ❌ {}", text),
                Style::default().fg(Color::Red),
            )],
            Some(StatusNotice::Info(text)) => vec![Span::styled(
                format!(" ℹ️  {}", text),
                Style::default().fg(Color::Cyan),
            )],
            None => vec![Span::styled(
                format!(" ● {}", self.phase.label()),
                Style::default().fg(match self.phase {
                    TurnPhase::Idle | TurnPhase::Assembled => Color::Green,
                    TurnPhase::RequestSent | TurnPhase::Streaming => Color::Yellow,
                    TurnPhase::HttpError | TurnPhase::TransportError => Color::Red,
                }),
            )],
        };

        if !self.conversation_id.is_empty() {
            spans.push(Span::styled(
                format!("   conversation {}", self.conversation_id),
                Style::default().fg(Color::DarkGray),
            ));
        }

        Line::from(spans)
    }
}

/// Surface that redraws the terminal after every change
struct TuiSurface<'a, B: Backend> {
    terminal: &'a mut Terminal<B>,
    view: &'a mut ChatView,
}

impl<B: Backend> TuiSurface<'_, B> {
    fn redraw(&mut self) {
        let view = &*self.view;
        if let Err(e) = self.terminal.draw(|frame| view.draw(frame)) {
            warn!("Failed to redraw terminal: {}", e);
        }
    }
}

impl<B: Backend> Surface for TuiSurface<'_, B> {
    fn push_message(&mut self, message: &Message) {
        self.view.history.push_message(message.clone());
        self.redraw();
    }

    fn update_placeholder(&mut self, text: &str) {
        self.view.history.set_streaming_message(text);
        self.redraw();
    }

    fn commit_placeholder(&mut self, message: &Message) {
        self.view.history.clear_streaming_message();
        self.view.history.push_message(message.clone());
        self.redraw();
    }

    fn show_error(&mut self, notice: &str) {
        self.view.notice = Some(StatusNotice::Error(notice.to_string()));
        self.redraw();
    }

    fn clear(&mut self) {
        self.view.history.clear();
        self.view.notice = None;
        self.view.conversation_id.clear();
        self.redraw();
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        if phase == TurnPhase::RequestSent {
            self.view.notice = None;
        }
        self.view.phase = phase;
        self.redraw();
    }
}

/// Manages the conversation flow and UI components
pub struct ConversationManager {
    view: ChatView,
    state: ConversationState,
    client: ChatClient,
    session_id: Uuid,
}

impl ConversationManager {
    pub fn new(client: ChatClient, state: ConversationState) -> Self {
        Self {
            view: ChatView::new(&state),
            state,
            client,
            session_id: Uuid::new_v4(),
        }
    }

    pub fn draw(&self, frame: &mut Frame) {
        self.view.draw(frame);
    }

    #[allow(dead_code)]
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    #[allow(dead_code)]
    pub fn history(&self) -> &ConversationHistory {
        &self.view.history
    }

    #[allow(dead_code)]
    pub fn notice(&self) -> Option<&StatusNotice> {
        self.view.notice.as_ref()
    }

    /// Handle key input; a submitted question runs its whole turn before returning
    pub async fn handle_key<B: Backend>(
        &mut self,
        key: KeyEvent,
        terminal: &mut Terminal<B>,
    ) -> Result<ConversationAction> {
        if key.kind != KeyEventKind::Press {
            return Ok(ConversationAction::None);
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') | KeyCode::Char('d') => return Ok(ConversationAction::Exit),
                KeyCode::Char('n') => {
                    self.reset(terminal);
                    return Ok(ConversationAction::None);
                }
                _ => {}
            }
        }

        match key.code {
            KeyCode::PageUp => {
                self.view.history.scroll_up(5);
                return Ok(ConversationAction::None);
            }
            KeyCode::PageDown => {
                self.view.history.scroll_down(5);
                return Ok(ConversationAction::None);
            }
            _ => {}
        }

        match self.view.composer.handle_key(key) {
            ConversationResult::Submitted(query) => {
                self.submit(&query, terminal).await;
                Ok(ConversationAction::None)
            }
            ConversationResult::Command(command) => Ok(self.handle_slash_command(command, terminal)),
            ConversationResult::None => Ok(ConversationAction::None),
        }
    }

    pub fn paste(&mut self, text: &str) {
        self.view.composer.insert_str(text);
    }

    /// Relay one question and wait for the turn to finish
    pub async fn submit<B: Backend>(&mut self, query: &str, terminal: &mut Terminal<B>) -> TurnOutcome {
        self.view.composer.set_focus(false);
        self.view.history.scroll_to_bottom();

        let span = info_span!("turn", session = %self.session_id);
        let outcome = {
            let mut surface = TuiSurface {
                terminal,
                view: &mut self.view,
            };
            self.client
                .run_turn(&mut self.state, query, &mut surface)
                .instrument(span)
                .await
        };

        self.view.conversation_id = self.state.conversation_id().to_string();
        self.view.composer.set_focus(true);
        outcome
    }

    /// Start a new conversation: stored and visible transcript go together
    pub fn reset<B: Backend>(&mut self, terminal: &mut Terminal<B>) {
        let mut surface = TuiSurface {
            terminal,
            view: &mut self.view,
        };
        reset_conversation(&mut self.state, &mut surface);
        self.view.composer.clear();
        self.session_id = Uuid::new_v4();
        info!(session = %self.session_id, "Started new conversation");
    }

    /// Handle slash commands
    fn handle_slash_command<B: Backend>(
        &mut self,
        command: ParsedCommand,
        terminal: &mut Terminal<B>,
    ) -> ConversationAction {
        match command.command {
            SlashCommand::New => {
                self.reset(terminal);
                ConversationAction::None
            }
            SlashCommand::Id => {
                let text = match self.state.conversation_id() {
                    "" => "No conversation id yet; it is assigned by the first answer.".to_string(),
                    id => format!("Conversation id: {}", id),
                };
                self.view.notice = Some(StatusNotice::Info(text));
                ConversationAction::None
            }
            SlashCommand::Help => {
                self.view.history.push_note(get_help_text());
                ConversationAction::None
            }
            SlashCommand::Bye => ConversationAction::Exit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKey, Config};
    use crate::conversation::Role;
    use crate::llm::{HTTP_ERROR_NOTICE, HTTP_ERROR_SENTINEL};
    use crate::ui::conversation::history::HistoryEntry;
    use ratatui::backend::TestBackend;

    fn manager_for(base_url: String) -> ConversationManager {
        let config = Config {
            base_url,
            user: "tester".to_string(),
            ..Config::default()
        };
        let client = ChatClient::new(&config, ApiKey::new("test-key")).unwrap();
        ConversationManager::new(client, ConversationState::with_greeting(Some("welcome")))
    }

    fn terminal() -> Terminal<TestBackend> {
        Terminal::new(TestBackend::new(80, 24)).unwrap()
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    async fn type_and_send(
        manager: &mut ConversationManager,
        terminal: &mut Terminal<TestBackend>,
        text: &str,
    ) -> ConversationAction {
        for c in text.chars() {
            manager.handle_key(key(KeyCode::Char(c)), terminal).await.unwrap();
        }
        manager.handle_key(key(KeyCode::Enter), terminal).await.unwrap()
    }

    fn history_messages(manager: &ConversationManager) -> Vec<(Role, String)> {
        manager
            .history()
            .entries()
            .iter()
            .filter_map(|entry| match entry {
                HistoryEntry::Message(m) => Some((m.role, m.content.clone())),
                HistoryEntry::Note(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn submitted_question_streams_into_history() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat-messages")
            .with_status(200)
            .with_body("data: {\"answer\":\"Rest \",\"conversation_id\":\"c1\"}\ndata: {\"answer\":\"well\"}\n")
            .create_async()
            .await;

        let mut manager = manager_for(server.url());
        let mut terminal = terminal();

        let action = type_and_send(&mut manager, &mut terminal, "tired").await;

        assert_eq!(action, ConversationAction::None);
        assert_eq!(manager.state().conversation_id(), "c1");
        assert_eq!(
            history_messages(&manager),
            vec![
                (Role::Assistant, "welcome".to_string()),
                (Role::User, "tired".to_string()),
                (Role::Assistant, "Rest well".to_string()),
            ]
        );
        assert_eq!(manager.state().len(), 3);
        assert!(manager.history().streaming_message().is_none());
    }

    #[tokio::test]
    async fn rejected_request_shows_notice_and_sentinel() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat-messages")
            .with_status(500)
            .create_async()
            .await;

        let mut manager = manager_for(server.url());
        let mut terminal = terminal();

        type_and_send(&mut manager, &mut terminal, "hi").await;

        assert_eq!(
            manager.notice(),
            Some(&StatusNotice::Error(HTTP_ERROR_NOTICE.to_string()))
        );
        let last = history_messages(&manager).pop().unwrap();
        assert_eq!(last, (Role::Assistant, HTTP_ERROR_SENTINEL.to_string()));
    }

    #[tokio::test]
    async fn new_command_clears_visible_and_stored_transcript() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat-messages")
            .with_status(200)
            .with_body("data: {\"answer\":\"ok\",\"conversation_id\":\"c1\"}\n")
            .create_async()
            .await;

        let mut manager = manager_for(server.url());
        let mut terminal = terminal();
        type_and_send(&mut manager, &mut terminal, "hi").await;
        assert_eq!(manager.state().conversation_id(), "c1");

        let action = type_and_send(&mut manager, &mut terminal, "/new").await;

        assert_eq!(action, ConversationAction::None);
        assert!(manager.state().is_empty());
        assert_eq!(manager.state().conversation_id(), "");
        assert!(manager.history().entries().is_empty());
    }

    #[tokio::test]
    async fn help_is_a_local_note() {
        let mut manager = manager_for("http://127.0.0.1:1".to_string());
        let mut terminal = terminal();

        type_and_send(&mut manager, &mut terminal, "/help").await;

        assert_eq!(manager.state().len(), 1);
        assert!(matches!(
            manager.history().entries().last(),
            Some(HistoryEntry::Note(text)) if text.contains("/new")
        ));
    }

    #[tokio::test]
    async fn id_command_reports_missing_id() {
        let mut manager = manager_for("http://127.0.0.1:1".to_string());
        let mut terminal = terminal();

        type_and_send(&mut manager, &mut terminal, "/id").await;

        assert!(matches!(manager.notice(), Some(StatusNotice::Info(text)) if text.contains("No conversation id")));
    }

    #[tokio::test]
    async fn exit_keys_and_command() {
        let mut manager = manager_for("http://127.0.0.1:1".to_string());
        let mut terminal = terminal();

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(
            manager.handle_key(ctrl_c, &mut terminal).await.unwrap(),
            ConversationAction::Exit
        );
        assert_eq!(
            type_and_send(&mut manager, &mut terminal, "/bye").await,
            ConversationAction::Exit
        );
    }

    #[test]
    fn draws_title_history_and_status() {
        let mut manager = manager_for("http://127.0.0.1:1".to_string());
        manager.view.conversation_id = "c42".to_string();
        let mut terminal = terminal();

        terminal.draw(|frame| manager.draw(frame)).unwrap();

        let buffer = terminal.backend().buffer().clone();
        let text: String = buffer.content().iter().map(|cell| cell.symbol()).collect();
        assert!(text.contains("VitalHealth AI"));
        assert!(text.contains("welcome"));
        assert!(text.contains("conversation c42"));
        assert!(text.contains("ready"));
    }
}
