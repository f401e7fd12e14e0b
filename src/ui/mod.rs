//! Full-screen terminal interface

pub mod conversation;

use crate::conversation::ConversationState;
use crate::llm::ChatClient;
use anyhow::{Context, Result};
use conversation::{ConversationAction, ConversationManager};
use crossterm::{
    event::{DisableBracketedPaste, EnableBracketedPaste, Event, EventStream},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::Backend, backend::CrosstermBackend};
use std::io::{self, Stdout};

type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Run the chat screen until the user exits
pub async fn run(client: ChatClient, state: ConversationState) -> Result<()> {
    install_panic_hook();
    let mut terminal = setup_terminal()?;

    let manager = ConversationManager::new(client, state);
    let result = event_loop(&mut terminal, manager).await;

    restore_terminal().context("Failed to restore terminal")?;
    terminal.show_cursor().ok();
    result
}

async fn event_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    mut manager: ConversationManager,
) -> Result<()> {
    let mut events = EventStream::new();

    loop {
        terminal
            .draw(|frame| manager.draw(frame))
            .context("Failed to draw frame")?;

        let Some(event) = events.next().await else {
            break;
        };

        match event.context("Failed to read terminal event")? {
            Event::Key(key) => {
                if manager.handle_key(key, terminal).await? == ConversationAction::Exit {
                    break;
                }
            }
            Event::Paste(text) => manager.paste(&text),
            _ => {}
        }
    }

    Ok(())
}

fn setup_terminal() -> Result<Tui> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)
        .context("Failed to enter alternate screen")?;
    Terminal::new(CrosstermBackend::new(stdout)).context("Failed to create terminal")
}

fn restore_terminal() -> io::Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen, DisableBracketedPaste)
}

fn install_panic_hook() {
    let original = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore_terminal();
        original(info);
    }));
}
