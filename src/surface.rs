//! Rendering surfaces the relay writes to.

use crate::conversation::{ConversationState, Message, Role};
use crate::llm::TurnPhase;
use crate::streaming::CARET;
use std::io::Write;

/// Something that can show a transcript and a live, growing answer
pub trait Surface {
    /// Append a role-tagged message to the visible transcript
    fn push_message(&mut self, message: &Message);

    /// Overwrite the live placeholder with the latest partial answer
    fn update_placeholder(&mut self, text: &str);

    /// Replace the placeholder with the final assistant message
    fn commit_placeholder(&mut self, message: &Message);

    /// Show a user-facing failure notice
    fn show_error(&mut self, notice: &str);

    /// Forget everything visible
    fn clear(&mut self);

    fn set_phase(&mut self, _phase: TurnPhase) {}
}

/// Start a new conversation on both the stored and the visible side
pub fn reset_conversation<S>(state: &mut ConversationState, surface: &mut S)
where
    S: Surface + ?Sized,
{
    state.reset();
    surface.clear();
}

/// Line-oriented surface for non-interactive use.
///
/// Only the part of the answer not yet printed is written, so partial
/// updates stream naturally into a pipe or terminal.
pub struct TerminalSurface<O: Write, E: Write> {
    out: O,
    err: E,
    printed: String,
}

impl TerminalSurface<std::io::Stdout, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }
}

impl<O: Write, E: Write> TerminalSurface<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            printed: String::new(),
        }
    }

    #[allow(dead_code)]
    pub fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }

    fn write_tail(&mut self, text: &str) {
        let tail = match text.strip_prefix(self.printed.as_str()) {
            Some(tail) => tail,
            // the text was rewritten rather than extended; start a fresh line
            None => {
                if !self.printed.is_empty() {
                    let _ = writeln!(self.out);
                }
                self.printed.clear();
                text
            }
        };
        if tail.is_empty() {
            return;
        }
        if let Err(e) = self.out.write_all(tail.as_bytes()).and_then(|_| self.out.flush()) {
            tracing::warn!("Failed to write answer: {}", e);
        }
        self.printed.push_str(tail);
    }
}

impl<O: Write, E: Write> Surface for TerminalSurface<O, E> {
    fn push_message(&mut self, message: &Message) {
        // the caller typed the question; only assistant text is echoed
        if message.role == Role::Assistant {
            let _ = writeln!(self.out, "{}", message.content);
        }
    }

    fn update_placeholder(&mut self, text: &str) {
        let text = text.strip_suffix(CARET).unwrap_or(text);
        self.write_tail(text);
    }

    fn commit_placeholder(&mut self, message: &Message) {
        self.write_tail(&message.content);
        let _ = writeln!(self.out);
        let _ = self.out.flush();
        self.printed.clear();
    }

    fn show_error(&mut self, notice: &str) {
        let _ = writeln!(self.err, "❌ {}", notice);
    }

    fn clear(&mut self) {
        self.printed.clear();
    }
}
