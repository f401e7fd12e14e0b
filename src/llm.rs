use crate::config::{ApiKey, Config};
use crate::conversation::{ConversationState, Message};
use crate::streaming::{AnswerAssembler, DecodedLine, decode_stream};
use crate::surface::Surface;
use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Serialize;
use std::fmt;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

pub const HTTP_ERROR_NOTICE: &str = "Service is busy, please try again later.";
pub const HTTP_ERROR_SENTINEL: &str = "Connection error";
pub const TRANSPORT_ERROR_NOTICE: &str = "Network request failed.";
pub const TRANSPORT_ERROR_SENTINEL: &str = "Network error";

/// Where a turn currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    RequestSent,
    Streaming,
    Assembled,
    HttpError,
    TransportError,
}

impl TurnPhase {
    pub fn label(&self) -> &'static str {
        match self {
            TurnPhase::Idle => "ready",
            TurnPhase::RequestSent => "sending",
            TurnPhase::Streaming => "answering",
            TurnPhase::Assembled => "done",
            TurnPhase::HttpError => "service error",
            TurnPhase::TransportError => "network error",
        }
    }
}

/// Body of a `chat-messages` request
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub query: &'a str,
    pub response_mode: &'static str,
    pub conversation_id: &'a str,
    pub user: &'a str,
}

impl<'a> ChatRequest<'a> {
    pub fn streaming(query: &'a str, conversation_id: &'a str, user: &'a str) -> Self {
        Self {
            inputs: serde_json::Map::new(),
            query,
            response_mode: "streaming",
            conversation_id,
            user,
        }
    }
}

/// Why a turn never completed its stream
#[derive(Debug)]
pub enum TransportFailure {
    /// Connection refused, reset or a body read error
    Request(reqwest::Error),
    /// Nothing arrived within the idle timeout
    Stalled(Duration),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Request(e) => write!(f, "{}", e),
            TransportFailure::Stalled(idle) => write!(f, "no data for {}s", idle.as_secs()),
        }
    }
}

impl std::error::Error for TransportFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportFailure::Request(e) => Some(e),
            TransportFailure::Stalled(_) => None,
        }
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(e: reqwest::Error) -> Self {
        TransportFailure::Request(e)
    }
}

/// How a turn ended
#[derive(Debug)]
pub enum TurnOutcome {
    /// Stream consumed to the end
    Answered { answer: String, skipped: usize },
    /// Backend answered with something other than 200; `body` is only the
    /// first chunk of the error body
    HttpError { status: StatusCode, body: String },
    /// Connection, idle timeout or body read failure
    TransportError(TransportFailure),
}

impl TurnOutcome {
    /// Text stored as the assistant's transcript entry
    pub fn transcript_text(&self) -> &str {
        match self {
            TurnOutcome::Answered { answer, .. } => answer,
            TurnOutcome::HttpError { .. } => HTTP_ERROR_SENTINEL,
            TurnOutcome::TransportError(_) => TRANSPORT_ERROR_SENTINEL,
        }
    }

    /// User-facing notice for failed turns
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            TurnOutcome::Answered { .. } => None,
            TurnOutcome::HttpError { .. } => Some(HTTP_ERROR_NOTICE),
            TurnOutcome::TransportError(_) => Some(TRANSPORT_ERROR_NOTICE),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, TurnOutcome::Answered { .. })
    }
}

/// Client for the upstream `chat-messages` endpoint
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    chat_url: String,
    api_key: ApiKey,
    user: String,
    idle_timeout: Duration,
}

impl ChatClient {
    pub fn new(config: &Config, api_key: ApiKey) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            chat_url: config.chat_url(),
            api_key,
            user: config.user.clone(),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        })
    }

    /// Run one user turn.
    ///
    /// Appends the user message, relays it, and appends exactly one assistant
    /// message: the assembled answer or one of the error sentinels. `query`
    /// must not be blank; callers filter empty submissions.
    pub async fn run_turn<S>(
        &self,
        state: &mut ConversationState,
        query: &str,
        surface: &mut S,
    ) -> TurnOutcome
    where
        S: Surface + ?Sized,
    {
        let question = Message::user(query);
        state.append(question.clone());
        surface.push_message(&question);

        let outcome = self.relay(state, query, surface).await;

        match &outcome {
            TurnOutcome::Answered { answer, skipped } => {
                info!(chars = answer.chars().count(), skipped, "Turn answered");
            }
            TurnOutcome::HttpError { status, body } => {
                warn!(%status, body = %truncate(body, 512), "Backend rejected request");
            }
            TurnOutcome::TransportError(e) => {
                warn!(error = %e, "Transport failure");
            }
        }

        if let Some(notice) = outcome.notice() {
            surface.show_error(notice);
        }

        let reply = Message::assistant(outcome.transcript_text());
        state.append(reply.clone());
        surface.commit_placeholder(&reply);
        surface.set_phase(TurnPhase::Idle);

        outcome
    }

    async fn relay<S>(&self, state: &mut ConversationState, query: &str, surface: &mut S) -> TurnOutcome
    where
        S: Surface + ?Sized,
    {
        let request = ChatRequest::streaming(query, state.conversation_id(), &self.user);
        debug!(conversation_id = request.conversation_id, "Sending chat request");

        surface.set_phase(TurnPhase::RequestSent);
        let send = self
            .client
            .post(&self.chat_url)
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&request)
            .send();
        let response = match timeout(self.idle_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return transport_failure(surface, e.into()),
            Err(_) => return transport_failure(surface, TransportFailure::Stalled(self.idle_timeout)),
        };

        let status = response.status();
        if status != StatusCode::OK {
            surface.set_phase(TurnPhase::HttpError);
            // only a first chunk for the log; the rest of the body is never awaited
            let mut body = std::pin::pin!(response.bytes_stream());
            let excerpt = match timeout(self.idle_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => String::from_utf8_lossy(&chunk).into_owned(),
                _ => String::new(),
            };
            return TurnOutcome::HttpError {
                status,
                body: excerpt,
            };
        }

        surface.set_phase(TurnPhase::Streaming);
        let mut assembler = AnswerAssembler::new();
        let mut lines = std::pin::pin!(decode_stream(response.bytes_stream()));

        loop {
            let line = match timeout(self.idle_timeout, lines.next()).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(_) => {
                    return transport_failure(surface, TransportFailure::Stalled(self.idle_timeout));
                }
            };
            match line {
                Ok(DecodedLine::Event(event)) => {
                    if state.observe_conversation_id(event.conversation_id.as_deref()) {
                        info!(conversation_id = state.conversation_id(), "Conversation started");
                    }
                    assembler.push_event(&event);
                    surface.update_placeholder(&assembler.partial());
                }
                Ok(DecodedLine::Skipped(reason)) => {
                    if state.observe_conversation_id(reason.conversation_id()) {
                        info!(conversation_id = state.conversation_id(), "Conversation started");
                    }
                    assembler.note_skip();
                    debug!(%reason, "Dropped stream line");
                }
                Ok(DecodedLine::Blank) => {}
                Err(e) => return transport_failure(surface, e.into()),
            }
        }

        surface.update_placeholder(assembler.answer());
        surface.set_phase(TurnPhase::Assembled);

        let skipped = assembler.skipped();
        TurnOutcome::Answered {
            answer: assembler.into_answer(),
            skipped,
        }
    }
}

fn transport_failure<S>(surface: &mut S, failure: TransportFailure) -> TurnOutcome
where
    S: Surface + ?Sized,
{
    surface.set_phase(TurnPhase::TransportError);
    TurnOutcome::TransportError(failure)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
