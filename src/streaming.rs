//! Incremental decoding of the backend's line-oriented event stream.
//!
//! The decoder is pure: it turns raw body chunks into [`DecodedLine`]s and
//! never touches conversation state or the screen. [`crate::llm`] consumes
//! the lines and applies them.

use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

/// Literal marker in front of every event payload
pub const EVENT_PREFIX: &str = "data:";

/// Appended to the partial answer while the stream is still open
pub const CARET: &str = "▌";

/// One decoded event payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    pub answer: String,
    pub conversation_id: Option<String>,
}

/// Payload fields as sent, checked one by one so a bad `answer` does not
/// hide a good `conversation_id`
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    answer: serde_json::Value,
    #[serde(default)]
    conversation_id: serde_json::Value,
}

/// Why a line contributed nothing to the answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Keep-alive or other noise without the event prefix
    NoPrefix,
    /// Prefixed line whose payload is not a usable JSON object
    Malformed(String),
    /// JSON object whose `answer` is neither a string nor null
    BadAnswer { conversation_id: Option<String> },
}

impl SkipReason {
    /// Identifier carried by the dropped line, if any
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            SkipReason::BadAnswer { conversation_id } => conversation_id.as_deref(),
            SkipReason::NoPrefix | SkipReason::Malformed(_) => None,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoPrefix => f.write_str("no event prefix"),
            SkipReason::Malformed(reason) => write!(f, "malformed payload: {}", reason),
            SkipReason::BadAnswer { .. } => f.write_str("answer is not a string"),
        }
    }
}

/// Result of decoding a single line of the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLine {
    Blank,
    Event(StreamEvent),
    Skipped(SkipReason),
}

/// Decode one complete line (without its terminator).
pub fn decode_line(line: &str) -> DecodedLine {
    if line.is_empty() {
        return DecodedLine::Blank;
    }

    let Some(payload) = line.strip_prefix(EVENT_PREFIX) else {
        return DecodedLine::Skipped(SkipReason::NoPrefix);
    };

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => return DecodedLine::Skipped(SkipReason::Malformed(e.to_string())),
    };

    if !value.is_object() {
        return DecodedLine::Skipped(SkipReason::Malformed(
            "payload is not a JSON object".to_string(),
        ));
    }

    let raw = match serde_json::from_value::<RawEvent>(value) {
        Ok(raw) => raw,
        Err(e) => return DecodedLine::Skipped(SkipReason::Malformed(e.to_string())),
    };

    // a non-string id is treated as absent
    let conversation_id = raw.conversation_id.as_str().map(str::to_string);
    let answer = match raw.answer {
        serde_json::Value::String(answer) => answer,
        serde_json::Value::Null => String::new(),
        _ => return DecodedLine::Skipped(SkipReason::BadAnswer { conversation_id }),
    };

    DecodedLine::Event(StreamEvent {
        answer,
        conversation_id,
    })
}

/// Splits raw body bytes into lines.
///
/// Bytes are held until a full line is available so multibyte characters cut
/// across chunk boundaries decode intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let already_scanned = self.pending.len();
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut search_from = already_scanned;
        while let Some(offset) = self.pending[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            lines.push(Self::line_text(&self.pending[start..end]));
            start = end + 1;
            search_from = start;
        }
        self.pending.drain(..start);

        lines
    }

    /// Flush a trailing line that never got its newline
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(Self::line_text(&rest))
    }

    fn line_text(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Lazily decode a chunked body into lines.
///
/// The sequence is finite and single-pass. A body error is yielded once and
/// ends the sequence; the partial line it interrupted is dropped.
pub fn decode_stream<S, B, E>(body: S) -> impl Stream<Item = Result<DecodedLine, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    struct DecodeState<S> {
        body: Pin<Box<S>>,
        buffer: LineBuffer,
        ready: VecDeque<String>,
        finished: bool,
    }

    let initial = DecodeState {
        body: Box::pin(body),
        buffer: LineBuffer::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(initial, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(decode_line(&line)), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.ready.extend(state.buffer.push(chunk.as_ref())),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    state.ready.extend(state.buffer.finish());
                }
            }
        }
    })
}

/// Running state of one streamed answer
#[derive(Debug, Default, Clone)]
pub struct AnswerAssembler {
    answer: String,
    events: usize,
    skipped: usize,
}

impl AnswerAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&mut self, event: &StreamEvent) {
        self.answer.push_str(&event.answer);
        self.events += 1;
    }

    pub fn note_skip(&mut self) {
        self.skipped += 1;
    }

    /// Text shown while the stream is still open
    pub fn partial(&self) -> String {
        format!("{}{}", self.answer, CARET)
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    #[allow(dead_code)]
    pub fn events(&self) -> usize {
        self.events
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn into_answer(self) -> String {
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Vec<u8>, io::Error>> {
        let owned: Vec<Result<Vec<u8>, io::Error>> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        stream::iter(owned)
    }

    async fn collect_lines<S>(body: S) -> Vec<Result<DecodedLine, io::Error>>
    where
        S: Stream<Item = Result<Vec<u8>, io::Error>>,
    {
        decode_stream(body).collect().await
    }

    fn event(answer: &str, conversation_id: Option<&str>) -> DecodedLine {
        DecodedLine::Event(StreamEvent {
            answer: answer.to_string(),
            conversation_id: conversation_id.map(str::to_string),
        })
    }

    #[test]
    fn decodes_prefixed_object() {
        assert_eq!(
            decode_line(r#"data: {"answer":"Hel","conversation_id":"c1"}"#),
            event("Hel", Some("c1"))
        );
        assert_eq!(decode_line(r#"data:{"answer":"x"}"#), event("x", None));
        assert_eq!(decode_line(r#"data: {"event":"message_end"}"#), event("", None));
    }

    #[test]
    fn skips_noise_and_bad_payloads() {
        assert_eq!(decode_line(""), DecodedLine::Blank);
        assert_eq!(decode_line("noise"), DecodedLine::Skipped(SkipReason::NoPrefix));
        assert_eq!(decode_line(" data: {}"), DecodedLine::Skipped(SkipReason::NoPrefix));
        assert!(matches!(
            decode_line("data: {not json}"),
            DecodedLine::Skipped(SkipReason::Malformed(_))
        ));
        assert!(matches!(
            decode_line("data: [1, 2]"),
            DecodedLine::Skipped(SkipReason::Malformed(_))
        ));
        assert_eq!(
            decode_line(r#"data: {"answer": 7}"#),
            DecodedLine::Skipped(SkipReason::BadAnswer {
                conversation_id: None
            })
        );
    }

    #[test]
    fn conversation_id_survives_a_bad_answer() {
        assert_eq!(
            decode_line(r#"data: {"answer": null, "conversation_id": "c1"}"#),
            event("", Some("c1"))
        );

        let skipped = decode_line(r#"data: {"answer": 7, "conversation_id": "c2"}"#);
        assert_eq!(
            skipped,
            DecodedLine::Skipped(SkipReason::BadAnswer {
                conversation_id: Some("c2".to_string())
            })
        );
        match skipped {
            DecodedLine::Skipped(reason) => assert_eq!(reason.conversation_id(), Some("c2")),
            other => panic!("unexpected line: {other:?}"),
        }

        assert_eq!(
            decode_line(r#"data: {"answer": "x", "conversation_id": 5}"#),
            event("x", None)
        );
    }

    #[test]
    fn line_buffer_handles_split_and_crlf() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"ans").is_empty());
        let lines = buffer.push(b"wer\":\"a\"}\r\nnoise\n\ndata:");
        assert_eq!(lines, vec![r#"data: {"answer":"a"}"#, "noise", ""]);
        assert_eq!(buffer.finish().as_deref(), Some("data:"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn line_buffer_keeps_multibyte_chars_across_chunks() {
        let text = "data: {\"answer\":\"您好\"}\n".as_bytes();
        // cut inside the first CJK character
        let cut = text.iter().position(|b| *b >= 0x80).unwrap_or(0) + 1;
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&text[..cut]).is_empty());
        let lines = buffer.push(&text[cut..]);
        assert_eq!(decode_line(&lines[0]), event("您好", None));
    }

    #[tokio::test]
    async fn stream_matches_reference_example() {
        let body = chunks(&[
            b"data: {\"answer\":\"Hel\",\"conversation_id\":\"c1\"}\n",
            b"data: {\"answer\":\"lo\"}\nno",
            b"ise\ndata: {not json}\n",
        ]);

        let lines: Vec<DecodedLine> = collect_lines(body)
            .await
            .into_iter()
            .map(|r| r.expect("no body errors"))
            .collect();

        let mut assembler = AnswerAssembler::new();
        for line in &lines {
            match line {
                DecodedLine::Event(event) => assembler.push_event(event),
                DecodedLine::Skipped(_) => assembler.note_skip(),
                DecodedLine::Blank => {}
            }
        }

        assert_eq!(assembler.answer(), "Hello");
        assert_eq!(assembler.events(), 2);
        assert_eq!(assembler.skipped(), 2);
        assert_eq!(lines[0], event("Hel", Some("c1")));
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_decoded() {
        let lines = collect_lines(chunks(&[b"data: {\"answer\":\"a\"}\ndata: {\"answer\":\"b\"}"])).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].as_ref().ok(), Some(&event("b", None)));
    }

    #[tokio::test]
    async fn body_error_ends_sequence() {
        let body = stream::iter(vec![
            Ok(b"data: {\"answer\":\"a\"}\ndata: {\"ans".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(b"wer\":\"b\"}\n".to_vec()),
        ]);

        let lines = collect_lines(body).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_ref().ok(), Some(&event("a", None)));
        assert!(lines[1].is_err());
    }

    #[test]
    fn partial_carries_caret() {
        let mut assembler = AnswerAssembler::new();
        assert_eq!(assembler.partial(), CARET);
        assembler.push_event(&StreamEvent {
            answer: "Hi".to_string(),
            conversation_id: None,
        });
        assert_eq!(assembler.partial(), "Hi▌");
        assert_eq!(assembler.into_answer(), "Hi");
    }
}
