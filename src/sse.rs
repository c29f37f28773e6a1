//! Server-Sent Events wire-format parser for the push stream consumer.
//!
//! Converts the byte stream of a `/stream/{pegawai_id}` connection into
//! structured [`SseEvent`]s. Handles multi-line `data:` fields, named
//! events (`reminder`, `notify-error`), comment lines (the gateway's
//! keepalive frames arrive as comments and are swallowed here), and
//! `\r\n` line endings.
//!
//! # Wire format
//!
//! ```text
//! event: reminder
//! data: {"reminderId":7,...}
//!
//! : keep-alive
//!
//! event: notify-error
//! data: {"message":"..."}
//! ```

use serde::de::DeserializeOwned;

/// A parsed Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event name (from `event:`). `None` for unnamed events.
    pub event_type: Option<String>,
    /// The data payload; multiple `data:` lines are joined with `\n`.
    pub data: String,
    /// The event id (from `id:`), when the server sets one.
    pub id: Option<String>,
}

impl SseEvent {
    /// Decode the data payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.data)
    }
}

/// Accumulates field lines until an event boundary.
#[derive(Debug, Default)]
struct EventBuilder {
    event_type: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
}

impl EventBuilder {
    fn has_data(&self) -> bool {
        !self.data_lines.is_empty()
    }

    fn build(&mut self) -> SseEvent {
        let event = SseEvent {
            event_type: self.event_type.take(),
            data: self.data_lines.join("\n"),
            id: self.id.take(),
        };
        self.data_lines.clear();
        event
    }

    /// Process one line. Returns a complete event at an empty-line
    /// boundary when data has accumulated.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.has_data() {
                return Some(self.build());
            }
            return None;
        }

        // Comment line: keepalive frames land here and are dropped.
        if line.starts_with(':') {
            return None;
        }

        if let Some((field, value)) = parse_field(line) {
            match field {
                "data" => self.data_lines.push(value.to_owned()),
                "event" => self.event_type = Some(value.to_owned()),
                "id" => self.id = Some(value.to_owned()),
                // `retry:` and unknown fields are ignored; reconnect
                // pacing is the client task's own policy.
                _ => {}
            }
        }

        None
    }
}

/// Split a line into (field, value), stripping the single optional
/// space after the colon.
fn parse_field(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let field = &line[..colon];
    let value = line[colon + 1..].strip_prefix(' ').unwrap_or(&line[colon + 1..]);
    Some((field, value))
}

/// Incrementally parse SSE bytes, yielding events as they complete.
///
/// Feed network chunks via [`SseStreamParser::push`]; chunk boundaries
/// may fall anywhere, including mid-line.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    line_buffer: String,
    builder: EventBuilder,
}

impl SseStreamParser {
    /// Create a new incremental parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning any events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(chunk);
        let mut events = Vec::new();

        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line_buffer);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                if let Some(event) = self.builder.process_line(line) {
                    events.push(event);
                }
            } else {
                self.line_buffer.push(ch);
            }
        }

        events
    }

    /// Flush remaining buffered data when the stream ends.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.builder.process_line(line);
        }
        self.builder.has_data().then(|| self.builder.build())
    }
}
