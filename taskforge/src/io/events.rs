//! Tolerant, line-oriented event parsing for agent stdout.
//!
//! [`EventStream`] is a lazy, finite, non-restartable sequence: it pulls lines
//! from a reader on demand, yields one [`StreamEvent`] per line, and is fused
//! once the reader is exhausted. Lines that are not JSON objects are never
//! dropped; they surface as [`StreamEvent::Text`].

use std::io::{self, BufRead};
use std::iter::FusedIterator;

use serde_json::Value;

/// One line of agent output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A line that parsed as a JSON object.
    Structured { line: String, value: Value },
    /// Any other line (including blank lines), verbatim minus the terminator.
    Text(String),
}

impl StreamEvent {
    /// Classify a single line (terminator already stripped or not).
    pub fn parse_line(raw: &str) -> Self {
        let line = raw.trim_end_matches(['\n', '\r']);
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(value) if value.is_object() => StreamEvent::Structured {
                line: line.to_string(),
                value,
            },
            _ => StreamEvent::Text(line.to_string()),
        }
    }

    pub fn line(&self) -> &str {
        match self {
            StreamEvent::Structured { line, .. } => line,
            StreamEvent::Text(line) => line,
        }
    }

    /// The `type` field of a structured event.
    pub fn kind(&self) -> Option<&str> {
        match self {
            StreamEvent::Structured { value, .. } => value.get("type").and_then(Value::as_str),
            StreamEvent::Text(_) => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, StreamEvent::Text(line) if line.trim().is_empty())
    }
}

/// Iterator of [`StreamEvent`]s over a buffered reader.
///
/// An unterminated trailing line is yielded at EOF like any other line. A read
/// error ends the stream; it can be retrieved with [`EventStream::take_error`].
pub struct EventStream<R> {
    reader: R,
    finished: bool,
    error: Option<io::Error>,
}

impl<R: BufRead> EventStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
            error: None,
        }
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }
}

impl<R: BufRead> Iterator for EventStream<R> {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        while !self.finished {
            let mut buf = Vec::new();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => self.finished = true,
                Ok(_) => return Some(StreamEvent::parse_line(&String::from_utf8_lossy(&buf))),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.error = Some(err);
                    self.finished = true;
                }
            }
        }
        None
    }
}

impl<R: BufRead> FusedIterator for EventStream<R> {}
