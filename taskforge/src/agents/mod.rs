//! Provider adapters: one module per agent CLI, dispatched on [`ProviderKind`].
//!
//! Each adapter translates an [`InvocationRequest`] into a concrete command
//! line and interprets the CLI's stdout once the process has exited.

use std::time::Duration;

use serde_json::Value;

use crate::core::types::{InvocationRequest, ProviderKind};
use crate::io::config::ProviderSettings;
use crate::io::events::StreamEvent;

pub mod claude;
pub mod codex;
pub mod gemini;
pub mod invoker;

pub use invoker::{CliInvoker, Invoker};

/// How many agentic turns a provider may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnLimit {
    Bounded(u32),
    /// The provider has no notion of turns.
    Unbounded,
}

/// A concrete command line for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub turn_limit: TurnLimit,
}

/// What an adapter extracted from a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOutput {
    pub output: String,
    pub turn_count: Option<u32>,
    pub completed_normally: bool,
}

impl ProviderKind {
    pub fn command(self, settings: &ProviderSettings) -> String {
        settings.command.clone()
    }

    pub fn build_invocation(self, request: &InvocationRequest, settings: &ProviderSettings) -> Invocation {
        match self {
            ProviderKind::Claude => claude::build(request, settings),
            ProviderKind::Codex => codex::build(request, settings),
            ProviderKind::Gemini => gemini::build(request, settings),
        }
    }

    pub fn parse_output(self, stdout: &str, exit_code: Option<i32>) -> ParsedOutput {
        match self {
            ProviderKind::Claude => claude::parse(stdout, exit_code),
            ProviderKind::Codex => codex::parse(stdout, exit_code),
            ProviderKind::Gemini => gemini::parse(stdout, exit_code),
        }
    }

    pub fn detect_rate_limit(self, text: &str) -> bool {
        match self {
            ProviderKind::Claude => claude::is_rate_limited(text),
            ProviderKind::Codex => codex::is_rate_limited(text),
            ProviderKind::Gemini => gemini::is_rate_limited(text),
        }
    }
}

/// First non-blank candidate, verbatim, in priority order; empty when there is none.
pub fn select_output(candidates: &[Option<&str>]) -> String {
    candidates
        .iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
        .map(|text| text.to_string())
        .unwrap_or_default()
}

/// Candidate texts found in a stream of structured events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventScan {
    /// Text of the terminal `result` event, if one arrived.
    pub result: Option<String>,
    /// Last non-empty assistant text fragment.
    pub last_assistant: Option<String>,
    pub num_turns: Option<u32>,
}

/// Scan stdout for `assistant` and `result` events.
pub fn scan_events(stdout: &str) -> EventScan {
    let mut scan = EventScan::default();
    for line in stdout.lines() {
        let event = StreamEvent::parse_line(line);
        let StreamEvent::Structured { value, .. } = &event else {
            continue;
        };
        match event.kind() {
            Some("assistant") => {
                if let Some(text) = assistant_text(value) {
                    scan.last_assistant = Some(text);
                }
            }
            Some("result") => {
                scan.result = Some(
                    value
                        .get("result")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                );
                scan.num_turns = value
                    .get("num_turns")
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok());
            }
            _ => {}
        }
    }
    scan
}

/// Concatenated `text` blocks of an assistant message; `None` if there are none.
fn assistant_text(value: &Value) -> Option<String> {
    let content = value.get("message")?.get("content")?.as_array()?;
    let text: Vec<&str> = content
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    let joined = text.join("\n");
    (!joined.trim().is_empty()).then_some(joined)
}

/// Plain-text adapters: a structured result line wins, otherwise all of stdout.
pub(crate) fn parse_plain(stdout: &str, exit_code: Option<i32>) -> ParsedOutput {
    let scan = scan_events(stdout);
    let output = select_output(&[scan.result.as_deref(), Some(stdout)]);
    ParsedOutput {
        completed_normally: exit_code == Some(0) && !output.is_empty(),
        output,
        turn_count: None,
    }
}
