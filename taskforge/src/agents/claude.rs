//! `claude -p` with newline-delimited JSON events on stdout.

use crate::core::garbage::matches_rate_limit;
use crate::core::types::{InvocationRequest, Mode};
use crate::io::config::ProviderSettings;

use super::{Invocation, ParsedOutput, TurnLimit, scan_events, select_output};

const READ_ONLY_TOOLS: &str = "Read,Grep,Glob,LS";
const WRITE_TOOLS: &str = "Read,Grep,Glob,LS,Edit,MultiEdit,Write,Bash";

pub fn build(request: &InvocationRequest, settings: &ProviderSettings) -> Invocation {
    let mut args: Vec<String> = vec![
        "-p".into(),
        "--output-format".into(),
        "stream-json".into(),
        "--verbose".into(),
        "--max-turns".into(),
        request.max_turns.to_string(),
    ];
    if let Some(model) = &settings.model {
        args.push("--model".into());
        args.push(model.clone());
    }
    args.push("--allowedTools".into());
    if request.mode == Mode::Execute {
        args.push(WRITE_TOOLS.into());
        args.push("--permission-mode".into());
        args.push("acceptEdits".into());
    } else {
        args.push(READ_ONLY_TOOLS.into());
    }
    args.extend(settings.extra_args.iter().cloned());

    Invocation {
        program: settings.command.clone(),
        args,
        stdin: Some(request.prompt.clone()),
        timeout: request.timeout,
        turn_limit: TurnLimit::Bounded(request.max_turns),
    }
}

/// Completed only when a non-empty terminal result arrived and the exit was clean.
pub fn parse(stdout: &str, exit_code: Option<i32>) -> ParsedOutput {
    let scan = scan_events(stdout);
    let result_ok = scan
        .result
        .as_deref()
        .is_some_and(|text| !text.trim().is_empty());
    ParsedOutput {
        output: select_output(&[scan.result.as_deref(), scan.last_assistant.as_deref()]),
        turn_count: scan.num_turns,
        completed_normally: exit_code == Some(0) && result_ok,
    }
}

pub fn is_rate_limited(text: &str) -> bool {
    matches_rate_limit(text) || text.contains("Claude AI usage limit reached")
}
