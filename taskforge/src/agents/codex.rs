//! `codex exec`, prompt on stdin, final message as plain text on stdout.

use crate::core::garbage::matches_rate_limit;
use crate::core::types::InvocationRequest;
use crate::io::config::ProviderSettings;

use super::{Invocation, ParsedOutput, TurnLimit, parse_plain};

pub fn build(request: &InvocationRequest, settings: &ProviderSettings) -> Invocation {
    let sandbox = if request.mode.writes() {
        "workspace-write"
    } else {
        "read-only"
    };
    let mut args: Vec<String> = vec![
        "exec".into(),
        "--skip-git-repo-check".into(),
        "--sandbox".into(),
        sandbox.into(),
    ];
    if let Some(model) = &settings.model {
        args.push("-m".into());
        args.push(model.clone());
    }
    args.extend(settings.extra_args.iter().cloned());
    // Read the prompt from stdin.
    args.push("-".into());

    Invocation {
        program: settings.command.clone(),
        args,
        stdin: Some(request.prompt.clone()),
        timeout: request.timeout,
        turn_limit: TurnLimit::Unbounded,
    }
}

pub fn parse(stdout: &str, exit_code: Option<i32>) -> ParsedOutput {
    parse_plain(stdout, exit_code)
}

pub fn is_rate_limited(text: &str) -> bool {
    matches_rate_limit(text)
}
