//! `gemini` CLI in non-interactive mode, prompt on stdin.

use crate::core::garbage::matches_rate_limit;
use crate::core::types::InvocationRequest;
use crate::io::config::ProviderSettings;

use super::{Invocation, ParsedOutput, TurnLimit, parse_plain};

pub fn build(request: &InvocationRequest, settings: &ProviderSettings) -> Invocation {
    let mut args: Vec<String> = Vec::new();
    if let Some(model) = &settings.model {
        args.push("-m".into());
        args.push(model.clone());
    }
    if request.mode.writes() {
        args.push("--yolo".into());
    }
    args.extend(settings.extra_args.iter().cloned());

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
    matches_rate_limit(text) || text.contains("Quota exceeded for quota metric")
}
