//! Structural pre-check for debate transcripts.
//!
//! Runs before any judge invocation. Pure and idempotent: the same transcript
//! always yields the same verdict.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

pub const MIN_TRANSCRIPT_CHARS: usize = 200;
pub const MIN_FILE_PATHS: usize = 2;
pub const MIN_ACTION_VERBS: usize = 3;

static FILE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:[A-Za-z0-9_.\-]+/)+[A-Za-z0-9_.\-]+\.[A-Za-z0-9]{1,8}\b|\b[A-Za-z0-9_\-]+\.(?:rs|ts|tsx|js|jsx|mjs|py|go|java|kt|rb|php|cs|cpp|cc|c|h|hpp|swift|scala|sql|ya?ml|json|toml|md|html|css|scss|sh|xml|proto|gradle|vue)\b",
    )
    .unwrap()
});

static ACTION_VERB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(create|modify|add|remove|update|change|replace|delete|implement|refactor)\b")
        .unwrap()
});

/// Result of the structural pre-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precheck {
    Pass,
    Reject { reason: String },
}

/// Distinct file-path-like tokens in `text`, sorted.
pub fn file_paths(text: &str) -> BTreeSet<String> {
    FILE_PATH_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .collect()
}

/// Number of action-verb occurrences in `text`.
pub fn action_verb_count(text: &str) -> usize {
    ACTION_VERB_RE.find_iter(text).count()
}

/// Reject transcripts that cannot possibly contain an actionable plan.
pub fn structural_precheck(transcript: &str) -> Precheck {
    let chars = transcript.trim().chars().count();
    if chars < MIN_TRANSCRIPT_CHARS {
        return Precheck::Reject {
            reason: format!("transcript too short ({chars} < {MIN_TRANSCRIPT_CHARS} chars)"),
        };
    }
    let paths = file_paths(transcript).len();
    if paths < MIN_FILE_PATHS {
        return Precheck::Reject {
            reason: format!("missing file paths ({paths} < {MIN_FILE_PATHS})"),
        };
    }
    let verbs = action_verb_count(transcript);
    if verbs < MIN_ACTION_VERBS {
        return Precheck::Reject {
            reason: format!("missing concrete actions ({verbs} < {MIN_ACTION_VERBS} action verbs)"),
        };
    }
    Precheck::Pass
}
