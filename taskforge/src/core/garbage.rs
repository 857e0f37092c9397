//! Garbage-output and rate-limit classification.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::InvocationResult;

/// Outputs shorter than this (in characters, after trimming) are unusable.
pub const MIN_USEFUL_OUTPUT_CHARS: usize = 50;

/// Phrases agent CLIs print when a quota or rate limit is hit. Kept specific
/// so that plans which merely talk about rate limiting are not flagged.
static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)rate[ _-]?limit(ed)?[ _-]?(exceeded|reached|error)|rate_limit_error|usage limit (reached|exceeded)|hit your usage limit|too many requests|quota (exceeded|exhausted)|resource_exhausted|\b429\b.{0,40}(rate|quota|requests)",
    )
    .unwrap()
});

/// True when `text` carries a known rate-limit signature.
pub fn matches_rate_limit(text: &str) -> bool {
    RATE_LIMIT_RE.is_match(text)
}

/// Output is unusable if empty, too short, or a rate-limit message.
pub fn is_garbage(output: &str) -> bool {
    let trimmed = output.trim();
    trimmed.is_empty()
        || trimmed.chars().count() < MIN_USEFUL_OUTPUT_CHARS
        || matches_rate_limit(trimmed)
}

/// Usable output from a provider that was not rate limited.
pub fn is_acceptable(result: &InvocationResult) -> bool {
    !result.rate_limited && !is_garbage(&result.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProviderKind;

    #[test]
    fn empty_and_short_outputs_are_garbage() {
        assert!(is_garbage(""));
        assert!(is_garbage("   \n"));
        assert!(is_garbage("ok, done"));
        assert!(!is_garbage(&"a".repeat(MIN_USEFUL_OUTPUT_CHARS)));
    }

    #[test]
    fn rate_limit_messages_are_garbage_even_when_long() {
        let text = format!(
            "Claude AI usage limit reached. Please try again later. {}",
            "x".repeat(80)
        );
        assert!(is_garbage(&text));
        assert!(matches_rate_limit("Error: 429 Too Many Requests"));
        assert!(matches_rate_limit("status: RESOURCE_EXHAUSTED"));
        assert!(matches_rate_limit("You've hit your usage limit for today"));
    }

    #[test]
    fn plans_about_rate_limiting_are_not_flagged() {
        let plan = "Implement rate limiting middleware in src/http/limits.rs and add \
                    configuration to config/app.toml so requests are throttled.";
        assert!(!matches_rate_limit(plan));
        assert!(!is_garbage(plan));
    }

    #[test]
    fn acceptable_requires_no_rate_limit_flag() {
        let mut result = InvocationResult::placeholder(ProviderKind::Claude);
        result.output = "y".repeat(80);
        assert!(is_acceptable(&result));
        result.rate_limited = true;
        assert!(!is_acceptable(&result));
    }
}
