//! Marker-based parsing of judge responses.

use std::sync::LazyLock;

use regex::Regex;

pub const PLAN_START: &str = "===CHEATSHEET_START===";
pub const PLAN_END: &str = "===CHEATSHEET_END===";
pub const FEEDBACK_START: &str = "===FEEDBACK_START===";
pub const FEEDBACK_END: &str = "===FEEDBACK_END===";

/// Minimum length of the text following an approval keyword for it to stand
/// in for a missing plan block.
pub const MIN_TRAILING_PLAN_CHARS: usize = 100;

static VERDICT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>#*_]*VERDICT[\s*_]*:[\s*_]*(APPROVED|REJECTED)\b").unwrap()
});
static BARE_APPROVED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bAPPROVED\b").unwrap());
static BARE_REJECTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bREJECTED\b").unwrap());

/// Verdict keyword found in a judge response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected,
    Unknown,
}

/// Everything extractable from one judge response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub verdict: Verdict,
    pub plan: Option<String>,
    pub feedback: Option<String>,
    /// Text following the approval keyword, when the verdict is approval.
    pub after_approval: Option<String>,
}

/// Result of the quality gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Approved { cheatsheet: String, forced: bool },
    Rejected { reason: String, feedback: Option<String> },
}

impl Evaluation {
    pub fn cheatsheet(&self) -> Option<&str> {
        match self {
            Evaluation::Approved { cheatsheet, .. } => Some(cheatsheet),
            Evaluation::Rejected { .. } => None,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Evaluation::Approved { .. })
    }
}

/// Text between `start` and the next `end`, trimmed; `None` if absent or empty.
pub fn extract_block(text: &str, start: &str, end: &str) -> Option<String> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    let body = text[from..from + len].trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Parse a raw judge response.
pub fn parse_judgement(response: &str) -> Judgement {
    let (verdict, keyword_end) = match VERDICT_LINE_RE.captures(response) {
        Some(caps) => {
            let word = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let end = caps.get(0).map(|m| m.end()).unwrap_or_default();
            if word.eq_ignore_ascii_case("APPROVED") {
                (Verdict::Approved, Some(end))
            } else {
                (Verdict::Rejected, None)
            }
        }
        None => {
            if BARE_REJECTED_RE.is_match(response) {
                (Verdict::Rejected, None)
            } else if let Some(m) = BARE_APPROVED_RE.find(response) {
                (Verdict::Approved, Some(m.end()))
            } else {
                (Verdict::Unknown, None)
            }
        }
    };

    let after_approval = keyword_end
        .map(|end| response[end..].trim().to_string())
        .filter(|text| !text.is_empty());

    Judgement {
        verdict,
        plan: extract_block(response, PLAN_START, PLAN_END),
        feedback: extract_block(response, FEEDBACK_START, FEEDBACK_END),
        after_approval,
    }
}

/// Turn a judge response into an evaluation.
///
/// In forced mode every response is coerced into a plan: the plan block, then
/// the text after the approval keyword, then the raw transcript.
pub fn decide(response: &str, transcript: &str, forced: bool) -> Evaluation {
    let judgement = parse_judgement(response);
    let trailing = judgement
        .after_approval
        .clone()
        .filter(|text| text.chars().count() > MIN_TRAILING_PLAN_CHARS);

    if judgement.verdict == Verdict::Approved {
        if let Some(plan) = judgement.plan.clone().or(trailing.clone()) {
            return Evaluation::Approved {
                cheatsheet: plan,
                forced,
            };
        }
    }

    if forced {
        return coerce(&judgement, transcript);
    }

    match judgement.verdict {
        Verdict::Approved => Evaluation::Rejected {
            reason: "judge approved without a plan block".to_string(),
            feedback: judgement.feedback,
        },
        Verdict::Rejected => Evaluation::Rejected {
            reason: judgement
                .feedback
                .as_deref()
                .and_then(|text| text.lines().find(|line| !line.trim().is_empty()))
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| "judge rejected the transcript".to_string()),
            feedback: judgement.feedback,
        },
        Verdict::Unknown => Evaluation::Rejected {
            reason: "judge response had no verdict".to_string(),
            feedback: None,
        },
    }
}

/// Best extractable plan for a forced evaluation.
pub fn coerce(judgement: &Judgement, transcript: &str) -> Evaluation {
    let trailing = judgement
        .after_approval
        .clone()
        .filter(|text| text.chars().count() > MIN_TRAILING_PLAN_CHARS);
    let fallback = Some(transcript.trim().to_string()).filter(|text| !text.is_empty());

    match judgement.plan.clone().or(trailing).or(fallback) {
        Some(cheatsheet) => Evaluation::Approved {
            cheatsheet,
            forced: true,
        },
        None => Evaluation::Rejected {
            reason: "nothing to extract: judge response and transcript are empty".to_string(),
            feedback: judgement.feedback.clone(),
        },
    }
}
