//! Parsed ticket records, per-branch targets and the early shape check.

use serde::{Deserialize, Serialize};

/// Minimum combined description + comment text for a ticket to be workable.
pub const MIN_CONTEXT_CHARS: usize = 30;

/// A ticket as handed over by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub key: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub affected_systems: Vec<String>,
    #[serde(default)]
    pub target_branches: Vec<String>,
}

/// One (service, branch) combination processed by the per-target steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub service: String,
    pub branch: String,
}

impl Target {
    /// Filesystem-safe identifier, e.g. `billing-release-2-1`.
    pub fn slug(&self) -> String {
        format!("{}-{}", slugify(&self.service), slugify(&self.branch))
    }

    /// Branch the agent's changes are committed on.
    pub fn feature_branch(&self, ticket_key: &str) -> String {
        format!("taskforge/{}-{}", ticket_key.to_ascii_lowercase(), slugify(&self.branch))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.service, self.branch)
    }
}

/// Result of shipping one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub target: Target,
    pub branch: String,
    /// Where the change can be reviewed (PR URL or commit id).
    pub reference: String,
}

impl Ticket {
    /// Targets in ticket order: every affected system crossed with every branch.
    pub fn targets(&self) -> Vec<Target> {
        self.affected_systems
            .iter()
            .flat_map(|service| {
                self.target_branches.iter().map(move |branch| Target {
                    service: service.clone(),
                    branch: branch.clone(),
                })
            })
            .collect()
    }

    /// Description and comments, as one context block.
    pub fn context_text(&self) -> String {
        let mut text = self.description.trim().to_string();
        for comment in &self.comments {
            let comment = comment.trim();
            if comment.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(comment);
        }
        text
    }
}

/// Reasons the ticket cannot be worked on; empty when it is workable.
pub fn ticket_problems(ticket: &Ticket) -> Vec<String> {
    let mut problems = Vec::new();
    if ticket.summary.trim().is_empty() {
        problems.push("summary is empty".to_string());
    }
    let context_chars: usize = std::iter::once(&ticket.description)
        .chain(&ticket.comments)
        .map(|text| text.trim().chars().count())
        .sum();
    if context_chars < MIN_CONTEXT_CHARS {
        problems.push(format!(
            "description and comments too short ({context_chars} < {MIN_CONTEXT_CHARS} chars)"
        ));
    }
    if ticket.affected_systems.iter().all(|s| s.trim().is_empty()) {
        problems.push("no affected system".to_string());
    }
    if ticket.target_branches.iter().all(|b| b.trim().is_empty()) {
        problems.push("no target branch".to_string());
    }
    problems
}

fn slugify(raw: &str) -> String {
    let mut out = String::new();
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
