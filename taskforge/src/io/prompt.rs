//! Prompt builder for the debate roles, the judge and the executor.
//!
//! Templates are Markdown files with `<!-- section:KEY required|droppable -->`
//! markers. After rendering, droppable sections are removed (in a fixed order)
//! until the prompt fits the byte budget; if it still does not fit, the
//! largest section is clipped.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::budget::clip;
use crate::core::ticket::{Target, Ticket};
use crate::core::verdict::{FEEDBACK_END, FEEDBACK_START, PLAN_END, PLAN_START};

const PROPOSER_TEMPLATE: &str = include_str!("prompts/proposer.md");
const CRITIC_TEMPLATE: &str = include_str!("prompts/critic.md");
const JUDGE_TEMPLATE: &str = include_str!("prompts/judge.md");
const EXECUTOR_TEMPLATE: &str = include_str!("prompts/executor.md");

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap());

/// Droppable sections, least valuable first.
const DROP_ORDER: [&str; 3] = ["previous", "issues", "ticket"];

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (idx, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    let gaps = sections.len().saturating_sub(1) * 2;
    sections.iter().map(|s| s.content.len()).sum::<usize>() + gaps
}

fn fit_to_budget(sections: &mut Vec<Section>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(largest) = sections
        .iter_mut()
        .max_by_key(|section| section.content.len())
    else {
        return;
    };
    let allowed = largest.content.len().saturating_sub(total - budget);
    let before_len = largest.content.len();
    largest.content = clip(&largest.content, allowed);
    debug!(
        section = %largest.key,
        before_len,
        after_len = largest.content.len(),
        "clipped section for budget"
    );
}

fn join_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders every prompt the orchestrator sends, within a byte budget.
pub struct PromptBuilder {
    budget_bytes: usize,
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        env.add_template("proposer", PROPOSER_TEMPLATE)
            .expect("proposer template should be valid");
        env.add_template("critic", CRITIC_TEMPLATE)
            .expect("critic template should be valid");
        env.add_template("judge", JUDGE_TEMPLATE)
            .expect("judge template should be valid");
        env.add_template("executor", EXECUTOR_TEMPLATE)
            .expect("executor template should be valid");
        Self { budget_bytes, env }
    }

    pub fn proposer(
        &self,
        ticket: &Ticket,
        round: u32,
        max_rounds: u32,
        previous: Option<&str>,
        critique: Option<&str>,
    ) -> Result<String> {
        self.render(
            "proposer",
            context! {
                ticket => ticket,
                context => ticket.context_text(),
                round => round,
                max_rounds => max_rounds,
                previous => non_empty(previous),
                critique => non_empty(critique),
            },
        )
    }

    pub fn critic(
        &self,
        ticket: &Ticket,
        round: u32,
        max_rounds: u32,
        proposal: &str,
        previous: Option<&str>,
    ) -> Result<String> {
        self.render(
            "critic",
            context! {
                ticket => ticket,
                context => ticket.context_text(),
                round => round,
                max_rounds => max_rounds,
                proposal => proposal.trim(),
                previous => non_empty(previous),
            },
        )
    }

    pub fn judge(&self, ticket: &Ticket, transcript: &str, forced: bool) -> Result<String> {
        self.render(
            "judge",
            context! {
                ticket => ticket,
                context => ticket.context_text(),
                transcript => transcript.trim(),
                forced => forced,
                plan_start => PLAN_START,
                plan_end => PLAN_END,
                feedback_start => FEEDBACK_START,
                feedback_end => FEEDBACK_END,
            },
        )
    }

    pub fn executor(
        &self,
        ticket: &Ticket,
        target: &Target,
        cheatsheet: &str,
        attempt: u32,
        max_attempts: u32,
        issues: &[String],
    ) -> Result<String> {
        self.render(
            "executor",
            context! {
                ticket => ticket,
                context => ticket.context_text(),
                target => target,
                cheatsheet => cheatsheet.trim(),
                attempt => attempt,
                max_attempts => max_attempts,
                issues => issues,
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self.env.get_template(name)?.render(ctx)?;
        let mut sections = parse_sections(&rendered);
        fit_to_budget(&mut sections, self.budget_bytes);
        Ok(join_sections(&sections))
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}
