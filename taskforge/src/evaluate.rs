//! Quality gate: structural pre-check, then a judge invocation.
//!
//! Rejection is an expected outcome and comes back as
//! [`Evaluation::Rejected`]. In forced mode the pre-check is skipped and every
//! judge response is coerced into a plan; only a judge invocation that fails
//! outright yields "no plan".

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::precheck::{Precheck, structural_precheck};
use crate::core::ticket::Ticket;
use crate::core::types::Mode;
use crate::core::verdict::{Evaluation, decide};
use crate::io::config::ForgeConfig;
use crate::io::prompt::PromptBuilder;
use crate::strategy::StrategyRunner;

pub struct Evaluator<'a> {
    runner: &'a StrategyRunner,
    config: &'a ForgeConfig,
    prompts: &'a PromptBuilder,
}

impl<'a> Evaluator<'a> {
    pub fn new(runner: &'a StrategyRunner, config: &'a ForgeConfig, prompts: &'a PromptBuilder) -> Self {
        Self {
            runner,
            config,
            prompts,
        }
    }

    /// Judge `transcript` for `ticket`. `round` only names the log file.
    #[instrument(skip_all, fields(ticket = %ticket.key, round, forced))]
    pub fn evaluate(
        &self,
        ticket: &Ticket,
        transcript: &str,
        workdir: &Path,
        round: u32,
        forced: bool,
    ) -> Result<Evaluation> {
        if !forced && let Precheck::Reject { reason } = structural_precheck(transcript) {
            info!(%reason, "transcript failed structural pre-check");
            return Ok(Evaluation::Rejected {
                reason,
                feedback: None,
            });
        }

        let prompt = self.prompts.judge(ticket, transcript, forced)?;
        let label = if forced {
            format!("evaluate-r{round}-forced")
        } else {
            format!("evaluate-r{round}")
        };
        let request = self
            .config
            .request(Mode::Evaluate, prompt, workdir, &label, Some(&ticket.key));

        let evaluation = match self.runner.run(&request) {
            Ok(result) => decide(&result.output, transcript, forced),
            Err(err) if forced => {
                warn!(err = %format!("{err:#}"), "forced judge invocation failed");
                Evaluation::Rejected {
                    reason: format!("no plan: judge invocation failed: {err:#}"),
                    feedback: None,
                }
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "judge invocation failed");
                Evaluation::Rejected {
                    reason: format!("judge invocation failed: {err:#}"),
                    feedback: None,
                }
            }
        };
        match &evaluation {
            Evaluation::Approved { cheatsheet, forced } => {
                info!(forced, cheatsheet_chars = cheatsheet.len(), "plan approved");
            }
            Evaluation::Rejected { reason, .. } => info!(%reason, "plan rejected"),
        }
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agents::Invoker;
    use crate::core::types::{ProviderKind, StrategyKind};
    use crate::test_support::{ScriptStep, ScriptedInvoker, config_with, ok_result};

    const TRANSCRIPT: &str = "## Proposer\n\nModify src/sender.rs to wrap delivery in a retry loop. \
        Add a backoff helper in src/backoff.rs. Update tests/sender_test.rs to cover 502 responses. \
        The retry count comes from the existing config struct and defaults to three attempts.\n\n\
        ## Critic\n\nAgreed, but also change the timeout handling.";

    fn ticket() -> Ticket {
        Ticket {
            key: "ABC-1".to_string(),
            summary: "Retry webhooks".to_string(),
            description: "Webhook delivery fails on transient errors.".to_string(),
            comments: vec![],
            affected_systems: vec!["hooks".to_string()],
            target_branches: vec!["main".to_string()],
        }
    }

    fn evaluate_with(invoker: Arc<ScriptedInvoker>, transcript: &str, forced: bool) -> Evaluation {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = config_with(temp.path(), StrategyKind::Single);
        config.modes.evaluate.secondary = None;
        let dyn_invoker: Arc<dyn Invoker> = invoker;
        let runner = StrategyRunner::new(dyn_invoker, config.modes.clone());
        let prompts = PromptBuilder::new(config.prompt_budget_bytes);
        Evaluator::new(&runner, &config, &prompts)
            .evaluate(&ticket(), transcript, temp.path(), 1, forced)
            .expect("evaluate")
    }

    #[test]
    fn precheck_rejection_skips_the_judge() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let evaluation = evaluate_with(invoker.clone(), "too short", false);
        assert!(matches!(evaluation, Evaluation::Rejected { reason, .. } if reason.contains("too short")));
        assert_eq!(invoker.call_count(), 0);
    }

    #[test]
    fn judge_approval_returns_the_plan_block() {
        let response = "VERDICT: APPROVED\n===CHEATSHEET_START===\n1. Modify src/sender.rs\n===CHEATSHEET_END===";
        let invoker = Arc::new(
            ScriptedInvoker::new().push(ProviderKind::Claude, ScriptStep::ok(ok_result(ProviderKind::Claude, response))),
        );
        let evaluation = evaluate_with(invoker.clone(), TRANSCRIPT, false);
        assert_eq!(evaluation.cheatsheet(), Some("1. Modify src/sender.rs"));
        assert_eq!(invoker.labels(), vec!["evaluate-r1".to_string()]);
    }

    #[test]
    fn judge_error_is_a_rejection() {
        let invoker = Arc::new(ScriptedInvoker::new().push(ProviderKind::Claude, ScriptStep::error("spawn claude")));
        let evaluation = evaluate_with(invoker, TRANSCRIPT, false);
        assert!(!evaluation.is_approved());
    }

    #[test]
    fn forced_mode_skips_precheck_and_falls_back_to_transcript() {
        let invoker = Arc::new(ScriptedInvoker::new().push(
            ProviderKind::Claude,
            ScriptStep::ok(ok_result(ProviderKind::Claude, "VERDICT: REJECTED\nstill vague")),
        ));
        let evaluation = evaluate_with(invoker.clone(), "short transcript", true);
        assert_eq!(
            evaluation,
            Evaluation::Approved {
                cheatsheet: "short transcript".to_string(),
                forced: true
            }
        );
        assert_eq!(invoker.labels(), vec!["evaluate-r1-forced".to_string()]);
    }

    #[test]
    fn forced_mode_judge_error_means_no_plan() {
        let invoker = Arc::new(ScriptedInvoker::new().push(ProviderKind::Claude, ScriptStep::error("spawn claude")));
        let evaluation = evaluate_with(invoker, TRANSCRIPT, true);
        assert!(matches!(evaluation, Evaluation::Rejected { reason, .. } if reason.starts_with("no plan")));
    }
}
