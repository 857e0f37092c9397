//! Two-role debate that turns ticket context into a vetted plan.
//!
//! Each round runs the proposer, then the critic, persists both outputs, and
//! submits their latest texts to the [`Evaluator`]. Approval ends the debate.
//! A rejection in the last round is followed by one forced evaluation. A rate
//! limit from either role abandons the remaining rounds; an existing
//! transcript then goes straight to forced evaluation.
//!
//! Both roles run in [`Mode::Debate`], which never writes to the workdir.

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::ticket::Ticket;
use crate::core::types::{DebateRound, Mode};
use crate::core::verdict::Evaluation;
use crate::evaluate::Evaluator;
use crate::io::checkpoint::CheckpointStore;
use crate::io::config::ForgeConfig;
use crate::io::prompt::PromptBuilder;
use crate::strategy::StrategyRunner;

/// Result of a full debate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebateOutcome {
    pub rounds: Vec<DebateRound>,
    pub evaluation: Evaluation,
    /// True when a rate limit cut the debate short.
    pub rate_limited: bool,
}

impl DebateOutcome {
    pub fn cheatsheet(&self) -> Option<&str> {
        self.evaluation.cheatsheet()
    }
}

pub struct DebateEngine<'a> {
    runner: &'a StrategyRunner,
    config: &'a ForgeConfig,
    prompts: &'a PromptBuilder,
    store: &'a CheckpointStore,
}

impl<'a> DebateEngine<'a> {
    pub fn new(
        runner: &'a StrategyRunner,
        config: &'a ForgeConfig,
        prompts: &'a PromptBuilder,
        store: &'a CheckpointStore,
    ) -> Self {
        Self {
            runner,
            config,
            prompts,
            store,
        }
    }

    #[instrument(skip_all, fields(ticket = %ticket.key, max_rounds = self.config.debate.max_rounds))]
    pub fn run(&self, ticket: &Ticket, workdir: &Path) -> Result<DebateOutcome> {
        let evaluator = Evaluator::new(self.runner, self.config, self.prompts);
        let max_rounds = self.config.debate.max_rounds;
        let key = ticket.key.as_str();
        let mut rounds: Vec<DebateRound> = Vec::new();
        let mut proposal: Option<String> = None;
        let mut critique: Option<String> = None;
        self.store.clear_rounds(key)?;

        for round in 1..=max_rounds {
            info!(round, "debate round starting");
            let prompt = self.prompts.proposer(
                ticket,
                round,
                max_rounds,
                proposal.as_deref(),
                critique.as_deref(),
            )?;
            let proposed = self.runner.run(&self.config.request(
                Mode::Debate,
                prompt,
                workdir,
                &format!("debate-r{round}-proposer"),
                Some(key),
            ))?;
            if proposed.rate_limited {
                warn!(round, provider = %proposed.provider, "proposer rate limited, abandoning debate");
                return self.finish_early(&evaluator, ticket, workdir, rounds, round);
            }

            let prompt = self.prompts.critic(
                ticket,
                round,
                max_rounds,
                &proposed.output,
                critique.as_deref(),
            )?;
            let critiqued = self.runner.run(&self.config.request(
                Mode::Debate,
                prompt,
                workdir,
                &format!("debate-r{round}-critic"),
                Some(key),
            ))?;

            let critic_text = if critiqued.rate_limited {
                String::new()
            } else {
                critiqued.output.clone()
            };
            let record = DebateRound {
                round,
                proposer: proposed.output.clone(),
                critic: critic_text,
            };
            self.store.save_round(key, &record)?;
            rounds.push(record);

            if critiqued.rate_limited {
                warn!(round, provider = %critiqued.provider, "critic rate limited, abandoning debate");
                return self.finish_early(&evaluator, ticket, workdir, rounds, round);
            }

            proposal = Some(proposed.output);
            critique = Some(critiqued.output);

            let transcript = latest_transcript(&rounds);
            let evaluation = evaluator.evaluate(ticket, &transcript, workdir, round, false)?;
            if evaluation.is_approved() {
                info!(round, "debate converged");
                return Ok(DebateOutcome {
                    rounds,
                    evaluation,
                    rate_limited: false,
                });
            }
            if round == max_rounds {
                info!(round, "rounds exhausted, forcing evaluation");
                let evaluation = evaluator.evaluate(ticket, &transcript, workdir, round, true)?;
                return Ok(DebateOutcome {
                    rounds,
                    evaluation,
                    rate_limited: false,
                });
            }
        }

        // Only reachable with zero rounds configured; validation forbids that.
        Ok(DebateOutcome {
            rounds,
            evaluation: Evaluation::Rejected {
                reason: "debate ran no rounds".to_string(),
                feedback: None,
            },
            rate_limited: false,
        })
    }

    /// Forced evaluation of whatever transcript exists after a rate limit.
    fn finish_early(
        &self,
        evaluator: &Evaluator<'_>,
        ticket: &Ticket,
        workdir: &Path,
        rounds: Vec<DebateRound>,
        round: u32,
    ) -> Result<DebateOutcome> {
        let transcript = latest_transcript(&rounds);
        let evaluation = if transcript.trim().is_empty() {
            Evaluation::Rejected {
                reason: "rate limited before any transcript was produced".to_string(),
                feedback: None,
            }
        } else {
            evaluator.evaluate(ticket, &transcript, workdir, round, true)?
        };
        Ok(DebateOutcome {
            rounds,
            evaluation,
            rate_limited: true,
        })
    }
}

/// The latest proposer and critic texts, as one transcript.
pub fn latest_transcript(rounds: &[DebateRound]) -> String {
    let Some(last) = rounds.last() else {
        return String::new();
    };
    let mut transcript = String::new();
    for (role, text) in [("Proposer", &last.proposer), ("Critic", &last.critic)] {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if !transcript.is_empty() {
            transcript.push_str("\n\n");
        }
        transcript.push_str(&format!("## {role} (round {})\n\n{text}", last.round));
    }
    transcript
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agents::Invoker;
    use crate::core::types::{ProviderKind, StrategyKind};
    use crate::test_support::{
        ScriptStep, ScriptedInvoker, config_with, ok_result, rate_limited_result,
    };

    const PROPOSAL: &str = "Modify src/sender.rs so delivery retries on 502. Add src/backoff.rs with an \
        exponential helper. Update tests/sender_test.rs to cover the retry path and keep the \
        existing happy-path assertions unchanged.";
    const CRITIQUE: &str = "Verified src/sender.rs exists. Also change src/config.rs to expose max_retries.";
    const APPROVE: &str = "VERDICT: APPROVED\n===CHEATSHEET_START===\n1. Modify src/sender.rs\n===CHEATSHEET_END===";

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

    struct Fixture {
        _temp: tempfile::TempDir,
        config: ForgeConfig,
        store: CheckpointStore,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_with(temp.path(), StrategyKind::Fallback);
        let store = CheckpointStore::new(&config.state_dir);
        Fixture {
            _temp: temp,
            config,
            store,
        }
    }

    fn run(fx: &Fixture, invoker: Arc<ScriptedInvoker>) -> DebateOutcome {
        let dyn_invoker: Arc<dyn Invoker> = invoker;
        let runner = StrategyRunner::new(dyn_invoker, fx.config.modes.clone());
        let prompts = PromptBuilder::new(fx.config.prompt_budget_bytes);
        DebateEngine::new(&runner, &fx.config, &prompts, &fx.store)
            .run(&ticket(), fx.store.root())
            .expect("debate")
    }

    fn by_role(judge: &'static str) -> impl Fn(ProviderKind, &crate::core::types::InvocationRequest) -> ScriptStep {
        move |provider, request| {
            let text = if request.label.ends_with("proposer") {
                PROPOSAL
            } else if request.label.ends_with("critic") {
                CRITIQUE
            } else {
                judge
            };
            ScriptStep::ok(ok_result(provider, text))
        }
    }

    #[test]
    fn approval_in_round_one_stops_the_debate() {
        let fx = fixture();
        let invoker = Arc::new(ScriptedInvoker::with_responder(by_role(APPROVE)));
        let outcome = run(&fx, invoker.clone());

        assert_eq!(outcome.rounds.len(), 1);
        assert_eq!(outcome.cheatsheet(), Some("1. Modify src/sender.rs"));
        assert_eq!(
            invoker.labels(),
            vec!["debate-r1-proposer", "debate-r1-critic", "evaluate-r1"]
        );
    }

    #[test]
    fn exhausted_rounds_end_in_forced_evaluation() {
        let fx = fixture();
        let reject = "VERDICT: REJECTED\n===FEEDBACK_START===\nplan is vague\n===FEEDBACK_END===";
        let invoker = Arc::new(ScriptedInvoker::with_responder(by_role(reject)));
        let outcome = run(&fx, invoker.clone());

        assert_eq!(outcome.rounds.len(), 3);
        let labels = invoker.labels();
        assert_eq!(labels.last().map(String::as_str), Some("evaluate-r3-forced"));
        assert_eq!(labels.len(), 3 * 3 + 1);
        assert!(matches!(outcome.evaluation, Evaluation::Approved { forced: true, .. }));
        assert!(outcome.cheatsheet().is_some_and(|plan| plan.contains("src/sender.rs")));
        assert_eq!(fx.store.saved_rounds("ABC-1").expect("rounds"), vec![1, 2, 3]);
    }

    #[test]
    fn new_debate_replaces_rounds_of_an_earlier_one() {
        let fx = fixture();
        let reject = "VERDICT: REJECTED\n===FEEDBACK_START===\nplan is vague\n===FEEDBACK_END===";
        run(&fx, Arc::new(ScriptedInvoker::with_responder(by_role(reject))));
        assert_eq!(fx.store.saved_rounds("ABC-1").expect("rounds"), vec![1, 2, 3]);

        run(&fx, Arc::new(ScriptedInvoker::with_responder(by_role(APPROVE))));
        assert_eq!(fx.store.saved_rounds("ABC-1").expect("rounds"), vec![1]);
    }

    #[test]
    fn later_rounds_see_the_other_roles_latest_text() {
        let fx = fixture();
        let reject = "VERDICT: REJECTED";
        let invoker = Arc::new(ScriptedInvoker::with_responder(by_role(reject)));
        run(&fx, invoker.clone());

        let calls = invoker.calls();
        let round_two_proposer = calls
            .iter()
            .find(|call| call.request.label == "debate-r2-proposer")
            .expect("round 2 proposer");
        assert!(round_two_proposer.request.prompt.contains(CRITIQUE));
        assert!(round_two_proposer.request.prompt.contains("Revise your strategy"));
    }

    #[test]
    fn rate_limit_abandons_rounds_and_forces_evaluation() {
        let fx = fixture();
        let reject = "VERDICT: REJECTED";
        let invoker = Arc::new(ScriptedInvoker::with_responder(move |provider, request| {
            if request.label == "debate-r2-proposer" {
                return ScriptStep::ok(rate_limited_result(provider));
            }
            by_role(reject)(provider, request)
        }));
        let outcome = run(&fx, invoker.clone());

        assert!(outcome.rate_limited);
        assert_eq!(outcome.rounds.len(), 1);
        assert!(outcome.evaluation.is_approved());
        let labels = invoker.labels();
        assert!(!labels.iter().any(|label| label == "debate-r2-critic"));
        assert!(!labels.iter().any(|label| label.starts_with("debate-r3")));
        assert_eq!(labels.last().map(String::as_str), Some("evaluate-r2-forced"));
    }

    #[test]
    fn rate_limit_before_any_text_yields_no_plan() {
        let fx = fixture();
        let invoker = Arc::new(ScriptedInvoker::with_responder(|provider, _request| {
            ScriptStep::ok(rate_limited_result(provider))
        }));
        let outcome = run(&fx, invoker.clone());

        assert!(outcome.rate_limited);
        assert!(outcome.rounds.is_empty());
        assert!(!outcome.evaluation.is_approved());
        assert!(fx.store.saved_rounds("ABC-1").expect("rounds").is_empty());
    }

    #[test]
    fn transcript_uses_only_the_latest_round() {
        let rounds = vec![
            DebateRound {
                round: 1,
                proposer: "old".to_string(),
                critic: "old critique".to_string(),
            },
            DebateRound {
                round: 2,
                proposer: "new".to_string(),
                critic: String::new(),
            },
        ];
        assert_eq!(latest_transcript(&rounds), "## Proposer (round 2)\n\nnew");
    }
}
