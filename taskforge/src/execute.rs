//! Executor: carry out the vetted plan in the target's working directory.
//!
//! Attempts are bounded by `execute.max_attempts`. Empty output is retried
//! immediately; non-empty output with validation issues is retried while
//! attempts remain, with the issues quoted in the next prompt. The last
//! attempt is kept whatever it produced.

use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::ticket::{Target, Ticket};
use crate::core::types::{ExecutionValidation, InvocationResult, Mode};
use crate::io::config::ForgeConfig;
use crate::io::prompt::PromptBuilder;
use crate::strategy::StrategyRunner;
use crate::validate::validate_execution;

const EMPTY_OUTPUT_ISSUE: &str = "the previous attempt produced no output";

/// How the attempt loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The last attempt produced output; its validation is attached.
    Completed(ExecutionValidation),
    /// Every attempt came back empty.
    NoOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// The last attempt's result.
    pub result: InvocationResult,
    pub attempts: u32,
}

pub struct Executor<'a> {
    runner: &'a StrategyRunner,
    config: &'a ForgeConfig,
    prompts: &'a PromptBuilder,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a StrategyRunner, config: &'a ForgeConfig, prompts: &'a PromptBuilder) -> Self {
        Self {
            runner,
            config,
            prompts,
        }
    }

    #[instrument(skip_all, fields(ticket = %ticket.key, target = %target))]
    pub fn execute_with_retries(
        &self,
        ticket: &Ticket,
        target: &Target,
        cheatsheet: &str,
        workdir: &Path,
    ) -> Result<ExecutionOutcome> {
        let max_attempts = self.config.execute.max_attempts;
        let mut issues: Vec<String> = Vec::new();

        for attempt in 1..=max_attempts {
            let prompt = self.prompts.executor(
                ticket,
                target,
                cheatsheet,
                attempt,
                max_attempts,
                &issues,
            )?;
            let label = format!("execute-{}-a{attempt}", target.slug());
            let result = self.runner.run(&self.config.request(
                Mode::Execute,
                prompt,
                workdir,
                &label,
                Some(&ticket.key),
            ))?;

            if result.output.trim().is_empty() {
                warn!(attempt, provider = %result.provider, "executor produced no output");
                if attempt < max_attempts {
                    issues = vec![EMPTY_OUTPUT_ISSUE.to_string()];
                    continue;
                }
                return Ok(ExecutionOutcome {
                    status: ExecutionStatus::NoOutput,
                    result,
                    attempts: attempt,
                });
            }

            let validation = validate_execution(workdir)?;
            if validation.issues.is_empty() || attempt == max_attempts {
                info!(
                    attempt,
                    passed = validation.passed,
                    issues = validation.issues.len(),
                    changed = validation.changed_files.len(),
                    "execution finished"
                );
                return Ok(ExecutionOutcome {
                    status: ExecutionStatus::Completed(validation),
                    result,
                    attempts: attempt,
                });
            }
            info!(attempt, issues = ?validation.issues, "execution has issues, retrying");
            issues = validation.issues;
        }

        Err(anyhow!("execute.max_attempts must be > 0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agents::Invoker;
    use crate::core::types::{ProviderKind, StrategyKind};
    use crate::test_support::{ScriptStep, ScriptedInvoker, TestRepo, config_with, ok_result};

    const SUMMARY: &str = "===EXECUTION_SUMMARY_START===\nsrc/lib.rs: retry added\n===EXECUTION_SUMMARY_END===";

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

    fn target() -> Target {
        Target {
            service: "hooks".to_string(),
            branch: "main".to_string(),
        }
    }

    fn execute(repo: &TestRepo, invoker: Arc<ScriptedInvoker>) -> ExecutionOutcome {
        let mut config = config_with(repo.path(), StrategyKind::Single);
        config.modes.execute.secondary = None;
        let dyn_invoker: Arc<dyn Invoker> = invoker;
        let runner = StrategyRunner::new(dyn_invoker, config.modes.clone());
        let prompts = PromptBuilder::new(config.prompt_budget_bytes);
        Executor::new(&runner, &config, &prompts)
            .execute_with_retries(&ticket(), &target(), "modify src/lib.rs", repo.path())
            .expect("execute")
    }

    fn empty() -> ScriptStep {
        ScriptStep::ok(ok_result(ProviderKind::Claude, ""))
    }

    #[test]
    fn empty_output_retries_once_then_reports_no_output() {
        let repo = TestRepo::new().expect("repo");
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .push(ProviderKind::Claude, empty())
                .push(ProviderKind::Claude, empty())
                .push(ProviderKind::Claude, empty()),
        );
        let outcome = execute(&repo, invoker.clone());

        assert_eq!(outcome.status, ExecutionStatus::NoOutput);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(invoker.call_count(), 2);
        let second = &invoker.calls()[1];
        assert!(second.request.prompt.contains(EMPTY_OUTPUT_ISSUE));
    }

    #[test]
    fn empty_then_good_output_completes_on_second_attempt() {
        let repo = TestRepo::new().expect("repo");
        let invoker = Arc::new(
            ScriptedInvoker::new().push(ProviderKind::Claude, empty()).push(
                ProviderKind::Claude,
                ScriptStep::ok(ok_result(ProviderKind::Claude, SUMMARY)).writes("src/retry.rs", "pub fn retry() {}\n"),
            ),
        );
        let outcome = execute(&repo, invoker.clone());

        assert_eq!(outcome.attempts, 2);
        let ExecutionStatus::Completed(validation) = outcome.status else {
            panic!("expected completion");
        };
        assert!(validation.passed);
        assert_eq!(validation.changed_files, vec!["src/retry.rs"]);
    }

    #[test]
    fn validation_issues_are_fed_into_the_retry() {
        let repo = TestRepo::new().expect("repo");
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .push(ProviderKind::Claude, ScriptStep::ok(ok_result(ProviderKind::Claude, SUMMARY)))
                .push(
                    ProviderKind::Claude,
                    ScriptStep::ok(ok_result(ProviderKind::Claude, SUMMARY)).writes("src/retry.rs", "pub fn retry() {}\n"),
                ),
        );
        let outcome = execute(&repo, invoker.clone());

        assert_eq!(outcome.attempts, 2);
        assert!(invoker.calls()[1].request.prompt.contains("no files were changed"));
        assert!(matches!(outcome.status, ExecutionStatus::Completed(ref v) if v.passed));
    }

    #[test]
    fn last_attempt_is_kept_even_when_it_fails_validation() {
        let repo = TestRepo::new().expect("repo");
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .push(ProviderKind::Claude, ScriptStep::ok(ok_result(ProviderKind::Claude, SUMMARY)))
                .push(ProviderKind::Claude, ScriptStep::ok(ok_result(ProviderKind::Claude, SUMMARY))),
        );
        let outcome = execute(&repo, invoker.clone());

        assert_eq!(outcome.attempts, 2);
        assert_eq!(invoker.call_count(), 2);
        assert!(matches!(outcome.status, ExecutionStatus::Completed(ref v) if !v.passed));
    }
}
