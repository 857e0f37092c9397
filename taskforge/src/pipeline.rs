//! Step pipeline for one ticket.
//!
//! Fetch and validate the ticket once, then for each (service, branch) target
//! in turn: clone, build the cheatsheet, execute, validate the execution,
//! ship, clean up. The final report is delivered once, whatever the outcome.
//!
//! Every completed step is checkpointed through [`CheckpointStore`];
//! [`Pipeline::resume`] continues from a named step with the recorded payload.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::agents::Invoker;
use crate::core::budget::tail;
use crate::core::step::Step;
use crate::core::ticket::{PullRequest, Target, Ticket, ticket_problems};
use crate::core::types::ExecutionValidation;
use crate::core::verdict::Evaluation;
use crate::debate::DebateEngine;
use crate::execute::{ExecutionStatus, Executor};
use crate::exit_codes;
use crate::io::checkpoint::{CheckpointPayload, CheckpointStore};
use crate::io::config::ForgeConfig;
use crate::io::prompt::PromptBuilder;
use crate::strategy::StrategyRunner;
use crate::validate::validate_execution;

/// Bytes of executor output kept in the checkpoint.
const EXCERPT_BYTES: usize = 4_000;

/// Source of tickets and sink for status changes and reports.
pub trait Tracker {
    fn fetch_ticket(&self, key: &str) -> Result<Ticket>;
    fn transition(&self, key: &str, status: TicketStatus) -> Result<()>;
    fn post_report(&self, report: &RunReport) -> Result<()>;
}

/// Provides a working directory per target.
pub trait Workspace {
    /// Check out `target` into a fresh directory and return its path.
    fn clone_target(&self, ticket_key: &str, target: &Target) -> Result<PathBuf>;
    fn cleanup(&self, clone_dir: &Path) -> Result<()>;
}

/// Everything the shipper needs to turn a validated change into a reviewable one.
#[derive(Debug, Clone, Copy)]
pub struct ShipRequest<'a> {
    pub ticket: &'a Ticket,
    pub target: &'a Target,
    pub clone_dir: &'a Path,
    pub feature_branch: &'a str,
    pub validation: &'a ExecutionValidation,
    /// Tail of the executor's final output.
    pub execution_excerpt: &'a str,
}

pub trait Shipper {
    fn ship(&self, request: &ShipRequest<'_>) -> Result<PullRequest>;
}

pub trait Notifier {
    fn notify(&self, report: &RunReport) -> Result<()>;
}

/// Borrowed external collaborators of one pipeline.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub tracker: &'a dyn Tracker,
    pub workspace: &'a dyn Workspace,
    pub shipper: &'a dyn Shipper,
    pub notifier: &'a dyn Notifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    InProgress,
    Done,
    Rejected,
    Failed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Done => "done",
            TicketStatus::Rejected => "rejected",
            TicketStatus::Failed => "failed",
        }
    }
}

/// Where a rejection happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPhase {
    /// The ticket's shape was unworkable; no agent ran.
    Ticket,
    /// The debate produced no acceptable plan.
    Debate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub phase: RejectionPhase,
    pub reason: String,
}

/// How one target ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Shipped {
        pull_request: PullRequest,
        /// Validation findings that did not block shipping.
        issues: Vec<String>,
    },
    NoOutput,
    NoChanges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub target: Target,
    pub outcome: TargetOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every target was processed; see the target reports for what shipped.
    Completed,
    Rejected(Rejection),
    Failed { step: Step, reason: String },
}

/// The single outward report of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub ticket_key: String,
    pub outcome: RunOutcome,
    pub targets: Vec<TargetReport>,
    /// Pull requests from this run and any resumed earlier run.
    pub pull_requests: Vec<PullRequest>,
    pub cheatsheet_path: Option<PathBuf>,
}

impl RunReport {
    /// Completed with every processed target shipped.
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
            && self
                .targets
                .iter()
                .all(|t| matches!(t.outcome, TargetOutcome::Shipped { .. }))
    }

    pub fn ticket_status(&self) -> TicketStatus {
        match &self.outcome {
            RunOutcome::Completed if self.succeeded() => TicketStatus::Done,
            RunOutcome::Rejected(_) => TicketStatus::Rejected,
            RunOutcome::Completed | RunOutcome::Failed { .. } => TicketStatus::Failed,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.ticket_status() {
            TicketStatus::Done | TicketStatus::InProgress => exit_codes::OK,
            TicketStatus::Rejected => exit_codes::REJECTED,
            TicketStatus::Failed => exit_codes::FAILED,
        }
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut out = match &self.outcome {
            RunOutcome::Completed => format!("{}: completed", self.ticket_key),
            RunOutcome::Rejected(rejection) => format!(
                "{}: rejected ({}): {}",
                self.ticket_key,
                match rejection.phase {
                    RejectionPhase::Ticket => "ticket",
                    RejectionPhase::Debate => "debate",
                },
                rejection.reason
            ),
            RunOutcome::Failed { step, reason } => {
                format!("{}: failed at {step}: {reason}", self.ticket_key)
            }
        };
        for target in &self.targets {
            let line = match &target.outcome {
                TargetOutcome::Shipped {
                    pull_request,
                    issues,
                } if issues.is_empty() => format!("shipped {}", pull_request.reference),
                TargetOutcome::Shipped {
                    pull_request,
                    issues,
                } => format!(
                    "shipped {} ({} issue(s): {})",
                    pull_request.reference,
                    issues.len(),
                    issues.join("; ")
                ),
                TargetOutcome::NoOutput => "no output".to_string(),
                TargetOutcome::NoChanges => "no changes".to_string(),
            };
            out.push_str(&format!("\n  {}: {line}", target.target));
        }
        if let Some(path) = &self.cheatsheet_path {
            out.push_str(&format!("\n  cheatsheet: {}", path.display()));
        }
        out
    }
}

/// Resume could not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeError {
    NoCheckpoint { key: String },
    MissingCheatsheet { key: String, from: Step },
    /// `from` lies beyond the step after the last completed one.
    StepNotReached {
        key: String,
        from: Step,
        last_completed: Step,
    },
}

impl fmt::Display for ResumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeError::NoCheckpoint { key } => write!(f, "no checkpoint for {key}"),
            ResumeError::MissingCheatsheet { key, from } => write!(
                f,
                "cannot resume {key} at {from}: no cheatsheet recorded (resume from build_cheatsheet)"
            ),
            ResumeError::StepNotReached {
                key,
                from,
                last_completed,
            } => write!(
                f,
                "cannot resume {key} at {from}: last completed step is {last_completed}"
            ),
        }
    }
}

impl std::error::Error for ResumeError {}

/// Mutable state of one run.
struct Progress {
    key: String,
    /// Step being attempted; reported when the run fails.
    step: Step,
    payload: CheckpointPayload,
    targets: Vec<TargetReport>,
}

pub struct Pipeline<'a> {
    config: &'a ForgeConfig,
    runner: StrategyRunner,
    prompts: PromptBuilder,
    store: CheckpointStore,
    collaborators: Collaborators<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a ForgeConfig, invoker: Arc<dyn Invoker>, collaborators: Collaborators<'a>) -> Self {
        Self {
            config,
            runner: StrategyRunner::new(invoker, config.modes.clone()),
            prompts: PromptBuilder::new(config.prompt_budget_bytes),
            store: CheckpointStore::new(&config.state_dir),
            collaborators,
        }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run the whole pipeline for `key`. Errors end up in the report.
    #[instrument(skip_all, fields(ticket = key))]
    pub fn run(&self, key: &str) -> RunReport {
        let mut progress = Progress {
            key: key.to_string(),
            step: Step::FetchTicket,
            payload: CheckpointPayload::default(),
            targets: Vec::new(),
        };
        let result = self.drive(&mut progress, Step::FetchTicket);
        self.finish(progress, result)
    }

    /// Continue `key` from `from` using its checkpoint.
    ///
    /// Fails with [`ResumeError`] before doing anything when there is no
    /// checkpoint, when `from` needs a cheatsheet that was never built, or
    /// when `from` skips a step that never completed.
    #[instrument(skip_all, fields(ticket = key, from = %from))]
    pub fn resume(&self, key: &str, from: Step) -> Result<RunReport> {
        let checkpoint = self
            .store
            .load(key)?
            .ok_or_else(|| ResumeError::NoCheckpoint { key: key.to_string() })?;
        if let Some(next) = checkpoint.step.next()
            && from > next
        {
            return Err(ResumeError::StepNotReached {
                key: key.to_string(),
                from,
                last_completed: checkpoint.step,
            }
            .into());
        }
        let mut payload = checkpoint.payload;
        if from <= Step::ValidateTicket {
            payload = CheckpointPayload::default();
        } else if from == Step::BuildCheatsheet {
            payload.cheatsheet = None;
        }
        if from >= Step::Execute && payload.cheatsheet.is_none() {
            return Err(ResumeError::MissingCheatsheet {
                key: key.to_string(),
                from,
            }
            .into());
        }
        info!(last_completed = %checkpoint.step, "resuming");

        let mut progress = Progress {
            key: key.to_string(),
            step: from,
            payload,
            targets: Vec::new(),
        };
        let result = self.drive(&mut progress, from);
        Ok(self.finish(progress, result))
    }

    fn drive(&self, progress: &mut Progress, from: Step) -> Result<Option<Rejection>> {
        let ticket = self.fetch_step(progress, from)?;

        if from <= Step::ValidateTicket {
            progress.step = Step::ValidateTicket;
            let problems = ticket_problems(&ticket);
            if !problems.is_empty() {
                return Ok(Some(Rejection {
                    phase: RejectionPhase::Ticket,
                    reason: problems.join("; "),
                }));
            }
            self.collaborators
                .tracker
                .transition(&ticket.key, TicketStatus::InProgress)
                .context("mark ticket in progress")?;
            self.checkpoint(progress, Step::ValidateTicket)?;
        }
        if from == Step::Notify {
            return Ok(None);
        }

        let mut pending: Vec<Target> = ticket
            .targets()
            .into_iter()
            .filter(|target| !progress.payload.completed_targets.contains(target))
            .collect();
        let mut first_start = Step::Clone;
        if from.is_per_target()
            && let Some(current) = progress.payload.target.clone()
        {
            pending.retain(|target| target != &current);
            pending.insert(0, current);
            first_start = from;
        }
        debug!(targets = pending.len(), "targets pending");

        for (idx, target) in pending.iter().enumerate() {
            let start = if idx == 0 { first_start } else { Step::Clone };
            if let Some(rejection) = self.process_target(progress, &ticket, target, start)? {
                return Ok(Some(rejection));
            }
        }
        Ok(None)
    }

    fn fetch_step(&self, progress: &mut Progress, from: Step) -> Result<Ticket> {
        if from > Step::FetchTicket
            && let Some(ticket) = progress.payload.ticket.clone()
        {
            return Ok(ticket);
        }
        progress.step = Step::FetchTicket;
        let ticket = self
            .collaborators
            .tracker
            .fetch_ticket(&progress.key)
            .with_context(|| format!("fetch ticket {}", progress.key))?;
        if ticket.key != progress.key {
            return Err(anyhow!(
                "tracker returned ticket {} for {}",
                ticket.key,
                progress.key
            ));
        }
        progress.payload.ticket = Some(ticket.clone());
        self.checkpoint(progress, Step::FetchTicket)?;
        Ok(ticket)
    }

    #[instrument(skip_all, fields(target = %target, start = %start))]
    fn process_target(
        &self,
        progress: &mut Progress,
        ticket: &Ticket,
        target: &Target,
        start: Step,
    ) -> Result<Option<Rejection>> {
        progress.payload.target = Some(target.clone());
        let (clone_dir, recloned) = self.clone_step(progress, target, start)?;
        // A fresh clone has none of the executor's changes.
        let start = if recloned { start.min(Step::Execute) } else { start };

        let cheatsheet = match progress.payload.cheatsheet.clone() {
            Some(cheatsheet) => {
                debug!("reusing cheatsheet");
                cheatsheet
            }
            None => {
                progress.step = Step::BuildCheatsheet;
                let outcome = DebateEngine::new(&self.runner, self.config, &self.prompts, &self.store)
                    .run(ticket, &clone_dir)?;
                match outcome.evaluation {
                    Evaluation::Approved { cheatsheet, forced } => {
                        info!(forced, rounds = outcome.rounds.len(), "cheatsheet built");
                        cheatsheet
                    }
                    Evaluation::Rejected { reason, .. } => {
                        self.cleanup(&clone_dir);
                        return Ok(Some(Rejection {
                            phase: RejectionPhase::Debate,
                            reason,
                        }));
                    }
                }
            }
        };
        if start <= Step::BuildCheatsheet {
            progress.payload.cheatsheet = Some(cheatsheet.clone());
            self.checkpoint(progress, Step::BuildCheatsheet)?;
        }

        if start <= Step::Execute {
            progress.step = Step::Execute;
            let outcome = Executor::new(&self.runner, self.config, &self.prompts)
                .execute_with_retries(ticket, target, &cheatsheet, &clone_dir)?;
            progress.payload.validation = None;
            if outcome.status == ExecutionStatus::NoOutput {
                warn!(attempts = outcome.attempts, "executor produced no output");
                progress.payload.execution_excerpt = None;
                self.finish_target(progress, target, &clone_dir, TargetOutcome::NoOutput)?;
                return Ok(None);
            }
            progress.payload.execution_excerpt =
                Some(tail(outcome.result.output.trim(), EXCERPT_BYTES).to_string());
            self.checkpoint(progress, Step::Execute)?;
        }

        progress.step = Step::ValidateExecution;
        let validation = match progress.payload.validation.clone() {
            Some(validation) if start > Step::ValidateExecution => validation,
            _ => {
                let validation = validate_execution(&clone_dir)?;
                progress.payload.validation = Some(validation.clone());
                self.checkpoint(progress, Step::ValidateExecution)?;
                validation
            }
        };
        for issue in &validation.issues {
            warn!(%issue, "execution issue");
        }
        if !validation.passed {
            self.finish_target(progress, target, &clone_dir, TargetOutcome::NoChanges)?;
            return Ok(None);
        }

        progress.step = Step::Ship;
        let feature_branch = progress
            .payload
            .feature_branch
            .clone()
            .unwrap_or_else(|| target.feature_branch(&ticket.key));
        let excerpt = progress.payload.execution_excerpt.clone().unwrap_or_default();
        let pull_request = self
            .collaborators
            .shipper
            .ship(&ShipRequest {
                ticket,
                target,
                clone_dir: &clone_dir,
                feature_branch: &feature_branch,
                validation: &validation,
                execution_excerpt: &excerpt,
            })
            .with_context(|| format!("ship {target}"))?;
        info!(reference = %pull_request.reference, "shipped");
        progress.payload.pull_requests.push(pull_request.clone());
        self.finish_target(
            progress,
            target,
            &clone_dir,
            TargetOutcome::Shipped {
                pull_request,
                issues: validation.issues,
            },
        )?;
        Ok(None)
    }

    /// Clone `target`, or reuse the recorded clone when resuming past the clone step.
    ///
    /// The flag is true when a resume had to clone again.
    fn clone_step(&self, progress: &mut Progress, target: &Target, start: Step) -> Result<(PathBuf, bool)> {
        let resuming = start > Step::Clone;
        if resuming {
            match progress.payload.clone_dir.clone() {
                Some(dir) if dir.is_dir() => return Ok((dir, false)),
                Some(dir) => warn!(dir = %dir.display(), "recorded clone is missing, cloning again"),
                None => warn!("no clone recorded, cloning"),
            }
        }
        progress.step = Step::Clone;
        let dir = self
            .collaborators
            .workspace
            .clone_target(&progress.key, target)
            .with_context(|| format!("clone {target}"))?;
        progress.payload.clone_dir = Some(dir.clone());
        progress.payload.feature_branch = Some(target.feature_branch(&progress.key));
        progress.payload.execution_excerpt = None;
        progress.payload.validation = None;
        self.checkpoint(progress, Step::Clone)?;
        Ok((dir, resuming))
    }

    fn finish_target(
        &self,
        progress: &mut Progress,
        target: &Target,
        clone_dir: &Path,
        outcome: TargetOutcome,
    ) -> Result<()> {
        progress.payload.completed_targets.push(target.clone());
        progress.targets.push(TargetReport {
            target: target.clone(),
            outcome,
        });
        self.checkpoint(progress, progress.step)?;
        self.cleanup(clone_dir);
        Ok(())
    }

    fn cleanup(&self, clone_dir: &Path) {
        if let Err(err) = self.collaborators.workspace.cleanup(clone_dir) {
            warn!(dir = %clone_dir.display(), err = %format!("{err:#}"), "workspace cleanup failed");
        }
    }

    fn checkpoint(&self, progress: &Progress, step: Step) -> Result<()> {
        self.store
            .save(&progress.key, step, &progress.payload)
            .with_context(|| format!("checkpoint {} at {step}", progress.key))?;
        Ok(())
    }

    /// Build the report, deliver it once and clear bookkeeping when everything shipped.
    fn finish(&self, progress: Progress, result: Result<Option<Rejection>>) -> RunReport {
        let outcome = match result {
            Ok(None) => RunOutcome::Completed,
            Ok(Some(rejection)) => {
                info!(phase = ?rejection.phase, reason = %rejection.reason, "ticket rejected");
                RunOutcome::Rejected(rejection)
            }
            Err(err) => {
                error!(step = %progress.step, err = %format!("{err:#}"), "pipeline failed");
                RunOutcome::Failed {
                    step: progress.step,
                    reason: format!("{err:#}"),
                }
            }
        };
        let cheatsheet_path = self
            .store
            .cheatsheet_path(&progress.key)
            .ok()
            .filter(|path| path.exists());
        let report = RunReport {
            ticket_key: progress.key,
            outcome,
            targets: progress.targets,
            pull_requests: progress.payload.pull_requests,
            cheatsheet_path,
        };

        self.deliver(&report);
        if report.succeeded()
            && let Err(err) = self.store.clear(&report.ticket_key)
        {
            warn!(err = %format!("{err:#}"), "failed to clear checkpoint");
        }
        report
    }

    fn deliver(&self, report: &RunReport) {
        let Collaborators {
            tracker, notifier, ..
        } = self.collaborators;
        if let Err(err) = tracker.transition(&report.ticket_key, report.ticket_status()) {
            warn!(err = %format!("{err:#}"), "ticket transition failed");
        }
        if let Err(err) = tracker.post_report(report) {
            warn!(err = %format!("{err:#}"), "posting report failed");
        }
        if let Err(err) = notifier.notify(report) {
            warn!(err = %format!("{err:#}"), "notification failed");
        }
    }
}
