//! Local implementations of the pipeline collaborators.
//!
//! - [`FileTracker`]: tickets are `<dir>/<KEY>.json`; status and the final
//!   report are written next to them.
//! - [`LocalCheckout`]: each service is a git repository at
//!   `<source_root>/<service>`, cloned under `<clones_dir>/<KEY>/<target>`.
//! - [`LocalShipper`]: commits the change on the feature branch in the clone
//!   and pushes it back to the source repository.
//! - [`StdoutNotifier`]: prints the report summary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::ticket::{PullRequest, Target, Ticket};
use crate::io::git::Git;
use crate::pipeline::{Notifier, RunReport, ShipRequest, Shipper, TicketStatus, Tracker, Workspace};

const TICKET_SCHEMA: &str = include_str!("../schemas/ticket.schema.json");

/// Ticket tracker backed by a directory of JSON files.
#[derive(Debug, Clone)]
pub struct FileTracker {
    dir: PathBuf,
}

impl FileTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn ticket_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn status_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.status"))
    }

    pub fn report_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.report.json"))
    }
}

impl Tracker for FileTracker {
    fn fetch_ticket(&self, key: &str) -> Result<Ticket> {
        let path = self.ticket_path(key);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read ticket {}", path.display()))?;
        parse_ticket(&contents).with_context(|| format!("invalid ticket {}", path.display()))
    }

    fn transition(&self, key: &str, status: TicketStatus) -> Result<()> {
        let path = self.status_path(key);
        debug!(key, status = status.as_str(), "ticket transition");
        fs::write(&path, format!("{}\n", status.as_str()))
            .with_context(|| format!("write {}", path.display()))
    }

    fn post_report(&self, report: &RunReport) -> Result<()> {
        let path = self.report_path(&report.ticket_key);
        let mut buf = serde_json::to_string_pretty(report).context("serialize report")?;
        buf.push('\n');
        fs::write(&path, buf).with_context(|| format!("write {}", path.display()))
    }
}

/// Parse a ticket after validating it against the bundled JSON Schema.
pub fn parse_ticket(contents: &str) -> Result<Ticket> {
    let value: Value = serde_json::from_str(contents).context("parse ticket json")?;
    let schema: Value = serde_json::from_str(TICKET_SCHEMA).context("parse ticket schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(&value) {
        let messages = compiled
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "ticket schema validation failed: {}",
            messages.join("; ")
        ));
    }
    serde_json::from_value(value).context("deserialize ticket")
}

/// Clones per-service repositories from a local directory.
#[derive(Debug, Clone)]
pub struct LocalCheckout {
    source_root: PathBuf,
    clones_dir: PathBuf,
}

impl LocalCheckout {
    pub fn new(source_root: impl Into<PathBuf>, clones_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            clones_dir: clones_dir.into(),
        }
    }

    pub fn source_repo(&self, service: &str) -> PathBuf {
        self.source_root.join(service)
    }
}

impl Workspace for LocalCheckout {
    #[instrument(skip_all, fields(ticket = ticket_key, target = %target))]
    fn clone_target(&self, ticket_key: &str, target: &Target) -> Result<PathBuf> {
        let source = self.source_repo(&target.service);
        if !source.is_dir() {
            return Err(anyhow!(
                "no repository for service {} at {}",
                target.service,
                source.display()
            ));
        }
        let dest = self.clones_dir.join(ticket_key).join(target.slug());
        if dest.exists() {
            fs::remove_dir_all(&dest)
                .with_context(|| format!("remove stale clone {}", dest.display()))?;
        }
        Git::clone_branch(&source, &target.branch, &dest)?;
        info!(dest = %dest.display(), "target cloned");
        Ok(dest)
    }

    fn cleanup(&self, clone_dir: &Path) -> Result<()> {
        if !clone_dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(clone_dir).with_context(|| format!("remove clone {}", clone_dir.display()))
    }
}

/// Commits on the feature branch and pushes it to the clone's origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalShipper;

impl Shipper for LocalShipper {
    #[instrument(skip_all, fields(target = %request.target, branch = request.feature_branch))]
    fn ship(&self, request: &ShipRequest<'_>) -> Result<PullRequest> {
        let git = Git::new(request.clone_dir);
        if git.current_branch()? != request.feature_branch {
            if git.branch_exists(request.feature_branch)? {
                git.checkout_branch(request.feature_branch)?;
            } else {
                git.checkout_new_branch(request.feature_branch)?;
            }
        }
        git.add_all()?;
        if !git.commit_staged(&commit_message(request))? {
            return Err(anyhow!("nothing to commit in {}", git.workdir().display()));
        }
        git.push("origin", request.feature_branch)?;
        let sha = git.head_short_sha(12)?;
        Ok(PullRequest {
            target: request.target.clone(),
            branch: request.feature_branch.to_string(),
            reference: format!("{}@{sha}", request.feature_branch),
        })
    }
}

fn commit_message(request: &ShipRequest<'_>) -> String {
    let mut message = format!(
        "{}: {}\n\nTarget: {}\n",
        request.ticket.key, request.ticket.summary, request.target
    );
    if !request.validation.changed_files.is_empty() {
        message.push_str("\nChanged files:\n");
        for file in &request.validation.changed_files {
            message.push_str(&format!("- {file}\n"));
        }
    }
    message
}

/// Prints the report summary on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn notify(&self, report: &RunReport) -> Result<()> {
        println!("{}", report.summary());
        Ok(())
    }
}
