//! Test-only fakes: a scripted agent invoker, scripted collaborators and git
//! fixtures. Nothing here spawns an agent CLI.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::agents::Invoker;
use crate::core::ticket::Ticket;
use crate::core::types::{InvocationRequest, InvocationResult, ProviderKind, StrategyKind};
use crate::io::config::{ForgeConfig, ModeConfig};
use crate::pipeline::{Notifier, RunReport, TicketStatus, Tracker};

/// A result that completed normally with exit code 0.
pub fn ok_result(provider: ProviderKind, output: &str) -> InvocationResult {
    InvocationResult {
        output: output.to_string(),
        completed_normally: true,
        exit_code: Some(0),
        turn_count: None,
        rate_limited: false,
        provider,
        duration_ms: 1,
    }
}

/// A result with a non-zero exit.
pub fn failed_result(provider: ProviderKind, output: &str) -> InvocationResult {
    InvocationResult {
        completed_normally: false,
        exit_code: Some(1),
        ..ok_result(provider, output)
    }
}

/// A result flagged as rate limited.
pub fn rate_limited_result(provider: ProviderKind) -> InvocationResult {
    InvocationResult {
        rate_limited: true,
        completed_normally: false,
        exit_code: Some(1),
        ..ok_result(provider, "API Error: Rate limit reached for requests")
    }
}

/// One scripted response.
#[derive(Debug, Clone)]
pub struct ScriptStep {
    outcome: Result<InvocationResult, String>,
    delay: Duration,
    write_file: Option<(String, String)>,
}

impl ScriptStep {
    pub fn ok(result: InvocationResult) -> Self {
        Self {
            outcome: Ok(result),
            delay: Duration::ZERO,
            write_file: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            delay: Duration::ZERO,
            write_file: None,
        }
    }

    /// Sleep before answering.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Write `contents` to `rel_path` inside the request's workdir before answering.
    pub fn writes(mut self, rel_path: &str, contents: &str) -> Self {
        self.write_file = Some((rel_path.to_string(), contents.to_string()));
        self
    }
}

/// A recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub provider: ProviderKind,
    pub request: InvocationRequest,
}

type Responder = dyn Fn(ProviderKind, &InvocationRequest) -> ScriptStep + Send + Sync;

/// Invoker that answers from per-provider queues (or a responder closure) and
/// records every call.
#[derive(Default)]
pub struct ScriptedInvoker {
    queues: Mutex<HashMap<ProviderKind, VecDeque<ScriptStep>>>,
    responder: Option<Box<Responder>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call that has no queued step with `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(ProviderKind, &InvocationRequest) -> ScriptStep + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    pub fn push(self, provider: ProviderKind, step: ScriptStep) -> Self {
        self.queues
            .lock()
            .expect("queues lock")
            .entry(provider)
            .or_default()
            .push_back(step);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.request.label)
            .collect()
    }
}

impl Invoker for ScriptedInvoker {
    fn invoke(&self, provider: ProviderKind, request: &InvocationRequest) -> Result<InvocationResult> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            provider,
            request: request.clone(),
        });
        let queued = self
            .queues
            .lock()
            .expect("queues lock")
            .get_mut(&provider)
            .and_then(VecDeque::pop_front);
        let step = match (queued, &self.responder) {
            (Some(step), _) => step,
            (None, Some(responder)) => responder(provider, request),
            (None, None) => {
                return Err(anyhow!(
                    "no scripted response for {provider} ({})",
                    request.label
                ));
            }
        };
        if !step.delay.is_zero() {
            thread::sleep(step.delay);
        }
        if let Some((rel, contents)) = &step.write_file {
            let path = request.workdir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
        }
        step.outcome.map_err(|message| anyhow!(message))
    }
}

/// Tracker serving one ticket and recording transitions and reports.
#[derive(Debug)]
pub struct RecordingTracker {
    ticket: Ticket,
    transitions: Mutex<Vec<TicketStatus>>,
    reports: Mutex<Vec<RunReport>>,
}

impl RecordingTracker {
    pub fn new(ticket: Ticket) -> Self {
        Self {
            ticket,
            transitions: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn transitions(&self) -> Vec<TicketStatus> {
        self.transitions.lock().expect("transitions lock").clone()
    }

    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().expect("reports lock").clone()
    }
}

impl Tracker for RecordingTracker {
    fn fetch_ticket(&self, key: &str) -> Result<Ticket> {
        if key != self.ticket.key {
            return Err(anyhow!("unknown ticket {key}"));
        }
        Ok(self.ticket.clone())
    }

    fn transition(&self, _key: &str, status: TicketStatus) -> Result<()> {
        self.transitions.lock().expect("transitions lock").push(status);
        Ok(())
    }

    fn post_report(&self, report: &RunReport) -> Result<()> {
        self.reports.lock().expect("reports lock").push(report.clone());
        Ok(())
    }
}

/// Notifier that keeps every report it is handed.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    reports: Mutex<Vec<RunReport>>,
}

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().expect("reports lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, report: &RunReport) -> Result<()> {
        self.reports.lock().expect("reports lock").push(report.clone());
        Ok(())
    }
}

/// A workable ticket for `service` on `main`.
pub fn sample_ticket(key: &str, service: &str) -> Ticket {
    Ticket {
        key: key.to_string(),
        summary: "Add retry to webhook sender".to_string(),
        description: "Webhook delivery fails on transient 502 responses from receivers.".to_string(),
        comments: vec!["Back off exponentially, three attempts max.".to_string()],
        affected_systems: vec![service.to_string()],
        target_branches: vec!["main".to_string()],
    }
}

/// Config rooted in `root` with every mode set to `strategy` over claude → codex.
pub fn config_with(root: &Path, strategy: StrategyKind) -> ForgeConfig {
    let mut cfg = ForgeConfig::default().rooted_at(root);
    for mode in [&mut cfg.modes.debate, &mut cfg.modes.evaluate, &mut cfg.modes.execute] {
        *mode = ModeConfig {
            strategy,
            primary: ProviderKind::Claude,
            secondary: Some(ProviderKind::Codex),
            timeout_secs: 60,
            max_turns: 5,
        };
    }
    cfg
}

/// A throwaway git repository with one commit on `main`.
pub struct TestRepo {
    _temp: tempfile::TempDir,
    path: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        Self::named("repo")
    }

    /// Repository at `<tempdir>/<name>`, so `<tempdir>` can serve as a source root.
    pub fn named(name: &str) -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let path = temp.path().join(name);
        fs::create_dir_all(path.join("src"))?;
        fs::write(path.join("README.md"), "# service\n")?;
        fs::write(path.join("src/lib.rs"), "pub fn answer() -> u32 {\n    42\n}\n")?;
        git(&path, &["init", "--quiet", "--initial-branch=main"])?;
        git(&path, &["add", "-A"])?;
        git(&path, &["commit", "--quiet", "-m", "initial"])?;
        Ok(Self { _temp: temp, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Run git with a fixed identity, failing on non-zero exit.
pub fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
