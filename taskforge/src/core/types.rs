//! Shared deterministic types for the orchestration core.
//!
//! These types are the contracts between the spawn engine, the provider
//! adapters, the strategies and everything above them. They carry no I/O.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What an invocation is allowed to do in its working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Carry out a vetted plan. The only write-capable mode.
    Execute,
    /// Proposer/critic rounds. Inspection only.
    Debate,
    /// Quality-gate judging. Inspection only.
    Evaluate,
}

impl Mode {
    pub fn writes(self) -> bool {
        matches!(self, Mode::Execute)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Execute => "execute",
            Mode::Debate => "debate",
            Mode::Evaluate => "evaluate",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of supported agent CLIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    Codex,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Claude, ProviderKind::Codex, ProviderKind::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::Codex => "codex",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy for combining one or two provider invocations into one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Single,
    Fallback,
    Parallel,
    Race,
}

/// A fully specified agent invocation. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub mode: Mode,
    pub prompt: String,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub max_turns: u32,
    /// Step label used in per-invocation log file names (e.g. `debate-r2-critic`).
    pub label: String,
    /// Ticket the invocation belongs to; enables per-invocation log files.
    pub ticket_key: Option<String>,
}

impl InvocationRequest {
    /// Same request, rooted in a different working directory.
    pub fn relocated(&self, workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            ..self.clone()
        }
    }
}

/// Outcome of exactly one invocation (or of one strategy run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub output: String,
    pub completed_normally: bool,
    pub exit_code: Option<i32>,
    /// `None` when the provider has no notion of turns.
    pub turn_count: Option<u32>,
    pub rate_limited: bool,
    pub provider: ProviderKind,
    pub duration_ms: u64,
}

impl InvocationResult {
    /// Zero-length failing result standing in for an invocation that errored.
    pub fn placeholder(provider: ProviderKind) -> Self {
        Self {
            output: String::new(),
            completed_normally: false,
            exit_code: None,
            turn_count: None,
            rate_limited: false,
            provider,
            duration_ms: 0,
        }
    }
}

/// One recorded proposer/critic exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateRound {
    pub round: u32,
    pub proposer: String,
    pub critic: String,
}

/// Structural check of what an execute attempt changed on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionValidation {
    /// False only when the change-set is empty.
    pub passed: bool,
    pub changed_files: Vec<String>,
    pub issues: Vec<String>,
}
