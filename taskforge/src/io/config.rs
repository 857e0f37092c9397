//! Orchestrator configuration stored in `taskforge.toml`.
//!
//! The loaded value is immutable and passed by reference to everything that
//! needs it; nothing reads configuration from globals.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{InvocationRequest, Mode, ProviderKind, StrategyKind};

pub const CONFIG_FILE_NAME: &str = "taskforge.toml";

/// Orchestrator configuration (TOML).
///
/// Missing fields default to values that work with stock agent CLIs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Checkpoints, cheatsheets and debate rounds. Relative to the workdir.
    pub state_dir: PathBuf,

    /// Per-invocation log files. Relative to the workdir.
    pub log_dir: PathBuf,

    /// Target checkouts made by the local workspace. Relative to the workdir.
    pub clones_dir: PathBuf,

    /// Interval of the "agent still running" log line.
    pub heartbeat_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Upper bound for each variable section (ticket, transcript, plan) of a prompt.
    pub prompt_budget_bytes: usize,

    pub debate: DebateConfig,
    pub execute: ExecuteConfig,
    pub modes: ModesConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DebateConfig {
    pub max_rounds: u32,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self { max_rounds: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecuteConfig {
    /// Total execute attempts per target, including the first.
    pub max_attempts: u32,
}

impl Default for ExecuteConfig {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Provider selection and limits for one mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModeConfig {
    pub strategy: StrategyKind,
    pub primary: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<ProviderKind>,
    pub timeout_secs: u64,
    pub max_turns: u32,
}

impl ModeConfig {
    fn new(timeout_secs: u64, max_turns: u32) -> Self {
        Self {
            strategy: StrategyKind::Fallback,
            primary: ProviderKind::Claude,
            secondary: Some(ProviderKind::Codex),
            timeout_secs,
            max_turns,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModesConfig {
    pub debate: ModeConfig,
    pub evaluate: ModeConfig,
    pub execute: ModeConfig,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            debate: ModeConfig::new(30 * 60, 40),
            evaluate: ModeConfig::new(15 * 60, 20),
            execute: ModeConfig::new(60 * 60, 80),
        }
    }
}

impl ModesConfig {
    pub fn get(&self, mode: Mode) -> &ModeConfig {
        match mode {
            Mode::Debate => &self.debate,
            Mode::Evaluate => &self.evaluate,
            Mode::Execute => &self.execute,
        }
    }
}

/// How to launch one agent CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderSettings {
    /// Executable name or path.
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Appended after the adapter's own arguments.
    pub extra_args: Vec<String>,
}

impl ProviderSettings {
    fn named(command: &str) -> Self {
        Self {
            command: command.to_string(),
            model: None,
            extra_args: Vec::new(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::named("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub claude: ProviderSettings,
    pub codex: ProviderSettings,
    pub gemini: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            claude: ProviderSettings::named("claude"),
            codex: ProviderSettings::named("codex"),
            gemini: ProviderSettings::named("gemini"),
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::Claude => &self.claude,
            ProviderKind::Codex => &self.codex,
            ProviderKind::Gemini => &self.gemini,
        }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".taskforge/state"),
            log_dir: PathBuf::from(".taskforge/logs"),
            clones_dir: PathBuf::from(".taskforge/clones"),
            heartbeat_secs: 30,
            output_limit_bytes: 2_000_000,
            prompt_budget_bytes: 60_000,
            debate: DebateConfig::default(),
            execute: ExecuteConfig::default(),
            modes: ModesConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_secs == 0 {
            return Err(anyhow!("heartbeat_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes < 1_000 {
            return Err(anyhow!("prompt_budget_bytes must be >= 1000"));
        }
        if self.debate.max_rounds == 0 {
            return Err(anyhow!("debate.max_rounds must be > 0"));
        }
        if self.execute.max_attempts == 0 {
            return Err(anyhow!("execute.max_attempts must be > 0"));
        }
        for mode in [Mode::Debate, Mode::Evaluate, Mode::Execute] {
            let cfg = self.modes.get(mode);
            if cfg.timeout_secs == 0 {
                return Err(anyhow!("modes.{mode}.timeout_secs must be > 0"));
            }
            if cfg.max_turns == 0 {
                return Err(anyhow!("modes.{mode}.max_turns must be > 0"));
            }
            if cfg.secondary == Some(cfg.primary) {
                return Err(anyhow!(
                    "modes.{mode}.secondary must differ from primary ({})",
                    cfg.primary
                ));
            }
            // The losing side of a race keeps running; it must not write.
            if mode.writes() && cfg.strategy == StrategyKind::Race {
                return Err(anyhow!("modes.{mode}.strategy cannot be race"));
            }
        }
        for kind in ProviderKind::ALL {
            if self.providers.get(kind).command.trim().is_empty() {
                return Err(anyhow!("providers.{kind}.command must not be empty"));
            }
        }
        Ok(())
    }

    /// Resolve relative state/log/clone directories against `root`.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        for dir in [&mut self.state_dir, &mut self.log_dir, &mut self.clones_dir] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Build the immutable request for one invocation in `mode`.
    pub fn request(
        &self,
        mode: Mode,
        prompt: String,
        workdir: &Path,
        label: &str,
        ticket_key: Option<&str>,
    ) -> InvocationRequest {
        let mode_cfg = self.modes.get(mode);
        InvocationRequest {
            mode,
            prompt,
            workdir: workdir.to_path_buf(),
            timeout: mode_cfg.timeout(),
            max_turns: mode_cfg.max_turns,
            label: label.to_string(),
            ticket_key: ticket_key.map(str::to_string),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ForgeConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        let mut cfg = ForgeConfig::default();
        cfg.modes.evaluate.secondary = None;
        cfg.modes.evaluate.strategy = StrategyKind::Single;
        cfg.providers.claude.model = Some("opus".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[debate]\nmax_rounds = 5\n\n[modes.execute]\nstrategy = \"parallel\"\nprimary = \"codex\"\nsecondary = \"gemini\"\ntimeout_secs = 60\nmax_turns = 10\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.debate.max_rounds, 5);
        assert_eq!(cfg.execute.max_attempts, 2);
        assert_eq!(cfg.modes.execute.strategy, StrategyKind::Parallel);
        assert_eq!(cfg.modes.execute.primary, ProviderKind::Codex);
        assert_eq!(cfg.modes.debate, ModesConfig::default().debate);
    }

    #[test]
    fn rejects_same_primary_and_secondary() {
        let mut cfg = ForgeConfig::default();
        cfg.modes.debate.secondary = Some(ProviderKind::Claude);
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("modes.debate.secondary"));
    }

    #[test]
    fn request_uses_mode_limits() {
        let cfg = ForgeConfig::default();
        let request = cfg.request(
            Mode::Evaluate,
            "judge".to_string(),
            Path::new("/repo"),
            "evaluate-r1",
            Some("ABC-1"),
        );
        assert_eq!(request.timeout, Duration::from_secs(15 * 60));
        assert_eq!(request.max_turns, 20);
        assert_eq!(request.ticket_key.as_deref(), Some("ABC-1"));
    }

    #[test]
    fn rooted_at_keeps_absolute_paths() {
        let mut cfg = ForgeConfig::default();
        cfg.log_dir = PathBuf::from("/var/log/taskforge");
        let cfg = cfg.rooted_at(Path::new("/work"));
        assert_eq!(cfg.state_dir, PathBuf::from("/work/.taskforge/state"));
        assert_eq!(cfg.log_dir, PathBuf::from("/var/log/taskforge"));
    }
}
