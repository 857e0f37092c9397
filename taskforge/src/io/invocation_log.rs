//! Per-invocation audit logs under `<log_dir>/<KEY>/`.
//!
//! One file per subprocess call, named from ticket key, step label, provider
//! and timestamp. Written for humans; nothing reads them back.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

/// Where and under which name an invocation is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub log_dir: PathBuf,
    pub ticket_key: String,
    pub label: String,
    pub provider: String,
    pub prompt: String,
}

/// What happened during the invocation.
#[derive(Debug, Clone)]
pub struct InvocationLog<'a> {
    pub command: &'a str,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub event_count: usize,
    pub timed_out: bool,
}

impl LogContext {
    /// Deterministic file path for a given timestamp string.
    pub fn path_at(&self, timestamp: &str) -> PathBuf {
        let name = format!(
            "{}-{}-{}-{}.log",
            self.ticket_key,
            sanitize(&self.label),
            self.provider,
            timestamp
        );
        self.log_dir.join(&self.ticket_key).join(name)
    }
}

/// Write the log file and return its path.
pub fn write_invocation_log(ctx: &LogContext, log: &InvocationLog<'_>) -> Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    let path = ctx.path_at(&timestamp);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create invocation log dir {}", parent.display()))?;
    }
    write_text(&path, &render(ctx, log))?;
    Ok(path)
}

fn render(ctx: &LogContext, log: &InvocationLog<'_>) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("ticket: {}\n", ctx.ticket_key));
    buf.push_str(&format!("label: {}\n", ctx.label));
    buf.push_str(&format!("provider: {}\n", ctx.provider));
    buf.push_str(&format!("command: {}\n", log.command));
    let exit = log
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "none".to_string());
    buf.push_str(&format!("exit_code: {exit}\n"));
    buf.push_str(&format!("duration_ms: {}\n", log.duration.as_millis()));
    buf.push_str(&format!("events: {}\n", log.event_count));
    if log.timed_out {
        buf.push_str("[timed out]\n");
    }
    buf.push_str("\n=== prompt ===\n");
    buf.push_str(&ctx.prompt);
    buf.push_str("\n=== stdout ===\n");
    buf.push_str(log.stdout);
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(log.stderr);
    buf.push('\n');
    buf
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
