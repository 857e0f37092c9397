//! End-to-end tests of the CLI invoker against `sh` scripts standing in for
//! agent CLIs. Unix only.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskforge::agents::{CliInvoker, Invoker};
use taskforge::core::types::{Mode, ProviderKind, StrategyKind};
use taskforge::io::config::ForgeConfig;
use taskforge::strategy::StrategyRunner;
use taskforge::test_support::{TestRepo, config_with};

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

fn config(root: &Path) -> ForgeConfig {
    let mut cfg = config_with(root, StrategyKind::Single);
    cfg.heartbeat_secs = 1;
    cfg
}

#[test]
fn structured_stream_yields_terminal_result_and_writes_a_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(temp.path());
    let claude = script(
        temp.path(),
        "claude.sh",
        r#"cat > /dev/null
echo '{"type":"system","subtype":"init"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"looking around"}]}}'
echo 'plain progress line'
echo '{"type":"result","subtype":"success","result":"final answer","num_turns":3}'"#,
    );
    cfg.providers.claude.command = claude.display().to_string();

    let invoker = CliInvoker::new(&cfg);
    let request = cfg.request(
        Mode::Debate,
        "propose a plan".to_string(),
        temp.path(),
        "debate-r1-proposer",
        Some("ABC-1"),
    );
    let result = invoker.invoke(ProviderKind::Claude, &request).expect("invoke");

    assert_eq!(result.output, "final answer");
    assert_eq!(result.turn_count, Some(3));
    assert!(result.completed_normally);
    assert!(!result.rate_limited);

    let logs: Vec<PathBuf> = fs::read_dir(cfg.log_dir.join("ABC-1"))
        .expect("log dir")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(logs.len(), 1);
    let name = logs[0].file_name().and_then(|n| n.to_str()).expect("name");
    assert!(name.starts_with("ABC-1-debate-r1-proposer-claude-"));
    let log = fs::read_to_string(&logs[0]).expect("log");
    assert!(log.contains("propose a plan"));
    assert!(log.contains("plain progress line"));
    assert!(log.contains("exit_code: 0"));
}

#[test]
fn plain_adapter_flags_rate_limits_on_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(temp.path());
    let codex = script(
        temp.path(),
        "codex.sh",
        "cat > /dev/null\necho 'ERROR: 429 Too Many Requests: rate limit exceeded' >&2\nexit 1",
    );
    cfg.providers.codex.command = codex.display().to_string();

    let request = cfg.request(Mode::Evaluate, "judge".to_string(), temp.path(), "evaluate-r1", None);
    let result = CliInvoker::new(&cfg)
        .invoke(ProviderKind::Codex, &request)
        .expect("invoke");

    assert!(result.output.is_empty());
    assert!(result.rate_limited);
    assert!(!result.completed_normally);
    assert_eq!(result.exit_code, Some(1));
}

#[test]
fn hung_agent_is_killed_at_the_deadline() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(temp.path());
    cfg.modes.debate.timeout_secs = 1;
    let gemini = script(temp.path(), "gemini.sh", "exec sleep 30");
    cfg.providers.gemini.command = gemini.display().to_string();

    let request = cfg.request(Mode::Debate, "prompt".to_string(), temp.path(), "debate-r1-critic", None);
    let started = Instant::now();
    let result = CliInvoker::new(&cfg)
        .invoke(ProviderKind::Gemini, &request)
        .expect("timeout is a failing result, not an error");

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(result.output.is_empty());
    assert!(!result.completed_normally);
    assert_eq!(result.exit_code, None);
    assert!(result.duration_ms >= 1_000);
}

#[test]
fn missing_executable_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(temp.path());
    cfg.providers.claude.command = temp.path().join("no-such-agent").display().to_string();

    let request = cfg.request(Mode::Debate, "prompt".to_string(), temp.path(), "debate-r1-proposer", None);
    let err = CliInvoker::new(&cfg)
        .invoke(ProviderKind::Claude, &request)
        .expect_err("spawn fails");
    assert!(format!("{err:#}").contains("spawn"));
}

/// Write mode, parallel: the primary cannot start, the secondary works in a
/// scratch copy. The secondary's result comes back and the copy is gone.
#[test]
fn parallel_write_mode_returns_survivor_and_removes_scratch_copy() {
    let repo = TestRepo::new().expect("repo");
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = config_with(temp.path(), StrategyKind::Parallel);
    cfg.providers.claude.command = temp.path().join("missing-claude").display().to_string();
    let codex = script(
        temp.path(),
        "codex.sh",
        r#"cat > /dev/null
echo 'scratch' > note.txt
echo '===EXECUTION_SUMMARY_START==='
echo "workdir: $PWD"
echo 'note.txt: created'
echo '===EXECUTION_SUMMARY_END==='"#,
    );
    cfg.providers.codex.command = codex.display().to_string();

    let invoker: Arc<dyn Invoker> = Arc::new(CliInvoker::new(&cfg));
    let runner = StrategyRunner::new(invoker, cfg.modes.clone());
    let request = cfg.request(Mode::Execute, "apply".to_string(), repo.path(), "execute-a1", None);
    let result = runner.run(&request).expect("secondary survives");

    assert_eq!(result.provider, ProviderKind::Codex);
    let scratch = result
        .output
        .lines()
        .find_map(|line| line.strip_prefix("workdir: "))
        .expect("workdir line");
    assert_ne!(Path::new(scratch), repo.path());
    assert!(!Path::new(scratch).exists(), "scratch copy removed");
    assert!(!repo.path().join("note.txt").exists());
}
