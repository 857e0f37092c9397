//! Spawn engine: run one agent CLI subprocess under a wall-clock deadline.
//!
//! stdout is consumed line by line as [`StreamEvent`]s and forwarded to a
//! caller-supplied callback while the child runs. stderr is drained on its own
//! thread with a byte bound. A heartbeat thread logs progress at a fixed
//! interval and is stopped on every exit path.

use std::fmt;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::events::{EventStream, StreamEvent};
use crate::io::invocation_log::{InvocationLog, LogContext, write_invocation_log};

/// Everything needed to launch one subprocess.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub heartbeat_interval: Duration,
    pub output_limit_bytes: usize,
    pub log: Option<LogContext>,
}

impl LaunchRequest {
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured output of a subprocess that exited on its own.
#[derive(Debug, Clone)]
pub struct SpawnOutput {
    /// stdout lines re-joined with `\n`, bounded by `output_limit_bytes`.
    pub stdout: String,
    pub stderr: String,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// Non-blank stdout lines seen.
    pub event_count: usize,
    pub stdout_truncated: usize,
}

/// Returned (inside `anyhow::Error`) when the deadline elapsed and the child was killed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedOut {
    pub program: String,
    pub elapsed: Duration,
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} timed out after {:.1}s",
            self.program,
            self.elapsed.as_secs_f64()
        )
    }
}

impl std::error::Error for TimedOut {}

/// Run the subprocess, invoking `on_event` for each stdout line as it arrives.
///
/// A non-zero exit is not an error; the caller decides what it means. Fails
/// with [`TimedOut`] when the deadline passes, and with a spawn error when the
/// program cannot be started.
#[instrument(skip_all, fields(program = %request.program, timeout_secs = request.timeout.as_secs()))]
pub fn launch<F>(request: &LaunchRequest, mut on_event: F) -> Result<SpawnOutput>
where
    F: FnMut(&StreamEvent),
{
    let start = Instant::now();
    let deadline = start + request.timeout;
    let events = Arc::new(AtomicUsize::new(0));
    let heartbeat = Heartbeat::start(
        request.program.clone(),
        request.heartbeat_interval,
        Arc::clone(&events),
    );

    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .current_dir(&request.workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if request.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    debug!(workdir = %request.workdir.display(), "spawning agent process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn agent process");
            return Err(err).with_context(|| format!("spawn {}", request.program));
        }
    };

    if let Some(input) = request.stdin.clone() {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading its prompt closes the pipe early.
        thread::spawn(move || {
            if let Err(err) = child_stdin.write_all(input.as_bytes()) {
                debug!(err = %err, "stdin closed before prompt was fully written");
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel::<StreamEvent>();
    thread::spawn(move || {
        let mut stream = EventStream::new(BufReader::new(stdout));
        for event in stream.by_ref() {
            if tx.send(event).is_err() {
                return;
            }
        }
        if let Some(err) = stream.take_error() {
            warn!(err = %err, "stdout read failed");
        }
    });
    let limit = request.output_limit_bytes;
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    let mut collected = String::new();
    let mut truncated = 0usize;
    let mut timed_out = false;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) => {
                if !event.is_blank() {
                    events.fetch_add(1, Ordering::Relaxed);
                }
                append_bounded(&mut collected, &mut truncated, event.line(), limit);
                on_event(&event);
            }
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = if timed_out {
        None
    } else {
        let remaining = deadline.saturating_duration_since(Instant::now());
        child
            .wait_timeout(remaining)
            .context("wait for agent process")?
    };

    let event_count = events.load(Ordering::Relaxed);
    let Some(status) = status else {
        let elapsed = start.elapsed();
        warn!(elapsed_ms = elapsed.as_millis() as u64, "agent process timed out, killing");
        child.kill().context("kill agent process")?;
        child.wait().context("wait agent process after kill")?;
        drop(heartbeat);
        record(
            request,
            &InvocationLog {
                command: &request.command_line(),
                stdout: &collected,
                stderr: "",
                exit_code: None,
                duration: elapsed,
                event_count,
                timed_out: true,
            },
        );
        return Err(anyhow::Error::new(TimedOut {
            program: request.program.clone(),
            elapsed,
        }));
    };

    let (stderr, stderr_truncated) = match stderr_handle.join() {
        Ok(result) => result.context("join stderr")?,
        Err(_) => return Err(anyhow!("stderr reader thread panicked")),
    };
    drop(heartbeat);
    let duration = start.elapsed();

    if truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated = truncated, stderr_truncated, "agent output truncated");
    }
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    record(
        request,
        &InvocationLog {
            command: &request.command_line(),
            stdout: &collected,
            stderr: &stderr,
            exit_code: status.code(),
            duration,
            event_count,
            timed_out: false,
        },
    );

    debug!(exit_code = ?status.code(), event_count, duration_ms = duration.as_millis() as u64, "agent process finished");
    Ok(SpawnOutput {
        stdout: collected,
        stderr,
        exit_code: status.code(),
        duration,
        event_count,
        stdout_truncated: truncated,
    })
}

fn record(request: &LaunchRequest, log: &InvocationLog<'_>) {
    let Some(ctx) = &request.log else {
        return;
    };
    match write_invocation_log(ctx, log) {
        Ok(path) => debug!(path = %path.display(), "wrote invocation log"),
        Err(err) => warn!(err = %err, "failed to write invocation log"),
    }
}

fn append_bounded(buf: &mut String, truncated: &mut usize, line: &str, limit: usize) {
    let needed = line.len() + usize::from(!buf.is_empty());
    if buf.len() + needed > limit {
        *truncated += needed;
        return;
    }
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

/// Periodic "still running" log line; stops when dropped.
struct Heartbeat {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Heartbeat {
    fn start(program: String, interval: Duration, events: Arc<AtomicUsize>) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let started = Instant::now();
            while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                info!(
                    program = %program,
                    elapsed_secs = started.elapsed().as_secs(),
                    events = events.load(Ordering::Relaxed),
                    "agent still running"
                );
            }
        });
        Self {
            stop: Some(stop),
            handle: Some(handle),
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> LaunchRequest {
        LaunchRequest {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            workdir: std::env::temp_dir(),
            stdin: None,
            timeout,
            heartbeat_interval: Duration::from_secs(30),
            output_limit_bytes: 1_000_000,
            log: None,
        }
    }

    #[test]
    fn forwards_events_in_order() {
        let request = sh(
            r#"printf '{"type":"a"}\nplain text\n{"type":"b"}'"#,
            Duration::from_secs(10),
        );
        let mut seen = Vec::new();
        let output = launch(&request, |event| seen.push(event.clone())).expect("launch");

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].kind(), Some("a"));
        assert_eq!(seen[1], StreamEvent::Text("plain text".to_string()));
        assert_eq!(seen[2].kind(), Some("b"));
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.event_count, 3);
        assert!(output.stdout.contains("plain text"));
    }

    #[test]
    fn nonzero_exit_is_not_an_error() {
        let request = sh("echo oops >&2; exit 3", Duration::from_secs(10));
        let output = launch(&request, |_| {}).expect("launch");
        assert_eq!(output.exit_code, Some(3));
        assert!(output.stderr.contains("oops"));
    }

    #[test]
    fn prompt_is_delivered_on_stdin() {
        let mut request = sh("cat", Duration::from_secs(10));
        request.stdin = Some("hello agent\n".to_string());
        let output = launch(&request, |_| {}).expect("launch");
        assert_eq!(output.stdout, "hello agent");
    }

    #[test]
    fn deadline_kills_the_child() {
        let request = sh("sleep 5", Duration::from_millis(200));
        let started = Instant::now();
        let err = launch(&request, |_| {}).expect_err("should time out");

        let timed_out = err.downcast_ref::<TimedOut>().expect("typed timeout");
        assert!(timed_out.elapsed >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(err.to_string().contains("timed out after"));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let mut request = sh("", Duration::from_secs(1));
        request.program = "taskforge-no-such-binary".to_string();
        let err = launch(&request, |_| {}).expect_err("spawn should fail");
        assert!(err.downcast_ref::<TimedOut>().is_none());
        assert!(err.to_string().contains("spawn"));
    }

    #[test]
    fn stdout_is_bounded() {
        let mut request = sh("for i in 1 2 3 4 5; do echo 0123456789; done", Duration::from_secs(10));
        request.output_limit_bytes = 25;
        let output = launch(&request, |_| {}).expect("launch");
        assert!(output.stdout.len() <= 25);
        assert!(output.stdout_truncated > 0);
        assert_eq!(output.event_count, 5);
    }

    #[test]
    fn writes_log_when_context_given() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut request = sh("echo done", Duration::from_secs(10));
        request.log = Some(LogContext {
            log_dir: temp.path().to_path_buf(),
            ticket_key: "ABC-1".to_string(),
            label: "debate-r1-proposer".to_string(),
            provider: "claude".to_string(),
            prompt: "plan it".to_string(),
        });
        launch(&request, |_| {}).expect("launch");

        let dir = temp.path().join("ABC-1");
        let files: Vec<_> = std::fs::read_dir(&dir).expect("log dir").collect();
        assert_eq!(files.len(), 1);
    }
}
