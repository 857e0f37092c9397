//! The [`Invoker`] seam between orchestration and agent subprocesses.
//!
//! Strategies, the debate engine and the executor only ever see
//! `invoke(provider, request) -> InvocationResult`. [`CliInvoker`] is the real
//! implementation; tests use scripted invokers that never spawn processes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{InvocationRequest, InvocationResult, ProviderKind};
use crate::io::config::{ForgeConfig, ProvidersConfig};
use crate::io::invocation_log::LogContext;
use crate::io::process::{LaunchRequest, TimedOut, launch};

/// Runs one provider for one request.
///
/// Failures the caller should compare (non-zero exit, timeout, empty output)
/// come back as failing results. `Err` is reserved for invocations that could
/// not happen at all, such as a missing executable.
pub trait Invoker: Send + Sync {
    fn invoke(&self, provider: ProviderKind, request: &InvocationRequest) -> Result<InvocationResult>;
}

/// Invoker that launches the configured agent CLIs.
#[derive(Debug, Clone)]
pub struct CliInvoker {
    providers: ProvidersConfig,
    log_dir: PathBuf,
    heartbeat_interval: Duration,
    output_limit_bytes: usize,
}

impl CliInvoker {
    pub fn new(config: &ForgeConfig) -> Self {
        Self {
            providers: config.providers.clone(),
            log_dir: config.log_dir.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl Invoker for CliInvoker {
    #[instrument(skip_all, fields(provider = %provider, mode = %request.mode, label = %request.label))]
    fn invoke(&self, provider: ProviderKind, request: &InvocationRequest) -> Result<InvocationResult> {
        let settings = self.providers.get(provider);
        let invocation = provider.build_invocation(request, settings);
        let launch_request = LaunchRequest {
            program: invocation.program,
            args: invocation.args,
            workdir: request.workdir.clone(),
            stdin: invocation.stdin,
            timeout: invocation.timeout,
            heartbeat_interval: self.heartbeat_interval,
            output_limit_bytes: self.output_limit_bytes,
            log: request.ticket_key.as_ref().map(|key| LogContext {
                log_dir: self.log_dir.clone(),
                ticket_key: key.clone(),
                label: request.label.clone(),
                provider: provider.as_str().to_string(),
                prompt: request.prompt.clone(),
            }),
        };

        info!(turn_limit = ?invocation.turn_limit, "invoking agent");
        let spawned = launch(&launch_request, |event| {
            debug!(kind = event.kind().unwrap_or("text"), "agent event");
        });
        let output = match spawned {
            Ok(output) => output,
            Err(err) => {
                if let Some(timed_out) = err.downcast_ref::<TimedOut>() {
                    warn!(elapsed_secs = timed_out.elapsed.as_secs(), "agent timed out");
                    let mut result = InvocationResult::placeholder(provider);
                    result.duration_ms = duration_ms(timed_out.elapsed);
                    return Ok(result);
                }
                return Err(err.context(format!("invoke {provider}")));
            }
        };

        let parsed = provider.parse_output(&output.stdout, output.exit_code);
        let rate_limited = if parsed.output.is_empty() {
            provider.detect_rate_limit(&format!("{}\n{}", output.stdout, output.stderr))
        } else {
            provider.detect_rate_limit(&parsed.output)
        };
        if rate_limited {
            warn!("agent reported a rate limit");
        }

        let result = InvocationResult {
            output: parsed.output,
            completed_normally: parsed.completed_normally,
            exit_code: output.exit_code,
            turn_count: parsed.turn_count,
            rate_limited,
            provider,
            duration_ms: duration_ms(output.duration),
        };
        info!(
            exit_code = ?result.exit_code,
            completed = result.completed_normally,
            output_chars = result.output.len(),
            duration_ms = result.duration_ms,
            "agent finished"
        );
        Ok(result)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
