//! Execution strategies: combine one or two provider invocations into one result.
//!
//! - `single`: primary only, result passed through.
//! - `fallback`: primary; secondary only when the primary's result is unusable.
//! - `parallel`: both at once, winner picked by [`pick_winner`]. In write mode
//!   the secondary works in a [`ScratchCopy`] and only the primary's result can
//!   be returned when it has one.
//! - `race`: both at once, first acceptable result wins.
//!
//! A mode without a secondary provider always runs as `single`.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::agents::Invoker;
use crate::core::garbage::is_acceptable;
use crate::core::types::{InvocationRequest, InvocationResult, ProviderKind, StrategyKind};
use crate::core::winner::{Pick, pick_winner};
use crate::io::config::ModesConfig;
use crate::io::scratch::ScratchCopy;

/// Runs requests according to the strategy configured for their mode.
#[derive(Clone)]
pub struct StrategyRunner {
    invoker: Arc<dyn Invoker>,
    modes: ModesConfig,
}

impl StrategyRunner {
    pub fn new(invoker: Arc<dyn Invoker>, modes: ModesConfig) -> Self {
        Self { invoker, modes }
    }

    #[instrument(skip_all, fields(mode = %request.mode, label = %request.label))]
    pub fn run(&self, request: &InvocationRequest) -> Result<InvocationResult> {
        let cfg = self.modes.get(request.mode);
        let Some(secondary) = cfg.secondary else {
            return self.invoker.invoke(cfg.primary, request);
        };
        match cfg.strategy {
            StrategyKind::Single => self.invoker.invoke(cfg.primary, request),
            StrategyKind::Fallback => self.fallback(cfg.primary, secondary, request),
            StrategyKind::Parallel => self.parallel(cfg.primary, secondary, request),
            StrategyKind::Race => self.race(cfg.primary, secondary, request),
        }
    }

    fn fallback(
        &self,
        primary: ProviderKind,
        secondary: ProviderKind,
        request: &InvocationRequest,
    ) -> Result<InvocationResult> {
        let first = match self.invoker.invoke(primary, request) {
            Ok(result) if result.completed_normally && is_acceptable(&result) => return Ok(result),
            Ok(result) => {
                info!(
                    %primary,
                    %secondary,
                    rate_limited = result.rate_limited,
                    completed = result.completed_normally,
                    "primary result unusable, falling back"
                );
                result
            }
            Err(err) => {
                warn!(%primary, err = %format!("{err:#}"), "primary failed, falling back");
                return self
                    .invoker
                    .invoke(secondary, request)
                    .map_err(|second| second.context(format!("{primary} also failed: {err:#}")));
            }
        };
        match self.invoker.invoke(secondary, request) {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(%secondary, err = %format!("{err:#}"), "secondary failed, keeping primary result");
                Ok(first)
            }
        }
    }

    fn parallel(
        &self,
        primary: ProviderKind,
        secondary: ProviderKind,
        request: &InvocationRequest,
    ) -> Result<InvocationResult> {
        let writes = request.mode.writes();
        let scratch = if writes {
            Some(ScratchCopy::create(&request.workdir)?)
        } else {
            None
        };
        let secondary_request = match &scratch {
            Some(copy) => request.relocated(copy.path()),
            None => request.clone(),
        };

        let (first, second) = thread::scope(|scope| {
            let handle = scope.spawn(|| self.invoker.invoke(secondary, &secondary_request));
            let first = self.invoker.invoke(primary, request);
            let second = handle
                .join()
                .unwrap_or_else(|_| Err(anyhow!("{secondary} invocation panicked")));
            (first, second)
        });
        drop(scratch);

        match (first, second) {
            (Ok(first), Ok(second)) => match pick_winner(&first, &second) {
                Pick::Primary => Ok(first),
                Pick::Secondary if writes => {
                    info!(%secondary, "secondary won but its changes live in the scratch copy; keeping primary");
                    Ok(first)
                }
                Pick::Secondary => Ok(second),
            },
            (Ok(first), Err(err)) => {
                warn!(%secondary, err = %format!("{err:#}"), "secondary failed");
                Ok(first)
            }
            (Err(err), Ok(second)) => {
                warn!(%primary, err = %format!("{err:#}"), "primary failed");
                Ok(second)
            }
            (Err(first), Err(second)) => {
                Err(first.context(format!("{secondary} also failed: {second:#}")))
            }
        }
    }

    fn race(
        &self,
        primary: ProviderKind,
        secondary: ProviderKind,
        request: &InvocationRequest,
    ) -> Result<InvocationResult> {
        let (tx, rx) = mpsc::channel();
        for provider in [primary, secondary] {
            let tx = tx.clone();
            let invoker = Arc::clone(&self.invoker);
            let request = request.clone();
            // Detached: the loser runs to completion but nobody listens.
            thread::spawn(move || {
                let outcome = invoker.invoke(provider, &request);
                let _ = tx.send((provider, outcome));
            });
        }
        drop(tx);

        let mut finished: Vec<InvocationResult> = Vec::new();
        let mut errors = Vec::new();
        for (provider, outcome) in rx.iter() {
            match outcome {
                Ok(result) if is_acceptable(&result) => {
                    info!(winner = %provider, "race won");
                    return Ok(result);
                }
                Ok(result) => finished.push(result),
                Err(err) => {
                    warn!(%provider, err = %format!("{err:#}"), "race entrant failed");
                    errors.push(err);
                    finished.push(InvocationResult::placeholder(provider));
                }
            }
        }

        if errors.len() == 2 {
            let mut errors = errors.into_iter();
            if let (Some(first), Some(second)) = (errors.next(), errors.next()) {
                return Err(first.context(format!("both race entrants failed; other: {second:#}")));
            }
        }
        finished
            .into_iter()
            .reduce(|best, next| {
                if next.output.len() > best.output.len() {
                    next
                } else {
                    best
                }
            })
            .ok_or_else(|| anyhow!("race finished without results"))
    }
}
