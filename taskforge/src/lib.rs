//! Ticket-to-change orchestration over coding-agent CLIs.
//!
//! A ticket goes through a fixed step pipeline: two agents debate a plan
//! (the "cheatsheet"), a judge gates it, an executor applies it to each
//! target checkout, and the change is validated and shipped. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (verdict parsing, pre-checks,
//!   winner selection, ticket shape). No I/O.
//! - **[`io`]**: Side effects (subprocesses, git, config, checkpoints,
//!   prompts, logs).
//! - **[`agents`]**: Provider adapters for the claude, codex and gemini CLIs
//!   plus the [`agents::Invoker`] seam.
//!
//! Orchestration modules ([`strategy`], [`debate`], [`evaluate`],
//! [`execute`], [`validate`], [`pipeline`]) combine core logic with I/O.
//! [`local`] provides filesystem-backed collaborators for the binary.

pub mod agents;
pub mod core;
pub mod debate;
pub mod evaluate;
pub mod execute;
pub mod exit_codes;
pub mod io;
pub mod local;
pub mod logging;
pub mod pipeline;
pub mod strategy;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
