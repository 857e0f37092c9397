//! Side-effecting adapters: subprocesses, git, files on disk, prompts.

pub mod checkpoint;
pub mod config;
pub mod events;
pub mod git;
pub mod invocation_log;
pub mod process;
pub mod prompt;
pub mod scratch;
