//! Structural validation of what an execute attempt left in the workdir.
//!
//! The change-set must be non-empty. Added lines are linted for debug
//! leftovers; those findings are issues, never a hard failure.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::debug_markers::scan_added_lines;
use crate::core::types::ExecutionValidation;
use crate::io::git::Git;

pub const NO_CHANGES: &str = "no files were changed";

#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn validate_execution(workdir: &Path) -> Result<ExecutionValidation> {
    let git = Git::new(workdir);
    let changed_files = git.change_set().context("collect change-set")?;
    if changed_files.is_empty() {
        debug!("empty change-set");
        return Ok(ExecutionValidation {
            passed: false,
            changed_files,
            issues: vec![NO_CHANGES.to_string()],
        });
    }
    let issues = scan_added_lines(&git.added_lines().context("collect added lines")?);
    debug!(changed = changed_files.len(), issues = issues.len(), "validated change-set");
    Ok(ExecutionValidation {
        passed: true,
        changed_files,
        issues,
    })
}
