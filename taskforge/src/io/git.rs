//! Git adapter for checkout, change inspection and local shipping.
//!
//! Everything goes through the `git` CLI in an explicit working directory, so
//! behaviour matches what a developer sees in the same checkout.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::debug_markers::AddedLine;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `source` at `branch` into `dest` and return a handle on the clone.
    #[instrument(skip_all, fields(branch))]
    pub fn clone_branch(source: &Path, branch: &str, dest: &Path) -> Result<Self> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create clone parent {}", parent.display()))?;
        }
        let output = Command::new("git")
            .arg("clone")
            .arg("--quiet")
            .arg("--branch")
            .arg(branch)
            .arg(source)
            .arg(dest)
            .output()
            .context("spawn git clone")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git clone {} ({branch}) failed: {}",
                source.display(),
                stderr.trim()
            ));
        }
        debug!(dest = %dest.display(), "cloned");
        Ok(Self::new(dest))
    }

    /// Return the current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        Ok(name)
    }

    /// Return the current HEAD short SHA.
    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Checkout an existing branch.
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Files changed relative to HEAD: tracked diff, staged diff and
    /// untracked (non-ignored) files, de-duplicated and sorted.
    pub fn change_set(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for args in [
            &["diff", "--name-only"][..],
            &["diff", "--cached", "--name-only"][..],
            &["ls-files", "--others", "--exclude-standard"][..],
        ] {
            let out = self.run_capture(args)?;
            files.extend(
                out.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Lines added by the current change-set, including whole untracked files.
    pub fn added_lines(&self) -> Result<Vec<AddedLine>> {
        let mut added = Vec::new();
        for args in [&["diff", "-U0"][..], &["diff", "--cached", "-U0"][..]] {
            let out = self.run_capture(args)?;
            added.extend(parse_added_lines(&out));
        }
        let untracked = self.run_capture(&["ls-files", "--others", "--exclude-standard"])?;
        for path in untracked.lines().map(str::trim).filter(|p| !p.is_empty()) {
            let full = self.workdir.join(path);
            // Binary or unreadable files have no lines to scan.
            let Ok(contents) = fs::read_to_string(&full) else {
                debug!(path, "skipping unreadable untracked file");
                continue;
            };
            added.extend(contents.lines().map(|text| AddedLine {
                path: path.to_string(),
                text: text.to_string(),
            }));
        }
        Ok(added)
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&[
            "-c",
            "user.name=taskforge",
            "-c",
            "user.email=taskforge@localhost",
            "commit",
            "--quiet",
            "-m",
            message,
        ])?;
        Ok(true)
    }

    /// Push `branch` to `remote`, creating it there if needed.
    #[instrument(skip(self))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["push", "--quiet", remote, branch])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Extract `+` lines from a unified diff, attributed to their `+++ b/` file.
fn parse_added_lines(diff: &str) -> Vec<AddedLine> {
    let mut added = Vec::new();
    let mut current: Option<String> = None;
    for line in diff.lines() {
        if let Some(path) = line.strip_prefix("+++ ") {
            current = path.strip_prefix("b/").map(str::to_string);
            continue;
        }
        if line.starts_with("diff --git") {
            current = None;
            continue;
        }
        if let Some(text) = line.strip_prefix('+')
            && let Some(path) = &current
        {
            added.push(AddedLine {
                path: path.clone(),
                text: text.to_string(),
            });
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestRepo, git};

    #[test]
    fn parses_added_lines_per_file() {
        let diff = "\
diff --git a/src/a.js b/src/a.js
index 1..2 100644
--- a/src/a.js
+++ b/src/a.js
@@ -1,0 +2 @@
+console.log(x);
diff --git a/gone.txt b/gone.txt
--- a/gone.txt
+++ /dev/null
@@ -1 +0,0 @@
-bye
diff --git a/lib.rs b/lib.rs
--- a/lib.rs
+++ b/lib.rs
@@ -3,0 +4,2 @@
+fn a() {}
+
";
        let added = parse_added_lines(diff);
        assert_eq!(added.len(), 3);
        assert_eq!(added[0].path, "src/a.js");
        assert_eq!(added[0].text, "console.log(x);");
        assert_eq!(added[1].path, "lib.rs");
        assert_eq!(added[2].text, "");
    }

    #[test]
    fn push_publishes_the_branch_to_origin() {
        let repo = TestRepo::new().expect("repo");
        let temp = tempfile::tempdir().expect("tempdir");
        let clone =
            Git::clone_branch(repo.path(), "main", &temp.path().join("clone")).expect("clone");
        clone.checkout_new_branch("feature/x").expect("branch");
        fs::write(clone.workdir().join("note.txt"), "hi\n").expect("write");
        clone.add_all().expect("add");
        assert!(clone.commit_staged("add note").expect("commit"));

        clone.push("origin", "feature/x").expect("push");

        let log = git(repo.path(), &["log", "--format=%s", "feature/x"]).expect("log");
        assert_eq!(log.lines().next(), Some("add note"));
    }

    #[test]
    fn push_to_unknown_remote_fails() {
        let repo = TestRepo::new().expect("repo");
        let err = Git::new(repo.path())
            .push("nowhere", "main")
            .expect_err("no such remote");
        assert!(err.to_string().contains("git push --quiet nowhere main failed"));
    }

    #[test]
    fn deleted_files_contribute_no_added_lines() {
        let diff = "--- a/x\n+++ /dev/null\n@@ -1 +0,0 @@\n-old\n";
        assert!(parse_added_lines(diff).is_empty());
    }
}
