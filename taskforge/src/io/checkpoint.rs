//! Per-ticket checkpoint store.
//!
//! Layout under the state dir:
//!
//! ```text
//! <KEY>/checkpoint.json              last completed step + payload
//! <KEY>/cheatsheet.md                the plan, kept across clears
//! <KEY>/debate/round-<n>/proposer.md
//! <KEY>/debate/round-<n>/critic.md
//! ```
//!
//! `checkpoint.json` is replaced wholesale on every save (temp file + rename).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::step::Step;
use crate::core::ticket::{PullRequest, Target, Ticket};
use crate::core::types::{DebateRound, ExecutionValidation};

static TICKET_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Step-specific data carried between steps and across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointPayload {
    pub ticket: Option<Ticket>,
    /// Target in flight when the checkpoint was written.
    pub target: Option<Target>,
    /// Targets already shipped (or finished as failed) in this run.
    pub completed_targets: Vec<Target>,
    pub clone_dir: Option<PathBuf>,
    pub feature_branch: Option<String>,
    pub cheatsheet: Option<String>,
    pub execution_excerpt: Option<String>,
    pub validation: Option<ExecutionValidation>,
    pub pull_requests: Vec<PullRequest>,
}

/// Contents of `checkpoint.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub ticket_key: String,
    /// Last completed step.
    pub step: Step,
    pub step_number: u8,
    /// RFC 3339 UTC timestamp of the save.
    pub updated_at: String,
    pub payload: CheckpointPayload,
}

/// Filesystem-backed checkpoint store rooted at the configured state dir.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-ticket directory; rejects keys that would escape the state dir.
    pub fn ticket_dir(&self, key: &str) -> Result<PathBuf> {
        if !TICKET_KEY_RE.is_match(key) {
            return Err(anyhow!("invalid ticket key '{key}'"));
        }
        Ok(self.root.join(key))
    }

    pub fn checkpoint_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.ticket_dir(key)?.join("checkpoint.json"))
    }

    pub fn cheatsheet_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.ticket_dir(key)?.join("cheatsheet.md"))
    }

    pub fn round_dir(&self, key: &str, round: u32) -> Result<PathBuf> {
        Ok(self
            .ticket_dir(key)?
            .join("debate")
            .join(format!("round-{round}")))
    }

    /// Record `step` as the last completed step, replacing any previous checkpoint.
    ///
    /// A cheatsheet in the payload is also written to `cheatsheet.md`.
    pub fn save(&self, key: &str, step: Step, payload: &CheckpointPayload) -> Result<Checkpoint> {
        if let Some(cheatsheet) = &payload.cheatsheet {
            self.save_cheatsheet(key, cheatsheet)?;
        }
        let checkpoint = Checkpoint {
            ticket_key: key.to_string(),
            step,
            step_number: step.number(),
            updated_at: Utc::now().to_rfc3339(),
            payload: payload.clone(),
        };
        let path = self.checkpoint_path(key)?;
        debug!(path = %path.display(), step = %step, "writing checkpoint");
        let mut buf = serde_json::to_string_pretty(&checkpoint)?;
        buf.push('\n');
        write_atomic(&path, &buf)?;
        Ok(checkpoint)
    }

    /// Load the checkpoint, or `None` when the ticket has none.
    ///
    /// A recorded cheatsheet is refreshed from `cheatsheet.md`, so hand edits
    /// to the file win. A file left by an earlier run is not adopted by a
    /// checkpoint that never recorded a cheatsheet.
    pub fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read checkpoint {}", path.display()))?;
        let mut checkpoint: Checkpoint = serde_json::from_str(&contents)
            .with_context(|| format!("parse checkpoint {}", path.display()))?;
        if checkpoint.payload.cheatsheet.is_some()
            && let Some(cheatsheet) = self.load_cheatsheet(key)?
        {
            checkpoint.payload.cheatsheet = Some(cheatsheet);
        }
        debug!(key, step = %checkpoint.step, "checkpoint loaded");
        Ok(Some(checkpoint))
    }

    /// Remove step bookkeeping. The cheatsheet and debate rounds stay.
    pub fn clear(&self, key: &str) -> Result<()> {
        let path = self.checkpoint_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "cleared checkpoint");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove checkpoint {}", path.display())),
        }
    }

    pub fn save_cheatsheet(&self, key: &str, cheatsheet: &str) -> Result<()> {
        write_atomic(&self.cheatsheet_path(key)?, cheatsheet)
    }

    pub fn load_cheatsheet(&self, key: &str) -> Result<Option<String>> {
        let path = self.cheatsheet_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("read cheatsheet {}", path.display()))?;
        Ok(Some(text))
    }

    /// Persist one debate round's raw outputs.
    pub fn save_round(&self, key: &str, round: &DebateRound) -> Result<()> {
        let dir = self.round_dir(key, round.round)?;
        write_atomic(&dir.join("proposer.md"), &round.proposer)?;
        write_atomic(&dir.join("critic.md"), &round.critic)?;
        debug!(key, round = round.round, "persisted debate round");
        Ok(())
    }

    /// Remove the round files of an earlier debate for `key`.
    pub fn clear_rounds(&self, key: &str) -> Result<()> {
        let dir = self.ticket_dir(key)?.join("debate");
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(path = %dir.display(), "cleared debate rounds");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", dir.display())),
        }
    }

    /// Numbers of the debate rounds on disk, ascending.
    pub fn saved_rounds(&self, key: &str) -> Result<Vec<u32>> {
        let dir = self.ticket_dir(key)?.join("debate");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut rounds = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            let name = entry.file_name();
            if let Some(n) = name
                .to_str()
                .and_then(|name| name.strip_prefix("round-"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                rounds.push(n);
            }
        }
        rounds.sort_unstable();
        Ok(rounds)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CheckpointStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(temp.path().join("state"));
        (temp, store)
    }

    #[test]
    fn save_then_load_returns_step_and_cheatsheet() {
        let (_temp, store) = store();
        let payload = CheckpointPayload {
            cheatsheet: Some("## Plan\n- modify src/a.rs\n".to_string()),
            feature_branch: Some("taskforge/abc-1-main".to_string()),
            ..CheckpointPayload::default()
        };

        store
            .save("ABC-1", Step::BuildCheatsheet, &payload)
            .expect("save");
        let loaded = store.load("ABC-1").expect("load").expect("present");

        assert_eq!(loaded.step, Step::BuildCheatsheet);
        assert_eq!(loaded.step_number, 4);
        let on_disk =
            fs::read_to_string(store.cheatsheet_path("ABC-1").unwrap()).expect("cheatsheet");
        assert_eq!(loaded.payload.cheatsheet.as_deref(), Some(on_disk.as_str()));
        assert_eq!(loaded.payload.feature_branch, payload.feature_branch);
    }

    #[test]
    fn later_save_replaces_earlier_one() {
        let (_temp, store) = store();
        store
            .save("ABC-1", Step::FetchTicket, &CheckpointPayload::default())
            .expect("save");
        store
            .save("ABC-1", Step::Clone, &CheckpointPayload::default())
            .expect("save");
        let loaded = store.load("ABC-1").expect("load").expect("present");
        assert_eq!(loaded.step, Step::Clone);
        assert!(
            !store
                .ticket_dir("ABC-1")
                .unwrap()
                .join("checkpoint.json.tmp")
                .exists()
        );
    }

    #[test]
    fn clear_keeps_cheatsheet_and_rounds() {
        let (_temp, store) = store();
        let payload = CheckpointPayload {
            cheatsheet: Some("plan".to_string()),
            ..CheckpointPayload::default()
        };
        store.save("ABC-1", Step::Notify, &payload).expect("save");
        store
            .save_round(
                "ABC-1",
                &DebateRound {
                    round: 1,
                    proposer: "p".to_string(),
                    critic: "c".to_string(),
                },
            )
            .expect("round");

        store.clear("ABC-1").expect("clear");
        store.clear("ABC-1").expect("clear twice");

        assert!(store.load("ABC-1").expect("load").is_none());
        assert_eq!(
            store.load_cheatsheet("ABC-1").expect("cheatsheet").as_deref(),
            Some("plan")
        );
        assert_eq!(store.saved_rounds("ABC-1").expect("rounds"), vec![1]);
    }

    #[test]
    fn cheatsheet_file_wins_over_checkpoint_copy() {
        let (_temp, store) = store();
        let payload = CheckpointPayload {
            cheatsheet: Some("old".to_string()),
            ..CheckpointPayload::default()
        };
        store.save("ABC-1", Step::BuildCheatsheet, &payload).expect("save");
        store.save_cheatsheet("ABC-1", "edited by hand").expect("edit");

        let loaded = store.load("ABC-1").expect("load").expect("present");
        assert_eq!(loaded.payload.cheatsheet.as_deref(), Some("edited by hand"));
    }

    #[test]
    fn stale_cheatsheet_file_is_not_adopted() {
        let (_temp, store) = store();
        store
            .save_cheatsheet("ABC-1", "plan from an earlier run")
            .expect("old plan");
        store
            .save("ABC-1", Step::Clone, &CheckpointPayload::default())
            .expect("save");

        let loaded = store.load("ABC-1").expect("load").expect("present");
        assert_eq!(loaded.payload.cheatsheet, None);
    }

    #[test]
    fn clear_rounds_removes_every_round() {
        let (_temp, store) = store();
        store.clear_rounds("ABC-1").expect("nothing to clear");
        for round in 1..=2 {
            let record = DebateRound {
                round,
                proposer: "p".to_string(),
                critic: "c".to_string(),
            };
            store.save_round("ABC-1", &record).expect("round");
        }
        store.save_cheatsheet("ABC-1", "plan").expect("cheatsheet");

        store.clear_rounds("ABC-1").expect("clear rounds");

        assert!(store.saved_rounds("ABC-1").expect("rounds").is_empty());
        assert_eq!(
            store.load_cheatsheet("ABC-1").expect("cheatsheet").as_deref(),
            Some("plan")
        );
    }

    #[test]
    fn rejects_path_escaping_keys() {
        let (_temp, store) = store();
        assert!(store.ticket_dir("../etc").is_err());
        assert!(store.ticket_dir("..").is_err());
        assert!(store.ticket_dir("a/b").is_err());
        assert!(store.ticket_dir("ABC-1").is_ok());
    }

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let (_temp, store) = store();
        assert!(store.load("NOPE-9").expect("load").is_none());
    }
}
