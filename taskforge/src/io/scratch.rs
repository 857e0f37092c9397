//! Throwaway copies of a working directory.
//!
//! A write-capable secondary agent runs inside a [`ScratchCopy`] so that only
//! the primary ever touches the real worktree. The copy is deleted on drop,
//! whichever way the caller leaves.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Recursive copy of a directory, removed when dropped.
#[derive(Debug)]
pub struct ScratchCopy {
    path: PathBuf,
}

impl ScratchCopy {
    /// Copy `source` into a fresh directory under the system temp dir.
    pub fn create(source: &Path) -> Result<Self> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "taskforge-scratch-{}-{}",
            std::process::id(),
            id
        ));
        if path.exists() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("clear stale scratch dir {}", path.display()))?;
        }
        let scratch = Self { path };
        copy_tree(source, &scratch.path)?;
        debug!(source = %source.display(), scratch = %scratch.path.display(), "created scratch copy");
        Ok(scratch)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchCopy {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), err = %err, "failed to remove scratch copy");
        }
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("walk {}", source.display()))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let points_to = fs::read_link(link).with_context(|| format!("read link {}", link.display()))?;
    std::os::unix::fs::symlink(&points_to, target)
        .with_context(|| format!("create link {}", target.display()))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> Result<()> {
    debug!(path = %link.display(), "skipping symlink in scratch copy");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_nested_files_and_removes_on_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("repo");
        fs::create_dir_all(src.join("src/nested")).expect("mkdir");
        fs::write(src.join("README.md"), "hello").expect("write");
        fs::write(src.join("src/nested/lib.rs"), "fn main() {}").expect("write");

        let scratch = ScratchCopy::create(&src).expect("scratch");
        let copy = scratch.path().to_path_buf();
        assert_eq!(fs::read_to_string(copy.join("README.md")).expect("read"), "hello");
        assert!(copy.join("src/nested/lib.rs").is_file());

        fs::write(copy.join("README.md"), "changed").expect("write copy");
        assert_eq!(fs::read_to_string(src.join("README.md")).expect("read"), "hello");

        drop(scratch);
        assert!(!copy.exists());
    }

    #[test]
    fn concurrent_copies_get_distinct_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = ScratchCopy::create(temp.path()).expect("a");
        let b = ScratchCopy::create(temp.path()).expect("b");
        assert_ne!(a.path(), b.path());
    }
}
