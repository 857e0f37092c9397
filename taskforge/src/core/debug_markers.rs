//! Best-effort lint for debug leftovers in added lines.
//!
//! The vocabulary is fixed and small; matches are reported as issues only.

use std::sync::LazyLock;

use regex::Regex;

static DEBUG_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"console\.log\(|\bdebugger;|\bdbg!\(|System\.out\.println\(|\bpdb\.set_trace\(|\bbreakpoint\(\)")
        .unwrap()
});

/// A line added by the change-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedLine {
    pub path: String,
    pub text: String,
}

/// Describe every added line that contains a debug marker.
pub fn scan_added_lines(lines: &[AddedLine]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| {
            let found = DEBUG_MARKER_RE.find(&line.text)?;
            Some(format!(
                "{}: debug marker `{}` in added line `{}`",
                line.path,
                found.as_str(),
                line.text.trim()
            ))
        })
        .collect()
}
