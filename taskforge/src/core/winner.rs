//! Winner selection for the `parallel` strategy.

use crate::core::garbage::is_garbage;
use crate::core::types::InvocationResult;

/// Start/end sentinel pairs that mark canonical structured output.
pub const STRUCTURED_MARKERS: [(&str, &str); 2] = [
    ("===CHEATSHEET_START===", "===CHEATSHEET_END==="),
    ("===EXECUTION_SUMMARY_START===", "===EXECUTION_SUMMARY_END==="),
];

/// Which of the two parallel results was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    Primary,
    Secondary,
}

/// True when `text` contains a complete start/end marker pair in order.
pub fn has_structured_markers(text: &str) -> bool {
    STRUCTURED_MARKERS.iter().any(|(start, end)| {
        text.find(start)
            .is_some_and(|at| text[at + start.len()..].contains(end))
    })
}

/// Choose between two results.
///
/// Structured markers first (longest wins), then normal completion, then the
/// longer non-garbage output. Ties go to the primary.
pub fn pick_winner(primary: &InvocationResult, secondary: &InvocationResult) -> Pick {
    let longer = |a: &InvocationResult, b: &InvocationResult| {
        if b.output.len() > a.output.len() {
            Pick::Secondary
        } else {
            Pick::Primary
        }
    };

    match (
        has_structured_markers(&primary.output),
        has_structured_markers(&secondary.output),
    ) {
        (true, true) => return longer(primary, secondary),
        (true, false) => return Pick::Primary,
        (false, true) => return Pick::Secondary,
        (false, false) => {}
    }

    match (primary.completed_normally, secondary.completed_normally) {
        (true, false) => return Pick::Primary,
        (false, true) => return Pick::Secondary,
        _ => {}
    }

    match (is_garbage(&primary.output), is_garbage(&secondary.output)) {
        (false, false) => longer(primary, secondary),
        (true, false) => Pick::Secondary,
        _ => Pick::Primary,
    }
}
