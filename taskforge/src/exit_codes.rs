//! Stable exit codes for taskforge CLI commands.

/// Command succeeded; for `run`/`resume`, every target shipped.
pub const OK: i32 = 0;
/// Invalid input, config, checkpoint state or any other error before a run started.
pub const INVALID: i32 = 1;
/// The ticket or its debate was rejected.
pub const REJECTED: i32 = 2;
/// The run failed at a step, or finished with targets that did not ship.
pub const FAILED: i32 = 3;
