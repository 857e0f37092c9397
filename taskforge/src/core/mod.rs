//! Deterministic, pure logic shared by the orchestration layers.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (outputs, transcripts, added lines) and return deterministic results
//! suitable for tests.

pub mod budget;
pub mod debug_markers;
pub mod garbage;
pub mod precheck;
pub mod step;
pub mod ticket;
pub mod types;
pub mod verdict;
pub mod winner;
