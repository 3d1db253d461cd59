//! Deterministic, pure logic for the coordination engine.
//!
//! Core modules must be free of I/O side effects. They take the current
//! wall-clock time and store snapshots as plain arguments and return
//! deterministic outputs suitable for tests.

pub mod backoff;
pub mod phase;
pub mod priming;
pub mod redirect;
