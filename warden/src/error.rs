//! Typed errors for the store and mutex seams.
//!
//! Orchestration code wraps these in `anyhow` and adds call-site context;
//! callers that need to react to a specific failure downcast (see
//! [`crate::mutex`]). Redirect decode failures are recovered locally and
//! never appear here.

use std::path::PathBuf;

use thiserror::Error;

/// Persistence failures from the shared store. Fatal to the triggering
/// operation; the engine never retries a store call. Callers must treat a
/// failed mutation as "unknown state, re-query".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is not valid json: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode store file {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value exists but does not have the shape the reader expects,
    /// e.g. `activeRuleIds` holding a string instead of an integer array.
    #[error("store key {key} has unexpected shape (expected {expected})")]
    Shape { key: String, expected: &'static str },
}

/// Failure to acquire the store-backed advisory lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Retries exhausted while another holder kept the flag set. Fatal to
    /// the calling operation; never auto-retried.
    #[error("store lock {key} still held after {attempts} attempts ({waited_ms}ms of backoff)")]
    Timeout {
        key: &'static str,
        attempts: u32,
        waited_ms: u64,
    },
}
