//! Coordination engine for time-boxed access restrictions.
//!
//! Independent contexts (CLI invocations, a watch loop, a monitor UI)
//! share nothing but a persistent key-value store. On top of that store
//! this crate builds an advisory mutex with bounded backoff, a registry
//! of active blocking-rule ids, a wall-clock-driven lockout state
//! machine, and a redirect resolver for the moment a restriction lifts.
//! The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (backoff schedules, state
//!   classification, target decisions, template rendering). No I/O.
//! - **[`io`]**: Side-effecting operations (the store itself, config,
//!   scaffolding, the rule enforcer). Isolated behind traits to enable
//!   doubles in tests.
//!
//! Orchestration modules ([`mutex`], [`registry`], [`lockout`],
//! [`redirect`], [`watch`]) coordinate core logic with I/O to implement
//! the CLI commands and the monitor's API.

pub mod core;
pub mod error;
pub mod io;
pub mod keys;
pub mod lockout;
pub mod logging;
pub mod mutex;
pub mod redirect;
pub mod registry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watch;
