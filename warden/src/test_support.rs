//! Test-only enforcer doubles and store seeding helpers.

use std::sync::{Mutex, PoisonError};

use anyhow::{Result, anyhow};
use serde_json::json;

use crate::io::enforcer::{Enforcer, Rule};
use crate::io::store::Store;
use crate::keys;

/// One call observed by [`RecordingEnforcer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcerCall {
    UpdateRules { added: Vec<Rule>, removed: Vec<u32> },
    SetRuleset { ruleset: String, enabled: bool },
}

/// Enforcer that records every call and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingEnforcer {
    calls: Mutex<Vec<EnforcerCall>>,
}

impl RecordingEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EnforcerCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Enforcer for RecordingEnforcer {
    fn update_rules(&self, add: &[Rule], remove_ids: &[u32]) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EnforcerCall::UpdateRules { added: add.to_vec(), removed: remove_ids.to_vec() });
        Ok(())
    }

    fn set_ruleset_enabled(&self, ruleset: &str, enabled: bool) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EnforcerCall::SetRuleset { ruleset: ruleset.to_owned(), enabled });
        Ok(())
    }
}

/// Enforcer whose every call fails, for exercising best-effort paths.
#[derive(Debug, Default)]
pub struct FailingEnforcer;

impl Enforcer for FailingEnforcer {
    fn update_rules(&self, _add: &[Rule], _remove_ids: &[u32]) -> Result<()> {
        Err(anyhow!("enforcer offline"))
    }

    fn set_ruleset_enabled(&self, _ruleset: &str, _enabled: bool) -> Result<()> {
        Err(anyhow!("enforcer offline"))
    }
}

/// Seeds a restriction window ending at `until_ms` with a reason.
pub fn seed_window(store: &dyn Store, until_ms: i64, reason: &str) {
    store
        .set_one(keys::LOCKOUT_UNTIL, json!(until_ms))
        .expect("seed lockoutUntil");
    store
        .set_one(keys::LOCKOUT_REASON, json!(reason))
        .expect("seed lockoutReason");
}

/// Seeds the per-tab original-url fallback consumed by the resolver.
pub fn seed_orig_url(store: &dyn Store, tab_id: &str, url: &str) {
    store
        .set_one(&keys::orig_url_key(tab_id), json!(url))
        .expect("seed origUrl");
}
