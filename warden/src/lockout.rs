//! Lockout window lifecycle: starting a restriction, classifying its
//! state, and tearing it down once the clock runs out.
//!
//! The engine holds no state of its own beyond a re-entrancy latch;
//! everything it reports is recomputed from the store against the wall
//! clock on every call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::phase::{self, FocusMode, LockState, LockoutSnapshot};
use crate::error::StoreError;
use crate::io::config::WardenConfig;
use crate::io::enforcer::{Enforcer, Rule};
use crate::io::store::Store;
use crate::keys;
use crate::mutex::StoreMutex;
use crate::registry::RuleRegistry;

/// Reads every lockout and phase key in one store round trip.
pub fn snapshot(store: &dyn Store) -> Result<LockoutSnapshot> {
    let entries = store.get(&[
        keys::LOCKOUT_UNTIL,
        keys::LOCKOUT_REASON,
        keys::LOCKOUT_CUSTOM_TEXT,
        keys::FOCUS_MODE,
        keys::FOCUS_PHASE_MODE,
        keys::FOCUS_PHASE_START,
    ])?;
    Ok(LockoutSnapshot {
        until_ms: read_i64(&entries, keys::LOCKOUT_UNTIL)?,
        reason: read_string(&entries, keys::LOCKOUT_REASON)?,
        custom_text: read_string(&entries, keys::LOCKOUT_CUSTOM_TEXT)?,
        focus_mode: FocusMode::parse(read_string(&entries, keys::FOCUS_MODE)?.as_deref()),
        phase_mode: read_string(&entries, keys::FOCUS_PHASE_MODE)?,
        phase_start_ms: read_i64(&entries, keys::FOCUS_PHASE_START)?,
    })
}

fn read_i64(entries: &BTreeMap<String, Value>, key: &str) -> Result<Option<i64>, StoreError> {
    match entries.get(key) {
        None => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| StoreError::Shape {
            key: key.to_owned(),
            expected: "integer milliseconds",
        }),
    }
}

fn read_string(entries: &BTreeMap<String, Value>, key: &str) -> Result<Option<String>, StoreError> {
    match entries.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(|raw| Some(raw.to_owned()))
            .ok_or_else(|| StoreError::Shape { key: key.to_owned(), expected: "string" }),
    }
}

/// Longest window [`LockoutEngine::begin`] accepts, in minutes. Keeps
/// the expiry timestamp inside i64 milliseconds.
pub const MAX_WINDOW_MINUTES: u64 = 366 * 24 * 60;

/// Options for [`LockoutEngine::begin`].
#[derive(Debug, Clone)]
pub struct BeginOptions {
    pub minutes: u64,
    pub reason: Option<String>,
    pub custom_text: Option<String>,
    /// Overlay the window with alternating relax/focus sub-windows.
    pub cycle: bool,
}

#[derive(Debug, Clone)]
pub struct BeginOutcome {
    pub until_ms: i64,
    pub rule_ids: Vec<u32>,
}

/// Result of one cleanup sub-step. `error` holds the rendered failure
/// when the step did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub name: &'static str,
    pub error: Option<String>,
}

/// What `expire_and_cleanup` did, step by step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub steps: Vec<StepOutcome>,
    /// True when another call in this context already ran cleanup.
    pub skipped: bool,
}

impl CleanupReport {
    pub fn fully_clean(&self) -> bool {
        !self.skipped && self.steps.iter().all(|step| step.error.is_none())
    }
}

pub struct LockoutEngine<'a> {
    store: &'a dyn Store,
    enforcer: &'a dyn Enforcer,
    config: WardenConfig,
    // Latches the first cleanup in this context; cross-context callers
    // are serialized by the store mutex instead.
    finishing: AtomicBool,
}

impl<'a> LockoutEngine<'a> {
    pub fn new(store: &'a dyn Store, enforcer: &'a dyn Enforcer, config: WardenConfig) -> Self {
        Self { store, enforcer, config, finishing: AtomicBool::new(false) }
    }

    pub fn snapshot(&self) -> Result<LockoutSnapshot> {
        snapshot(self.store)
    }

    pub fn state(&self) -> Result<LockState> {
        let snapshot = self.snapshot()?;
        Ok(phase::classify(Utc::now().timestamp_millis(), &snapshot, self.config.relax_minutes))
    }

    /// Badge string for lightweight polling. Never mutates anything.
    pub fn status(&self) -> Result<String> {
        let snapshot = self.snapshot()?;
        Ok(phase::badge(Utc::now().timestamp_millis(), &snapshot, self.config.relax_minutes))
    }

    /// Milliseconds left in the current window, if one exists.
    pub fn remaining(&self) -> Result<Option<i64>> {
        let snapshot = self.snapshot()?;
        Ok(phase::remaining_ms(Utc::now().timestamp_millis(), &snapshot))
    }

    /// Starts a restriction window: installs one blocking rule per
    /// configured domain (ids and enforcer kept in step inside the store
    /// mutex), seeds the window keys, and enables the session ruleset.
    #[instrument(skip_all, fields(minutes = options.minutes, cycle = options.cycle))]
    pub fn begin(&self, options: &BeginOptions) -> Result<BeginOutcome> {
        if options.minutes == 0 {
            bail!("lockout length must be at least one minute");
        }
        if options.minutes > MAX_WINDOW_MINUTES {
            bail!("lockout length must be at most {MAX_WINDOW_MINUTES} minutes");
        }
        let now_ms = Utc::now().timestamp_millis();
        let until_ms = now_ms + options.minutes as i64 * 60_000;

        let registry =
            RuleRegistry::new(self.store, self.config.mutex.clone(), self.config.rule_start_id);
        let domains = &self.config.domains;
        let rule_ids = registry.allocate_with(domains.len() as u32, |ids| {
            let rules: Vec<Rule> = ids
                .iter()
                .zip(domains)
                .map(|(id, domain)| Rule { id: *id, domain: domain.clone() })
                .collect();
            self.enforcer.update_rules(&rules, &[])
        })?;

        let mut entries = BTreeMap::new();
        entries.insert(keys::LOCKOUT_UNTIL.to_owned(), json!(until_ms));
        if let Some(reason) = &options.reason {
            entries.insert(keys::LOCKOUT_REASON.to_owned(), json!(reason));
        }
        if let Some(text) = &options.custom_text {
            entries.insert(keys::LOCKOUT_CUSTOM_TEXT.to_owned(), json!(text));
        }
        if options.cycle {
            entries.insert(keys::FOCUS_MODE.to_owned(), json!("cycle"));
            entries.insert(keys::FOCUS_PHASE_MODE.to_owned(), json!("cycle"));
            entries.insert(keys::FOCUS_PHASE_START.to_owned(), json!(now_ms));
        } else {
            entries.insert(keys::FOCUS_MODE.to_owned(), json!("on"));
        }
        self.store.set(entries)?;
        if !options.cycle {
            // Phase keys from an earlier cycle session would otherwise
            // mislabel this window as relaxing.
            self.store.remove(&[keys::FOCUS_PHASE_MODE, keys::FOCUS_PHASE_START])?;
        }

        self.enforcer.set_ruleset_enabled(&self.config.session_ruleset, true)?;
        info!(until_ms, rules = rule_ids.len(), "lockout started");
        Ok(BeginOutcome { until_ms, rule_ids })
    }

    /// Sets the focus mode setting that drives the badge. Turning it off
    /// also drops the phase keys. The restriction window itself is left
    /// alone; ending a window is [`LockoutEngine::expire_and_cleanup`]'s
    /// job.
    pub fn set_mode(&self, mode: &FocusMode) -> Result<()> {
        if mode.is_off() {
            self.store.remove(&[
                keys::FOCUS_MODE,
                keys::FOCUS_PHASE_MODE,
                keys::FOCUS_PHASE_START,
            ])?;
        } else {
            self.store.set_one(keys::FOCUS_MODE, json!(mode.as_str()))?;
            if *mode != FocusMode::Cycle {
                // Phase keys only mean something under the cycle setting.
                self.store.remove(&[keys::FOCUS_PHASE_MODE, keys::FOCUS_PHASE_START])?;
            }
        }
        info!(mode = mode.as_str(), "focus mode set");
        Ok(())
    }

    /// Tears down an ended window: drops rule ids, disables the session
    /// ruleset, and removes the window keys.
    ///
    /// Each step is best-effort; a failure is recorded in the report and
    /// the remaining steps still run. The focus mode setting survives:
    /// only the window itself is deleted. Refuses to run while the
    /// window is still open.
    pub fn expire_and_cleanup(&self) -> Result<CleanupReport> {
        let state = self.state()?;
        if matches!(state, LockState::Active | LockState::RelaxPhase | LockState::FocusPhase) {
            bail!("lockout window still open; refusing cleanup");
        }
        if self.finishing.swap(true, Ordering::SeqCst) {
            debug!("cleanup already ran in this context; skipping");
            return Ok(CleanupReport { steps: Vec::new(), skipped: true });
        }

        let mutex = StoreMutex::new(self.store, self.config.mutex.clone());
        let steps = match mutex.with_lock(|| Ok(self.run_cleanup_steps())) {
            Ok(steps) => steps,
            // A wedged lock must not leave the user locked out forever;
            // run the steps anyway.
            Err(err) => {
                warn!(error = %format!("{err:#}"), "cleanup proceeding without the store lock");
                self.run_cleanup_steps()
            }
        };
        info!(
            failed = steps.iter().filter(|step| step.error.is_some()).count(),
            "lockout cleanup finished"
        );
        Ok(CleanupReport { steps, skipped: false })
    }

    fn run_cleanup_steps(&self) -> Vec<StepOutcome> {
        type Step<'s> = (&'static str, Box<dyn FnOnce() -> Result<()> + 's>);
        let steps: Vec<Step<'_>> = vec![
            ("clear_rule_ids", Box::new(|| self.clear_rule_ids())),
            (
                "disable_ruleset",
                Box::new(|| {
                    self.enforcer.set_ruleset_enabled(&self.config.session_ruleset, false)
                }),
            ),
            (
                "remove_lockout_keys",
                Box::new(|| {
                    self.store.remove(&[
                        keys::LOCKOUT_UNTIL,
                        keys::LOCKOUT_REASON,
                        keys::LOCKOUT_CUSTOM_TEXT,
                    ])?;
                    Ok(())
                }),
            ),
        ];

        steps
            .into_iter()
            .map(|(name, step)| {
                let error = step().err().map(|err| format!("{err:#}"));
                match &error {
                    Some(message) => warn!(step = name, error = %message, "cleanup step failed"),
                    None => debug!(step = name, "cleanup step done"),
                }
                StepOutcome { name, error }
            })
            .collect()
    }

    fn clear_rule_ids(&self) -> Result<()> {
        // Lenient parse: garbage in the set must not stop cleanup.
        let ids: Vec<u32> = match self.store.get_one(keys::ACTIVE_RULE_IDS)? {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => Vec::new(),
        };
        self.enforcer.update_rules(&[], &ids)?;
        self.store.remove(&[keys::ACTIVE_RULE_IDS])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryStore;
    use crate::test_support::{EnforcerCall, FailingEnforcer, RecordingEnforcer};

    fn engine<'a>(
        store: &'a MemoryStore,
        enforcer: &'a dyn Enforcer,
    ) -> LockoutEngine<'a> {
        LockoutEngine::new(store, enforcer, WardenConfig::default())
    }

    fn seed_expired_window(store: &MemoryStore) {
        let now_ms = Utc::now().timestamp_millis();
        store.set_one(keys::LOCKOUT_UNTIL, json!(now_ms - 1_000)).expect("seed until");
        store.set_one(keys::LOCKOUT_REASON, json!("write thesis")).expect("seed reason");
        store.set_one(keys::ACTIVE_RULE_IDS, json!([1, 2])).expect("seed ids");
    }

    /// Verifies that begin seeds the window, installs one rule per
    /// domain, and enables the session ruleset.
    #[test]
    fn begin_installs_rules_and_window() {
        let store = MemoryStore::new();
        let enforcer = RecordingEnforcer::new();
        let engine = engine(&store, &enforcer);

        let before_ms = Utc::now().timestamp_millis();
        let outcome = engine
            .begin(&BeginOptions {
                minutes: 25,
                reason: Some("write thesis".to_owned()),
                custom_text: None,
                cycle: false,
            })
            .expect("begin");

        assert_eq!(outcome.rule_ids, vec![1]);
        assert!(outcome.until_ms >= before_ms + 25 * 60_000);
        assert_eq!(engine.state().expect("state"), LockState::Active);
        assert_eq!(engine.status().expect("status"), "[Focus mode active]");

        let calls = enforcer.calls();
        assert_eq!(
            calls[0],
            EnforcerCall::UpdateRules {
                added: vec![Rule { id: 1, domain: "chatgpt.com".to_owned() }],
                removed: vec![],
            }
        );
        assert_eq!(
            calls[1],
            EnforcerCall::SetRuleset { ruleset: "session_rules".to_owned(), enabled: true }
        );
    }

    /// Verifies that a cycle window starts in the relax phase.
    #[test]
    fn begin_cycle_starts_relaxed() {
        let store = MemoryStore::new();
        let enforcer = RecordingEnforcer::new();
        let engine = engine(&store, &enforcer);

        engine
            .begin(&BeginOptions { minutes: 60, reason: None, custom_text: None, cycle: true })
            .expect("begin");

        assert_eq!(engine.state().expect("state"), LockState::RelaxPhase);
        assert_eq!(engine.status().expect("status"), "[In relax phase]");
    }

    /// Verifies that a plain window clears phase keys left by an earlier
    /// cycle session.
    #[test]
    fn begin_clears_stale_phase_keys() {
        let store = MemoryStore::new();
        store.set_one(keys::FOCUS_PHASE_MODE, json!("cycle")).expect("seed");
        store.set_one(keys::FOCUS_PHASE_START, json!(0)).expect("seed");
        let enforcer = RecordingEnforcer::new();

        engine(&store, &enforcer)
            .begin(&BeginOptions { minutes: 10, reason: None, custom_text: None, cycle: false })
            .expect("begin");

        assert_eq!(store.get_one(keys::FOCUS_PHASE_MODE).expect("get"), None);
        assert_eq!(store.get_one(keys::FOCUS_MODE).expect("get"), Some(json!("on")));
    }

    /// Verifies that begin rejects window lengths outside the supported
    /// range before touching the enforcer or the store.
    #[test]
    fn begin_rejects_out_of_range_minutes() {
        let store = MemoryStore::new();
        let enforcer = RecordingEnforcer::new();
        let engine = engine(&store, &enforcer);

        for minutes in [0, MAX_WINDOW_MINUTES + 1, u64::MAX / 2] {
            let err = engine
                .begin(&BeginOptions { minutes, reason: None, custom_text: None, cycle: false })
                .unwrap_err();
            assert!(err.to_string().contains("lockout length"), "got {err:#}");
        }
        assert!(enforcer.calls().is_empty());
        assert_eq!(store.get_one(keys::LOCKOUT_UNTIL).expect("get"), None);
    }

    /// Verifies that turning the mode off restores the off badge and
    /// drops the phase keys while the window keeps running.
    #[test]
    fn set_mode_off_restores_off_badge() {
        let store = MemoryStore::new();
        let enforcer = RecordingEnforcer::new();
        let engine = engine(&store, &enforcer);
        engine
            .begin(&BeginOptions { minutes: 25, reason: None, custom_text: None, cycle: true })
            .expect("begin");

        engine.set_mode(&FocusMode::Off).expect("set mode");

        assert_eq!(engine.status().expect("status"), "[Focus mode is off]");
        assert_eq!(engine.state().expect("state"), LockState::Active);
        assert_eq!(store.get_one(keys::FOCUS_MODE).expect("get"), None);
        assert_eq!(store.get_one(keys::FOCUS_PHASE_MODE).expect("get"), None);
        assert_eq!(store.get_one(keys::FOCUS_PHASE_START).expect("get"), None);
    }

    /// Verifies that setting a non-cycle mode clears stale phase keys the
    /// same way a plain begin does.
    #[test]
    fn set_mode_on_clears_stale_phase_keys() {
        let store = MemoryStore::new();
        store.set_one(keys::FOCUS_PHASE_MODE, json!("cycle")).expect("seed");
        store.set_one(keys::FOCUS_PHASE_START, json!(0)).expect("seed");
        let enforcer = RecordingEnforcer::new();
        let engine = engine(&store, &enforcer);

        engine.set_mode(&FocusMode::parse(Some("on"))).expect("set mode");

        assert_eq!(store.get_one(keys::FOCUS_MODE).expect("get"), Some(json!("on")));
        assert_eq!(store.get_one(keys::FOCUS_PHASE_MODE).expect("get"), None);
        assert_eq!(engine.status().expect("status"), "[Focus mode active]");
    }

    /// Verifies the empty-store status and state.
    #[test]
    fn empty_store_is_idle_and_off() {
        let store = MemoryStore::new();
        let enforcer = RecordingEnforcer::new();
        let engine = engine(&store, &enforcer);

        assert_eq!(engine.state().expect("state"), LockState::Idle);
        assert_eq!(engine.status().expect("status"), "[Focus mode is off]");
    }

    /// Verifies that cleanup after expiry clears the store and enforcer.
    #[test]
    fn cleanup_clears_window_rules_and_ruleset() {
        let store = MemoryStore::new();
        seed_expired_window(&store);
        let enforcer = RecordingEnforcer::new();
        let engine = engine(&store, &enforcer);

        let report = engine.expire_and_cleanup().expect("cleanup");
        assert!(report.fully_clean());
        assert_eq!(report.steps.len(), 3);

        assert_eq!(store.get_one(keys::LOCKOUT_UNTIL).expect("get"), None);
        assert_eq!(store.get_one(keys::LOCKOUT_REASON).expect("get"), None);
        assert_eq!(store.get_one(keys::ACTIVE_RULE_IDS).expect("get"), None);

        let calls = enforcer.calls();
        assert_eq!(
            calls[0],
            EnforcerCall::UpdateRules { added: vec![], removed: vec![1, 2] }
        );
        assert_eq!(
            calls[1],
            EnforcerCall::SetRuleset { ruleset: "session_rules".to_owned(), enabled: false }
        );
    }

    /// Verifies that cleanup refuses to run while the window is open.
    #[test]
    fn cleanup_refuses_while_active() {
        let store = MemoryStore::new();
        let until = Utc::now().timestamp_millis() + 60_000;
        store.set_one(keys::LOCKOUT_UNTIL, json!(until)).expect("seed");
        let enforcer = RecordingEnforcer::new();

        let err = engine(&store, &enforcer).expire_and_cleanup().unwrap_err();
        assert!(err.to_string().contains("still open"));
        assert_eq!(store.get_one(keys::LOCKOUT_UNTIL).expect("get"), Some(json!(until)));
    }

    /// Verifies that enforcer failures are recorded per step while the
    /// store keys are still removed.
    #[test]
    fn cleanup_continues_past_failing_steps() {
        let store = MemoryStore::new();
        seed_expired_window(&store);
        let enforcer = FailingEnforcer;
        let engine = engine(&store, &enforcer);

        let report = engine.expire_and_cleanup().expect("cleanup");
        assert!(!report.fully_clean());
        assert!(report.steps[0].error.is_some());
        assert!(report.steps[1].error.is_some());
        assert!(report.steps[2].error.is_none());

        // The window keys went away even though the enforcer was down.
        assert_eq!(store.get_one(keys::LOCKOUT_UNTIL).expect("get"), None);
        // The rule ids stay behind for a later retry to drop.
        assert_eq!(store.get_one(keys::ACTIVE_RULE_IDS).expect("get"), Some(json!([1, 2])));
    }

    /// Verifies that the second cleanup call in one context is latched.
    #[test]
    fn cleanup_latches_against_reentry() {
        let store = MemoryStore::new();
        seed_expired_window(&store);
        let enforcer = RecordingEnforcer::new();
        let engine = engine(&store, &enforcer);

        let first = engine.expire_and_cleanup().expect("first");
        let second = engine.expire_and_cleanup().expect("second");

        assert!(!first.skipped);
        assert!(second.skipped);
        assert!(second.steps.is_empty());
    }

    /// Verifies that cleanup with no window at all still succeeds and
    /// clears leftovers.
    #[test]
    fn cleanup_on_idle_clears_leftovers() {
        let store = MemoryStore::new();
        store.set_one(keys::ACTIVE_RULE_IDS, json!([7])).expect("seed");
        let enforcer = RecordingEnforcer::new();

        let report = engine(&store, &enforcer).expire_and_cleanup().expect("cleanup");
        assert!(report.fully_clean());
        assert_eq!(store.get_one(keys::ACTIVE_RULE_IDS).expect("get"), None);
    }

    /// Verifies that the focus mode setting survives cleanup.
    #[test]
    fn cleanup_keeps_focus_mode_setting() {
        let store = MemoryStore::new();
        seed_expired_window(&store);
        store.set_one(keys::FOCUS_MODE, json!("cycle")).expect("seed");
        store.set_one(keys::FOCUS_PHASE_MODE, json!("cycle")).expect("seed");
        let enforcer = RecordingEnforcer::new();

        engine(&store, &enforcer).expire_and_cleanup().expect("cleanup");

        assert_eq!(store.get_one(keys::FOCUS_MODE).expect("get"), Some(json!("cycle")));
        assert_eq!(
            store.get_one(keys::FOCUS_PHASE_MODE).expect("get"),
            Some(json!("cycle"))
        );
    }

    /// Verifies that a malformed until value surfaces as a shape error.
    #[test]
    fn malformed_until_is_a_shape_error() {
        let store = MemoryStore::new();
        store.set_one(keys::LOCKOUT_UNTIL, json!("soon")).expect("seed");
        let enforcer = RecordingEnforcer::new();

        let err = engine(&store, &enforcer).state().unwrap_err();
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::Shape { key, .. }) => assert_eq!(key, keys::LOCKOUT_UNTIL),
            _ => panic!("expected shape error, got {err:#}"),
        }
    }
}
