//! Poll-until-expiry loop, the counterpart of the background worker.
//!
//! Re-reads the store on a fixed cadence, reporting each tick through a
//! callback. When the window end is observed the loop resolves the
//! navigation target first (the goal text feeding the priming template
//! lives in keys cleanup deletes) and then runs cleanup.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, instrument};

use crate::core::phase::{self, LockState};
use crate::io::config::WardenConfig;
use crate::io::enforcer::Enforcer;
use crate::io::store::Store;
use crate::lockout::{self, CleanupReport, LockoutEngine};
use crate::redirect::RedirectResolver;

#[derive(Debug, Clone)]
pub struct WatchOptions<'o> {
    /// Encoded original URL to resolve once the window ends.
    pub url: Option<&'o str>,
    /// Tab whose stored original URL serves as fallback.
    pub tab_id: Option<&'o str>,
    pub poll: Duration,
}

#[derive(Debug)]
pub struct WatchOutcome {
    pub ticks: u64,
    /// Navigation target, when expiry produced one.
    pub target: Option<String>,
    /// `None` when the loop exited because no window existed.
    pub report: Option<CleanupReport>,
}

/// Runs the watch loop until the window expires or turns out absent.
#[instrument(skip_all, fields(poll_ms = options.poll.as_millis() as u64))]
pub fn run_watch(
    store: &dyn Store,
    enforcer: &dyn Enforcer,
    config: &WardenConfig,
    options: &WatchOptions<'_>,
    mut on_tick: impl FnMut(&str, Option<i64>),
) -> Result<WatchOutcome> {
    let mut ticks = 0u64;
    loop {
        let snapshot = lockout::snapshot(store)?;
        let now_ms = Utc::now().timestamp_millis();
        match phase::classify(now_ms, &snapshot, config.relax_minutes) {
            LockState::Idle => {
                debug!("no restriction window; watch exiting");
                return Ok(WatchOutcome { ticks, target: None, report: None });
            }
            LockState::Expired => {
                let resolver = RedirectResolver::new(store, config.clone());
                let target = resolver.resolve(options.url.unwrap_or(""), options.tab_id)?;
                let engine = LockoutEngine::new(store, enforcer, config.clone());
                let report = engine.expire_and_cleanup()?;
                return Ok(WatchOutcome { ticks, target, report: Some(report) });
            }
            LockState::Active | LockState::RelaxPhase | LockState::FocusPhase => {
                let badge = phase::badge(now_ms, &snapshot, config.relax_minutes);
                on_tick(&badge, phase::remaining_ms(now_ms, &snapshot));
                ticks += 1;
                thread::sleep(options.poll);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::io::store::MemoryStore;
    use crate::keys;
    use crate::test_support::{RecordingEnforcer, seed_orig_url, seed_window};

    fn options<'o>(tab_id: Option<&'o str>) -> WatchOptions<'o> {
        WatchOptions { url: None, tab_id, poll: Duration::from_millis(10) }
    }

    /// Verifies that watch exits straight away when no window exists.
    #[test]
    fn idle_store_exits_without_ticking() {
        let store = MemoryStore::new();
        let enforcer = RecordingEnforcer::new();

        let outcome = run_watch(
            &store,
            &enforcer,
            &WardenConfig::default(),
            &options(None),
            |_, _| {},
        )
        .expect("watch");

        assert_eq!(outcome.ticks, 0);
        assert_eq!(outcome.target, None);
        assert!(outcome.report.is_none());
    }

    /// Verifies that an already-expired window resolves the target from
    /// the tab fallback before cleanup wipes the goal keys.
    #[test]
    fn expired_window_resolves_then_cleans_up() {
        let store = MemoryStore::new();
        seed_window(&store, Utc::now().timestamp_millis() - 1_000, "write thesis");
        seed_orig_url(&store, "7", "https://chatgpt.com/c/5");
        let enforcer = RecordingEnforcer::new();

        let outcome = run_watch(
            &store,
            &enforcer,
            &WardenConfig::default(),
            &options(Some("7")),
            |_, _| {},
        )
        .expect("watch");

        let target = outcome.target.expect("target");
        assert!(target.starts_with("https://chatgpt.com/?ts="));
        assert!(outcome.report.expect("report").fully_clean());

        // The priming message was rendered while the reason still existed.
        assert_eq!(
            store.get_one(keys::PRIMED_MESSAGE).expect("get"),
            Some(json!("Remember your goal: write thesis"))
        );
        assert_eq!(store.get_one(keys::LOCKOUT_REASON).expect("get"), None);
    }

    /// Verifies that an open window produces ticks until it runs out.
    #[test]
    fn open_window_ticks_until_expiry() {
        let store = MemoryStore::new();
        seed_window(&store, Utc::now().timestamp_millis() + 120, "short");
        let enforcer = RecordingEnforcer::new();

        let mut badges = Vec::new();
        let outcome = run_watch(
            &store,
            &enforcer,
            &WardenConfig::default(),
            &WatchOptions { url: None, tab_id: None, poll: Duration::from_millis(20) },
            |badge, remaining| {
                badges.push((badge.to_owned(), remaining));
            },
        )
        .expect("watch");

        assert!(outcome.ticks >= 1);
        assert_eq!(badges.len() as u64, outcome.ticks);
        let (badge, remaining) = &badges[0];
        assert_eq!(badge, "[Focus mode is off]");
        assert!(remaining.expect("remaining") > 0);
        assert!(outcome.report.expect("report").fully_clean());
    }
}
