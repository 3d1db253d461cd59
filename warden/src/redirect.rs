//! Redirect resolution once a restriction lifts.
//!
//! The pure target decision lives in [`crate::core::redirect`]; this
//! module adds the store-backed parts: the per-tab original-url
//! fallback and the priming side effect.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::core::priming;
use crate::core::redirect::{TargetDecision, decode_url, decide_target};
use crate::io::config::WardenConfig;
use crate::io::store::Store;
use crate::keys;
use crate::lockout;

/// How long a primed message stays valid for its consumer.
const PRIME_EXPIRY_MS: i64 = 120_000;

pub struct RedirectResolver<'a> {
    store: &'a dyn Store,
    config: WardenConfig,
}

impl<'a> RedirectResolver<'a> {
    pub fn new(store: &'a dyn Store, config: WardenConfig) -> Self {
        Self { store, config }
    }

    /// Computes the navigation target for a tab leaving a lifted
    /// restriction. Returns `None` when no usable URL exists; the caller
    /// falls back to "navigate back".
    ///
    /// Restricted targets are overridden to the host's home page, and,
    /// when the preference is on, a priming message is staged for the
    /// downstream auto-compose collaborator. Priming failures only log;
    /// the returned target is unaffected.
    pub fn resolve(&self, original_url_encoded: &str, tab_id: Option<&str>) -> Result<Option<String>> {
        let mut candidate = decode_url(original_url_encoded);
        if candidate.is_empty() {
            if let Some(tab_id) = tab_id {
                candidate = self.take_tab_fallback(tab_id)?.unwrap_or_default();
            }
        }
        if candidate.is_empty() {
            return Ok(None);
        }

        let now_ms = Utc::now().timestamp_millis();
        let decision = decide_target(&candidate, &self.config.domains, now_ms);
        if let TargetDecision::HomeOverride { host, .. } = &decision {
            debug!(host, "restricted target overridden to home page");
            if self.config.redirect.insert_message {
                if let Err(err) = self.prime_message(now_ms) {
                    warn!(error = %format!("{err:#}"), "redirect priming failed");
                }
            }
        }
        Ok(Some(decision.url().to_owned()))
    }

    /// Consumes `origUrl_<tabId>`: the fallback is read once and removed
    /// even when its value turns out unusable.
    fn take_tab_fallback(&self, tab_id: &str) -> Result<Option<String>> {
        let key = keys::orig_url_key(tab_id);
        let Some(value) = self.store.get_one(&key)? else {
            return Ok(None);
        };
        self.store.remove(&[key.as_str()])?;
        Ok(value.as_str().map(str::to_owned))
    }

    fn prime_message(&self, now_ms: i64) -> Result<()> {
        let snapshot = lockout::snapshot(self.store)?;
        let goal = snapshot
            .reason
            .or(snapshot.custom_text)
            .unwrap_or_default();
        let message = priming::render(&self.config.redirect.template, &goal)
            .context("render priming message")?;

        let mut entries = BTreeMap::new();
        entries.insert(keys::PRIMED_MESSAGE.to_owned(), json!(message));
        entries.insert(keys::REDIRECT_PRIMING.to_owned(), json!(true));
        entries.insert(keys::PRIME_EXPIRES_AT.to_owned(), json!(now_ms + PRIME_EXPIRY_MS));
        self.store.set(entries)?;
        Ok(())
    }
}
