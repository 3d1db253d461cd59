//! Shared-store key layout.
//!
//! These names are the persisted contract between every context (CLI
//! invocations, the watch loop, the UI server) and must stay stable.

/// Advisory lock flag guarding rule-ID mutations.
pub const RULE_IDS_LOCK: &str = "ruleIds_lock";

/// Sorted integer array of rule IDs currently installed in the enforcement
/// engine. Absent means "no active rules" (never an empty array).
pub const ACTIVE_RULE_IDS: &str = "activeRuleIds";

/// Lockout window end, ms since epoch. The single source of truth for
/// "are we still locked".
pub const LOCKOUT_UNTIL: &str = "lockoutUntil";

/// Optional reason the restriction was started (the user's goal).
pub const LOCKOUT_REASON: &str = "lockoutReason";

/// Optional custom message shown while locked.
pub const LOCKOUT_CUSTOM_TEXT: &str = "lockoutCustomText";

/// Focus mode setting: `"off"`, `"cycle"`, or any other value (treated as an
/// active mode). Absent reads as `"off"`.
pub const FOCUS_MODE: &str = "focusMode";

/// Phase sub-schedule mode; relax windows only apply when this is `"cycle"`.
pub const FOCUS_PHASE_MODE: &str = "focusPhaseMode";

/// Start of the current phase, ms since epoch.
pub const FOCUS_PHASE_START: &str = "focusPhaseStart";

/// Message staged for the downstream auto-compose collaborator.
pub const PRIMED_MESSAGE: &str = "primedMessage";

/// Whether a priming message is pending consumption.
pub const REDIRECT_PRIMING: &str = "redirectPriming";

/// Priming expiry, ms since epoch (stale priming is ignored downstream).
pub const PRIME_EXPIRES_AT: &str = "primeExpiresAt";

/// Per-tab original-URL fallback, consumed once by the redirect resolver.
pub fn orig_url_key(tab_id: &str) -> String {
    format!("origUrl_{tab_id}")
}
