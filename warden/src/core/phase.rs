//! Lockout state classification.
//!
//! There is no stored "current state" field anywhere: state is always a pure
//! function of wall-clock time compared against the stored timestamps.

/// Focus mode setting as persisted under `focusMode`.
///
/// Absent reads as [`FocusMode::Off`]; unrecognized values count as an
/// active mode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FocusMode {
    #[default]
    Off,
    Cycle,
    Other(String),
}

impl FocusMode {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => FocusMode::Off,
            Some("off") => FocusMode::Off,
            Some("cycle") => FocusMode::Cycle,
            Some(other) => FocusMode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FocusMode::Off => "off",
            FocusMode::Cycle => "cycle",
            FocusMode::Other(raw) => raw,
        }
    }

    pub fn is_off(&self) -> bool {
        matches!(self, FocusMode::Off)
    }
}

/// Read-only view of the lockout and phase keys, assembled from the shared
/// store by [`crate::lockout`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockoutSnapshot {
    /// `lockoutUntil`, ms since epoch. `None` means no restriction window.
    pub until_ms: Option<i64>,
    /// `lockoutReason`.
    pub reason: Option<String>,
    /// `lockoutCustomText`.
    pub custom_text: Option<String>,
    /// `focusMode`.
    pub focus_mode: FocusMode,
    /// `focusPhaseMode`; relax sub-windows only apply when this is `"cycle"`.
    pub phase_mode: Option<String>,
    /// `focusPhaseStart`, ms since epoch.
    pub phase_start_ms: Option<i64>,
}

/// Classified lockout state at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No restriction window exists (nothing to do).
    Idle,
    /// Window active, no cycle overlay in effect.
    Active,
    /// Window active, inside a relax sub-window.
    RelaxPhase,
    /// Window active, cycle overlay in its focus sub-window.
    FocusPhase,
    /// Window end reached; cleanup pending.
    Expired,
}

/// Classify the lockout state at `now_ms`.
pub fn classify(now_ms: i64, snapshot: &LockoutSnapshot, relax_minutes: u64) -> LockState {
    let Some(until) = snapshot.until_ms else {
        return LockState::Idle;
    };
    if now_ms >= until {
        return LockState::Expired;
    }
    if snapshot.focus_mode != FocusMode::Cycle {
        return LockState::Active;
    }
    if in_relax_window(now_ms, snapshot, relax_minutes) {
        LockState::RelaxPhase
    } else {
        LockState::FocusPhase
    }
}

/// Short human status string for lightweight polling (badge rendering).
///
/// Deliberately independent of the window: the badge reports the focus mode
/// setting, not the restriction countdown.
pub fn badge(now_ms: i64, snapshot: &LockoutSnapshot, relax_minutes: u64) -> String {
    if snapshot.focus_mode.is_off() {
        return "[Focus mode is off]".to_string();
    }
    if in_relax_window(now_ms, snapshot, relax_minutes) {
        return "[In relax phase]".to_string();
    }
    "[Focus mode active]".to_string()
}

/// Milliseconds until the window ends, clamped at zero. `None` when no
/// window exists.
pub fn remaining_ms(now_ms: i64, snapshot: &LockoutSnapshot) -> Option<i64> {
    snapshot.until_ms.map(|until| until.saturating_sub(now_ms).max(0))
}

fn in_relax_window(now_ms: i64, snapshot: &LockoutSnapshot, relax_minutes: u64) -> bool {
    if snapshot.focus_mode != FocusMode::Cycle {
        return false;
    }
    if snapshot.phase_mode.as_deref() != Some("cycle") {
        return false;
    }
    let Some(start) = snapshot.phase_start_ms else {
        return false;
    };
    // Saturates: classification stays total for any stored start or
    // configured length.
    let relax_ms = i64::try_from(relax_minutes.saturating_mul(60_000)).unwrap_or(i64::MAX);
    now_ms < start.saturating_add(relax_ms)
}
