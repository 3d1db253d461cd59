//! Advisory mutex over the shared store.
//!
//! Contexts share no process state, so mutual exclusion rides on a store
//! key: a `{ locked, expires_at }` lease claimed atomically and removed
//! on release. Waiters retry on a bounded doubling backoff. A holder
//! that dies leaves a lease behind; once it expires the next waiter
//! takes the lock over instead of wedging forever.

use std::cell::Cell;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::core::backoff;
use crate::error::LockError;
use crate::io::config::MutexSettings;
use crate::io::store::Store;
use crate::keys;

/// Lease written under the lock key while held.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockLease {
    locked: bool,
    expires_at: i64,
}

enum LeaseState {
    Free,
    Held,
    Stale,
}

fn classify_lease(value: Option<&Value>, now_ms: i64) -> LeaseState {
    let Some(value) = value else {
        return LeaseState::Free;
    };
    match serde_json::from_value::<LockLease>(value.clone()) {
        Ok(lease) if !lease.locked => LeaseState::Free,
        Ok(lease) if lease.expires_at <= now_ms => LeaseState::Stale,
        Ok(_) => LeaseState::Held,
        // An unreadable lease cannot be honored; count it as stale so a
        // bad write does not wedge the key for every future caller.
        Err(_) => LeaseState::Stale,
    }
}

/// Mutex over a single store key.
pub struct StoreMutex<'a> {
    store: &'a dyn Store,
    settings: MutexSettings,
}

impl<'a> StoreMutex<'a> {
    pub fn new(store: &'a dyn Store, settings: MutexSettings) -> Self {
        Self { store, settings }
    }

    /// Runs `f` while holding the lock, releasing it on both the success
    /// and error paths. A panic inside `f` leaves the lease behind; its
    /// expiry bounds how long that can block others.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.acquire()?;
        let out = f();
        self.release();
        out
    }

    fn acquire(&self) -> Result<()> {
        let delays = backoff::schedule(
            self.settings.retries,
            Duration::from_millis(self.settings.initial_delay_ms),
            Duration::from_millis(self.settings.max_delay_ms),
        );
        let attempts = self.settings.retries + 1;
        let mut waited_ms = 0u64;
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = delays[(attempt - 1) as usize];
                thread::sleep(delay);
                waited_ms += delay.as_millis() as u64;
            }
            if self.try_claim()? {
                debug!(key = keys::RULE_IDS_LOCK, attempt, "store lock acquired");
                return Ok(());
            }
        }
        Err(LockError::Timeout { key: keys::RULE_IDS_LOCK, attempts, waited_ms }.into())
    }

    fn try_claim(&self) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();
        // A lease expiry may never land behind now, or the lock would be
        // born stale.
        let lease_ms = i64::try_from(self.settings.lease_ms).unwrap_or(i64::MAX);
        let lease = LockLease {
            locked: true,
            expires_at: now_ms.saturating_add(lease_ms),
        };
        let lease_value = serde_json::to_value(&lease).context("encode lock lease")?;

        let takeover = Cell::new(false);
        let claimed = self
            .store
            .claim(keys::RULE_IDS_LOCK, lease_value, &|current| {
                match classify_lease(current, now_ms) {
                    LeaseState::Free => true,
                    LeaseState::Stale => {
                        takeover.set(true);
                        true
                    }
                    LeaseState::Held => false,
                }
            })
            .context("claim store lock")?;

        if claimed && takeover.get() {
            warn!(key = keys::RULE_IDS_LOCK, "took over a stale lock lease");
        }
        Ok(claimed)
    }

    // Removal is unconditional, so a holder that outlives its lease can
    // remove a successor's claim. Critical sections are a few store round
    // trips against a 30s default lease.
    fn release(&self) {
        if let Err(err) = self.store.remove(&[keys::RULE_IDS_LOCK]) {
            // Not fatal for the caller: the lease expires on its own.
            error!(error = %err, key = keys::RULE_IDS_LOCK, "store lock release failed");
        }
    }
}
