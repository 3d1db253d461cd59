//! Registry of active blocking-rule ids.
//!
//! The set lives under one store key as a sorted integer array. Reads
//! are lock-free; every mutation runs inside the store mutex so the set
//! and the enforcement engine never drift apart. An empty set is stored
//! as an absent key, so "no rules" has exactly one representation.

use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::error::StoreError;
use crate::io::config::MutexSettings;
use crate::io::store::Store;
use crate::keys;
use crate::mutex::StoreMutex;

pub struct RuleRegistry<'a> {
    store: &'a dyn Store,
    mutex: StoreMutex<'a>,
    start_id: u32,
}

impl<'a> RuleRegistry<'a> {
    pub fn new(store: &'a dyn Store, settings: MutexSettings, start_id: u32) -> Self {
        let mutex = StoreMutex::new(store, settings);
        Self { store, mutex, start_id }
    }

    /// Snapshot of the active set. Deliberately lock-free: read-only
    /// consumers tolerate a stale view one store round-trip old.
    pub fn get_active(&self) -> Result<BTreeSet<u32>> {
        read_active(self.store)
    }

    /// Reserves `count` consecutive ids above everything currently
    /// active and persists them as part of the set.
    pub fn allocate(&self, count: u32) -> Result<Vec<u32>> {
        self.allocate_with(count, |_| Ok(()))
    }

    /// Like [`allocate`](Self::allocate), but runs `install` with the
    /// reserved ids inside the critical section, before the set is
    /// persisted. If `install` fails the set is left unchanged, so the
    /// registry never records ids whose rules were not installed.
    pub fn allocate_with(
        &self,
        count: u32,
        install: impl FnOnce(&[u32]) -> Result<()>,
    ) -> Result<Vec<u32>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.mutex.with_lock(|| {
            let mut active = read_active(self.store)?;
            let next = match active.iter().next_back() {
                Some(max) => max
                    .checked_add(1)
                    .ok_or_else(|| anyhow!("rule id space exhausted"))?,
                None => self.start_id,
            };
            let last = next
                .checked_add(count - 1)
                .ok_or_else(|| anyhow!("rule id space exhausted"))?;
            let ids: Vec<u32> = (next..=last).collect();
            install(&ids)?;
            active.extend(ids.iter().copied());
            write_active(self.store, &active)?;
            Ok(ids)
        })
    }

    /// Drops `ids` from the active set. Releasing the last id removes
    /// the store key entirely.
    pub fn release(&self, ids: &[u32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.mutex.with_lock(|| {
            let mut active = read_active(self.store)?;
            for id in ids {
                active.remove(id);
            }
            write_active(self.store, &active)
        })
    }

    /// Unconditionally replaces the active set. An empty `ids` removes
    /// the store key.
    pub fn update(&self, ids: &[u32]) -> Result<()> {
        self.mutex.with_lock(|| {
            let active: BTreeSet<u32> = ids.iter().copied().collect();
            write_active(self.store, &active)
        })
    }
}

fn read_active(store: &dyn Store) -> Result<BTreeSet<u32>> {
    let Some(value) = store.get_one(keys::ACTIVE_RULE_IDS)? else {
        return Ok(BTreeSet::new());
    };
    let ids = parse_ids(&value)?;
    Ok(ids)
}

fn parse_ids(value: &Value) -> Result<BTreeSet<u32>, StoreError> {
    let shape = || StoreError::Shape {
        key: keys::ACTIVE_RULE_IDS.to_owned(),
        expected: "array of rule ids",
    };
    let Value::Array(items) = value else {
        return Err(shape());
    };
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(shape)
        })
        .collect()
}

fn write_active(store: &dyn Store, active: &BTreeSet<u32>) -> Result<()> {
    if active.is_empty() {
        store.remove(&[keys::ACTIVE_RULE_IDS])?;
        return Ok(());
    }
    let value = serde_json::to_value(active).context("encode active rule ids")?;
    store.set_one(keys::ACTIVE_RULE_IDS, value)?;
    Ok(())
}
