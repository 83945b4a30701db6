//! Per-owner mutation locks.
//!
//! Every mutation of an owner's profile runs while holding that owner's
//! lock, so read-compare-write sequences such as a mode transition cannot
//! interleave. Owners never share a lock.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::identity::IdentityKey;

/// Table of per-owner mutexes, created on demand.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: DashMap<IdentityKey, Arc<Mutex<()>>>,
}

impl OwnerLocks {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `owner`, creating it if needed.
    #[must_use]
    pub fn handle(&self, owner: &IdentityKey) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(owner.clone()).or_default().value())
    }

    /// Drops the owner's lock if nobody else holds a handle to it.
    pub fn release(&self, owner: &IdentityKey) {
        self.locks
            .remove_if(owner, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Drops every lock nobody holds a handle to.
    pub fn release_idle(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
