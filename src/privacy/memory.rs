//! In-process privacy store.
//!
//! Each owner's state sits behind its own lock. The directory lock that
//! maps owners to their state is only held long enough to find or insert
//! an entry, so reads and writes for different owners do not contend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::error::{PrivacyError, Result};
use super::store::{apply_writes, PairView, PrivacyStore, ProfileSnapshot, ProfileWrite};
use super::types::{PairFlags, PairRecord, PrivacyMode, PrivacyProfile};
use crate::identity::IdentityKey;

#[derive(Debug, Clone)]
struct OwnerState {
    /// Cleared when the owner is unregistered, so a writer still holding
    /// the old handle cannot resurrect it.
    live: bool,
    mode: PrivacyMode,
    registered_at: i64,
    updated_at: i64,
    records: BTreeMap<IdentityKey, PairFlags>,
}

impl OwnerState {
    const fn new(at: i64) -> Self {
        Self {
            live: true,
            mode: PrivacyMode::PermitAll,
            registered_at: at,
            updated_at: at,
            records: BTreeMap::new(),
        }
    }
}

type OwnerHandle = Arc<RwLock<OwnerState>>;

/// Privacy store kept entirely in memory.
///
/// Useful for servers that rebuild privacy state on start-up and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    owners: RwLock<HashMap<IdentityKey, OwnerHandle>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, owner: &IdentityKey) -> Result<Option<OwnerHandle>> {
        let owners = self
            .owners
            .read()
            .map_err(|e| PrivacyError::lock_poisoned("directory", e))?;
        Ok(owners.get(owner).cloned())
    }

    /// Runs `f` over the owner's live state, or returns `None` if the owner
    /// is unknown.
    fn read_owner<T>(
        &self,
        owner: &IdentityKey,
        f: impl FnOnce(&OwnerState) -> T,
    ) -> Result<Option<T>> {
        let Some(handle) = self.handle(owner)? else {
            return Ok(None);
        };
        let state = handle
            .read()
            .map_err(|e| PrivacyError::lock_poisoned("owner", e))?;
        Ok(state.live.then(|| f(&state)))
    }
}

impl PrivacyStore for MemoryStore {
    fn registration_exists(&self, owner: &IdentityKey) -> Result<bool> {
        Ok(self.read_owner(owner, |_| ())?.is_some())
    }

    fn register(&self, owner: &IdentityKey, at: i64) -> Result<()> {
        let mut owners = self
            .owners
            .write()
            .map_err(|e| PrivacyError::lock_poisoned("directory", e))?;
        if owners.contains_key(owner) {
            return Err(PrivacyError::AlreadyExists(owner.clone()));
        }
        owners.insert(owner.clone(), Arc::new(RwLock::new(OwnerState::new(at))));
        Ok(())
    }

    fn unregister(&self, owner: &IdentityKey) -> Result<()> {
        let handle = {
            let mut owners = self
                .owners
                .write()
                .map_err(|e| PrivacyError::lock_poisoned("directory", e))?;
            owners
                .remove(owner)
                .ok_or_else(|| PrivacyError::UserNotFound(owner.clone()))?
        };
        let mut state = handle
            .write()
            .map_err(|e| PrivacyError::lock_poisoned("owner", e))?;
        state.live = false;
        state.records.clear();
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let drained: Vec<OwnerHandle> = {
            let mut owners = self
                .owners
                .write()
                .map_err(|e| PrivacyError::lock_poisoned("directory", e))?;
            owners.drain().map(|(_, handle)| handle).collect()
        };
        for handle in drained {
            let mut state = handle
                .write()
                .map_err(|e| PrivacyError::lock_poisoned("owner", e))?;
            state.live = false;
            state.records.clear();
        }
        Ok(())
    }

    fn profile(&self, owner: &IdentityKey) -> Result<Option<PrivacyProfile>> {
        self.read_owner(owner, |state| PrivacyProfile {
            owner: owner.clone(),
            mode: state.mode,
            registered_at: state.registered_at,
            updated_at: state.updated_at,
        })
    }

    fn pair(&self, owner: &IdentityKey, target: &IdentityKey) -> Result<Option<PairFlags>> {
        Ok(self
            .read_owner(owner, |state| state.records.get(target).copied())?
            .flatten())
    }

    fn pair_view(&self, owner: &IdentityKey, target: &IdentityKey) -> Result<PairView> {
        Ok(self
            .read_owner(owner, |state| PairView {
                mode: state.mode,
                flags: state.records.get(target).copied().unwrap_or_default(),
            })?
            .unwrap_or_default())
    }

    fn snapshot(&self, owner: &IdentityKey) -> Result<ProfileSnapshot> {
        Ok(self
            .read_owner(owner, |state| ProfileSnapshot {
                owner: owner.clone(),
                registered: true,
                mode: state.mode,
                records: state.records.clone(),
            })?
            .unwrap_or_else(|| ProfileSnapshot::unregistered(owner.clone())))
    }

    fn pairs_owned_by(&self, owner: &IdentityKey) -> Result<Vec<PairRecord>> {
        let snapshot = self.snapshot(owner)?;
        Ok(snapshot
            .records
            .into_iter()
            .map(|(target, flags)| PairRecord {
                owner: owner.clone(),
                target,
                flags,
            })
            .collect())
    }

    fn pairs_targeting(&self, target: &IdentityKey) -> Result<Vec<PairRecord>> {
        let handles: Vec<(IdentityKey, OwnerHandle)> = {
            let owners = self
                .owners
                .read()
                .map_err(|e| PrivacyError::lock_poisoned("directory", e))?;
            owners
                .iter()
                .map(|(owner, handle)| (owner.clone(), Arc::clone(handle)))
                .collect()
        };

        let mut records = Vec::new();
        for (owner, handle) in handles {
            let state = handle
                .read()
                .map_err(|e| PrivacyError::lock_poisoned("owner", e))?;
            if !state.live {
                continue;
            }
            if let Some(flags) = state.records.get(target) {
                records.push(PairRecord {
                    owner,
                    target: target.clone(),
                    flags: *flags,
                });
            }
        }
        records.sort_by(|a, b| a.owner.cmp(&b.owner));
        Ok(records)
    }

    fn apply(&self, owner: &IdentityKey, writes: &[ProfileWrite], at: i64) -> Result<()> {
        let handle = self
            .handle(owner)?
            .ok_or_else(|| PrivacyError::UserNotFound(owner.clone()))?;
        let mut state = handle
            .write()
            .map_err(|e| PrivacyError::lock_poisoned("owner", e))?;
        if !state.live {
            return Err(PrivacyError::UserNotFound(owner.clone()));
        }

        let state = &mut *state;
        apply_writes(owner, &mut state.mode, &mut state.records, writes)?;
        state.updated_at = at;
        Ok(())
    }
}
