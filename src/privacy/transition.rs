//! Privacy mode transitions.
//!
//! Changing an owner's mode is a three-step write submitted to the store as
//! one atomic batch:
//!
//! 1. store the new mode,
//! 2. clear the permit and deny flag on every record the owner holds,
//! 3. delete every record left with no flag set.
//!
//! Buddy flags are never touched, so buddy-list membership survives any
//! transition. Requesting the mode the owner already has is a no-op and
//! leaves override flags in place.

use tracing::{debug, info, warn};

use super::error::{PrivacyError, Result};
use super::store::{PrivacyStore, ProfileWrite};
use super::types::{PairRecord, PrivacyMode};
use crate::identity::IdentityKey;

/// Result of a `set_mode` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The owner was already in the requested mode; nothing was written.
    Unchanged(PrivacyMode),
    /// The mode changed and override flags were reset.
    Changed {
        /// Previous mode.
        from: PrivacyMode,
        /// New mode.
        to: PrivacyMode,
    },
}

/// A mode change that needs to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    /// Mode currently stored.
    pub from: PrivacyMode,
    /// Requested mode.
    pub to: PrivacyMode,
}

impl TransitionPlan {
    /// Plans a transition, or returns `None` when `requested` is already
    /// the current mode.
    #[must_use]
    pub fn new(current: PrivacyMode, requested: PrivacyMode) -> Option<Self> {
        (current != requested).then_some(Self {
            from: current,
            to: requested,
        })
    }

    /// The write batch for this transition.
    #[must_use]
    pub fn writes(&self) -> Vec<ProfileWrite> {
        vec![
            ProfileWrite::SetMode(self.to),
            ProfileWrite::ClearOverrides,
            ProfileWrite::PruneEmpty,
        ]
    }
}

/// Checks an owner's records right after a transition: no record may keep
/// an override flag and none may be empty.
///
/// # Errors
///
/// Returns [`PrivacyError::InvariantViolation`] naming the first offending
/// record.
pub fn verify_transitioned(owner: &IdentityKey, records: &[PairRecord]) -> Result<()> {
    for record in records {
        if record.flags.has_overrides() {
            return Err(PrivacyError::InvariantViolation(format!(
                "override flags survived mode transition: {owner} -> {}",
                record.target
            )));
        }
        if record.flags.is_empty() {
            return Err(PrivacyError::InvariantViolation(format!(
                "empty record survived mode transition: {owner} -> {}",
                record.target
            )));
        }
    }
    Ok(())
}

/// Runs a mode transition for a registered owner.
///
/// The caller must hold the owner's mutation lock so that the mode read
/// and the batch write cannot interleave with another transition.
///
/// # Errors
///
/// Returns [`PrivacyError::UserNotFound`] if the owner is not registered,
/// [`PrivacyError::InvariantViolation`] if `verify` is set and the written
/// state is wrong, or any store error.
pub fn run_transition<S: PrivacyStore + ?Sized>(
    store: &S,
    owner: &IdentityKey,
    requested: PrivacyMode,
    at: i64,
    verify: bool,
) -> Result<TransitionOutcome> {
    let current = store
        .profile(owner)?
        .ok_or_else(|| PrivacyError::UserNotFound(owner.clone()))?
        .mode;

    let Some(plan) = TransitionPlan::new(current, requested) else {
        debug!(owner = %owner, mode = %current, "Privacy mode unchanged");
        return Ok(TransitionOutcome::Unchanged(current));
    };

    store.apply(owner, &plan.writes(), at)?;

    if verify {
        let records = store.pairs_owned_by(owner)?;
        if let Err(e) = verify_transitioned(owner, &records) {
            warn!(owner = %owner, error = %e, "Mode transition left inconsistent state");
            return Err(e);
        }
    }

    info!(owner = %owner, from = %plan.from, to = %plan.to, "Privacy mode changed");
    Ok(TransitionOutcome::Changed {
        from: plan.from,
        to: plan.to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::memory::MemoryStore;
    use crate::privacy::types::{PairFlag, PairFlags};

    fn key(s: &str) -> IdentityKey {
        IdentityKey::new(s)
    }

    fn store_with(records: &[(&str, PairFlag)]) -> MemoryStore {
        let store = MemoryStore::new();
        store.register(&key("me"), 0).unwrap();
        let writes: Vec<_> = records
            .iter()
            .map(|(target, flag)| ProfileWrite::SetFlag {
                target: key(target),
                flag: *flag,
                value: true,
            })
            .collect();
        store.apply(&key("me"), &writes, 0).unwrap();
        store
    }

    #[test]
    fn same_mode_has_no_plan() {
        for mode in PrivacyMode::ALL {
            assert!(TransitionPlan::new(mode, mode).is_none());
        }
    }

    #[test]
    fn different_mode_plans_three_steps() {
        let plan = TransitionPlan::new(PrivacyMode::PermitAll, PrivacyMode::DenyAll).unwrap();
        assert_eq!(plan.from, PrivacyMode::PermitAll);
        assert_eq!(plan.to, PrivacyMode::DenyAll);
        assert_eq!(
            plan.writes(),
            vec![
                ProfileWrite::SetMode(PrivacyMode::DenyAll),
                ProfileWrite::ClearOverrides,
                ProfileWrite::PruneEmpty,
            ]
        );
    }

    #[test]
    fn run_transition_resets_overrides_and_keeps_buddies() {
        let store = store_with(&[
            ("buddy", PairFlag::Buddy),
            ("buddy", PairFlag::Deny),
            ("permitted", PairFlag::Permit),
        ]);

        let outcome = run_transition(&store, &key("me"), PrivacyMode::PermitSome, 5, true).unwrap();

        assert_eq!(
            outcome,
            TransitionOutcome::Changed {
                from: PrivacyMode::PermitAll,
                to: PrivacyMode::PermitSome,
            }
        );
        let records = store.pairs_owned_by(&key("me")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, key("buddy"));
        assert_eq!(records[0].flags, PairFlags::BUDDY);
        assert_eq!(
            store.profile(&key("me")).unwrap().unwrap().mode,
            PrivacyMode::PermitSome
        );
    }

    #[test]
    fn run_transition_same_mode_keeps_overrides() {
        let store = store_with(&[("permitted", PairFlag::Permit)]);

        let outcome = run_transition(&store, &key("me"), PrivacyMode::PermitAll, 5, true).unwrap();

        assert_eq!(outcome, TransitionOutcome::Unchanged(PrivacyMode::PermitAll));
        assert!(store
            .pair(&key("me"), &key("permitted"))
            .unwrap()
            .unwrap()
            .is_permitted);
        assert_eq!(store.profile(&key("me")).unwrap().unwrap().updated_at, 0);
    }

    #[test]
    fn run_transition_unregistered_owner_fails() {
        let store = MemoryStore::new();
        let err = run_transition(&store, &key("ghost"), PrivacyMode::DenyAll, 0, true).unwrap_err();
        assert!(matches!(err, PrivacyError::UserNotFound(_)));
    }

    #[test]
    fn verify_flags_surviving_overrides() {
        let records = vec![PairRecord {
            owner: key("me"),
            target: key("them"),
            flags: PairFlags {
                is_permitted: true,
                ..PairFlags::BUDDY
            },
        }];
        let err = verify_transitioned(&key("me"), &records).unwrap_err();
        assert!(matches!(err, PrivacyError::InvariantViolation(_)));
    }

    #[test]
    fn verify_flags_empty_records() {
        let records = vec![PairRecord {
            owner: key("me"),
            target: key("them"),
            flags: PairFlags::default(),
        }];
        let err = verify_transitioned(&key("me"), &records).unwrap_err();
        assert!(err.to_string().contains("empty record"));
    }

    #[test]
    fn verify_accepts_buddy_only_records() {
        let records = vec![PairRecord {
            owner: key("me"),
            target: key("them"),
            flags: PairFlags::BUDDY,
        }];
        assert!(verify_transitioned(&key("me"), &records).is_ok());
    }
}
