//! Persistence contract for privacy profiles.
//!
//! The engine talks to durable state only through [`PrivacyStore`]. A store
//! keeps two things per owner: the privacy mode (plus registration
//! timestamps) and a set of `(owner, target)` pair records with three
//! flags each. All identities handed to a store are already normalized.
//!
//! Writes go through [`PrivacyStore::apply`], which takes a batch of
//! [`ProfileWrite`]s for one owner and applies all of them or none. Reads
//! that must be mutually consistent (mode plus records) come back from a
//! single call: [`PrivacyStore::pair_view`] or [`PrivacyStore::snapshot`].

use std::collections::BTreeMap;

use super::error::{PrivacyError, Result};
use super::types::{PairFlag, PairFlags, PairRecord, PrivacyMode, PrivacyProfile};
use crate::identity::IdentityKey;

/// One step of an atomic write batch against a single owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileWrite {
    /// Set or clear one flag on the `(owner, target)` record.
    ///
    /// Setting creates the record if needed. Clearing requires the record
    /// to exist and never deletes it, even when all flags end up false.
    SetFlag {
        /// Record target.
        target: IdentityKey,
        /// Flag to change.
        flag: PairFlag,
        /// New value.
        value: bool,
    },
    /// Store a new privacy mode.
    SetMode(PrivacyMode),
    /// Clear the permit and deny flags on every record of the owner.
    ClearOverrides,
    /// Delete every record of the owner whose flags are all false.
    PruneEmpty,
}

/// The owner's mode and their record for one target, read together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairView {
    /// Owner's privacy mode (`PermitAll` when unregistered).
    pub mode: PrivacyMode,
    /// Owner's flags for the target (all false when no record exists).
    pub flags: PairFlags,
}

impl PairView {
    /// Whether the owner blocks the target.
    #[must_use]
    pub const fn blocks(&self) -> bool {
        self.mode.blocks(self.flags)
    }
}

/// Consistent copy of one owner's full privacy state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSnapshot {
    /// Owner identity.
    pub owner: IdentityKey,
    /// Whether the owner is registered.
    pub registered: bool,
    /// Current privacy mode.
    pub mode: PrivacyMode,
    /// All pair records, keyed by target.
    pub records: BTreeMap<IdentityKey, PairFlags>,
}

impl ProfileSnapshot {
    /// Snapshot of a user with no profile: `PermitAll`, no records.
    #[must_use]
    pub const fn unregistered(owner: IdentityKey) -> Self {
        Self {
            owner,
            registered: false,
            mode: PrivacyMode::PermitAll,
            records: BTreeMap::new(),
        }
    }

    /// Flags for a target, all false when no record exists.
    #[must_use]
    pub fn flags_for(&self, target: &IdentityKey) -> PairFlags {
        self.records.get(target).copied().unwrap_or_default()
    }

    /// The mode and record for one target.
    #[must_use]
    pub fn view(&self, target: &IdentityKey) -> PairView {
        PairView {
            mode: self.mode,
            flags: self.flags_for(target),
        }
    }

    /// Targets for which `flag` is set, in identity order.
    pub fn targets_with(&self, flag: PairFlag) -> impl Iterator<Item = &IdentityKey> {
        self.records
            .iter()
            .filter(move |(_, flags)| flags.get(flag))
            .map(|(target, _)| target)
    }
}

/// Durable storage of privacy profiles.
///
/// Implementations must make [`apply`](Self::apply) all-or-nothing and must
/// return [`pair_view`](Self::pair_view) and [`snapshot`](Self::snapshot)
/// from a single consistent read.
pub trait PrivacyStore: Send + Sync {
    /// Whether the owner has a profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn registration_exists(&self, owner: &IdentityKey) -> Result<bool>;

    /// Creates a profile in `PermitAll` mode with no records.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::AlreadyExists`] if the owner is registered.
    fn register(&self, owner: &IdentityKey, at: i64) -> Result<()>;

    /// Deletes the owner's profile and every record they own.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::UserNotFound`] if the owner is not registered.
    fn unregister(&self, owner: &IdentityKey) -> Result<()>;

    /// Deletes every profile and every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn clear_all(&self) -> Result<()>;

    /// Returns the owner's profile, if registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn profile(&self, owner: &IdentityKey) -> Result<Option<PrivacyProfile>>;

    /// Point lookup of one pair record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn pair(&self, owner: &IdentityKey, target: &IdentityKey) -> Result<Option<PairFlags>>;

    /// Reads the owner's mode and their record for `target` together.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn pair_view(&self, owner: &IdentityKey, target: &IdentityKey) -> Result<PairView>;

    /// Reads the owner's mode and all of their records together.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn snapshot(&self, owner: &IdentityKey) -> Result<ProfileSnapshot>;

    /// All records owned by `owner`, ordered by target.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn pairs_owned_by(&self, owner: &IdentityKey) -> Result<Vec<PairRecord>>;

    /// All records whose target is `target`, ordered by owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn pairs_targeting(&self, target: &IdentityKey) -> Result<Vec<PairRecord>>;

    /// Applies a batch of writes to one owner atomically and stamps the
    /// profile's `updated_at` with `at`.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::UserNotFound`] if the owner is not registered
    /// and [`PrivacyError::PairNotFound`] if a flag is cleared on a missing
    /// record. On error nothing is written.
    fn apply(&self, owner: &IdentityKey, writes: &[ProfileWrite], at: i64) -> Result<()>;
}

/// Fails if clearing a flag in `writes` would hit a record that does not
/// exist at that point of the batch. No other write can fail.
fn check_writes(
    owner: &IdentityKey,
    records: &BTreeMap<IdentityKey, PairFlags>,
    writes: &[ProfileWrite],
) -> Result<()> {
    for (i, write) in writes.iter().enumerate() {
        let ProfileWrite::SetFlag {
            target,
            value: false,
            ..
        } = write
        else {
            continue;
        };
        // Replay the earlier writes against this one target only.
        let mut flags = records.get(target).copied();
        for earlier in &writes[..i] {
            match earlier {
                ProfileWrite::SetFlag {
                    target: t,
                    flag,
                    value,
                } if t == target => {
                    if *value || flags.is_some() {
                        flags.get_or_insert_with(PairFlags::default).set(*flag, *value);
                    }
                }
                ProfileWrite::ClearOverrides => {
                    if let Some(f) = flags.as_mut() {
                        f.is_permitted = false;
                        f.is_denied = false;
                    }
                }
                ProfileWrite::PruneEmpty => {
                    if flags.as_ref().is_some_and(PairFlags::is_empty) {
                        flags = None;
                    }
                }
                _ => {}
            }
        }
        if flags.is_none() {
            return Err(PrivacyError::PairNotFound {
                owner: owner.clone(),
                target: target.clone(),
            });
        }
    }
    Ok(())
}

/// Applies a write batch to an owner's mode and record map in place.
///
/// The batch is checked before anything is touched, so on error `mode`
/// and `records` are unchanged.
pub(crate) fn apply_writes(
    owner: &IdentityKey,
    mode: &mut PrivacyMode,
    records: &mut BTreeMap<IdentityKey, PairFlags>,
    writes: &[ProfileWrite],
) -> Result<()> {
    check_writes(owner, records, writes)?;
    for write in writes {
        match write {
            ProfileWrite::SetFlag {
                target,
                flag,
                value: true,
            } => {
                records.entry(target.clone()).or_default().set(*flag, true);
            }
            ProfileWrite::SetFlag {
                target,
                flag,
                value: false,
            } => {
                if let Some(flags) = records.get_mut(target) {
                    flags.set(*flag, false);
                }
            }
            ProfileWrite::SetMode(new_mode) => *mode = *new_mode,
            ProfileWrite::ClearOverrides => {
                for flags in records.values_mut() {
                    flags.is_permitted = false;
                    flags.is_denied = false;
                }
            }
            ProfileWrite::PruneEmpty => records.retain(|_, flags| !flags.is_empty()),
        }
    }
    Ok(())
}
