//! High-level privacy engine API.
//!
//! [`PrivacyEngine`] is what request handlers talk to. It owns the injected
//! [`PrivacyStore`], serializes mutations per owner and routes queries to
//! the resolver.
//!
//! # Example
//!
//! ```
//! use buddy_core::identity::IdentityKey;
//! use buddy_core::privacy::{MemoryStore, OpContext, PrivacyEngine, PrivacyMode};
//!
//! let engine = PrivacyEngine::new(MemoryStore::new());
//! let ctx = OpContext::background();
//! let me = IdentityKey::new("Me");
//! let them = IdentityKey::new("Them");
//!
//! engine.register(&ctx, &me)?;
//! engine.add_buddy(&ctx, &me, &them)?;
//! engine.set_mode(&ctx, &me, PrivacyMode::DenyAll)?;
//!
//! let rels = engine.relationships_for(&ctx, &me, None)?;
//! assert_eq!(rels.len(), 1);
//! assert!(rels[0].is_on_subjects_list);
//! assert!(rels[0].subject_blocks_candidate);
//! # Ok::<(), buddy_core::privacy::PrivacyError>(())
//! ```

use std::sync::PoisonError;

use tracing::{debug, info, warn};

use super::config::{EngineConfig, UnknownOwnerPolicy};
use super::context::OpContext;
use super::error::{PrivacyError, Result};
use super::locks::OwnerLocks;
use super::resolver;
use super::store::{PrivacyStore, ProfileWrite};
use super::transition::{run_transition, TransitionOutcome};
use super::types::{PairFlag, PrivacyMode, PrivacyProfile, Relationship};
use crate::identity::IdentityKey;

/// Buddy-relationship and privacy-policy engine.
///
/// Safe to share across request workers: mutations of one owner are
/// serialized by a per-owner lock, mutations of different owners run in
/// parallel, and queries take no engine lock at all.
pub struct PrivacyEngine<S> {
    store: S,
    config: EngineConfig,
    locks: OwnerLocks,
}

impl<S: PrivacyStore> PrivacyEngine<S> {
    /// Creates an engine over `store` with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Creates an engine over `store` with an explicit configuration.
    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            locks: OwnerLocks::new(),
        }
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The engine configuration.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Applies the configured default timeout to contexts without a deadline.
    fn scoped(&self, ctx: &OpContext) -> OpContext {
        match (ctx.deadline(), self.config.default_timeout()) {
            (None, Some(timeout)) => ctx.clone().with_timeout(timeout),
            _ => ctx.clone(),
        }
    }

    /// Runs `f` while holding the owner's mutation lock.
    ///
    /// The context is checked before and after waiting for the lock; once
    /// `f` starts it runs to completion.
    fn with_owner<T>(
        &self,
        ctx: &OpContext,
        owner: &IdentityKey,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let ctx = self.scoped(ctx);
        let check = || {
            ctx.check().inspect_err(|e| {
                warn!(owner = %owner, error = %e, "Privacy mutation aborted");
            })
        };
        check()?;
        let lock = self.locks.handle(owner);
        // Guards no data; poisoning is harmless.
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        check()?;
        f()
    }

    /// Makes sure the owner has a profile, per the unknown-owner policy.
    /// Must run under the owner's lock.
    fn ensure_registered(&self, owner: &IdentityKey) -> Result<()> {
        if self.store.registration_exists(owner)? {
            return Ok(());
        }
        match self.config.unknown_owner {
            UnknownOwnerPolicy::Reject => Err(PrivacyError::UserNotFound(owner.clone())),
            UnknownOwnerPolicy::AutoRegister => {
                match self.store.register(owner, Self::now()) {
                    Ok(()) | Err(PrivacyError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
                info!(owner = %owner, "Auto-registered privacy profile");
                Ok(())
            }
        }
    }

    // ==================== Registration ====================

    /// Whether the owner has a privacy profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fired or the store cannot be read.
    pub fn registration_exists(&self, ctx: &OpContext, owner: &IdentityKey) -> Result<bool> {
        self.scoped(ctx).check()?;
        self.store.registration_exists(owner)
    }

    /// Registers a new owner in `PermitAll` mode with no records.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::AlreadyExists`] if the owner is registered.
    pub fn register(&self, ctx: &OpContext, owner: &IdentityKey) -> Result<()> {
        self.with_owner(ctx, owner, || {
            self.store.register(owner, Self::now())?;
            info!(owner = %owner, "Registered privacy profile");
            Ok(())
        })
    }

    /// Deletes the owner's mode and every record they own.
    ///
    /// Records other users hold about this owner are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::UserNotFound`] if the owner is not registered.
    pub fn unregister(&self, ctx: &OpContext, owner: &IdentityKey) -> Result<()> {
        self.with_owner(ctx, owner, || self.store.unregister(owner))?;
        self.locks.release(owner);
        info!(owner = %owner, "Unregistered privacy profile");
        Ok(())
    }

    /// Deletes every profile and every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fired or the store cannot be written.
    pub fn clear_all(&self, ctx: &OpContext) -> Result<()> {
        self.scoped(ctx).check()?;
        self.store.clear_all()?;
        self.locks.release_idle();
        info!("Cleared all privacy profiles");
        Ok(())
    }

    // ==================== Pair Records ====================

    fn set_flag(
        &self,
        ctx: &OpContext,
        owner: &IdentityKey,
        target: &IdentityKey,
        flag: PairFlag,
        value: bool,
    ) -> Result<()> {
        self.with_owner(ctx, owner, || {
            self.ensure_registered(owner)?;
            let write = ProfileWrite::SetFlag {
                target: target.clone(),
                flag,
                value,
            };
            self.store.apply(owner, &[write], Self::now())?;
            debug!(
                owner = %owner,
                target = %target,
                flag = flag.as_str(),
                value,
                "Pair flag updated"
            );
            Ok(())
        })
    }

    /// Adds `target` to the owner's buddy list. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::UserNotFound`] if the owner is unregistered
    /// and the engine rejects unknown owners.
    pub fn add_buddy(&self, ctx: &OpContext, owner: &IdentityKey, target: &IdentityKey) -> Result<()> {
        self.set_flag(ctx, owner, target, PairFlag::Buddy, true)
    }

    /// Removes `target` from the owner's buddy list.
    ///
    /// The record is kept with its permit and deny flags as they were.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::PairNotFound`] if the owner holds no record
    /// for `target`.
    pub fn remove_buddy(
        &self,
        ctx: &OpContext,
        owner: &IdentityKey,
        target: &IdentityKey,
    ) -> Result<()> {
        self.set_flag(ctx, owner, target, PairFlag::Buddy, false)
    }

    /// Puts `target` on the owner's permit list. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::UserNotFound`] if the owner is unregistered
    /// and the engine rejects unknown owners.
    pub fn permit(&self, ctx: &OpContext, owner: &IdentityKey, target: &IdentityKey) -> Result<()> {
        self.set_flag(ctx, owner, target, PairFlag::Permit, true)
    }

    /// Takes `target` off the owner's permit list.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::PairNotFound`] if the owner holds no record
    /// for `target`.
    pub fn unpermit(&self, ctx: &OpContext, owner: &IdentityKey, target: &IdentityKey) -> Result<()> {
        self.set_flag(ctx, owner, target, PairFlag::Permit, false)
    }

    /// Puts `target` on the owner's deny list. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::UserNotFound`] if the owner is unregistered
    /// and the engine rejects unknown owners.
    pub fn deny(&self, ctx: &OpContext, owner: &IdentityKey, target: &IdentityKey) -> Result<()> {
        self.set_flag(ctx, owner, target, PairFlag::Deny, true)
    }

    /// Takes `target` off the owner's deny list.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::PairNotFound`] if the owner holds no record
    /// for `target`.
    pub fn undeny(&self, ctx: &OpContext, owner: &IdentityKey, target: &IdentityKey) -> Result<()> {
        self.set_flag(ctx, owner, target, PairFlag::Deny, false)
    }

    // ==================== Privacy Mode ====================

    /// Changes the owner's privacy mode.
    ///
    /// A change clears every permit and deny flag the owner holds and drops
    /// records left empty; buddy flags survive. Requesting the current mode
    /// writes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::UserNotFound`] if the owner is unregistered
    /// and the engine rejects unknown owners, or
    /// [`PrivacyError::InvariantViolation`] if verification is enabled and
    /// the written state is inconsistent.
    pub fn set_mode(
        &self,
        ctx: &OpContext,
        owner: &IdentityKey,
        mode: PrivacyMode,
    ) -> Result<TransitionOutcome> {
        self.with_owner(ctx, owner, || {
            self.ensure_registered(owner)?;
            run_transition(
                &self.store,
                owner,
                mode,
                Self::now(),
                self.config.verify_transitions,
            )
        })
    }

    /// The owner's profile, if registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fired or the store cannot be read.
    pub fn profile(&self, ctx: &OpContext, owner: &IdentityKey) -> Result<Option<PrivacyProfile>> {
        self.scoped(ctx).check()?;
        self.store.profile(owner)
    }

    /// The owner's privacy mode; `PermitAll` for unregistered users.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fired or the store cannot be read.
    pub fn privacy_mode(&self, ctx: &OpContext, owner: &IdentityKey) -> Result<PrivacyMode> {
        Ok(self
            .profile(ctx, owner)?
            .map_or(PrivacyMode::PermitAll, |profile| profile.mode))
    }

    // ==================== Queries ====================

    /// Relationships between `subject` and each candidate.
    ///
    /// With `filter`, the candidates are exactly the given identities
    /// (minus the subject). Without it, they are everyone the subject holds
    /// a record for plus everyone who has the subject on their buddy list.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fired between candidates or the store
    /// cannot be read.
    pub fn relationships_for(
        &self,
        ctx: &OpContext,
        subject: &IdentityKey,
        filter: Option<&[IdentityKey]>,
    ) -> Result<Vec<Relationship>> {
        resolver::relationships_for(&self.store, &self.scoped(ctx), subject, filter)
    }

    /// Relationship between two distinct users.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::InvalidData`] if `subject` and `candidate` are
    /// the same user, or any error from
    /// [`relationships_for`](Self::relationships_for).
    pub fn relationship(
        &self,
        ctx: &OpContext,
        subject: &IdentityKey,
        candidate: &IdentityKey,
    ) -> Result<Relationship> {
        if subject == candidate {
            return Err(PrivacyError::InvalidData(format!(
                "no relationship with self: {subject}"
            )));
        }
        self.relationships_for(ctx, subject, Some(std::slice::from_ref(candidate)))?
            .pop()
            .ok_or_else(|| {
                PrivacyError::InvariantViolation(format!(
                    "filtered query returned nothing: {subject} -> {candidate}"
                ))
            })
    }

    fn owned_with(
        &self,
        ctx: &OpContext,
        owner: &IdentityKey,
        flag: PairFlag,
    ) -> Result<Vec<IdentityKey>> {
        self.scoped(ctx).check()?;
        let snapshot = self.store.snapshot(owner)?;
        Ok(snapshot.targets_with(flag).cloned().collect())
    }

    /// Everyone on the owner's buddy list.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fired or the store cannot be read.
    pub fn buddies_of(&self, ctx: &OpContext, owner: &IdentityKey) -> Result<Vec<IdentityKey>> {
        self.owned_with(ctx, owner, PairFlag::Buddy)
    }

    /// Everyone on the owner's permit list.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fired or the store cannot be read.
    pub fn permit_list(&self, ctx: &OpContext, owner: &IdentityKey) -> Result<Vec<IdentityKey>> {
        self.owned_with(ctx, owner, PairFlag::Permit)
    }

    /// Everyone on the owner's deny list.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fired or the store cannot be read.
    pub fn deny_list(&self, ctx: &OpContext, owner: &IdentityKey) -> Result<Vec<IdentityKey>> {
        self.owned_with(ctx, owner, PairFlag::Deny)
    }

    /// Everyone who has `target` on their buddy list.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fired or the store cannot be read.
    pub fn who_added(&self, ctx: &OpContext, target: &IdentityKey) -> Result<Vec<IdentityKey>> {
        self.scoped(ctx).check()?;
        Ok(self
            .store
            .pairs_targeting(target)?
            .into_iter()
            .filter(|record| record.flags.is_buddy)
            .map(|record| record.owner)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::privacy::memory::MemoryStore;
    use crate::privacy::types::PairFlags;

    fn key(s: &str) -> IdentityKey {
        IdentityKey::new(s)
    }

    fn engine() -> PrivacyEngine<MemoryStore> {
        PrivacyEngine::new(MemoryStore::new())
    }

    fn ctx() -> OpContext {
        OpContext::background()
    }

    #[test]
    fn register_then_duplicate_fails() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();
        assert!(engine.registration_exists(&ctx(), &key("ME")).unwrap());

        let err = engine.register(&ctx(), &key("me")).unwrap_err();
        assert!(matches!(err, PrivacyError::AlreadyExists(_)));
    }

    #[test]
    fn new_profile_is_permit_all() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();
        assert_eq!(
            engine.privacy_mode(&ctx(), &key("me")).unwrap(),
            PrivacyMode::PermitAll
        );
        assert!(engine.buddies_of(&ctx(), &key("me")).unwrap().is_empty());
    }

    #[test]
    fn mutations_reject_unknown_owner_by_default() {
        let engine = engine();
        let err = engine.add_buddy(&ctx(), &key("ghost"), &key("them")).unwrap_err();
        assert!(matches!(err, PrivacyError::UserNotFound(_)));

        let err = engine
            .set_mode(&ctx(), &key("ghost"), PrivacyMode::DenyAll)
            .unwrap_err();
        assert!(matches!(err, PrivacyError::UserNotFound(_)));
        assert!(!engine.registration_exists(&ctx(), &key("ghost")).unwrap());
    }

    #[test]
    fn auto_register_policy_creates_profile() {
        let engine = PrivacyEngine::with_config(
            MemoryStore::new(),
            EngineConfig::new().with_unknown_owner(UnknownOwnerPolicy::AutoRegister),
        );

        engine.add_buddy(&ctx(), &key("me"), &key("them")).unwrap();
        assert!(engine.registration_exists(&ctx(), &key("me")).unwrap());
        assert_eq!(engine.buddies_of(&ctx(), &key("me")).unwrap(), vec![key("them")]);

        let outcome = engine
            .set_mode(&ctx(), &key("other"), PrivacyMode::DenyAll)
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Changed {
                from: PrivacyMode::PermitAll,
                to: PrivacyMode::DenyAll,
            }
        );
    }

    #[test]
    fn remove_buddy_keeps_overrides() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();
        engine.add_buddy(&ctx(), &key("me"), &key("them")).unwrap();
        engine.deny(&ctx(), &key("me"), &key("them")).unwrap();

        engine.remove_buddy(&ctx(), &key("me"), &key("them")).unwrap();

        let flags = engine.store().pair(&key("me"), &key("them")).unwrap().unwrap();
        assert!(!flags.is_buddy);
        assert!(flags.is_denied);
        assert_eq!(engine.deny_list(&ctx(), &key("me")).unwrap(), vec![key("them")]);
    }

    #[test]
    fn clearing_missing_pair_is_reported() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();

        for result in [
            engine.remove_buddy(&ctx(), &key("me"), &key("them")),
            engine.unpermit(&ctx(), &key("me"), &key("them")),
            engine.undeny(&ctx(), &key("me"), &key("them")),
        ] {
            assert!(matches!(result, Err(PrivacyError::PairNotFound { .. })));
        }
    }

    #[test]
    fn direct_unpermit_does_not_prune() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();
        engine.permit(&ctx(), &key("me"), &key("them")).unwrap();
        engine.unpermit(&ctx(), &key("me"), &key("them")).unwrap();

        assert_eq!(
            engine.store().pair(&key("me"), &key("them")).unwrap(),
            Some(PairFlags::default())
        );
        // Clearing again is idempotent now that the record exists.
        engine.unpermit(&ctx(), &key("me"), &key("them")).unwrap();
    }

    #[test]
    fn set_mode_same_mode_is_noop() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();
        engine.set_mode(&ctx(), &key("me"), PrivacyMode::PermitSome).unwrap();
        engine.permit(&ctx(), &key("me"), &key("them")).unwrap();

        let outcome = engine
            .set_mode(&ctx(), &key("me"), PrivacyMode::PermitSome)
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Unchanged(PrivacyMode::PermitSome));
        assert_eq!(engine.permit_list(&ctx(), &key("me")).unwrap(), vec![key("them")]);
    }

    #[test]
    fn who_added_lists_owners() {
        let engine = engine();
        for owner in ["b", "a", "c"] {
            engine.register(&ctx(), &key(owner)).unwrap();
        }
        engine.add_buddy(&ctx(), &key("b"), &key("me")).unwrap();
        engine.add_buddy(&ctx(), &key("a"), &key("me")).unwrap();
        engine.deny(&ctx(), &key("c"), &key("me")).unwrap();

        assert_eq!(
            engine.who_added(&ctx(), &key("me")).unwrap(),
            vec![key("a"), key("b")]
        );
    }

    #[test]
    fn relationship_single_pair() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();
        engine.register(&ctx(), &key("them")).unwrap();
        engine.set_mode(&ctx(), &key("them"), PrivacyMode::DenySome).unwrap();
        engine.deny(&ctx(), &key("them"), &key("me")).unwrap();

        let rel = engine.relationship(&ctx(), &key("me"), &key("them")).unwrap();
        assert_eq!(rel.candidate, key("them"));
        assert!(!rel.subject_blocks_candidate);
        assert!(rel.candidate_blocks_subject);
    }

    #[test]
    fn relationship_with_self_is_rejected() {
        let engine = engine();
        let err = engine
            .relationship(&ctx(), &key("me"), &key("ME"))
            .unwrap_err();
        assert!(matches!(err, PrivacyError::InvalidData(_)));
    }

    #[test]
    fn unregister_keeps_other_users_records() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();
        engine.register(&ctx(), &key("them")).unwrap();
        engine.add_buddy(&ctx(), &key("me"), &key("them")).unwrap();
        engine.add_buddy(&ctx(), &key("them"), &key("me")).unwrap();

        engine.unregister(&ctx(), &key("me")).unwrap();

        assert!(engine.buddies_of(&ctx(), &key("me")).unwrap().is_empty());
        assert_eq!(engine.buddies_of(&ctx(), &key("them")).unwrap(), vec![key("me")]);
        let err = engine.unregister(&ctx(), &key("me")).unwrap_err();
        assert!(matches!(err, PrivacyError::UserNotFound(_)));
    }

    #[test]
    fn cancelled_mutation_writes_nothing() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();
        engine.permit(&ctx(), &key("me"), &key("them")).unwrap();

        let cancelled = OpContext::background();
        cancelled.token().cancel();
        let err = engine
            .set_mode(&cancelled, &key("me"), PrivacyMode::DenyAll)
            .unwrap_err();

        assert!(matches!(err, PrivacyError::Cancelled));
        assert_eq!(
            engine.privacy_mode(&ctx(), &key("me")).unwrap(),
            PrivacyMode::PermitAll
        );
        assert_eq!(engine.permit_list(&ctx(), &key("me")).unwrap(), vec![key("them")]);
    }

    #[test]
    fn expired_deadline_fails_reads() {
        let engine = engine();
        let expired = OpContext::background().with_timeout(Duration::ZERO);
        let err = engine.buddies_of(&expired, &key("me")).unwrap_err();
        assert!(matches!(err, PrivacyError::DeadlineExceeded));
    }

    #[test]
    fn default_timeout_applies_to_background_context() {
        let engine = PrivacyEngine::with_config(
            MemoryStore::new(),
            EngineConfig::new().with_default_timeout(Duration::ZERO),
        );
        let err = engine.register(&ctx(), &key("me")).unwrap_err();
        assert!(matches!(err, PrivacyError::DeadlineExceeded));
    }

    #[test]
    fn clear_all_resets_everything() {
        let engine = engine();
        engine.register(&ctx(), &key("me")).unwrap();
        engine.add_buddy(&ctx(), &key("me"), &key("them")).unwrap();

        engine.clear_all(&ctx()).unwrap();

        assert!(!engine.registration_exists(&ctx(), &key("me")).unwrap());
        assert!(engine.relationships_for(&ctx(), &key("me"), None).unwrap().is_empty());
        assert!(engine.who_added(&ctx(), &key("them")).unwrap().is_empty());
    }
}
