//! Relationship resolution between a subject and a set of candidates.
//!
//! For each candidate the resolver combines two independent reads:
//!
//! - the subject's side, taken from one snapshot of the subject's profile
//!   read at the start of the query;
//! - the candidate's side, read as a single [`PairView`](super::PairView)
//!   of the candidate's mode and their record for the subject.
//!
//! No lock is held across candidates, so a long batch never stalls writers.
//! Each side of each relationship still comes from one consistent read.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::context::OpContext;
use super::error::Result;
use super::store::{PrivacyStore, ProfileSnapshot};
use super::types::{PairFlag, Relationship};
use crate::identity::IdentityKey;

/// Computes the candidates for a query.
///
/// With a filter, the candidates are exactly the filtered identities. Without
/// one, they are every target the subject holds a non-empty record for,
/// plus every owner who has the subject on their buddy list. The subject
/// itself is never a candidate.
///
/// # Errors
///
/// Returns an error if the reverse buddy scan fails.
pub fn candidate_set<S: PrivacyStore + ?Sized>(
    store: &S,
    subject: &ProfileSnapshot,
    filter: Option<&[IdentityKey]>,
) -> Result<BTreeSet<IdentityKey>> {
    let mut candidates: BTreeSet<IdentityKey> = match filter {
        Some(filter) => filter.iter().cloned().collect(),
        None => {
            let mut set: BTreeSet<IdentityKey> = subject
                .records
                .iter()
                .filter(|(_, flags)| !flags.is_empty())
                .map(|(target, _)| target.clone())
                .collect();
            set.extend(
                store
                    .pairs_targeting(&subject.owner)?
                    .into_iter()
                    .filter(|record| record.flags.get(PairFlag::Buddy))
                    .map(|record| record.owner),
            );
            set
        }
    };
    candidates.remove(&subject.owner);
    Ok(candidates)
}

/// Resolves the subject's relationship to each candidate, ordered by
/// candidate identity.
///
/// Blocked candidates are included with their block bits set. Users with no
/// profile behave as `PermitAll` with no records.
///
/// # Errors
///
/// Returns [`Cancelled`](super::PrivacyError::Cancelled) or
/// [`DeadlineExceeded`](super::PrivacyError::DeadlineExceeded) if the
/// context fires between candidates, or any store error.
pub fn relationships_for<S: PrivacyStore + ?Sized>(
    store: &S,
    ctx: &OpContext,
    subject: &IdentityKey,
    filter: Option<&[IdentityKey]>,
) -> Result<Vec<Relationship>> {
    ctx.check()?;
    let snapshot = store.snapshot(subject)?;
    let candidates = candidate_set(store, &snapshot, filter)?;

    debug!(
        subject = %subject,
        candidates = candidates.len(),
        filtered = filter.is_some(),
        "Resolving relationships"
    );

    let mut relationships = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if let Err(e) = ctx.check() {
            warn!(subject = %subject, error = %e, "Relationship query aborted");
            return Err(e);
        }

        let mine = snapshot.view(&candidate);
        let theirs = store.pair_view(&candidate, subject)?;

        relationships.push(Relationship {
            is_on_subjects_list: mine.flags.is_buddy,
            is_on_candidates_list: theirs.flags.is_buddy,
            subject_blocks_candidate: mine.blocks(),
            candidate_blocks_subject: theirs.blocks(),
            candidate,
        });
    }

    Ok(relationships)
}
