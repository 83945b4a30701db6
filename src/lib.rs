//! Buddy Core Library
//!
//! Buddy-list relationships and privacy-policy resolution for an instant
//! messaging server. Request handlers own a [`PrivacyEngine`] over a
//! [`PrivacyStore`](privacy::PrivacyStore) and ask it who blocks whom.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod identity;
pub mod privacy;

pub use identity::{DisplayName, IdentityKey};
pub use privacy::{OpContext, PrivacyEngine, PrivacyError, PrivacyMode, Relationship};
