//! Buddy relationships and privacy-policy resolution.
//!
//! Every user owns a privacy mode and a set of directed pair records, one per
//! other user they have an opinion about. A record carries three independent
//! flags: buddy-list membership, permit-list membership and deny-list
//! membership. The mode decides how those flags turn into a block decision.
//!
//! # Architecture
//!
//! ```text
//! PrivacyEngine (high-level API)
//!     ├── OwnerLocks (per-owner mutation serialization)
//!     ├── transition (mode changes: set, clear overrides, prune)
//!     ├── resolver (relationship queries)
//!     └── PrivacyStore (injected persistence)
//!             ├── MemoryStore
//!             └── SqliteStore
//! ```
//!
//! # Blocking Model
//!
//! | Mode           | Blocks a target when                 |
//! |----------------|--------------------------------------|
//! | `PermitAll`    | never                                |
//! | `DenyAll`      | always                               |
//! | `PermitSome`   | the target is not on the permit list |
//! | `DenySome`     | the target is on the deny list       |
//! | `PermitOnList` | the target is not a buddy            |
//!
//! Blocking is directional: each side of a relationship is computed from
//! that side's own mode and records. Users without a profile block nobody.
//!
//! # Types
//!
//! - [`PrivacyMode`]: An owner's blocking policy
//! - [`PairFlags`]: Buddy, permit and deny bits of one directed record
//! - [`Relationship`]: Resolved view of a subject and one candidate
//! - [`OpContext`]: Cancellation and deadline for one call

mod config;
mod context;
mod engine;
mod error;
mod locks;
mod memory;
mod policy;
pub mod resolver;
mod sqlite;
mod store;
pub mod transition;
pub mod types;

pub use config::{EngineConfig, UnknownOwnerPolicy};
pub use context::OpContext;
pub use engine::PrivacyEngine;
pub use error::{ErrorKind, PrivacyError, Result};
pub use locks::OwnerLocks;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{PairView, PrivacyStore, ProfileSnapshot, ProfileWrite};
pub use transition::{TransitionOutcome, TransitionPlan};
pub use types::{PairFlag, PairFlags, PairRecord, PrivacyMode, PrivacyProfile, Relationship};
