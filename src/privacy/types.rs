//! Core types for privacy profiles and relationships.
//!
//! An owner keeps one [`PairFlags`] record per target identity. The three
//! flags are independent: a target can be a buddy, permitted and denied all
//! at once. The owner's [`PrivacyMode`] decides which of those flags matter
//! when evaluating a block (see [`PrivacyMode::blocks`]).

use serde::{Deserialize, Serialize};

use crate::identity::IdentityKey;

/// Privacy mode of a user.
///
/// Exactly one mode is active per user. Changing it resets every permit
/// and deny flag the user owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    /// Nobody is blocked.
    #[default]
    PermitAll,
    /// Only users on the owner's buddy list get through.
    PermitOnList,
    /// Only users on the owner's permit list get through.
    PermitSome,
    /// Everybody is blocked.
    DenyAll,
    /// Only users on the owner's deny list are blocked.
    DenySome,
}

impl PrivacyMode {
    /// All modes, in protocol code order.
    pub const ALL: [Self; 5] = [
        Self::PermitAll,
        Self::DenyAll,
        Self::PermitSome,
        Self::DenySome,
        Self::PermitOnList,
    ];

    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PermitAll => "permit_all",
            Self::PermitOnList => "permit_on_list",
            Self::PermitSome => "permit_some",
            Self::DenyAll => "deny_all",
            Self::DenySome => "deny_some",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permit_all" => Some(Self::PermitAll),
            "permit_on_list" => Some(Self::PermitOnList),
            "permit_some" => Some(Self::PermitSome),
            "deny_all" => Some(Self::DenyAll),
            "deny_some" => Some(Self::DenySome),
            _ => None,
        }
    }

    /// Numeric mode value used by the messaging protocol.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::PermitAll => 1,
            Self::DenyAll => 2,
            Self::PermitSome => 3,
            Self::DenySome => 4,
            Self::PermitOnList => 5,
        }
    }

    /// Maps a protocol mode value back to a mode.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::PermitAll),
            2 => Some(Self::DenyAll),
            3 => Some(Self::PermitSome),
            4 => Some(Self::DenySome),
            5 => Some(Self::PermitOnList),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrivacyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three independent bits on a pair record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairFlag {
    /// Target is on the owner's buddy list.
    Buddy,
    /// Target is on the owner's permit list.
    Permit,
    /// Target is on the owner's deny list.
    Deny,
}

impl PairFlag {
    /// Column / field name of the flag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buddy => "is_buddy",
            Self::Permit => "is_permitted",
            Self::Deny => "is_denied",
        }
    }
}

/// Flags an owner holds for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PairFlags {
    /// Owner added the target to their buddy list.
    pub is_buddy: bool,
    /// Target is explicitly permitted by the owner.
    pub is_permitted: bool,
    /// Target is explicitly denied by the owner.
    pub is_denied: bool,
}

impl PairFlags {
    /// Flags with only the buddy bit set.
    pub const BUDDY: Self = Self {
        is_buddy: true,
        is_permitted: false,
        is_denied: false,
    };

    /// Returns the value of one flag.
    #[must_use]
    pub const fn get(&self, flag: PairFlag) -> bool {
        match flag {
            PairFlag::Buddy => self.is_buddy,
            PairFlag::Permit => self.is_permitted,
            PairFlag::Deny => self.is_denied,
        }
    }

    /// Sets one flag.
    pub fn set(&mut self, flag: PairFlag, value: bool) {
        match flag {
            PairFlag::Buddy => self.is_buddy = value,
            PairFlag::Permit => self.is_permitted = value,
            PairFlag::Deny => self.is_denied = value,
        }
    }

    /// A record with no flag set carries no information.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.is_buddy && !self.is_permitted && !self.is_denied
    }

    /// Whether either override flag is set.
    #[must_use]
    pub const fn has_overrides(&self) -> bool {
        self.is_permitted || self.is_denied
    }
}

/// A stored `(owner, target)` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRecord {
    /// User who owns the record.
    pub owner: IdentityKey,
    /// User the record is about.
    pub target: IdentityKey,
    /// Flag state.
    pub flags: PairFlags,
}

/// Registration-level state of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivacyProfile {
    /// Owner identity.
    pub owner: IdentityKey,
    /// Current privacy mode.
    pub mode: PrivacyMode,
    /// When the owner registered (Unix timestamp).
    pub registered_at: i64,
    /// When the profile last changed (Unix timestamp).
    pub updated_at: i64,
}

/// How a subject and one candidate relate to each other.
///
/// Computed on demand from both users' profiles; never stored. A blocked
/// candidate is still reported, with the block bits set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    /// The other user.
    pub candidate: IdentityKey,
    /// Candidate is on the subject's buddy list.
    pub is_on_subjects_list: bool,
    /// Subject is on the candidate's buddy list.
    pub is_on_candidates_list: bool,
    /// Subject's privacy settings block the candidate.
    pub subject_blocks_candidate: bool,
    /// Candidate's privacy settings block the subject.
    pub candidate_blocks_subject: bool,
}
