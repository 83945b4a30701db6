//! Screen-name identity normalization.
//!
//! Every graph edge and policy lookup is keyed by an [`IdentityKey`], the
//! canonical form of a user's handle: lowercased, with all whitespace
//! removed. The handle as the user typed it is kept separately in a
//! [`DisplayName`] for presentation.
//!
//! # Examples
//!
//! ```
//! use buddy_core::identity::{normalize, DisplayName, IdentityKey};
//!
//! assert_eq!(normalize("Chatting Chuck").as_str(), "chattingchuck");
//!
//! let name = DisplayName::new("Chatting Chuck");
//! assert_eq!(name.identity(), IdentityKey::new("chattingCHUCK"));
//! assert_eq!(name.as_str(), "Chatting Chuck");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Derives the canonical identity key for a display handle.
///
/// Pure and total: never fails, and two handles that differ only in case
/// or whitespace map to the same key.
#[must_use]
pub fn normalize(display: &str) -> IdentityKey {
    IdentityKey(
        display
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect(),
    )
}

/// Canonical identity of an account.
///
/// The only way to build one is through normalization, so every key held
/// by the engine or handed to a store is already canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Normalizes `handle` into an identity key.
    #[must_use]
    pub fn new(handle: &str) -> Self {
        normalize(handle)
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(handle: &str) -> Self {
        normalize(handle)
    }
}

impl From<String> for IdentityKey {
    fn from(handle: String) -> Self {
        normalize(&handle)
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.0
    }
}

/// A handle as the user chose to display it, e.g. `"Chatting Chuck"`.
///
/// Two display names are equal when they refer to the same account, even
/// if their presentation differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayName(String);

impl DisplayName {
    /// Wraps a display handle.
    #[must_use]
    pub fn new(display: impl Into<String>) -> Self {
        Self(display.into())
    }

    /// Returns the handle exactly as it should be presented.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the canonical identity behind this handle.
    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        normalize(&self.0)
    }
}

impl PartialEq for DisplayName {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for DisplayName {}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
