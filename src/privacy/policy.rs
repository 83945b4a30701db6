//! Block evaluation for the five privacy modes.
//!
//! | Mode | Blocks the counterparty when |
//! |------|------------------------------|
//! | `PermitAll` | never |
//! | `PermitOnList` | counterparty is not a buddy |
//! | `PermitSome` | counterparty is not permitted |
//! | `DenyAll` | always |
//! | `DenySome` | counterparty is denied |

use super::types::{PairFlags, PrivacyMode};

impl PrivacyMode {
    /// Decides whether an owner in this mode blocks a counterparty, given
    /// the owner's record for that counterparty.
    ///
    /// Only the flag relevant to the mode is consulted; a user with no
    /// record passes `PairFlags::default()`.
    ///
    /// # Examples
    ///
    /// ```
    /// use buddy_core::privacy::{PairFlags, PrivacyMode};
    ///
    /// assert!(PrivacyMode::DenyAll.blocks(PairFlags::BUDDY));
    /// assert!(!PrivacyMode::PermitOnList.blocks(PairFlags::BUDDY));
    /// assert!(PrivacyMode::PermitOnList.blocks(PairFlags::default()));
    /// ```
    #[must_use]
    pub const fn blocks(self, flags: PairFlags) -> bool {
        match self {
            Self::PermitAll => false,
            Self::PermitOnList => !flags.is_buddy,
            Self::PermitSome => !flags.is_permitted,
            Self::DenyAll => true,
            Self::DenySome => flags.is_denied,
        }
    }
}
