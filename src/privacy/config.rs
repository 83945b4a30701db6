//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Result;

/// What to do when a profile mutation names an owner with no profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownOwnerPolicy {
    /// Fail with `UserNotFound`.
    #[default]
    Reject,
    /// Register the owner in `PermitAll` mode, then apply the mutation.
    AutoRegister,
}

/// Configuration for a [`PrivacyEngine`](super::PrivacyEngine).
///
/// # Examples
///
/// ```
/// use buddy_core::privacy::{EngineConfig, UnknownOwnerPolicy};
///
/// let config = EngineConfig::from_json(r#"{"unknown_owner": "auto_register"}"#).unwrap();
/// assert_eq!(config.unknown_owner, UnknownOwnerPolicy::AutoRegister);
/// assert!(config.verify_transitions);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Handling of mutations against unregistered owners.
    pub unknown_owner: UnknownOwnerPolicy,
    /// Deadline applied to calls whose context carries none, in milliseconds.
    pub default_timeout_ms: Option<u64>,
    /// Re-read an owner's records after each mode change and fail if any
    /// override flag or empty record survived.
    pub verify_transitions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unknown_owner: UnknownOwnerPolicy::Reject,
            default_timeout_ms: None,
            verify_transitions: true,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::Config`](super::PrivacyError::Config) if the
    /// JSON is malformed or has unknown values.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the unknown-owner policy.
    #[must_use]
    pub const fn with_unknown_owner(mut self, policy: UnknownOwnerPolicy) -> Self {
        self.unknown_owner = policy;
        self
    }

    /// Sets the default per-call timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Enables or disables post-transition verification.
    #[must_use]
    pub const fn with_verify_transitions(mut self, verify: bool) -> Self {
        self.verify_transitions = verify;
        self
    }

    /// The default per-call timeout, if configured.
    #[must_use]
    pub const fn default_timeout(&self) -> Option<Duration> {
        match self.default_timeout_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }
}
