//! Caller-supplied cancellation and deadlines.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::error::{PrivacyError, Result};

/// Cancellation signal and optional deadline for one engine call.
///
/// The engine checks the context between atomic units of work. A unit that
/// has already been handed to the store always runs to completion, so a
/// cancelled call never leaves a profile half-written.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use buddy_core::privacy::OpContext;
///
/// let ctx = OpContext::background().with_timeout(Duration::from_secs(5));
/// assert!(ctx.check().is_ok());
///
/// ctx.token().cancel();
/// assert!(ctx.check().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}

impl OpContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context driven by an existing cancellation token.
    #[must_use]
    pub const fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Sets a deadline. An earlier deadline already present wins.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Sets a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// The cancellation token. Cancelling it cancels every clone of this
    /// context.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails if the context was cancelled or its deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::Cancelled`] or [`PrivacyError::DeadlineExceeded`].
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(PrivacyError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(PrivacyError::DeadlineExceeded);
        }
        Ok(())
    }
}
