//! Cooperative cancellation for orchestration runs.
//!
//! The orchestrator checks a shared flag before each unit of work; a caller
//! (typically the request handler owning the run) trips the flag to abandon
//! the run. Partially produced artifacts are not rolled back — the next run
//! regenerates them.

use miette::Diagnostic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Signal that the originating request was cancelled.
///
/// Distinct from failure: cancellation unwinds the current run without being
/// logged as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Diagnostic)]
#[error("generation request was cancelled")]
#[diagnostic(code(relink::cancelled))]
pub struct Cancelled;

/// Shared cancellation flag tied to one generation request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not yet cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the flag; every subsequent [`CancelToken::check`] fails.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Return whether the token has been tripped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`Cancelled`] when the token has been tripped.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] after [`CancelToken::cancel`] was called.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_passes_checks() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancelled_token_fails_checks_everywhere() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert_eq!(token.check(), Err(Cancelled));
    }
}
