//! Cooperative cancellation of pending generations.
//!
//! The scene loop hands a [`CancelToken`] to every generation call. An
//! interrupt flips the flag; the loop checks it when the awaited call
//! resumes and turns it into [`AgentError::Cancelled`].

use crate::error::{AgentError, AgentResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation flag shared between the scene loop and whoever may
/// interrupt it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Clear the flag once the interrupt has been handled.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    /// `Err(Cancelled)` if an interrupt is pending.
    pub fn check(&self) -> AgentResult<()> {
        if self.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(token.check().is_ok());

        handle.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(AgentError::Cancelled)));

        token.reset();
        assert!(!handle.is_cancelled());
    }
}
