//! Cancellation for long-running walks

use crate::{FsError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag
///
/// Every clone observes the same flag, so a request handler can keep one
/// clone and cancel the walk it handed the other to when its client goes away.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(token.check().is_ok());

        handle.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(FsError::Cancelled)));
    }
}
