//! Cooperative cancellation shared between a session, its walker workers, and
//! signal handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop flag. Clones observe the same flag.
///
/// Once requested, cancellation is permanent for the lifetime of the token;
/// each session creates a fresh one.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent, callable from any thread.
    pub fn request_cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Underlying flag, for APIs that set an `AtomicBool` directly (signal
    /// registration).
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_not_cancelled() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn request_is_idempotent_and_sticky() {
        let token = CancellationToken::new();
        token.request_cancel();
        token.request_cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state_across_threads() {
        let token = CancellationToken::new();
        let remote = token.clone();
        std::thread::spawn(move || remote.request_cancel())
            .join()
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn raw_flag_drives_token() {
        let token = CancellationToken::new();
        token.flag().store(true, Ordering::SeqCst);
        assert!(token.is_cancelled());
    }
}
