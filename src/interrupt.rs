//! Cooperative cancellation for the training loop.
//!
//! The trainer owns no signal handlers. The embedding process installs
//! whatever handler it wants (on its primary thread) and calls
//! [`InterruptToken::request`] from it; the loop polls the token at its
//! exit checks. One request ends the run at the current epoch boundary
//! with normal persistence; a second abandons the step loop immediately.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Where the loop stands with respect to cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptState {
    /// No cancellation requested.
    Run,
    /// Finish the current epoch, persist, and return normally.
    FinishEpoch,
    /// Stop mid-step without further persistence.
    Abort,
}

/// Cheaply clonable cancellation token shared with the embedder.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken {
    requests: Arc<AtomicU8>,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one cancellation request and return the resulting state.
    ///
    /// Safe to call from a signal handler thread.
    pub fn request(&self) -> InterruptState {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.state()
    }

    pub fn state(&self) -> InterruptState {
        match self.requests.load(Ordering::SeqCst) {
            0 => InterruptState::Run,
            1 => InterruptState::FinishEpoch,
            _ => InterruptState::Abort,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == InterruptState::Abort
    }

    pub fn is_requested(&self) -> bool {
        self.state() != InterruptState::Run
    }
}
