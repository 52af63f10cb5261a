//! Collective-communication seam for data-parallel training.
//!
//! The trainer only needs four operations from a distributed backend:
//! rank/world-size identity, parameter broadcast at startup, optimizer
//! state broadcast, and gradient averaging per step. A backend that
//! implements [`Collective`] plugs into the training loop unchanged;
//! single-process training uses [`LocalCollective`], where every
//! operation is a no-op.

use crate::error::Result;
use crate::model::Parameter;

/// Data-parallel collective operations.
pub trait Collective {
    /// This worker's index in `0..world_size`.
    fn rank(&self) -> usize;

    /// Total number of workers.
    fn world_size(&self) -> usize;

    /// Overwrite every worker's parameters with the coordinator's copy.
    ///
    /// Called once before the first step so all workers start from
    /// identical weights.
    fn broadcast_parameters(&self, params: &mut [Parameter]) -> Result<()>;

    /// Overwrite every worker's optimizer state with the coordinator's.
    fn broadcast_optimizer_state(&self, state: &mut serde_json::Value) -> Result<()>;

    /// Average gradients across all workers in place.
    fn all_reduce_gradients(&self, params: &mut [Parameter]) -> Result<()>;

    /// Whether this worker performs persistence and logging.
    ///
    /// Exactly one worker is the coordinator; checkpoint writes, model
    /// saves, and progress logging happen only on it.
    fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }
}

/// Single-process backend. All collective operations are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCollective;

impl Collective for LocalCollective {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn broadcast_parameters(&self, _params: &mut [Parameter]) -> Result<()> {
        Ok(())
    }

    fn broadcast_optimizer_state(&self, _state: &mut serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn all_reduce_gradients(&self, _params: &mut [Parameter]) -> Result<()> {
        Ok(())
    }
}
