//! Auto-tuners for the "auto" config sentinels.
//!
//! Both tuners probe with short training bursts supplied by the caller
//! as closures, so they stay independent of the full training loop.

mod batch_size;
mod learning_rate;

pub use batch_size::{tune_batch_size, DEFAULT_HALVING_LIMIT, DEFAULT_MAX_TRIALS, DEFAULT_START};
pub use learning_rate::{tune_learning_rate, LearningRateSweep, SweepMode};
