//! Per-step learning-rate schedule: exponential decay and warmup.
//!
//! These are pure functions of the step counters. The trainer calls
//! [`StepSchedule::lr_for_step`] once per batch and pushes the result
//! into the optimizer; nothing here mutates state.

use crate::config::TrainerConfig;

/// Exponentially decay `base` by `rate` every `decay_steps` steps.
///
/// With `staircase` the exponent is floored, producing a piecewise
/// constant schedule that drops at every `decay_steps` boundary.
pub fn exponential_decay(base: f64, rate: f64, decay_steps: u64, step: u64, staircase: bool) -> f64 {
    let mut exponent = step as f64 / decay_steps as f64;
    if staircase {
        exponent = exponent.floor();
    }
    base * rate.powf(exponent)
}

/// Linear learning-rate ramp over the first `warmup_epochs` epochs.
///
/// Progress through warmup is measured in fractional epochs, so the rate
/// rises smoothly within an epoch rather than jumping at epoch ends.
/// Past the warmup boundary the input rate is returned unchanged.
pub fn learning_rate_warmup(
    lr: f64,
    epoch: u32,
    warmup_epochs: f64,
    step_in_epoch: u64,
    steps_per_epoch: u64,
) -> f64 {
    if warmup_epochs <= 0.0 || steps_per_epoch == 0 {
        return lr;
    }
    let progress = f64::from(epoch) + step_in_epoch as f64 / steps_per_epoch as f64;
    lr * (progress / warmup_epochs).min(1.0)
}

/// Gradual warmup for data-parallel training.
///
/// Ramps the per-worker rate from `lr / world_size` up to `lr` over the
/// warmup window. The caller applies the linear scaling rule on top
/// (multiplying by the world size), so the effective rate goes from the
/// single-worker base to `world_size * lr`.
pub fn learning_rate_warmup_distributed(
    lr: f64,
    epoch: u32,
    warmup_epochs: f64,
    world_size: usize,
    step_in_epoch: u64,
    steps_per_epoch: u64,
) -> f64 {
    if warmup_epochs <= 0.0 || steps_per_epoch == 0 {
        return lr;
    }
    let progress = f64::from(epoch) + step_in_epoch as f64 / steps_per_epoch as f64;
    if progress >= warmup_epochs {
        return lr;
    }
    let workers = world_size as f64;
    lr * (1.0 + progress * (workers - 1.0) / warmup_epochs) / workers
}

/// Schedule knobs lifted out of the trainer config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSchedule {
    pub decay: bool,
    pub decay_rate: f64,
    pub decay_steps: u64,
    pub staircase: bool,
    pub warmup_epochs: f64,
}

impl StepSchedule {
    pub fn from_config(config: &TrainerConfig) -> Self {
        Self {
            decay: config.decay,
            decay_rate: config.decay_rate,
            decay_steps: config.decay_steps,
            staircase: config.staircase,
            warmup_epochs: config.learning_rate_warmup_epochs,
        }
    }

    /// Learning rate for one step: decay on the global step counter,
    /// then warmup on the position within the current epoch.
    pub fn lr_for_step(
        &self,
        base: f64,
        epoch: u32,
        global_step: u64,
        step_in_epoch: u64,
        steps_per_epoch: u64,
        world_size: usize,
    ) -> f64 {
        let mut lr = base;
        if self.decay {
            lr = exponential_decay(lr, self.decay_rate, self.decay_steps, global_step, self.staircase);
        }
        if world_size > 1 {
            learning_rate_warmup_distributed(
                lr,
                epoch,
                self.warmup_epochs,
                world_size,
                step_in_epoch,
                steps_per_epoch,
            ) * world_size as f64
        } else {
            learning_rate_warmup(lr, epoch, self.warmup_epochs, step_in_epoch, steps_per_epoch)
        }
    }
}
