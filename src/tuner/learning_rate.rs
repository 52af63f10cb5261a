//! Learning-rate range sweep.
//!
//! Sweeps the rate from `min_lr` to `max_lr` over a fixed number of
//! steps while recording an EMA-smoothed training loss, then picks the
//! rate where the smoothed loss falls fastest.

use tracing::{debug, info};

use crate::error::Result;

/// How the candidate rate moves between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    Exponential,
    Linear,
}

/// Sweep parameters. The defaults match the usual range-test setup:
/// 100 steps from 1e-8 to 1.0 on an exponential ramp, smoothing beta
/// 0.98, divergence at three times the best smoothed loss, and the
/// first ten plus last one samples discarded before picking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRateSweep {
    pub min_lr: f64,
    pub max_lr: f64,
    pub total_steps: u32,
    pub mode: SweepMode,
    pub early_stop_threshold: f64,
    pub beta: f64,
    pub skip_begin: usize,
    pub skip_end: usize,
}

impl Default for LearningRateSweep {
    fn default() -> Self {
        Self {
            min_lr: 1e-8,
            max_lr: 1.0,
            total_steps: 100,
            mode: SweepMode::Exponential,
            early_stop_threshold: 3.0,
            beta: 0.98,
            skip_begin: 10,
            skip_end: 1,
        }
    }
}

impl LearningRateSweep {
    fn next_rate(&self, current: f64, step: u32) -> f64 {
        let scale = f64::from(step + 1) / f64::from(self.total_steps);
        match self.mode {
            SweepMode::Linear => current + scale * (self.max_lr - current),
            SweepMode::Exponential => current * (self.max_lr / current).powf(scale),
        }
    }
}

/// Run the sweep and return the tuned rate.
///
/// `step_loss` performs one training step at the given rate and returns
/// the raw batch loss. The sweep stops early when the smoothed loss
/// diverges past `early_stop_threshold` times the best seen. Falls back
/// to `base_lr` when the recorded curve is too short to pick from.
pub fn tune_learning_rate(
    base_lr: f64,
    sweep: &LearningRateSweep,
    mut step_loss: impl FnMut(f64) -> Result<f64>,
) -> Result<f64> {
    let mut current = sweep.min_lr;
    let mut avg_loss = 0.0;
    let mut best_loss = 0.0;
    let mut rates = Vec::new();
    let mut losses = Vec::new();

    for step in 0..sweep.total_steps {
        let loss = step_loss(current)?;

        avg_loss = sweep.beta * avg_loss + (1.0 - sweep.beta) * loss;
        let smoothed = avg_loss / (1.0 - sweep.beta.powi(step as i32 + 1));
        rates.push(current);
        losses.push(smoothed);

        if step > 0 && smoothed > sweep.early_stop_threshold * best_loss {
            debug!(step, smoothed, best_loss, "loss diverging, stopping sweep");
            break;
        }
        if step == 0 || smoothed < best_loss {
            best_loss = smoothed;
        }

        current = sweep.next_rate(current, step);
    }

    let tuned = match optimal_rate(&losses, &rates, sweep.skip_begin, sweep.skip_end) {
        Some(rate) => rate,
        None => {
            info!(base_lr, "sweep too short to pick a rate, keeping base");
            base_lr
        }
    };
    info!(learning_rate = tuned, samples = losses.len(), "tuned learning rate");
    Ok(tuned)
}

/// Rate at the minimum discrete gradient of the smoothed loss curve,
/// after discarding the warmup and tail samples.
fn optimal_rate(losses: &[f64], rates: &[f64], skip_begin: usize, skip_end: usize) -> Option<f64> {
    if losses.len() <= skip_begin + skip_end {
        return None;
    }
    let window: Vec<f64> = losses[skip_begin..losses.len() - skip_end]
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect();
    if window.len() < 2 {
        return None;
    }

    let gradient = discrete_gradient(&window);
    let best = gradient
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)?;
    rates.get(best + skip_begin).copied()
}

/// Central-difference gradient with one-sided differences at the ends.
fn discrete_gradient(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut grad = Vec::with_capacity(n);
    for i in 0..n {
        let g = if i == 0 {
            values[1] - values[0]
        } else if i == n - 1 {
            values[n - 1] - values[n - 2]
        } else {
            (values[i + 1] - values[i - 1]) / 2.0
        };
        grad.push(g);
    }
    grad
}
