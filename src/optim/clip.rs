//! Gradient clipping by global norm.

use serde::{Deserialize, Serialize};

use crate::model::Parameter;

/// Gradient clipping policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipConfig {
    /// Maximum allowed global gradient norm.
    pub max_norm: f64,
}

impl ClipConfig {
    pub fn norm(max_norm: f64) -> Self {
        Self { max_norm }
    }

    /// Apply the policy to a parameter set.
    pub fn clip_grads(&self, params: &mut [Parameter]) -> f32 {
        clip_grad_norm(params, self.max_norm as f32)
    }
}

/// Clip gradients by global norm.
///
/// Computes the global norm over all gradients and scales them down if it
/// exceeds `max_norm`, preserving relative magnitudes across parameters:
///
/// 1. `global_norm = sqrt(sum of all gradient squared norms)`
/// 2. If `global_norm > max_norm`, every gradient is multiplied by
///    `max_norm / global_norm`.
///
/// Returns the global norm before clipping.
pub fn clip_grad_norm(params: &mut [Parameter], max_norm: f32) -> f32 {
    let mut total_norm_sq = 0.0f32;
    for param in params.iter() {
        if let Some(grad) = &param.grad {
            total_norm_sq += grad.iter().map(|&g| g * g).sum::<f32>();
        }
    }

    let global_norm = total_norm_sq.sqrt();

    if global_norm > max_norm {
        let clip_coef = max_norm / global_norm;
        for param in params.iter_mut() {
            if let Some(grad) = &mut param.grad {
                grad.mapv_inplace(|g| g * clip_coef);
            }
        }
    }

    global_norm
}
