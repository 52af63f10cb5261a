//! Optimizers, gradient clipping, and the train-step adapter.

mod adapter;
pub mod clip;

pub use adapter::TrainStepper;
pub use clip::{clip_grad_norm, ClipConfig};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Parameter;

/// Trait for optimization algorithms.
pub trait Optimizer: Send {
    /// Apply one update from the accumulated gradients.
    fn step(&mut self, params: &mut [Parameter]);

    /// Zero out all gradients.
    fn zero_grad(&mut self, params: &mut [Parameter]) {
        for param in params {
            param.zero_grad();
        }
    }

    /// Get learning rate.
    fn lr(&self) -> f64;

    /// Set learning rate across all parameter groups at once.
    fn set_lr(&mut self, lr: f64);

    /// Serializable internal state for checkpointing.
    fn state(&self) -> serde_json::Value;

    /// Restore internal state from a checkpoint.
    fn load_state(&mut self, state: &serde_json::Value) -> Result<()>;
}

/// Plain stochastic gradient descent.
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [Parameter]) {
        let lr = self.learning_rate as f32;
        for param in params {
            if let Some(grad) = &param.grad {
                param.data.scaled_add(-lr, grad);
            }
        }
    }

    fn lr(&self) -> f64 {
        self.learning_rate
    }

    fn set_lr(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({ "type": "sgd", "lr": self.learning_rate })
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<()> {
        self.learning_rate = state
            .get("lr")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| Error::Serialization {
                message: "sgd state missing 'lr'".into(),
            })?;
        Ok(())
    }
}

/// Serialized Adam moment state.
#[derive(Serialize, Deserialize)]
struct AdamState {
    lr: f64,
    t: u64,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

/// Adam optimizer with bias-corrected first and second moments.
pub struct Adam {
    learning_rate: f64,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: u64,
    m: Vec<Array1<f32>>,
    v: Vec<Array1<f32>>,
}

impl Adam {
    pub fn new(learning_rate: f64, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            eps,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Adam with the usual (0.9, 0.999, 1e-8) coefficients.
    pub fn with_defaults(learning_rate: f64) -> Self {
        Self::new(learning_rate, 0.9, 0.999, 1e-8)
    }

    fn ensure_moments(&mut self, params: &[Parameter]) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(|p| Array1::zeros(p.data.len())).collect();
            self.v = params.iter().map(|p| Array1::zeros(p.data.len())).collect();
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [Parameter]) {
        self.ensure_moments(params);
        self.t += 1;
        let lr = self.learning_rate as f32;
        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);

        for (i, param) in params.iter_mut().enumerate() {
            let Some(grad) = &param.grad else { continue };
            let m = &mut self.m[i];
            let v = &mut self.v[i];
            for ((w, &g), (m_i, v_i)) in param
                .data
                .iter_mut()
                .zip(grad.iter())
                .zip(m.iter_mut().zip(v.iter_mut()))
            {
                *m_i = self.beta1 * *m_i + (1.0 - self.beta1) * g;
                *v_i = self.beta2 * *v_i + (1.0 - self.beta2) * g * g;
                let m_hat = *m_i / bias1;
                let v_hat = *v_i / bias2;
                *w -= lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }

    fn lr(&self) -> f64 {
        self.learning_rate
    }

    fn set_lr(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn state(&self) -> serde_json::Value {
        let state = AdamState {
            lr: self.learning_rate,
            t: self.t,
            m: self.m.iter().map(|a| a.to_vec()).collect(),
            v: self.v.iter().map(|a| a.to_vec()).collect(),
        };
        serde_json::to_value(state).unwrap_or(serde_json::Value::Null)
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<()> {
        let state: AdamState = serde_json::from_value(state.clone())?;
        self.learning_rate = state.lr;
        self.t = state.t;
        self.m = state.m.into_iter().map(Array1::from).collect();
        self.v = state.v.into_iter().map(Array1::from).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_sgd_step() {
        let mut opt = Sgd::new(0.1);
        let mut params = vec![Parameter::new(arr1(&[1.0, 2.0]))];
        params[0].set_grad(arr1(&[0.5, 1.0]));
        opt.step(&mut params);
        assert_abs_diff_eq!(params[0].data[0], 0.95, epsilon = 1e-6);
        assert_abs_diff_eq!(params[0].data[1], 1.9, epsilon = 1e-6);
    }

    #[test]
    fn test_sgd_skips_missing_grad() {
        let mut opt = Sgd::new(0.1);
        let mut params = vec![Parameter::new(arr1(&[1.0]))];
        opt.step(&mut params);
        assert_eq!(params[0].data[0], 1.0);
    }

    #[test]
    fn test_set_lr() {
        let mut opt = Adam::with_defaults(0.001);
        assert_eq!(opt.lr(), 0.001);
        opt.set_lr(0.01);
        assert_eq!(opt.lr(), 0.01);
    }

    #[test]
    fn test_adam_first_step_magnitude() {
        // With bias correction, the first Adam update is ~lr in magnitude.
        let mut opt = Adam::with_defaults(0.1);
        let mut params = vec![Parameter::new(arr1(&[1.0]))];
        params[0].set_grad(arr1(&[2.0]));
        opt.step(&mut params);
        assert_abs_diff_eq!(params[0].data[0], 0.9, epsilon = 1e-4);
    }

    #[test]
    fn test_adam_converges_on_quadratic() {
        // Minimize f(w) = (w - 3)^2 from w = 0.
        let mut opt = Adam::with_defaults(0.1);
        let mut params = vec![Parameter::new(arr1(&[0.0f32]))];
        for _ in 0..500 {
            let w = params[0].data[0];
            params[0].set_grad(arr1(&[2.0 * (w - 3.0)]));
            opt.step(&mut params);
        }
        assert_abs_diff_eq!(params[0].data[0], 3.0, epsilon = 1e-2);
    }

    #[test]
    fn test_adam_state_round_trip() {
        let mut opt = Adam::with_defaults(0.05);
        let mut params = vec![Parameter::new(arr1(&[1.0, -1.0]))];
        params[0].set_grad(arr1(&[0.3, -0.2]));
        opt.step(&mut params);

        let saved = opt.state();
        let mut restored = Adam::with_defaults(0.001);
        restored.load_state(&saved).unwrap();
        assert_eq!(restored.lr(), 0.05);
        assert_eq!(restored.t, 1);

        // Same state must produce the same next update.
        let mut a = params.clone();
        let mut b = params.clone();
        a[0].set_grad(arr1(&[0.1, 0.1]));
        b[0].set_grad(arr1(&[0.1, 0.1]));
        opt.step(&mut a);
        restored.step(&mut b);
        assert_abs_diff_eq!(a[0].data[0], b[0].data[0], epsilon = 1e-7);
        assert_abs_diff_eq!(a[0].data[1], b[0].data[1], epsilon = 1e-7);
    }

    #[test]
    fn test_sgd_state_round_trip() {
        let opt = Sgd::new(0.42);
        let mut restored = Sgd::new(0.001);
        restored.load_state(&opt.state()).unwrap();
        assert_eq!(restored.lr(), 0.42);
        assert!(restored.load_state(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_zero_grad_clears_all() {
        let mut opt = Sgd::new(0.1);
        let mut params = vec![Parameter::new(arr1(&[1.0])), Parameter::new(arr1(&[2.0]))];
        for p in &mut params {
            p.set_grad(arr1(&[1.0]));
        }
        opt.zero_grad(&mut params);
        assert!(params.iter().all(|p| p.grad.is_none()));
    }
}
