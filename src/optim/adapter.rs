//! Adapter binding an optimizer, a clipping policy, and the collective
//! into a single fixed update sequence.

use crate::distributed::Collective;
use crate::error::Result;
use crate::model::Parameter;
use crate::optim::{ClipConfig, Optimizer};

/// Drives one parameter update with a fixed order of operations:
/// gradient synchronization, then clipping, then the optimizer step.
///
/// Gradients are averaged across workers exactly once per step. The
/// clipping threshold applies to the synchronized gradients, so every
/// worker clips by the same global norm and stays in lockstep.
pub struct TrainStepper {
    optimizer: Box<dyn Optimizer>,
    clipping: Option<ClipConfig>,
}

impl TrainStepper {
    pub fn new(optimizer: Box<dyn Optimizer>, clipping: Option<ClipConfig>) -> Self {
        Self {
            optimizer,
            clipping,
        }
    }

    /// Synchronize, clip, and apply one optimizer update.
    ///
    /// Returns the global gradient norm before clipping, or `None` when
    /// no clipping policy is configured.
    pub fn step_sequence(
        &mut self,
        params: &mut [Parameter],
        collective: &dyn Collective,
    ) -> Result<Option<f32>> {
        collective.all_reduce_gradients(params)?;
        let norm = self.clipping.map(|clip| clip.clip_grads(params));
        self.optimizer.step(params);
        Ok(norm)
    }

    pub fn zero_grad(&mut self, params: &mut [Parameter]) {
        self.optimizer.zero_grad(params);
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.lr()
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.set_lr(lr);
    }

    pub fn optimizer_state(&self) -> serde_json::Value {
        self.optimizer.state()
    }

    pub fn load_optimizer_state(&mut self, state: &serde_json::Value) -> Result<()> {
        self.optimizer.load_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::LocalCollective;
    use crate::optim::Sgd;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    fn one_param(value: f32, grad: f32) -> Vec<Parameter> {
        let mut param = Parameter::new(arr1(&[value]));
        param.set_grad(arr1(&[grad]));
        vec![param]
    }

    #[test]
    fn test_step_without_clipping() {
        let mut stepper = TrainStepper::new(Box::new(Sgd::new(0.1)), None);
        let mut params = one_param(1.0, 2.0);
        let norm = stepper
            .step_sequence(&mut params, &LocalCollective)
            .unwrap();
        assert!(norm.is_none());
        assert_abs_diff_eq!(params[0].data[0], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_step_clips_before_update() {
        let clip = ClipConfig::norm(1.0);
        let mut stepper = TrainStepper::new(Box::new(Sgd::new(0.1)), Some(clip));
        let mut params = one_param(1.0, 10.0);
        let norm = stepper
            .step_sequence(&mut params, &LocalCollective)
            .unwrap();
        // Pre-clip norm is 10, gradient is clipped to 1 before the step.
        assert_abs_diff_eq!(norm.unwrap(), 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(params[0].data[0], 0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_learning_rate_passthrough() {
        let mut stepper = TrainStepper::new(Box::new(Sgd::new(0.1)), None);
        assert_abs_diff_eq!(stepper.learning_rate(), 0.1);
        stepper.set_learning_rate(0.05);
        assert_abs_diff_eq!(stepper.learning_rate(), 0.05);
    }

    #[test]
    fn test_zero_grad_clears_gradients() {
        let mut stepper = TrainStepper::new(Box::new(Sgd::new(0.1)), None);
        let mut params = one_param(1.0, 2.0);
        stepper.zero_grad(&mut params);
        assert!(params[0].grad.is_none());
    }
}
