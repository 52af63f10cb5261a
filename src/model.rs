//! Black-box model capability.
//!
//! The trainer never looks inside the model: it drives it through the
//! [`Model`] trait (forward/backward, metric aggregation, state dicts) and
//! mutates its parameters only through the optimizer.

use std::collections::BTreeMap;

use ndarray::Array1;

use crate::config::Regularization;
use crate::data::Batch;
use crate::error::Result;
use crate::metrics::MetricsSchema;

/// A trainable parameter: dense values plus an optional accumulated
/// gradient.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub data: Array1<f32>,
    pub grad: Option<Array1<f32>>,
}

impl Parameter {
    pub fn new(data: Array1<f32>) -> Self {
        Self { data, grad: None }
    }

    pub fn zeros(len: usize) -> Self {
        Self::new(Array1::zeros(len))
    }

    pub fn set_grad(&mut self, grad: Array1<f32>) {
        self.grad = Some(grad);
    }

    /// Add into the accumulated gradient.
    pub fn accumulate_grad(&mut self, grad: &Array1<f32>) {
        match &mut self.grad {
            Some(existing) => *existing += grad,
            None => self.grad = Some(grad.clone()),
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad = None;
    }
}

/// Flat parameter snapshot keyed by parameter name.
pub type StateDict = BTreeMap<String, Vec<f32>>;

/// Losses produced by one training step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepLosses {
    /// Sum of all per-target losses plus regularization terms.
    pub combined: f64,
    pub per_target: BTreeMap<String, f64>,
}

/// Aggregated metric values for one evaluation period:
/// target → metric → scalar. Metrics that failed for the period are
/// simply absent.
pub type MetricReport = BTreeMap<String, BTreeMap<String, f64>>;

/// Capability set the trainer consumes from a model.
pub trait Model {
    /// Declared output targets and their metric names. Queried once at
    /// training start to shape the metric logs.
    fn metrics_schema(&self) -> MetricsSchema;

    /// Forward pass, composite loss (task losses + regularization weighted
    /// by `lambda`), and backward pass into the parameter gradients.
    fn train_batch(
        &mut self,
        batch: &Batch,
        regularization: Regularization,
        lambda: f64,
    ) -> Result<StepLosses>;

    /// Forward-only pass that feeds the running metric accumulators.
    /// Must not touch gradients or optimizer state.
    fn eval_batch(&mut self, batch: &Batch) -> Result<()>;

    /// Epoch-aggregate metric values accumulated since the last
    /// [`Model::reset_metrics`]. Always includes `combined/loss`.
    fn metric_values(&self) -> MetricReport;

    /// Clear the running metric accumulators.
    fn reset_metrics(&mut self);

    /// Mutable access to the trainable parameters, for the optimizer and
    /// collective ops only.
    fn parameters_mut(&mut self) -> &mut [Parameter];

    /// Snapshot the parameters for checkpointing.
    fn state_dict(&self) -> StateDict;

    /// Restore parameters from a checkpoint snapshot.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}

/// L1/L2/elastic-net penalty over a parameter set, for models that build
/// their composite loss here rather than in their own graph.
pub fn regularization_penalty(
    params: &[Parameter],
    regularization: Regularization,
    lambda: f64,
) -> f64 {
    if lambda == 0.0 {
        return 0.0;
    }
    let l1: f64 = params
        .iter()
        .flat_map(|p| p.data.iter())
        .map(|&w| f64::from(w.abs()))
        .sum();
    let l2: f64 = params
        .iter()
        .flat_map(|p| p.data.iter())
        .map(|&w| f64::from(w) * f64::from(w))
        .sum();
    let term = match regularization {
        Regularization::L1 => l1,
        Regularization::L2 => l2,
        Regularization::L1L2 => l1 + l2,
    };
    lambda * term
}
