//! Trainer configuration: one immutable value object, validated at
//! construction and passed by reference into every component.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::{COMBINED, LOSS};
use crate::optim::ClipConfig;

/// Regularization added to the task losses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regularization {
    L1,
    L2,
    /// Elastic net: both L1 and L2 terms.
    L1L2,
}

/// Dataset split a plateau controller watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Training,
    Validation,
    Test,
}

/// A learning rate, or the sentinel requesting pre-training tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LearningRateSetting {
    Fixed(f64),
    Auto(AutoSentinel),
}

/// A batch size, or the sentinel requesting pre-training tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchSizeSetting {
    Fixed(usize),
    Auto(AutoSentinel),
}

/// The literal string `"auto"` in a serialized config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoSentinel {
    #[serde(rename = "auto")]
    Auto,
}

impl LearningRateSetting {
    pub const AUTO: Self = Self::Auto(AutoSentinel::Auto);

    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto(_))
    }

    /// Resolved numeric rate; the tuner's placeholder when `auto`.
    pub fn base_rate(&self) -> f64 {
        match self {
            Self::Fixed(lr) => *lr,
            // Placeholder until tune_learning_rate replaces it.
            Self::Auto(_) => 0.001,
        }
    }
}

impl BatchSizeSetting {
    pub const AUTO: Self = Self::Auto(AutoSentinel::Auto);

    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto(_))
    }

    /// Resolved size; the tuner's starting placeholder when `auto`.
    pub fn size(&self) -> usize {
        match self {
            Self::Fixed(n) => *n,
            Self::Auto(_) => 128,
        }
    }
}

/// Hyperparameter snapshot for one training run.
///
/// Construct, then call [`TrainerConfig::validate`] (the trainer does this
/// first thing); invalid fields fail fast naming the field and the allowed
/// values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Epoch budget for the run.
    pub epochs: u32,
    /// Strength of the regularization term.
    pub regularization_lambda: f64,
    pub regularization_type: Regularization,
    /// Whether the training batcher shuffles between epochs.
    pub should_shuffle: bool,
    pub learning_rate: LearningRateSetting,
    pub batch_size: BatchSizeSetting,
    /// Evaluation batch size; `None` mirrors `batch_size`.
    pub eval_batch_size: Option<BatchSizeSetting>,
    /// Epochs without validation improvement before stopping; -1 disables.
    pub early_stop: i32,

    /// Maximum number of plateau-triggered LR reductions; 0 disables.
    pub reduce_learning_rate_on_plateau: u32,
    pub reduce_learning_rate_on_plateau_patience: u32,
    pub reduce_learning_rate_on_plateau_rate: f64,
    pub reduce_learning_rate_eval_metric: String,
    pub reduce_learning_rate_eval_split: Split,

    /// Maximum number of plateau-triggered batch-size increases; 0 disables.
    pub increase_batch_size_on_plateau: u32,
    pub increase_batch_size_on_plateau_patience: u32,
    pub increase_batch_size_on_plateau_rate: f64,
    pub increase_batch_size_on_plateau_max: usize,
    pub increase_batch_size_eval_metric: String,
    pub increase_batch_size_eval_split: Split,

    pub decay: bool,
    pub decay_steps: u64,
    pub decay_rate: f64,
    pub staircase: bool,

    pub gradient_clipping: Option<ClipConfig>,

    /// Output target whose metric gates early stopping and model saves.
    pub validation_field: String,
    pub validation_metric: String,

    /// Epochs over which the learning rate ramps linearly from 0.
    pub learning_rate_warmup_epochs: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            regularization_lambda: 0.0,
            regularization_type: Regularization::L2,
            should_shuffle: true,
            learning_rate: LearningRateSetting::Fixed(0.001),
            batch_size: BatchSizeSetting::Fixed(128),
            eval_batch_size: None,
            early_stop: 5,
            reduce_learning_rate_on_plateau: 0,
            reduce_learning_rate_on_plateau_patience: 5,
            reduce_learning_rate_on_plateau_rate: 0.5,
            reduce_learning_rate_eval_metric: LOSS.to_string(),
            reduce_learning_rate_eval_split: Split::Training,
            increase_batch_size_on_plateau: 0,
            increase_batch_size_on_plateau_patience: 5,
            increase_batch_size_on_plateau_rate: 2.0,
            increase_batch_size_on_plateau_max: 512,
            increase_batch_size_eval_metric: LOSS.to_string(),
            increase_batch_size_eval_split: Split::Training,
            decay: false,
            decay_steps: 10_000,
            decay_rate: 0.96,
            staircase: false,
            gradient_clipping: None,
            validation_field: COMBINED.to_string(),
            validation_metric: LOSS.to_string(),
            learning_rate_warmup_epochs: 1.0,
        }
    }
}

impl TrainerConfig {
    /// Check every field against its documented range.
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::config(
                "epochs",
                "must be greater than 0",
                "Use a positive epoch budget such as 100",
            ));
        }
        if self.regularization_lambda < 0.0 || !self.regularization_lambda.is_finite() {
            return Err(Error::config(
                "regularization_lambda",
                format!("{} is not a finite value >= 0", self.regularization_lambda),
                "Use 0.0 to disable regularization",
            ));
        }
        if let LearningRateSetting::Fixed(lr) = self.learning_rate {
            if !(lr > 0.0 && lr <= 1.0) {
                return Err(Error::config(
                    "learning_rate",
                    format!("{lr} is outside (0, 1]"),
                    "Use a rate like 0.001, or \"auto\" to tune it",
                ));
            }
        }
        if let BatchSizeSetting::Fixed(n) = self.batch_size {
            if n == 0 {
                return Err(Error::config(
                    "batch_size",
                    "must be greater than 0",
                    "Use a positive size like 128, or \"auto\" to tune it",
                ));
            }
        }
        if let Some(BatchSizeSetting::Fixed(0)) = self.eval_batch_size {
            return Err(Error::config(
                "eval_batch_size",
                "must be greater than 0",
                "Use a positive size, \"auto\", or omit it to mirror batch_size",
            ));
        }
        if self.early_stop < -1 {
            return Err(Error::config(
                "early_stop",
                format!("{} is below -1", self.early_stop),
                "Use -1 to disable early stopping, or a non-negative patience",
            ));
        }
        if !(0.0..=1.0).contains(&self.reduce_learning_rate_on_plateau_rate) {
            return Err(Error::config(
                "reduce_learning_rate_on_plateau_rate",
                format!(
                    "{} is outside [0, 1]",
                    self.reduce_learning_rate_on_plateau_rate
                ),
                "Use a multiplier below 1, such as 0.5",
            ));
        }
        if self.increase_batch_size_on_plateau_rate < 0.0 {
            return Err(Error::config(
                "increase_batch_size_on_plateau_rate",
                format!("{} is negative", self.increase_batch_size_on_plateau_rate),
                "Use a multiplier above 1, such as 2.0",
            ));
        }
        if self.increase_batch_size_on_plateau_max == 0 {
            return Err(Error::config(
                "increase_batch_size_on_plateau_max",
                "must be greater than 0",
                "Use a cap such as 512",
            ));
        }
        if self.decay_steps == 0 {
            return Err(Error::config(
                "decay_steps",
                "must be greater than 0",
                "Use a step interval such as 10000",
            ));
        }
        if !(0.0..=1.0).contains(&self.decay_rate) {
            return Err(Error::config(
                "decay_rate",
                format!("{} is outside [0, 1]", self.decay_rate),
                "Use a decay factor such as 0.96",
            ));
        }
        if let Some(clip) = &self.gradient_clipping {
            if !(clip.max_norm > 0.0) {
                return Err(Error::config(
                    "gradient_clipping.max_norm",
                    format!("{} is not positive", clip.max_norm),
                    "Use a norm bound such as 0.5, or omit gradient_clipping",
                ));
            }
        }
        if self.learning_rate_warmup_epochs < 0.0 {
            return Err(Error::config(
                "learning_rate_warmup_epochs",
                format!("{} is negative", self.learning_rate_warmup_epochs),
                "Use 0 to disable warmup",
            ));
        }
        Ok(())
    }

    /// Evaluation batch size resolved against `batch_size`.
    pub fn resolved_eval_batch_size(&self) -> usize {
        self.eval_batch_size.unwrap_or(self.batch_size).size()
    }
}
