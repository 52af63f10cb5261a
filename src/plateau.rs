//! Plateau controllers: adaptive learning-rate reduction and batch-size
//! increase driven by a stalled evaluation metric.
//!
//! Both controllers follow the same pattern: track the best value of a
//! configured metric, count epochs without improvement, and fire an
//! action when the count and the distance from the previous trigger both
//! reach the patience threshold. Each controller fires at most once per
//! epoch and at most `max_triggers` times over a run; the two are
//! independent and may both fire in the same epoch.

use tracing::info;

use crate::config::{Split, TrainerConfig};
use crate::error::{Error, Result};
use crate::metrics::{last_value, ImprovementCriterion};
use crate::progress::ProgressTracker;

#[derive(Debug, Clone, Copy, PartialEq)]
enum PlateauAction {
    ReduceLearningRate,
    IncreaseBatchSize { max: usize },
}

/// One plateau watcher bound to a metric, a split, and an action.
#[derive(Debug, Clone)]
pub struct PlateauController {
    criterion: ImprovementCriterion,
    metric: String,
    split: Split,
    patience: u32,
    rate: f64,
    max_triggers: u32,
    action: PlateauAction,
}

impl PlateauController {
    /// Learning-rate reduction controller, or `None` when reductions are
    /// disabled in the config.
    pub fn learning_rate(config: &TrainerConfig) -> Result<Option<Self>> {
        if config.reduce_learning_rate_on_plateau == 0 {
            return Ok(None);
        }
        Ok(Some(Self {
            criterion: ImprovementCriterion::for_metric(&config.reduce_learning_rate_eval_metric)?,
            metric: config.reduce_learning_rate_eval_metric.clone(),
            split: config.reduce_learning_rate_eval_split,
            patience: config.reduce_learning_rate_on_plateau_patience,
            rate: config.reduce_learning_rate_on_plateau_rate,
            max_triggers: config.reduce_learning_rate_on_plateau,
            action: PlateauAction::ReduceLearningRate,
        }))
    }

    /// Batch-size increase controller, or `None` when increases are
    /// disabled in the config.
    pub fn batch_size(config: &TrainerConfig) -> Result<Option<Self>> {
        if config.increase_batch_size_on_plateau == 0 {
            return Ok(None);
        }
        Ok(Some(Self {
            criterion: ImprovementCriterion::for_metric(&config.increase_batch_size_eval_metric)?,
            metric: config.increase_batch_size_eval_metric.clone(),
            split: config.increase_batch_size_eval_split,
            patience: config.increase_batch_size_on_plateau_patience,
            rate: config.increase_batch_size_on_plateau_rate,
            max_triggers: config.increase_batch_size_on_plateau,
            action: PlateauAction::IncreaseBatchSize {
                max: config.increase_batch_size_on_plateau_max,
            },
        }))
    }

    /// Evaluate the controller for the epoch just finished.
    ///
    /// Reads the last logged value of the watched metric for `target`,
    /// updates the tracker's plateau bookkeeping, and fires the action
    /// when the plateau condition holds. Returns whether it fired.
    pub fn check(&self, tracker: &mut ProgressTracker, target: &str) -> Result<bool> {
        if self.exhausted(tracker) {
            return Ok(false);
        }

        let log = match self.split {
            Split::Training => &tracker.train_metrics,
            Split::Validation => &tracker.validation_metrics,
            Split::Test => &tracker.test_metrics,
        };
        let value = last_value(log, target, &self.metric).ok_or_else(|| Error::Metric {
            target: target.to_string(),
            metric: self.metric.clone(),
            message: format!("no values logged for split {:?}", self.split),
        })?;

        match self.action {
            PlateauAction::ReduceLearningRate => Ok(self.check_learning_rate(tracker, target, value)),
            PlateauAction::IncreaseBatchSize { max } => {
                Ok(self.check_batch_size(tracker, target, value, max))
            }
        }
    }

    fn exhausted(&self, tracker: &ProgressTracker) -> bool {
        match self.action {
            PlateauAction::ReduceLearningRate => {
                tracker.num_reductions_learning_rate >= self.max_triggers
            }
            PlateauAction::IncreaseBatchSize { max } => {
                tracker.num_increases_batch_size >= self.max_triggers || tracker.batch_size == max
            }
        }
    }

    fn check_learning_rate(&self, tracker: &mut ProgressTracker, target: &str, value: f64) -> bool {
        if self
            .criterion
            .is_improved(value, tracker.best_reduce_learning_rate_eval_metric)
        {
            tracker.best_reduce_learning_rate_eval_metric = value;
            tracker.last_reduce_learning_rate_eval_metric_improvement = 0;
            return false;
        }

        tracker.last_reduce_learning_rate_eval_metric_improvement += 1;
        if tracker.last_learning_rate_reduction < self.patience
            || tracker.last_reduce_learning_rate_eval_metric_improvement < self.patience
        {
            return false;
        }

        tracker.learning_rate *= self.rate;
        info!(
            learning_rate = tracker.learning_rate,
            target,
            metric = %self.metric,
            "plateau reached, reducing learning rate"
        );
        tracker.last_learning_rate_reduction_epoch = tracker.epoch;
        tracker.last_learning_rate_reduction = 0;
        tracker.num_reductions_learning_rate += 1;
        if tracker.num_reductions_learning_rate >= self.max_triggers {
            info!(
                reductions = tracker.num_reductions_learning_rate,
                "learning rate reduction budget used up, not reducing it anymore"
            );
        }
        true
    }

    fn check_batch_size(
        &self,
        tracker: &mut ProgressTracker,
        target: &str,
        value: f64,
        max: usize,
    ) -> bool {
        if self
            .criterion
            .is_improved(value, tracker.best_increase_batch_size_eval_metric)
        {
            tracker.best_increase_batch_size_eval_metric = value;
            tracker.last_increase_batch_size_eval_metric_improvement = 0;
            return false;
        }

        tracker.last_increase_batch_size_eval_metric_improvement += 1;
        if tracker.last_increase_batch_size < self.patience
            || tracker.last_increase_batch_size_eval_metric_improvement < self.patience
        {
            return false;
        }

        let grown = (self.rate * tracker.batch_size as f64) as usize;
        tracker.batch_size = grown.min(max);
        info!(
            batch_size = tracker.batch_size,
            target,
            metric = %self.metric,
            "plateau reached, increasing batch size"
        );
        tracker.last_increase_batch_size_epoch = tracker.epoch;
        tracker.last_increase_batch_size = 0;
        tracker.num_increases_batch_size += 1;
        if tracker.num_increases_batch_size >= self.max_triggers {
            info!(
                increases = tracker.num_increases_batch_size,
                "batch size increase budget used up, not increasing it anymore"
            );
        } else if tracker.batch_size >= max {
            info!(
                batch_size = tracker.batch_size,
                "batch size reached the configured maximum"
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsSchema, LOSS};
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;

    fn tracker_with_losses(losses: &[f64]) -> ProgressTracker {
        let mut targets = BTreeMap::new();
        targets.insert("target".to_string(), vec![LOSS.to_string()]);
        let schema = MetricsSchema::new(targets);
        let mut tracker = ProgressTracker::new(
            64,
            0.1,
            f64::INFINITY,
            f64::INFINITY,
            f64::INFINITY,
            &schema,
        );
        tracker
            .train_metrics
            .entry("target".to_string())
            .or_default()
            .insert(LOSS.to_string(), losses.to_vec());
        tracker
    }

    fn lr_controller(max_triggers: u32, patience: u32) -> PlateauController {
        let config = TrainerConfig {
            reduce_learning_rate_on_plateau: max_triggers,
            reduce_learning_rate_on_plateau_patience: patience,
            reduce_learning_rate_on_plateau_rate: 0.5,
            ..TrainerConfig::default()
        };
        PlateauController::learning_rate(&config).unwrap().unwrap()
    }

    fn bs_controller(max_triggers: u32, patience: u32, max: usize) -> PlateauController {
        let config = TrainerConfig {
            increase_batch_size_on_plateau: max_triggers,
            increase_batch_size_on_plateau_patience: patience,
            increase_batch_size_on_plateau_rate: 2.0,
            increase_batch_size_on_plateau_max: max,
            ..TrainerConfig::default()
        };
        PlateauController::batch_size(&config).unwrap().unwrap()
    }

    #[test]
    fn test_disabled_controller_is_none() {
        let config = TrainerConfig::default();
        assert!(PlateauController::learning_rate(&config).unwrap().is_none());
        assert!(PlateauController::batch_size(&config).unwrap().is_none());
    }

    #[test]
    fn test_improvement_resets_counter() {
        let controller = lr_controller(2, 1);
        let mut tracker = tracker_with_losses(&[1.0]);
        assert!(!controller.check(&mut tracker, "target").unwrap());
        assert_abs_diff_eq!(tracker.best_reduce_learning_rate_eval_metric, 1.0);
        assert_eq!(tracker.last_reduce_learning_rate_eval_metric_improvement, 0);
        assert_abs_diff_eq!(tracker.learning_rate, 0.1);
    }

    #[test]
    fn test_reduction_fires_after_patience() {
        let controller = lr_controller(2, 2);
        let mut tracker = tracker_with_losses(&[1.0]);
        controller.check(&mut tracker, "target").unwrap();

        // Two stalled epochs; the distance counters grow with the epochs.
        for epoch in 1..=2 {
            tracker.epoch = epoch;
            tracker.refresh_distances();
            tracker
                .train_metrics
                .get_mut("target")
                .unwrap()
                .get_mut(LOSS)
                .unwrap()
                .push(1.0);
            let fired = controller.check(&mut tracker, "target").unwrap();
            assert_eq!(fired, epoch == 2);
        }

        assert_abs_diff_eq!(tracker.learning_rate, 0.05, epsilon = 1e-12);
        assert_eq!(tracker.num_reductions_learning_rate, 1);
        assert_eq!(tracker.last_learning_rate_reduction_epoch, 2);
        assert_eq!(tracker.last_learning_rate_reduction, 0);
    }

    #[test]
    fn test_reduction_budget_exhausts() {
        let controller = lr_controller(1, 0);
        let mut tracker = tracker_with_losses(&[1.0]);
        controller.check(&mut tracker, "target").unwrap();

        tracker.epoch = 1;
        tracker.refresh_distances();
        tracker
            .train_metrics
            .get_mut("target")
            .unwrap()
            .get_mut(LOSS)
            .unwrap()
            .push(1.0);
        assert!(controller.check(&mut tracker, "target").unwrap());
        assert_eq!(tracker.num_reductions_learning_rate, 1);

        // A second stalled epoch does nothing once the budget is spent.
        tracker.epoch = 2;
        tracker.refresh_distances();
        tracker
            .train_metrics
            .get_mut("target")
            .unwrap()
            .get_mut(LOSS)
            .unwrap()
            .push(1.0);
        assert!(!controller.check(&mut tracker, "target").unwrap());
        assert_abs_diff_eq!(tracker.learning_rate, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_batch_size_increase_clamps_to_max() {
        let controller = bs_controller(4, 0, 100);
        let mut tracker = tracker_with_losses(&[1.0]);
        controller.check(&mut tracker, "target").unwrap();

        tracker.epoch = 1;
        tracker.refresh_distances();
        tracker
            .train_metrics
            .get_mut("target")
            .unwrap()
            .get_mut(LOSS)
            .unwrap()
            .push(1.0);
        assert!(controller.check(&mut tracker, "target").unwrap());
        // 64 * 2.0 = 128, clamped to the configured maximum of 100.
        assert_eq!(tracker.batch_size, 100);

        // At the cap the controller goes quiet.
        tracker.epoch = 2;
        tracker.refresh_distances();
        tracker
            .train_metrics
            .get_mut("target")
            .unwrap()
            .get_mut(LOSS)
            .unwrap()
            .push(1.0);
        assert!(!controller.check(&mut tracker, "target").unwrap());
    }

    #[test]
    fn test_missing_metric_is_an_error() {
        let controller = lr_controller(2, 1);
        let mut tracker = tracker_with_losses(&[]);
        let err = controller.check(&mut tracker, "target").unwrap_err();
        assert!(matches!(err, Error::Metric { .. }));
    }

    #[test]
    fn test_controllers_are_independent() {
        let lr = lr_controller(2, 0);
        let bs = bs_controller(2, 0, 512);
        let mut tracker = tracker_with_losses(&[1.0]);
        lr.check(&mut tracker, "target").unwrap();
        bs.check(&mut tracker, "target").unwrap();

        tracker.epoch = 1;
        tracker.refresh_distances();
        tracker
            .train_metrics
            .get_mut("target")
            .unwrap()
            .get_mut(LOSS)
            .unwrap()
            .push(1.0);
        assert!(lr.check(&mut tracker, "target").unwrap());
        assert!(bs.check(&mut tracker, "target").unwrap());
        assert_abs_diff_eq!(tracker.learning_rate, 0.05, epsilon = 1e-12);
        assert_eq!(tracker.batch_size, 128);
    }
}
