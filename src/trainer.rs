//! The training orchestrator.
//!
//! `Trainer` drives the epoch/step loop over a [`Model`] and a set of
//! [`Dataset`] splits: per-step learning-rate scheduling, the
//! synchronize/clip/update sequence, per-epoch evaluation, plateau
//! control, early stopping, checkpointing, and progress persistence.
//! All filesystem side effects happen on the coordinator rank only.

use std::fs;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::callback::CallbackList;
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::TrainerConfig;
use crate::data::Dataset;
use crate::distributed::{Collective, LocalCollective};
use crate::error::{Error, Result};
use crate::eval::{append_metrics, evaluate_split};
use crate::interrupt::InterruptToken;
use crate::metrics::{last_value, ImprovementCriterion, MetricsLog, MetricsSchema, COMBINED, LOSS};
use crate::model::{Model, StepLosses};
use crate::optim::{Optimizer, TrainStepper};
use crate::plateau::PlateauController;
use crate::progress::ProgressTracker;
use crate::schedule::StepSchedule;
use crate::sink::{MetricsSink, NullSink};
use crate::tuner::{self, LearningRateSweep};

pub const TRAINING_PROGRESS_FILE_NAME: &str = "training_progress.json";
pub const MODEL_WEIGHTS_FILE_NAME: &str = "model_weights.json";
pub const TRAINING_CHECKPOINTS_DIR: &str = "training_checkpoints";

/// Per-run switches orthogonal to the hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainOptions {
    /// Restore tracker and latest checkpoint instead of starting fresh.
    pub resume: bool,
    pub skip_save_model: bool,
    pub skip_save_progress: bool,
    pub skip_save_log: bool,
    /// Checkpoints retained on disk.
    pub max_checkpoints: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            resume: false,
            skip_save_model: false,
            skip_save_progress: false,
            skip_save_log: false,
            max_checkpoints: 1,
        }
    }
}

/// Everything `train` hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutput {
    pub train_metrics: MetricsLog,
    pub validation_metrics: MetricsLog,
    pub test_metrics: MetricsLog,
    pub progress: ProgressTracker,
}

pub struct Trainer {
    config: TrainerConfig,
    options: TrainOptions,
    stepper: TrainStepper,
    schedule: StepSchedule,
    token: InterruptToken,
    callbacks: CallbackList,
    sink: Box<dyn MetricsSink>,
    collective: Box<dyn Collective>,
    base_learning_rate: f64,
    batch_size: usize,
    eval_batch_size: usize,
}

impl Trainer {
    /// Build a trainer over a validated config.
    pub fn new(
        config: TrainerConfig,
        options: TrainOptions,
        optimizer: Box<dyn Optimizer>,
    ) -> Result<Self> {
        config.validate()?;
        let stepper = TrainStepper::new(optimizer, config.gradient_clipping);
        let schedule = StepSchedule::from_config(&config);
        let base_learning_rate = config.learning_rate.base_rate();
        let batch_size = config.batch_size.size();
        let eval_batch_size = config.resolved_eval_batch_size();
        Ok(Self {
            config,
            options,
            stepper,
            schedule,
            token: InterruptToken::new(),
            callbacks: CallbackList::new(),
            sink: Box::new(NullSink),
            collective: Box::new(LocalCollective),
            base_learning_rate,
            batch_size,
            eval_batch_size,
        })
    }

    /// Token the embedder can signal from its own interrupt handler.
    pub fn interrupt_token(&self) -> InterruptToken {
        self.token.clone()
    }

    pub fn set_sink(&mut self, sink: Box<dyn MetricsSink>) {
        self.sink = sink;
    }

    pub fn set_collective(&mut self, collective: Box<dyn Collective>) {
        self.collective = collective;
    }

    pub fn add_callback(&mut self, callback: Box<dyn crate::callback::TrainerCallback>) {
        self.callbacks.push(callback);
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn base_learning_rate(&self) -> f64 {
        self.base_learning_rate
    }

    /// Run the full training loop.
    ///
    /// Returns the recorded metric histories and the final progress
    /// state. Terminates on the epoch budget, early stopping, a
    /// graceful interrupt, or an error.
    pub fn train(
        &mut self,
        model: &mut dyn Model,
        training_set: &dyn Dataset,
        validation_set: Option<&dyn Dataset>,
        test_set: Option<&dyn Dataset>,
        save_path: &Path,
    ) -> Result<TrainOutput> {
        let schema = model.metrics_schema();
        let validation_field = resolve_validation_field(&self.config, &schema)?;
        let criterion = ImprovementCriterion::for_metric(&self.config.validation_metric)?;
        let reduce_criterion =
            ImprovementCriterion::for_metric(&self.config.reduce_learning_rate_eval_metric)?;
        let increase_criterion =
            ImprovementCriterion::for_metric(&self.config.increase_batch_size_eval_metric)?;
        let lr_controller = PlateauController::learning_rate(&self.config)?;
        let bs_controller = PlateauController::batch_size(&self.config)?;

        // An empty validation split behaves as no validation at all.
        let validation_set = validation_set.filter(|d| !d.is_empty());
        let test_set = test_set.filter(|d| !d.is_empty());

        let coordinator = self.collective.is_coordinator();
        if coordinator {
            fs::create_dir_all(save_path)
                .map_err(|e| Error::io(format!("creating {}", save_path.display()), e))?;
        }
        let progress_path = save_path.join(TRAINING_PROGRESS_FILE_NAME);
        let weights_path = save_path.join(MODEL_WEIGHTS_FILE_NAME);
        let checkpoints = if coordinator {
            Some(CheckpointManager::new(
                save_path.join(TRAINING_CHECKPOINTS_DIR),
                self.options.max_checkpoints,
            )?)
        } else {
            None
        };

        let mut tracker = if self.options.resume {
            info!(path = %progress_path.display(), "resuming training");
            let tracker = ProgressTracker::load(&progress_path)?;
            if let Some(manager) = &checkpoints {
                let checkpoint = manager.load_latest()?;
                model.load_state_dict(&checkpoint.model)?;
                self.stepper.load_optimizer_state(&checkpoint.optimizer)?;
            }
            tracker
        } else {
            ProgressTracker::new(
                self.batch_size,
                self.base_learning_rate,
                criterion.initial_value(),
                reduce_criterion.initial_value(),
                increase_criterion.initial_value(),
                &schema,
            )
        };

        // Align all workers before the first step, whether weights are
        // fresh or restored.
        self.collective.broadcast_parameters(model.parameters_mut())?;
        let mut optimizer_state = self.stepper.optimizer_state();
        self.collective.broadcast_optimizer_state(&mut optimizer_state)?;
        self.stepper.load_optimizer_state(&optimizer_state)?;

        self.callbacks
            .dispatch(&tracker, |cb, t| cb.on_train_setup(t))?;

        while tracker.epoch < self.config.epochs {
            let epoch_start = Instant::now();
            if coordinator {
                info!(epoch = tracker.epoch + 1, total = self.config.epochs, "epoch");
            }

            model.reset_metrics();
            if coordinator {
                self.callbacks
                    .dispatch(&tracker, |cb, t| cb.on_epoch_start(t))?;
            }

            {
                let mut batcher =
                    training_set.batcher(tracker.batch_size, self.config.should_shuffle);
                batcher.set_epoch(tracker.epoch, tracker.batch_size);

                while batcher.has_more_batches() {
                    if coordinator {
                        self.callbacks
                            .dispatch(&tracker, |cb, t| cb.on_batch_start(t))?;
                    }

                    let lr = self.schedule.lr_for_step(
                        tracker.learning_rate,
                        tracker.epoch,
                        tracker.steps,
                        batcher.step(),
                        batcher.steps_per_epoch(),
                        self.collective.world_size(),
                    );
                    self.stepper.set_learning_rate(lr);

                    let batch = batcher.next_batch()?;
                    self.stepper.zero_grad(model.parameters_mut());
                    let losses = model.train_batch(
                        &batch,
                        self.config.regularization_type,
                        self.config.regularization_lambda,
                    )?;
                    self.stepper
                        .step_sequence(model.parameters_mut(), self.collective.as_ref())?;

                    if coordinator && !self.options.skip_save_log {
                        write_step_summary(self.sink.as_mut(), &losses, lr, tracker.steps)?;
                    }
                    tracker.steps += 1;
                    debug!(step = tracker.steps, loss = losses.combined, "completed batch");

                    if coordinator {
                        self.callbacks
                            .dispatch(&tracker, |cb, t| cb.on_batch_end(t))?;
                    }
                    if self.token.is_aborted() {
                        return Err(Error::Interrupted {
                            epoch: tracker.epoch,
                        });
                    }
                }
            }

            tracker.epoch += 1;

            // Evaluation runs at the possibly-grown batch size; it never
            // shrinks below the training batch size.
            self.eval_batch_size = self.eval_batch_size.max(tracker.batch_size);

            let report = evaluate_split(model, training_set, self.eval_batch_size, "train")?;
            append_metrics(&report, &schema, &mut tracker.train_metrics);
            if coordinator && !self.options.skip_save_log {
                write_epoch_summary(self.sink.as_mut(), "train", &tracker.train_metrics, tracker.epoch)?;
            }

            if let Some(validation) = validation_set {
                if coordinator {
                    self.callbacks
                        .dispatch(&tracker, |cb, t| cb.on_validation_start(t))?;
                }
                let report = evaluate_split(model, validation, self.eval_batch_size, "validation")?;
                append_metrics(&report, &schema, &mut tracker.validation_metrics);
                if coordinator && !self.options.skip_save_log {
                    write_epoch_summary(
                        self.sink.as_mut(),
                        "validation",
                        &tracker.validation_metrics,
                        tracker.epoch,
                    )?;
                }
                if coordinator {
                    self.callbacks
                        .dispatch(&tracker, |cb, t| cb.on_validation_end(t))?;
                }
            }

            if let Some(test) = test_set {
                if coordinator {
                    self.callbacks
                        .dispatch(&tracker, |cb, t| cb.on_test_start(t))?;
                }
                let report = evaluate_split(model, test, self.eval_batch_size, "test")?;
                append_metrics(&report, &schema, &mut tracker.test_metrics);
                if coordinator && !self.options.skip_save_log {
                    write_epoch_summary(self.sink.as_mut(), "test", &tracker.test_metrics, tracker.epoch)?;
                }
                if coordinator {
                    self.callbacks
                        .dispatch(&tracker, |cb, t| cb.on_test_end(t))?;
                }
            }

            if coordinator {
                info!(
                    elapsed_ms = epoch_start.elapsed().as_millis() as u64,
                    "epoch finished"
                );
            }

            if validation_set.is_some() {
                let save_to = (coordinator && !self.options.skip_save_model)
                    .then_some(weights_path.as_path());
                let should_break = check_progress_on_validation(
                    model,
                    &mut tracker,
                    &validation_field,
                    &self.config.validation_metric,
                    &criterion,
                    lr_controller.as_ref(),
                    bs_controller.as_ref(),
                    self.config.early_stop,
                    save_to,
                )?;
                if should_break {
                    break;
                }
            } else if coordinator && !self.options.skip_save_model {
                // No validation signal, so keep the latest weights.
                save_model_weights(model, &weights_path)?;
            }

            if coordinator && !self.options.skip_save_progress {
                if let Some(manager) = &checkpoints {
                    manager.save(&Checkpoint {
                        epoch: tracker.epoch,
                        model: model.state_dict(),
                        optimizer: self.stepper.optimizer_state(),
                    })?;
                }
                tracker.save(&progress_path)?;
            }

            if coordinator {
                self.callbacks
                    .dispatch(&tracker, |cb, t| cb.on_epoch_end(t))?;
            }

            if self.token.is_requested() {
                info!(
                    epoch = tracker.epoch,
                    "interrupt received, concluding training after this epoch"
                );
                break;
            }
        }

        self.sink.flush()?;
        Ok(TrainOutput {
            train_metrics: tracker.train_metrics.clone(),
            validation_metrics: tracker.validation_metrics.clone(),
            test_metrics: tracker.test_metrics.clone(),
            progress: tracker,
        })
    }

    /// One unevaluated pass over `dataset`: the online-learning entry
    /// point. No scheduling, persistence, or metric recording.
    pub fn train_online(&mut self, model: &mut dyn Model, dataset: &dyn Dataset) -> Result<()> {
        let mut batcher = dataset.batcher(self.batch_size, self.config.should_shuffle);
        while batcher.has_more_batches() {
            let batch = batcher.next_batch()?;
            self.stepper.zero_grad(model.parameters_mut());
            model.train_batch(
                &batch,
                self.config.regularization_type,
                self.config.regularization_lambda,
            )?;
            self.stepper
                .step_sequence(model.parameters_mut(), self.collective.as_ref())?;
        }
        Ok(())
    }

    /// Short training burst used as a probe by the tuners.
    pub fn train_for_tuning(
        &mut self,
        model: &mut dyn Model,
        dataset: &dyn Dataset,
        batch_size: usize,
        total_steps: u32,
    ) -> Result<()> {
        let mut batcher = dataset.batcher(batch_size, false);
        let mut steps = 0;
        while batcher.has_more_batches() && steps < total_steps {
            let batch = batcher.next_batch()?;
            self.stepper.zero_grad(model.parameters_mut());
            model.train_batch(
                &batch,
                self.config.regularization_type,
                self.config.regularization_lambda,
            )?;
            self.stepper
                .step_sequence(model.parameters_mut(), self.collective.as_ref())?;
            steps += 1;
        }
        Ok(())
    }

    /// Probe for the largest workable batch size and adopt it.
    ///
    /// Persistence is suppressed for the duration of the probe and the
    /// previous switches restored on every exit path.
    pub fn tune_batch_size(
        &mut self,
        model: &mut dyn Model,
        training_set: &dyn Dataset,
        max_trials: u32,
        halving_limit: u32,
    ) -> Result<usize> {
        let saved = self.suppress_persistence();
        let result = tuner::tune_batch_size(
            |size| self.train_for_tuning(model, training_set, size, 3),
            training_set.len(),
            max_trials,
            halving_limit,
        );
        self.restore_persistence(saved);
        let tuned = result?;
        self.batch_size = tuned;
        Ok(tuned)
    }

    /// Sweep for a learning rate and adopt it as the base rate.
    pub fn tune_learning_rate(
        &mut self,
        model: &mut dyn Model,
        training_set: &dyn Dataset,
        sweep: &LearningRateSweep,
    ) -> Result<f64> {
        let saved = self.suppress_persistence();
        let base = self.base_learning_rate;
        let batch_size = self.batch_size;
        let regularization = self.config.regularization_type;
        let lambda = self.config.regularization_lambda;

        let mut batcher = training_set.batcher(batch_size, self.config.should_shuffle);
        let mut epoch = 0u32;
        let stepper = &mut self.stepper;
        let collective = self.collective.as_ref();
        let result = tuner::tune_learning_rate(base, sweep, |lr| {
            if !batcher.has_more_batches() {
                epoch += 1;
                batcher.set_epoch(epoch, batch_size);
            }
            stepper.set_learning_rate(lr);
            let batch = batcher.next_batch()?;
            stepper.zero_grad(model.parameters_mut());
            let losses = model.train_batch(&batch, regularization, lambda)?;
            stepper.step_sequence(model.parameters_mut(), collective)?;
            Ok(losses.combined)
        });

        self.restore_persistence(saved);
        let tuned = result?;
        self.base_learning_rate = tuned;
        Ok(tuned)
    }

    fn suppress_persistence(&mut self) -> (bool, bool, bool) {
        let saved = (
            self.options.skip_save_model,
            self.options.skip_save_progress,
            self.options.skip_save_log,
        );
        self.options.skip_save_model = true;
        self.options.skip_save_progress = true;
        self.options.skip_save_log = true;
        saved
    }

    fn restore_persistence(&mut self, saved: (bool, bool, bool)) {
        self.options.skip_save_model = saved.0;
        self.options.skip_save_progress = saved.1;
        self.options.skip_save_log = saved.2;
    }
}

/// Validate `validation_field`/`validation_metric` against the model's
/// schema, re-targeting `combined` to the single output target when the
/// metric only exists there.
fn resolve_validation_field(config: &TrainerConfig, schema: &MetricsSchema) -> Result<String> {
    let metric = &config.validation_metric;
    let mut field = config.validation_field.clone();

    if field == COMBINED {
        if metric != LOSS && schema.num_targets() == 1 {
            if let Some(only) = schema.target_names().next() {
                if schema.metrics_for(only).iter().any(|m| m == metric) {
                    warn!(
                        target = only,
                        metric = %metric,
                        "replacing 'combined' validation field: the metric is only valid for the single output target"
                    );
                    field = only.to_string();
                }
            }
        }
    } else if !schema.has_target(&field) {
        let available: Vec<&str> = schema.target_names().collect();
        return Err(Error::config(
            "validation_field",
            format!("'{field}' is not an output target"),
            format!("Use one of {available:?} or \"combined\""),
        ));
    }

    let metric_valid = if field == COMBINED {
        metric == LOSS
    } else {
        schema.metrics_for(&field).iter().any(|m| m == metric)
    };
    if !metric_valid {
        let available: Vec<String> = if field == COMBINED {
            vec![LOSS.to_string()]
        } else {
            schema.metrics_for(&field).to_vec()
        };
        return Err(Error::config(
            "validation_metric",
            format!("'{metric}' is not recorded for '{field}'"),
            format!("Available metrics for '{field}': {available:?}"),
        ));
    }
    Ok(field)
}

/// Improvement bookkeeping, plateau controllers, and early stopping,
/// evaluated once per epoch after validation. Returns whether training
/// should stop. `save_to` is `Some` only on the coordinator with model
/// saving enabled; the model artifact is written there on improvement.
#[allow(clippy::too_many_arguments)]
fn check_progress_on_validation(
    model: &dyn Model,
    tracker: &mut ProgressTracker,
    validation_field: &str,
    validation_metric: &str,
    criterion: &ImprovementCriterion,
    lr_controller: Option<&PlateauController>,
    bs_controller: Option<&PlateauController>,
    early_stop: i32,
    save_to: Option<&Path>,
) -> Result<bool> {
    let value = last_value(&tracker.validation_metrics, validation_field, validation_metric)
        .ok_or_else(|| Error::Metric {
            target: validation_field.to_string(),
            metric: validation_metric.to_string(),
            message: "no validation values recorded this epoch".to_string(),
        })?;

    if criterion.is_improved(value, tracker.best_eval_metric) {
        tracker.last_improvement_epoch = tracker.epoch;
        tracker.best_eval_metric = value;
        if let Some(path) = save_to {
            save_model_weights(model, path)?;
            info!(
                metric = validation_metric,
                target = validation_field,
                value,
                "validation improved, model saved"
            );
        }
    }
    tracker.last_improvement = tracker.epoch - tracker.last_improvement_epoch;
    if tracker.last_improvement != 0 {
        info!(
            epochs = tracker.last_improvement,
            metric = validation_metric,
            target = validation_field,
            "epochs since last validation improvement"
        );
    }

    if let Some(controller) = lr_controller {
        controller.check(tracker, validation_field)?;
        tracker.last_learning_rate_reduction =
            tracker.epoch - tracker.last_learning_rate_reduction_epoch;
    }
    if let Some(controller) = bs_controller {
        controller.check(tracker, validation_field)?;
        tracker.last_increase_batch_size = tracker.epoch - tracker.last_increase_batch_size_epoch;
    }

    if early_stop > 0 && tracker.last_improvement >= early_stop as u32 {
        info!(
            epochs = tracker.last_improvement,
            "early stopping due to lack of validation improvement"
        );
        return Ok(true);
    }
    Ok(false)
}

/// Serialize the model weights as a JSON document.
fn save_model_weights(model: &dyn Model, path: &Path) -> Result<()> {
    let doc = serde_json::to_string_pretty(&model.state_dict())?;
    fs::write(path, doc)
        .map_err(|e| Error::io(format!("writing model weights {}", path.display()), e))
}

fn write_step_summary(
    sink: &mut dyn MetricsSink,
    losses: &StepLosses,
    learning_rate: f64,
    step: u64,
) -> Result<()> {
    sink.log_scalar("combined/step_training_loss", losses.combined, step)?;
    for (target, loss) in &losses.per_target {
        sink.log_scalar(&format!("{target}/step_training_loss"), *loss, step)?;
    }
    sink.log_scalar("combined/step_learning_rate", learning_rate, step)?;
    Ok(())
}

fn write_epoch_summary(
    sink: &mut dyn MetricsSink,
    split: &str,
    log: &MetricsLog,
    epoch: u32,
) -> Result<()> {
    for (target, per_metric) in log {
        for (metric, values) in per_metric {
            if let Some(last) = values.last() {
                sink.log_scalar(
                    &format!("{split}/{target}/epoch_{metric}"),
                    *last,
                    u64::from(epoch),
                )?;
            }
        }
    }
    sink.flush()
}
