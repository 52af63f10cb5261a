//! End-to-end training scenarios over a toy least-squares model.

use std::collections::BTreeMap;

use adiestrar::config::{BatchSizeSetting, LearningRateSetting, Regularization, TrainerConfig};
use adiestrar::data::{Batch, Dataset, SliceDataset};
use adiestrar::error::{Error, Result};
use adiestrar::metrics::{MetricsSchema, COMBINED, LOSS};
use adiestrar::model::{MetricReport, Model, Parameter, StateDict, StepLosses};
use adiestrar::optim::Sgd;
use adiestrar::sink::JsonlSink;
use adiestrar::trainer::{
    TrainOptions, Trainer, MODEL_WEIGHTS_FILE_NAME, TRAINING_CHECKPOINTS_DIR,
    TRAINING_PROGRESS_FILE_NAME,
};
use adiestrar::ProgressTracker;
use ndarray::{arr1, Array1};

/// y = w * x with a single scalar weight, mean-squared-error loss.
struct LeastSquares {
    params: Vec<Parameter>,
    squared_error: f64,
    samples: usize,
}

impl LeastSquares {
    fn new(weight: f32) -> Self {
        Self {
            params: vec![Parameter::new(arr1(&[weight]))],
            squared_error: 0.0,
            samples: 0,
        }
    }

    fn weight(&self) -> f32 {
        self.params[0].data[0]
    }

    fn errors(&self, batch: &Batch) -> Array1<f32> {
        &batch.inputs["x"] * self.weight() - &batch.targets["y"]
    }
}

impl Model for LeastSquares {
    fn metrics_schema(&self) -> MetricsSchema {
        let mut targets = BTreeMap::new();
        targets.insert("y".to_string(), vec![LOSS.to_string()]);
        MetricsSchema::new(targets)
    }

    fn train_batch(
        &mut self,
        batch: &Batch,
        _regularization: Regularization,
        _lambda: f64,
    ) -> Result<StepLosses> {
        let errors = self.errors(batch);
        let loss = f64::from(errors.mapv(|e| e * e).mean().unwrap_or(0.0));
        let grad = 2.0 * (&errors * &batch.inputs["x"]).mean().unwrap_or(0.0);
        self.params[0].set_grad(arr1(&[grad]));
        let mut per_target = BTreeMap::new();
        per_target.insert("y".to_string(), loss);
        Ok(StepLosses {
            combined: loss,
            per_target,
        })
    }

    fn eval_batch(&mut self, batch: &Batch) -> Result<()> {
        let errors = self.errors(batch);
        self.squared_error += f64::from(errors.mapv(|e| e * e).sum());
        self.samples += errors.len();
        Ok(())
    }

    fn metric_values(&self) -> MetricReport {
        let mse = if self.samples > 0 {
            self.squared_error / self.samples as f64
        } else {
            0.0
        };
        let mut per_metric = BTreeMap::new();
        per_metric.insert(LOSS.to_string(), mse);
        let mut report = MetricReport::new();
        report.insert("y".to_string(), per_metric.clone());
        report.insert(COMBINED.to_string(), per_metric);
        report
    }

    fn reset_metrics(&mut self) {
        self.squared_error = 0.0;
        self.samples = 0;
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        state.insert("w".to_string(), self.params[0].data.to_vec());
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let w = state.get("w").ok_or_else(|| Error::Model {
            message: "missing 'w' in state dict".to_string(),
        })?;
        self.params[0].data = arr1(w);
        Ok(())
    }
}

fn line_dataset(n: usize, slope: f32) -> SliceDataset {
    let xs: Vec<f32> = (0..n).map(|i| (i % 16) as f32 / 16.0).collect();
    let ys: Vec<f32> = xs.iter().map(|x| slope * x).collect();
    let mut inputs = BTreeMap::new();
    inputs.insert("x".to_string(), xs);
    let mut targets = BTreeMap::new();
    targets.insert("y".to_string(), ys);
    SliceDataset::new(inputs, targets)
}

#[test]
fn two_epoch_run_produces_artifacts_and_exact_counters() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainerConfig {
        epochs: 2,
        early_stop: -1,
        learning_rate: LearningRateSetting::Fixed(0.1),
        batch_size: BatchSizeSetting::Fixed(16),
        learning_rate_warmup_epochs: 0.0,
        ..TrainerConfig::default()
    };
    let mut trainer =
        Trainer::new(config, TrainOptions::default(), Box::new(Sgd::new(0.1))).unwrap();
    let mut model = LeastSquares::new(0.0);
    let data = line_dataset(64, 3.0);

    let output = trainer
        .train(&mut model, &data, None, None, dir.path())
        .unwrap();

    // 64 rows at batch size 16: exactly 4 steps per epoch, 2 epochs.
    assert_eq!(output.progress.epoch, 2);
    assert_eq!(output.progress.steps, 8);
    assert_eq!(output.train_metrics[COMBINED][LOSS].len(), 2);
    assert!(output.validation_metrics[COMBINED][LOSS].is_empty());

    // Without a validation split the weights are written every epoch,
    // and the tracker plus a checkpoint survive for resuming.
    assert!(dir.path().join(MODEL_WEIGHTS_FILE_NAME).exists());
    assert!(dir.path().join(TRAINING_PROGRESS_FILE_NAME).exists());
    assert!(dir
        .path()
        .join(TRAINING_CHECKPOINTS_DIR)
        .join("checkpoint_epoch_2.json")
        .exists());

    let reloaded = ProgressTracker::load(dir.path().join(TRAINING_PROGRESS_FILE_NAME)).unwrap();
    assert_eq!(reloaded, output.progress);
}

#[test]
fn validation_improvement_saves_best_model_and_converges() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainerConfig {
        epochs: 30,
        early_stop: 4,
        learning_rate: LearningRateSetting::Fixed(0.5),
        batch_size: BatchSizeSetting::Fixed(16),
        learning_rate_warmup_epochs: 0.0,
        ..TrainerConfig::default()
    };
    let mut trainer =
        Trainer::new(config, TrainOptions::default(), Box::new(Sgd::new(0.5))).unwrap();
    let mut model = LeastSquares::new(0.0);
    let data = line_dataset(128, 3.0);
    let validation = line_dataset(64, 3.0);

    let output = trainer
        .train(&mut model, &data, Some(&validation), None, dir.path())
        .unwrap();

    // The model fits the line; the best weights were persisted.
    assert!((model.weight() - 3.0).abs() < 0.1, "weight {}", model.weight());
    assert!(output.progress.best_eval_metric < 0.05);
    assert!(dir.path().join(MODEL_WEIGHTS_FILE_NAME).exists());

    let doc = std::fs::read_to_string(dir.path().join(MODEL_WEIGHTS_FILE_NAME)).unwrap();
    let weights: StateDict = serde_json::from_str(&doc).unwrap();
    assert!((weights["w"][0] - 3.0).abs() < 0.15);
}

#[test]
fn step_log_records_losses_and_learning_rate() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("training.jsonl");
    let config = TrainerConfig {
        epochs: 1,
        early_stop: -1,
        learning_rate: LearningRateSetting::Fixed(0.1),
        batch_size: BatchSizeSetting::Fixed(16),
        learning_rate_warmup_epochs: 0.0,
        ..TrainerConfig::default()
    };
    let mut trainer =
        Trainer::new(config, TrainOptions::default(), Box::new(Sgd::new(0.1))).unwrap();
    trainer.set_sink(Box::new(JsonlSink::create(&log_path).unwrap()));
    let mut model = LeastSquares::new(0.0);
    let data = line_dataset(32, 3.0);

    trainer
        .train(&mut model, &data, None, None, dir.path())
        .unwrap();

    let contents = std::fs::read_to_string(&log_path).unwrap();
    let tags: Vec<String> = contents
        .lines()
        .map(|line| {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            record["tag"].as_str().unwrap().to_string()
        })
        .collect();
    assert!(tags.iter().any(|t| t == "combined/step_training_loss"));
    assert!(tags.iter().any(|t| t == "y/step_training_loss"));
    assert!(tags.iter().any(|t| t == "combined/step_learning_rate"));
    assert!(tags.iter().any(|t| t == "train/combined/epoch_loss"));
}

#[test]
fn interrupted_run_resumes_to_the_full_budget() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainerConfig {
        epochs: 4,
        early_stop: -1,
        learning_rate: LearningRateSetting::Fixed(0.1),
        batch_size: BatchSizeSetting::Fixed(16),
        learning_rate_warmup_epochs: 0.0,
        ..TrainerConfig::default()
    };
    let data = line_dataset(64, 3.0);

    // First session stops gracefully after one epoch.
    let mut model = LeastSquares::new(0.0);
    {
        let mut trainer = Trainer::new(
            config.clone(),
            TrainOptions::default(),
            Box::new(Sgd::new(0.1)),
        )
        .unwrap();
        trainer.interrupt_token().request();
        let output = trainer
            .train(&mut model, &data, None, None, dir.path())
            .unwrap();
        assert_eq!(output.progress.epoch, 1);
    }

    // Second session resumes and finishes the remaining epochs.
    let mut resumed = LeastSquares::new(0.0);
    let options = TrainOptions {
        resume: true,
        ..TrainOptions::default()
    };
    let mut trainer = Trainer::new(config, options, Box::new(Sgd::new(0.1))).unwrap();
    let output = trainer
        .train(&mut resumed, &data, None, None, dir.path())
        .unwrap();

    assert_eq!(output.progress.epoch, 4);
    assert_eq!(output.progress.steps, 16);
    // The resumed session picked up the first session's weights.
    assert!(resumed.weight() > 0.0);
}
