//! Training orchestration for declaratively configured models.
//!
//! This crate provides the full training loop around a model you supply:
//! - Trainer state machine (epochs, steps, evaluation, termination)
//! - Progress tracking with resumable JSON snapshots
//! - Per-step learning-rate schedule (exponential decay, warmup)
//! - Plateau controllers (learning-rate reduction, batch-size increase)
//! - Early stopping and best-model saving on validation improvement
//! - Checkpoint management with retention pruning
//! - Auto-tuners for "auto" batch size and learning rate
//! - Cooperative interruption and a data-parallel collective seam
//!
//! # Example
//!
//! ```no_run
//! use adiestrar::config::TrainerConfig;
//! use adiestrar::optim::Adam;
//! use adiestrar::trainer::{TrainOptions, Trainer};
//! use std::path::Path;
//!
//! # fn run(model: &mut dyn adiestrar::model::Model,
//! #        data: &dyn adiestrar::data::Dataset) -> adiestrar::error::Result<()> {
//! let config = TrainerConfig::default();
//! let optimizer = Adam::with_defaults(config.learning_rate.base_rate());
//! let mut trainer = Trainer::new(config, TrainOptions::default(), Box::new(optimizer))?;
//! let output = trainer.train(model, data, None, None, Path::new("results"))?;
//! println!("trained for {} epochs", output.progress.epoch);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod distributed;
pub mod error;
pub mod eval;
pub mod interrupt;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod plateau;
pub mod progress;
pub mod schedule;
pub mod sink;
pub mod trainer;
pub mod tuner;

pub use config::TrainerConfig;
pub use error::{Error, Result};
pub use progress::ProgressTracker;
pub use trainer::{TrainOptions, TrainOutput, Trainer};
