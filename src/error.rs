//! Error types with actionable diagnostics.
//!
//! Every variant carries enough context to resolve the problem without
//! consulting external documentation: configuration errors name the field
//! and the allowed values, I/O errors carry the operation that failed.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for adiestrar operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the training orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration field failed validation before training started.
    #[error("Invalid configuration value for '{field}': {message}\n  → {suggestion}")]
    ConfigValue {
        field: String,
        message: String,
        suggestion: String,
    },

    /// Device or host ran out of memory during a step.
    ///
    /// Recovered locally only inside the batch-size tuner, where it drives
    /// the bisection; everywhere else it propagates to the caller.
    #[error("Resource exhausted during {context}\n  → Try: reduce batch_size or set batch_size to \"auto\"")]
    ResourceExhausted { context: String },

    /// Training was interrupted twice; the run aborted without persisting.
    #[error("Training interrupted at epoch {epoch}")]
    Interrupted { epoch: u32 },

    /// A metric function failed for one evaluation period.
    ///
    /// The evaluation runner logs this as a warning and skips the entry;
    /// it aborts nothing.
    #[error("Metric '{metric}' failed for target '{target}': {message}")]
    Metric {
        target: String,
        metric: String,
        message: String,
    },

    /// A checkpoint directory exists but contains no loadable snapshot.
    #[error("No checkpoint found under {dir}\n  → Start a fresh run or point at a directory with checkpoint_epoch_*.json files")]
    CheckpointNotFound { dir: PathBuf },

    /// The model rejected a batch or state document.
    #[error("Model error: {message}")]
    Model { message: String },

    /// IO error with the operation that failed.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl Error {
    /// Create a configuration error naming the offending field.
    pub fn config(
        field: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ConfigValue {
            field: field.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is user-recoverable.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigValue { .. }
                | Self::ResourceExhausted { .. }
                | Self::Interrupted { .. }
                | Self::CheckpointNotFound { .. }
        )
    }

    /// Stable error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigValue { .. } => "E001",
            Self::ResourceExhausted { .. } => "E010",
            Self::Interrupted { .. } => "E020",
            Self::Metric { .. } => "E030",
            Self::CheckpointNotFound { .. } => "E040",
            Self::Model { .. } => "E041",
            Self::Io { .. } => "E050",
            Self::Serialization { .. } => "E051",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
