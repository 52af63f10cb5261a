//! Scalar reporting sinks.
//!
//! The trainer emits per-step losses and per-epoch summaries through a
//! [`MetricsSink`]; tags use the `target/name` scheme, e.g.
//! `y/step_training_loss` or `combined/epoch_loss`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};

/// Destination for scalar training telemetry.
pub trait MetricsSink {
    fn log_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn log_scalar(&mut self, _tag: &str, _value: f64, _step: u64) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ScalarRecord<'a> {
    tag: &'a str,
    value: f64,
    step: u64,
}

/// Appends one JSON record per scalar to a newline-delimited log file.
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| Error::io(format!("creating metrics log {}", path.display()), e))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl MetricsSink for JsonlSink {
    fn log_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
        let record = ScalarRecord { tag, value, step };
        let line = serde_json::to_string(&record)?;
        writeln!(self.writer, "{line}")
            .map_err(|e| Error::io("appending metrics record".to_string(), e))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::io("flushing metrics log".to_string(), e))
    }
}
