//! Metric bookkeeping: improvement directions, per-epoch metric logs.
//!
//! Whether "bigger is better" for a metric is resolved exactly once at
//! training start into an [`ImprovementCriterion`]; comparisons afterwards
//! never dispatch on metric names again.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Synthetic output target aggregating all real targets.
pub const COMBINED: &str = "combined";
/// The loss metric, present for every target and for [`COMBINED`].
pub const LOSS: &str = "loss";

/// Comparison direction for a metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Lower values are better (loss-like).
    Minimize,
    /// Higher values are better (accuracy-like).
    Maximize,
}

/// A resolved improvement predicate plus its worst-possible initial value.
#[derive(Clone, Copy, Debug)]
pub struct ImprovementCriterion {
    direction: Direction,
}

impl ImprovementCriterion {
    /// Resolve the criterion for a metric name.
    ///
    /// The registry is closed: unknown metric names are a configuration
    /// error, not a silent default.
    pub fn for_metric(name: &str) -> Result<Self> {
        let direction = match name {
            LOSS | "error" | "mean_absolute_error" | "mean_squared_error"
            | "root_mean_squared_error" | "perplexity" | "edit_distance" => Direction::Minimize,
            "accuracy" | "hits_at_k" | "precision" | "recall" | "f1" | "r2" | "jaccard"
            | "roc_auc" | "token_accuracy" => Direction::Maximize,
            other => {
                return Err(Error::config(
                    "validation_metric",
                    format!("unknown metric '{other}'"),
                    "Use a registered metric such as 'loss' or 'accuracy'",
                ))
            }
        };
        Ok(Self { direction })
    }

    /// The comparison direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Worst possible value, used to seed best-so-far trackers.
    pub fn initial_value(&self) -> f64 {
        match self.direction {
            Direction::Minimize => f64::INFINITY,
            Direction::Maximize => f64::NEG_INFINITY,
        }
    }

    /// Whether `value` improves on `best`.
    pub fn is_improved(&self, value: f64, best: f64) -> bool {
        match self.direction {
            Direction::Minimize => value < best,
            Direction::Maximize => value > best,
        }
    }
}

/// Declared output targets and their metric names, captured from the model
/// once at training start.
#[derive(Clone, Debug, Default)]
pub struct MetricsSchema {
    targets: BTreeMap<String, Vec<String>>,
}

impl MetricsSchema {
    pub fn new(targets: BTreeMap<String, Vec<String>>) -> Self {
        Self { targets }
    }

    /// Output target names, excluding the synthetic combined target.
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Metric names declared for `target`, or an empty slice.
    pub fn metrics_for(&self, target: &str) -> &[String] {
        self.targets.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_target(&self, target: &str) -> bool {
        self.targets.contains_key(target)
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }
}

/// Per-split metric history: target → metric → ordered per-epoch scalars.
pub type MetricsLog = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

/// Build one empty metrics log matching the schema, including the
/// synthetic `combined/loss` entry.
///
/// All three split logs are built from the same schema so they share an
/// identical key structure for the whole run.
pub fn new_metrics_log(schema: &MetricsSchema) -> MetricsLog {
    let mut log = MetricsLog::new();
    for target in schema.target_names() {
        let mut per_metric = BTreeMap::new();
        for metric in schema.metrics_for(target) {
            per_metric.insert(metric.clone(), Vec::new());
        }
        log.insert(target.to_string(), per_metric);
    }
    let mut combined = BTreeMap::new();
    combined.insert(LOSS.to_string(), Vec::new());
    log.insert(COMBINED.to_string(), combined);
    log
}

/// Last recorded value for `(target, metric)` in a log, if any epoch has
/// been recorded yet.
pub fn last_value(log: &MetricsLog, target: &str, metric: &str) -> Option<f64> {
    log.get(target)?.get(metric)?.last().copied()
}
