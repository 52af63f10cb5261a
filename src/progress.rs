//! Progress tracker: the sole mutable cross-epoch training state.
//!
//! Everything needed to resume or report on a run lives here and
//! round-trips losslessly through a JSON snapshot on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::{new_metrics_log, MetricsLog, MetricsSchema};

/// Serializable record of all training progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressTracker {
    /// Completed epochs so far.
    pub epoch: u32,
    /// Total gradient updates so far.
    pub steps: u64,
    /// Current batch size; may grow on plateau.
    pub batch_size: usize,
    /// Current effective base learning rate; may shrink on plateau.
    pub learning_rate: f64,

    /// Epoch of the last overall validation improvement.
    pub last_improvement_epoch: u32,
    /// Epochs since the last overall validation improvement.
    ///
    /// Always recomputed as `epoch - last_improvement_epoch`.
    pub last_improvement: u32,
    /// Best overall validation metric value seen.
    #[serde(with = "non_finite")]
    pub best_eval_metric: f64,

    #[serde(with = "non_finite")]
    pub best_reduce_learning_rate_eval_metric: f64,
    pub last_reduce_learning_rate_eval_metric_improvement: u32,
    pub last_learning_rate_reduction_epoch: u32,
    pub last_learning_rate_reduction: u32,
    pub num_reductions_learning_rate: u32,

    #[serde(with = "non_finite")]
    pub best_increase_batch_size_eval_metric: f64,
    pub last_increase_batch_size_eval_metric_improvement: u32,
    pub last_increase_batch_size_epoch: u32,
    pub last_increase_batch_size: u32,
    pub num_increases_batch_size: u32,

    pub train_metrics: MetricsLog,
    pub validation_metrics: MetricsLog,
    pub test_metrics: MetricsLog,
}

/// JSON cannot represent non-finite floats; `serde_json` writes them as
/// `null`, which fails to deserialize back into an `f64`. The `best_*`
/// fields are seeded with infinities until the watched metric improves,
/// so they carry the infinities as strings instead.
mod non_finite {
    use serde::{Deserialize, Deserializer, Serializer};

    const POS_INF: &str = "inf";
    const NEG_INF: &str = "-inf";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        Special(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if *value > 0.0 {
            serializer.serialize_str(POS_INF)
        } else {
            serializer.serialize_str(NEG_INF)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Finite(value) => Ok(value),
            Repr::Special(s) if s == POS_INF => Ok(f64::INFINITY),
            Repr::Special(s) if s == NEG_INF => Ok(f64::NEG_INFINITY),
            Repr::Special(s) => Err(serde::de::Error::custom(format!(
                "expected a float, \"{POS_INF}\", or \"{NEG_INF}\", got \"{s}\""
            ))),
        }
    }
}

impl ProgressTracker {
    /// Fresh tracker for a new run.
    ///
    /// The three `best_*` seeds come from the improvement criterion of
    /// the corresponding watched metric (`-inf` for maximized metrics,
    /// `+inf` for minimized ones), so the first recorded value always
    /// counts as an improvement.
    pub fn new(
        batch_size: usize,
        learning_rate: f64,
        best_eval_metric: f64,
        best_reduce_learning_rate_eval_metric: f64,
        best_increase_batch_size_eval_metric: f64,
        schema: &MetricsSchema,
    ) -> Self {
        Self {
            epoch: 0,
            steps: 0,
            batch_size,
            learning_rate,
            last_improvement_epoch: 0,
            last_improvement: 0,
            best_eval_metric,
            best_reduce_learning_rate_eval_metric,
            last_reduce_learning_rate_eval_metric_improvement: 0,
            last_learning_rate_reduction_epoch: 0,
            last_learning_rate_reduction: 0,
            num_reductions_learning_rate: 0,
            best_increase_batch_size_eval_metric,
            last_increase_batch_size_eval_metric_improvement: 0,
            last_increase_batch_size_epoch: 0,
            last_increase_batch_size: 0,
            num_increases_batch_size: 0,
            train_metrics: new_metrics_log(schema),
            validation_metrics: new_metrics_log(schema),
            test_metrics: new_metrics_log(schema),
        }
    }

    /// Persist the tracker as a JSON snapshot.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let doc = serde_json::to_string_pretty(self)?;
        fs::write(path, doc)
            .map_err(|e| Error::io(format!("writing progress tracker {}", path.display()), e))
    }

    /// Restore a tracker from a JSON snapshot.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let doc = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading progress tracker {}", path.display()), e))?;
        Ok(serde_json::from_str(&doc)?)
    }

    /// Recompute the derived plateau distances from their epoch anchors.
    pub fn refresh_distances(&mut self) {
        self.last_improvement = self.epoch - self.last_improvement_epoch;
        self.last_learning_rate_reduction = self.epoch - self.last_learning_rate_reduction_epoch;
        self.last_increase_batch_size = self.epoch - self.last_increase_batch_size_epoch;
    }

    /// Flattened `target.metric` → latest-value view of the recorded
    /// metrics plus the headline scalars, for reporting sinks.
    pub fn flat_metrics(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        out.insert("epoch".to_string(), f64::from(self.epoch));
        out.insert("steps".to_string(), self.steps as f64);
        out.insert("batch_size".to_string(), self.batch_size as f64);
        out.insert("learning_rate".to_string(), self.learning_rate);
        out.insert("best_eval_metric".to_string(), self.best_eval_metric);
        for (split, log) in [
            ("train", &self.train_metrics),
            ("validation", &self.validation_metrics),
            ("test", &self.test_metrics),
        ] {
            for (target, per_metric) in log {
                for (metric, values) in per_metric {
                    if let Some(last) = values.last() {
                        out.insert(format!("{split}.{target}.{metric}"), *last);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{new_metrics_log, MetricsSchema, COMBINED, LOSS};

    pub(super) fn sample_tracker(epochs_recorded: usize) -> ProgressTracker {
        let mut targets = BTreeMap::new();
        targets.insert("y".to_string(), vec![LOSS.to_string()]);
        let schema = MetricsSchema::new(targets);
        let mut log = new_metrics_log(&schema);
        for e in 0..epochs_recorded {
            for per_metric in log.values_mut() {
                for values in per_metric.values_mut() {
                    values.push(e as f64 * 0.1);
                }
            }
        }
        ProgressTracker {
            epoch: epochs_recorded as u32,
            steps: 40 * epochs_recorded as u64,
            batch_size: 128,
            learning_rate: 0.001,
            last_improvement_epoch: 0,
            last_improvement: epochs_recorded as u32,
            best_eval_metric: 0.42,
            best_reduce_learning_rate_eval_metric: f64::INFINITY,
            last_reduce_learning_rate_eval_metric_improvement: 0,
            last_learning_rate_reduction_epoch: 0,
            last_learning_rate_reduction: 0,
            num_reductions_learning_rate: 0,
            best_increase_batch_size_eval_metric: f64::INFINITY,
            last_increase_batch_size_eval_metric_improvement: 0,
            last_increase_batch_size_epoch: 0,
            last_increase_batch_size: 0,
            num_increases_batch_size: 0,
            train_metrics: log.clone(),
            validation_metrics: log.clone(),
            test_metrics: log,
        }
    }

    #[test]
    fn test_round_trip_empty_one_many() {
        let dir = tempfile::tempdir().unwrap();
        for n in [0, 1, 7] {
            let tracker = sample_tracker(n);
            let path = dir.path().join(format!("progress_{n}.json"));
            tracker.save(&path).unwrap();
            let restored = ProgressTracker::load(&path).unwrap();
            assert_eq!(tracker, restored);
        }
    }

    #[test]
    fn test_fresh_tracker_with_infinite_seeds_round_trips() {
        let mut targets = BTreeMap::new();
        targets.insert("y".to_string(), vec![LOSS.to_string()]);
        let schema = MetricsSchema::new(targets);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.json");

        // Before the first validation pass all three bests are still at
        // their worst-possible seeds, which JSON has no literal for.
        let tracker =
            ProgressTracker::new(128, 0.001, f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, &schema);
        tracker.save(&path).unwrap();
        let restored = ProgressTracker::load(&path).unwrap();
        assert_eq!(tracker, restored);
        assert_eq!(restored.best_eval_metric, f64::INFINITY);
        assert_eq!(restored.best_increase_batch_size_eval_metric, f64::NEG_INFINITY);
    }

    #[test]
    fn test_snapshot_keeps_finite_bests_as_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finite.json");
        let mut tracker = sample_tracker(1);
        tracker.best_eval_metric = 0.42;
        tracker.save(&path).unwrap();

        let doc = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert!(value["best_eval_metric"].is_f64());
        assert_eq!(value["best_reduce_learning_rate_eval_metric"], "inf");
        assert_eq!(ProgressTracker::load(&path).unwrap(), tracker);
    }

    #[test]
    fn test_refresh_distances() {
        let mut t = sample_tracker(5);
        t.epoch = 9;
        t.last_improvement_epoch = 4;
        t.last_learning_rate_reduction_epoch = 7;
        t.last_increase_batch_size_epoch = 9;
        t.refresh_distances();
        assert_eq!(t.last_improvement, 5);
        assert_eq!(t.last_learning_rate_reduction, 2);
        assert_eq!(t.last_increase_batch_size, 0);
    }

    #[test]
    fn test_flat_metrics_uses_latest_values() {
        let t = sample_tracker(3);
        let flat = t.flat_metrics();
        assert_eq!(flat["epoch"], 3.0);
        assert_eq!(flat[&format!("train.{COMBINED}.{LOSS}")], 0.2);
        assert_eq!(flat["train.y.loss"], 0.2);
    }

    #[test]
    fn test_flat_metrics_skips_empty_series() {
        let t = sample_tracker(0);
        let flat = t.flat_metrics();
        assert!(!flat.contains_key("train.y.loss"));
        assert!(flat.contains_key("learning_rate"));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(ProgressTracker::load(&path).is_err());
    }
}
