//! Evaluation runner: forward-only metric collection over one split.

use tracing::{debug, warn};

use crate::data::Dataset;
use crate::metrics::{MetricsLog, MetricsSchema, COMBINED, LOSS};
use crate::model::{MetricReport, Model};

/// Run a forward-only pass over `dataset` and return the aggregated
/// metric report.
///
/// Resets the model's metric accumulators first, so the report covers
/// exactly this pass. Never touches gradients, optimizer state, or the
/// step counters.
pub fn evaluate_split(
    model: &mut dyn Model,
    dataset: &dyn Dataset,
    batch_size: usize,
    split_name: &str,
) -> crate::error::Result<MetricReport> {
    model.reset_metrics();
    let mut batcher = dataset.batcher(batch_size, false);
    while batcher.has_more_batches() {
        let batch = batcher.next_batch()?;
        model.eval_batch(&batch)?;
    }
    let report = model.metric_values();
    debug!(split = split_name, targets = report.len(), "evaluated split");
    Ok(report)
}

/// Append one epoch of values from `report` into `log`.
///
/// Every metric the schema names gets looked up in the report; a
/// missing value is logged and skipped without disturbing the other
/// targets, so one failed metric never loses an epoch of history.
/// The `combined/loss` series is always appended.
pub fn append_metrics(report: &MetricReport, schema: &MetricsSchema, log: &mut MetricsLog) {
    for target in schema.target_names() {
        for metric in schema.metrics_for(target) {
            match report.get(target).and_then(|m| m.get(metric)) {
                Some(value) => {
                    log.entry(target.to_string())
                        .or_default()
                        .entry(metric.clone())
                        .or_default()
                        .push(*value);
                }
                None => {
                    warn!(target, metric = %metric, "metric missing from report, skipping");
                }
            }
        }
    }
    if let Some(value) = report.get(COMBINED).and_then(|m| m.get(LOSS)) {
        log.entry(COMBINED.to_string())
            .or_default()
            .entry(LOSS.to_string())
            .or_default()
            .push(*value);
    } else {
        warn!("combined loss missing from report, skipping");
    }
}
