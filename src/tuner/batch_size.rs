//! Batch-size probe: double until memory runs out, then bisect.

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Starting probe size when the config says "auto".
pub const DEFAULT_START: usize = 128;
/// Probe budget across both phases.
pub const DEFAULT_MAX_TRIALS: u32 = 10;
/// Maximum number of out-of-memory events tolerated.
pub const DEFAULT_HALVING_LIMIT: u32 = 3;

/// Find the largest batch size the probe survives.
///
/// `trial` runs a short training burst at the candidate size; an
/// [`Error::ResourceExhausted`] marks the size as too large and any
/// other error aborts the search. Sizes double from [`DEFAULT_START`]
/// while trials succeed, then bisect between the largest known-good and
/// smallest known-bad size. The search stops when the bracket closes
/// (`high - low <= 1`), the trial budget or halving limit runs out, or
/// the dataset size caps further growth, and returns the largest size
/// that succeeded.
pub fn tune_batch_size(
    mut trial: impl FnMut(usize) -> Result<()>,
    dataset_len: usize,
    max_trials: u32,
    halving_limit: u32,
) -> Result<usize> {
    let cap = dataset_len.max(1);
    let mut candidate = DEFAULT_START.min(cap);
    let mut low = 0usize; // largest size that succeeded
    let mut high: Option<usize> = None; // smallest size that failed
    let mut trials = 0u32;
    let mut halvings = 0u32;

    while trials < max_trials && halvings < halving_limit {
        let prev = candidate;
        match trial(candidate) {
            Ok(()) => {
                debug!(batch_size = candidate, "batch size probe succeeded");
                low = candidate;
                trials += 1;
                candidate = match high {
                    Some(high) if high - low <= 1 => break,
                    Some(high) => (high + low) / 2,
                    None => candidate.saturating_mul(2),
                };
            }
            Err(Error::ResourceExhausted { .. }) => {
                debug!(batch_size = candidate, "batch size probe ran out of memory");
                high = Some(candidate);
                trials += 1;
                halvings += 1;
                if candidate - low <= 1 {
                    break;
                }
                candidate = (candidate + low) / 2;
            }
            Err(e) => return Err(e),
        }
        candidate = candidate.min(cap);
        // No movement means the dataset cap or the bracket pinned us.
        if candidate == prev {
            break;
        }
    }

    let tuned = if low > 0 { low } else { 1 };
    info!(batch_size = tuned, trials, halvings, "tuned batch size");
    Ok(tuned)
}
