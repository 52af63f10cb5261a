//! Batch data structures and the dataset/batcher capabilities.
//!
//! The orchestrator never materializes batches itself; it pulls them from
//! a [`Batcher`] produced by a [`Dataset`]. [`SliceDataset`] is the
//! in-memory implementation used by tests and tuning probes.

use std::collections::BTreeMap;

use ndarray::Array1;

use crate::error::Result;

/// A training batch: named input tensors plus named target tensors.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub inputs: BTreeMap<String, Array1<f32>>,
    pub targets: BTreeMap<String, Array1<f32>>,
}

impl Batch {
    pub fn new(
        inputs: BTreeMap<String, Array1<f32>>,
        targets: BTreeMap<String, Array1<f32>>,
    ) -> Self {
        Self { inputs, targets }
    }

    /// Number of examples, taken from the first input tensor.
    pub fn len(&self) -> usize {
        self.inputs.values().next().map_or(0, Array1::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pull-based batch iterator for one split.
///
/// Producing the next batch may block on I/O; the trainer checks for
/// cancellation only between calls.
pub trait Batcher {
    /// Begin a new epoch, possibly with a new batch size.
    fn set_epoch(&mut self, epoch: u32, batch_size: usize);

    /// Whether another batch is available this epoch.
    fn has_more_batches(&self) -> bool;

    /// Produce the next batch. Only valid while [`Self::has_more_batches`].
    fn next_batch(&mut self) -> Result<Batch>;

    /// Zero-based position within the current epoch.
    fn step(&self) -> u64;

    /// Number of steps the current epoch will take.
    fn steps_per_epoch(&self) -> u64;
}

/// A dataset split that can hand out batchers.
pub trait Dataset {
    /// Number of examples in the split.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a batcher over this split.
    fn batcher(&self, batch_size: usize, should_shuffle: bool) -> Box<dyn Batcher + '_>;
}

/// In-memory dataset over per-example rows, rebatched on demand.
pub struct SliceDataset {
    inputs: BTreeMap<String, Vec<f32>>,
    targets: BTreeMap<String, Vec<f32>>,
    len: usize,
}

impl SliceDataset {
    /// Build from parallel per-feature columns; all columns must have the
    /// same length.
    pub fn new(inputs: BTreeMap<String, Vec<f32>>, targets: BTreeMap<String, Vec<f32>>) -> Self {
        let len = inputs
            .values()
            .chain(targets.values())
            .map(Vec::len)
            .next()
            .unwrap_or(0);
        debug_assert!(inputs.values().chain(targets.values()).all(|c| c.len() == len));
        Self { inputs, targets, len }
    }

    fn slice_batch(&self, start: usize, end: usize) -> Batch {
        let take = |cols: &BTreeMap<String, Vec<f32>>| {
            cols.iter()
                .map(|(name, col)| (name.clone(), Array1::from(col[start..end].to_vec())))
                .collect()
        };
        Batch::new(take(&self.inputs), take(&self.targets))
    }
}

impl Dataset for SliceDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn batcher(&self, batch_size: usize, _should_shuffle: bool) -> Box<dyn Batcher + '_> {
        Box::new(SliceBatcher {
            dataset: self,
            batch_size: batch_size.max(1),
            cursor: 0,
            step: 0,
        })
    }
}

struct SliceBatcher<'a> {
    dataset: &'a SliceDataset,
    batch_size: usize,
    cursor: usize,
    step: u64,
}

impl Batcher for SliceBatcher<'_> {
    fn set_epoch(&mut self, _epoch: u32, batch_size: usize) {
        self.batch_size = batch_size.max(1);
        self.cursor = 0;
        self.step = 0;
    }

    fn has_more_batches(&self) -> bool {
        self.cursor < self.dataset.len
    }

    fn next_batch(&mut self) -> Result<Batch> {
        let start = self.cursor;
        let end = (start + self.batch_size).min(self.dataset.len);
        self.cursor = end;
        self.step += 1;
        Ok(self.dataset.slice_batch(start, end))
    }

    fn step(&self) -> u64 {
        self.step
    }

    fn steps_per_epoch(&self) -> u64 {
        (self.dataset.len as u64).div_ceil(self.batch_size as u64)
    }
}
