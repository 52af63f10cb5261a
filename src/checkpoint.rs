//! Checkpoint persistence for model weights and optimizer state.
//!
//! Checkpoints are plain JSON files named `checkpoint_epoch_N.json`.
//! The manager keeps the most recent `max_to_keep` files and resumes
//! from the highest epoch present.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::StateDict;

const CHECKPOINT_PREFIX: &str = "checkpoint_epoch_";
const CHECKPOINT_SUFFIX: &str = ".json";

/// One resumable snapshot of the training state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: u32,
    pub model: StateDict,
    pub optimizer: serde_json::Value,
}

/// Writes, prunes, and restores checkpoints in one directory.
pub struct CheckpointManager {
    dir: PathBuf,
    max_to_keep: usize,
}

impl CheckpointManager {
    /// Open a manager over `dir`, creating the directory if needed.
    ///
    /// A `max_to_keep` of zero is treated as one; the latest checkpoint
    /// is always retained.
    pub fn new(dir: impl Into<PathBuf>, max_to_keep: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("creating checkpoint dir {}", dir.display()), e))?;
        Ok(Self {
            dir,
            max_to_keep: max_to_keep.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, epoch: u32) -> PathBuf {
        self.dir
            .join(format!("{CHECKPOINT_PREFIX}{epoch}{CHECKPOINT_SUFFIX}"))
    }

    /// Write one checkpoint and prune beyond the retention limit.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(checkpoint.epoch);
        let doc = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&path, doc)
            .map_err(|e| Error::io(format!("writing checkpoint {}", path.display()), e))?;
        debug!(epoch = checkpoint.epoch, path = %path.display(), "saved checkpoint");
        self.prune()
    }

    /// Load the checkpoint with the highest epoch.
    pub fn load_latest(&self) -> Result<Checkpoint> {
        let epoch = self
            .list_epochs()?
            .into_iter()
            .max()
            .ok_or_else(|| Error::CheckpointNotFound {
                dir: self.dir.clone(),
            })?;
        let path = self.path_for(epoch);
        let doc = fs::read_to_string(&path)
            .map_err(|e| Error::io(format!("reading checkpoint {}", path.display()), e))?;
        let checkpoint: Checkpoint = serde_json::from_str(&doc)?;
        info!(epoch = checkpoint.epoch, "restored checkpoint");
        Ok(checkpoint)
    }

    /// Epochs with a checkpoint on disk, unordered.
    pub fn list_epochs(&self) -> Result<Vec<u32>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| Error::io(format!("listing checkpoint dir {}", self.dir.display()), e))?;
        let mut epochs = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| Error::io(format!("listing checkpoint dir {}", self.dir.display()), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name
                .strip_prefix(CHECKPOINT_PREFIX)
                .and_then(|s| s.strip_suffix(CHECKPOINT_SUFFIX))
            else {
                continue;
            };
            if let Ok(epoch) = stem.parse::<u32>() {
                epochs.push(epoch);
            }
        }
        Ok(epochs)
    }

    fn prune(&self) -> Result<()> {
        let mut epochs = self.list_epochs()?;
        epochs.sort_unstable();
        while epochs.len() > self.max_to_keep {
            let epoch = epochs.remove(0);
            let path = self.path_for(epoch);
            fs::remove_file(&path)
                .map_err(|e| Error::io(format!("pruning checkpoint {}", path.display()), e))?;
            debug!(epoch, "pruned checkpoint");
        }
        Ok(())
    }
}
