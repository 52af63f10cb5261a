//! Lifecycle hooks observing the training loop.

use crate::error::Result;
use crate::progress::ProgressTracker;

/// Observer of training lifecycle events.
///
/// All hooks default to no-ops; implement only the ones you need. Hooks
/// run synchronously inside the loop and their errors abort the run, so
/// a hook that should never stop training must handle its own failures.
#[allow(unused_variables)]
pub trait TrainerCallback {
    /// Before the first epoch, after setup and any resume.
    fn on_train_setup(&mut self, tracker: &ProgressTracker) -> Result<()> {
        Ok(())
    }

    fn on_epoch_start(&mut self, tracker: &ProgressTracker) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, tracker: &ProgressTracker) -> Result<()> {
        Ok(())
    }

    fn on_batch_start(&mut self, tracker: &ProgressTracker) -> Result<()> {
        Ok(())
    }

    fn on_batch_end(&mut self, tracker: &ProgressTracker) -> Result<()> {
        Ok(())
    }

    fn on_validation_start(&mut self, tracker: &ProgressTracker) -> Result<()> {
        Ok(())
    }

    fn on_validation_end(&mut self, tracker: &ProgressTracker) -> Result<()> {
        Ok(())
    }

    fn on_test_start(&mut self, tracker: &ProgressTracker) -> Result<()> {
        Ok(())
    }

    fn on_test_end(&mut self, tracker: &ProgressTracker) -> Result<()> {
        Ok(())
    }
}

/// Ordered set of callbacks dispatched as one.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: Box<dyn TrainerCallback>) {
        self.callbacks.push(callback);
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Invoke one hook on every callback in registration order.
    ///
    /// The first error stops dispatch and propagates.
    pub fn dispatch(
        &mut self,
        tracker: &ProgressTracker,
        mut hook: impl FnMut(&mut dyn TrainerCallback, &ProgressTracker) -> Result<()>,
    ) -> Result<()> {
        for callback in &mut self.callbacks {
            hook(callback.as_mut(), tracker)?;
        }
        Ok(())
    }
}
