use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Chunks handled so far out of those known about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
}

/// Receives a [`Progress`] after every chunk
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Running counter that reports through an optional callback
#[derive(Clone, Default)]
pub(crate) struct ProgressTracker {
    progress: Progress,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub(crate) fn new(total: u64, callback: Option<ProgressCallback>) -> Self {
        Self {
            progress: Progress {
                processed: 0,
                total,
            },
            callback,
        }
    }

    pub(crate) fn discovered(&mut self, count: u64) {
        self.progress.total += count;
    }

    pub(crate) fn processed(&mut self) {
        self.progress.processed += 1;
        if let Some(callback) = &self.callback {
            callback(self.progress);
        }
    }

    pub(crate) fn current(&self) -> Progress {
        self.progress
    }
}
