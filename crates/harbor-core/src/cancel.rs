//! Cooperative cancellation for download and merge pipelines.
//!
//! A token is created per task and cloned into the fetch stream and the merge
//! loop. The fetch path checks it per chunk; the merge path checks it between
//! shards only, so an in-progress shard write always completes or is
//! discarded whole.

use crate::error::{HarborError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token shared across the stages of one task.
///
/// All clones observe a `cancel()` on any of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    ///
    /// Pipeline stages call this at their natural checkpoints.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(HarborError::Cancelled)
        } else {
            Ok(())
        }
    }
}
