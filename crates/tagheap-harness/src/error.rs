//! Harness error taxonomy.

use tagheap_core::{CorruptionError, HeapError};
use tagheap_tracker::TrackerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    /// A replay step did not behave as the script expected.
    #[error("step {step} ({op}): {message}")]
    Step {
        step: usize,
        op: &'static str,
        message: String,
    },
    /// `verify()` failed after a step.
    #[error("heap invariant broken after step {step}: {source}")]
    Corruption {
        step: usize,
        #[source]
        source: CorruptionError,
    },
}
