//! Tracker error taxonomy.

use tagheap_core::HeapError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Heap(#[from] HeapError),
    /// Release of an address with no live record; counted, not forwarded.
    #[error("release of {addr:#x} matches no live record (previously released: {already_freed})")]
    UntrackedRelease { addr: usize, already_freed: bool },
    #[error("resize of {addr:#x} matches no live record")]
    UntrackedResize { addr: usize },
    #[error("process-wide tracker used before init")]
    Uninitialized,
}
