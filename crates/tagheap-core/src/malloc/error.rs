//! Allocator error taxonomy.

use thiserror::Error;

/// Why an address was not accepted as a live allocated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    /// The null sentinel.
    Null,
    /// Outside `[start, end]` of the managed region.
    OutOfRange,
    /// Not the payload of a block on the region walk, or that block's
    /// header and footer disagree.
    TagMismatch,
    /// The block is already free.
    AlreadyFree,
}

impl InvalidReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::OutOfRange => "out_of_range",
            Self::TagMismatch => "tag_mismatch",
            Self::AlreadyFree => "already_free",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a heap operation. The heap is unchanged whenever one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("request of {requested} bytes exceeds the {max} byte cap")]
    OversizeRequest { requested: usize, max: usize },
    #[error("region growth of {requested} bytes failed")]
    RegionExhausted { requested: usize },
    #[error("region growth returned {got:#x}, expected the region end {expected:#x}")]
    NonContiguousGrowth { expected: usize, got: usize },
    #[error("{size} x {count} overflows the request size")]
    CountOverflow { size: usize, count: usize },
    #[error("invalid release of {addr:#x}: {reason}")]
    InvalidRelease { addr: usize, reason: InvalidReason },
    #[error("{addr:#x} is not an allocated block: {reason}")]
    UnknownBlock { addr: usize, reason: InvalidReason },
    #[error("resize of {addr:#x} to {requested} bytes failed")]
    ResizeFailed {
        addr: usize,
        requested: usize,
        #[source]
        source: Box<HeapError>,
    },
}

/// A broken region invariant found by [`super::HeapAllocator::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptionError {
    #[error("block at {header:#x}: header {header_tag:#010x} != footer {footer_tag:#010x}")]
    TagMismatch {
        header: usize,
        header_tag: u32,
        footer_tag: u32,
    },
    #[error("block at {header:#x} runs past the region end {end:#x}")]
    Overrun { header: usize, end: usize },
    #[error("free blocks at {first:#x} and {second:#x} are adjacent")]
    AdjacentFree { first: usize, second: usize },
    #[error("tracked {tracked} allocated bytes, region walk found {observed}")]
    AccountingDrift { tracked: usize, observed: usize },
}
