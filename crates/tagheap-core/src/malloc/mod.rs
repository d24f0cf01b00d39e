//! Memory allocation.
//!
//! Implements the malloc family over a boundary-tagged block layout:
//! - `tag`: the header/footer word encoding and the `Block` value type
//! - `region`: the byte arena and the region-growth primitive
//! - `allocator`: allocate / release / resize / zero-allocate policy

pub mod allocator;
pub mod error;
pub mod region;
pub mod tag;

pub use allocator::{HeapAllocator, HeapLogLevel, HeapLogRecord, HeapStats};
pub use error::{CorruptionError, HeapError, InvalidReason};
pub use region::{Blocks, MAX_REGION_BYTES, ProgramBreak, Region, RegionGrowth};
pub use tag::{Block, FREE_FLAG, MAX_TAG_SIZE, NULL_ADDR, SIZE_MASK, Tag, WORD};
