//! # tagheap-core
//!
//! Freestanding dynamic-memory manager for a runtime that owns one
//! contiguous address range.
//!
//! The region is modelled as a byte arena addressed by absolute addresses
//! (`region_start + offset`). Every block carries a 4-byte header and a
//! 4-byte footer holding `size | FREE_FLAG`; allocation is first-fit over
//! the whole region with in-place splitting, and release coalesces with
//! both neighbours immediately.

#![deny(unsafe_code)]

pub mod config;
pub mod malloc;

pub use config::HeapConfig;
pub use malloc::{
    Block, CorruptionError, HeapAllocator, HeapError, HeapLogLevel, HeapLogRecord, HeapStats,
    InvalidReason, NULL_ADDR, ProgramBreak, RegionGrowth, WORD,
};
