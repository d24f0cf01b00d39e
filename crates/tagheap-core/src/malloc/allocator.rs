//! Core allocator state.
//!
//! A first-fit allocator over a single boundary-tagged region. Free blocks
//! are found by walking tags in address order; there is no separate free
//! list. Release coalesces with both physical neighbours before it returns,
//! so no two free blocks are ever adjacent.

use super::error::{CorruptionError, HeapError, InvalidReason};
use super::region::{Blocks, ProgramBreak, Region, RegionGrowth};
use super::tag::{Block, NULL_ADDR, WORD};
use crate::config::HeapConfig;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl HeapLogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: HeapLogLevel,
    /// API symbol (`allocate`, `release`, `zero_allocate`, `resize`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `region_grown`, ...).
    pub event: &'static str,
    /// Payload address involved in the event.
    pub addr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: bytes in the managed region.
    pub region_bytes: usize,
    /// Snapshot: allocated block count.
    pub allocated_blocks: usize,
    /// Snapshot: allocated payload bytes.
    pub allocated_bytes: usize,
    /// Snapshot: successful region growths.
    pub growths: u64,
}

/// Point-in-time summary of the region, computed by walking its tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub region_start: usize,
    pub region_end: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    /// Largest free payload; the biggest request served without growth.
    pub largest_free: usize,
    pub growths: u64,
}

impl HeapStats {
    #[must_use]
    pub fn region_bytes(&self) -> usize {
        self.region_end - self.region_start
    }
}

/// Boundary-tagged heap over one growable region.
///
/// Addresses handed out are absolute payload addresses inside
/// `[region_start, region_end)`. The heap never shrinks.
pub struct HeapAllocator<G = ProgramBreak> {
    region: Region<G>,
    config: HeapConfig,
    /// Blocks currently allocated.
    allocated_blocks: usize,
    /// Payload bytes currently allocated.
    allocated_bytes: usize,
    /// Successful region growths.
    growths: u64,
    /// Monotonic lifecycle decision id.
    next_decision_id: u64,
    /// Structured allocator lifecycle records.
    lifecycle_logs: Vec<HeapLogRecord>,
}

impl HeapAllocator<ProgramBreak> {
    /// Creates a heap whose region starts (empty) at `region_start`, grown
    /// through a default-sized program break.
    #[must_use]
    pub fn new(region_start: usize) -> Self {
        Self::with_config(region_start, HeapConfig::default())
    }

    #[must_use]
    pub fn with_config(region_start: usize, config: HeapConfig) -> Self {
        let config = config.clamped();
        let growth = ProgramBreak::new(region_start, config.region_limit);
        Self::with_growth(region_start, growth, config)
    }
}

impl<G: RegionGrowth> HeapAllocator<G> {
    /// Creates a heap over an empty region at `region_start` that grows
    /// through `growth`.
    pub fn with_growth(region_start: usize, growth: G, config: HeapConfig) -> Self {
        Self {
            region: Region::new(region_start, growth),
            config: config.clamped(),
            allocated_blocks: 0,
            allocated_bytes: 0,
            growths: 0,
            next_decision_id: 1,
            lifecycle_logs: Vec::new(),
        }
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn record_lifecycle(
        &mut self,
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        addr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        if !self.config.lifecycle_log {
            return;
        }
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("core::heap::{}::{:016x}", symbol, decision_id);
        self.lifecycle_logs.push(HeapLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            addr,
            size,
            outcome,
            details: details.into(),
            region_bytes: self.region.len(),
            allocated_blocks: self.allocated_blocks,
            allocated_bytes: self.allocated_bytes,
            growths: self.growths,
        });
    }

    fn record_heap_stats(&mut self, symbol: &'static str) {
        if !self.config.lifecycle_log {
            return;
        }
        let stats = self.stats();
        self.record_lifecycle(
            HeapLogLevel::Debug,
            symbol,
            "heap_stats",
            None,
            None,
            "snapshot",
            format!(
                "free_blocks={};free_bytes={};largest_free={}",
                stats.free_blocks, stats.free_bytes, stats.largest_free
            ),
        );
    }

    /// Allocates a block with a payload of exactly `size` bytes.
    ///
    /// Scans the region first-fit: an exact-size free block is reused as-is,
    /// a free block with at least `size + 2 * WORD` bytes is split in place.
    /// Otherwise the region grows by `size + 2 * WORD` at its tail.
    pub fn allocate(&mut self, size: usize) -> Result<usize, HeapError> {
        let max = self.config.max_request;
        if size > max {
            self.record_lifecycle(
                HeapLogLevel::Warn,
                "allocate",
                "oversize_request",
                None,
                Some(size),
                "denied",
                format!("max_request={max}"),
            );
            return Err(HeapError::OversizeRequest {
                requested: size,
                max,
            });
        }

        if let Some((block, remainder)) = self.take_first_fit(size) {
            self.allocated_blocks += 1;
            self.allocated_bytes += block.size;
            let details = match remainder {
                None => String::from("path=exact_fit"),
                Some(rest) => format!(
                    "path=split remainder_addr={:#x} remainder_size={}",
                    rest.payload(),
                    rest.size
                ),
            };
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "allocate",
                "alloc",
                Some(block.payload()),
                Some(size),
                "success",
                details,
            );
            return Ok(block.payload());
        }

        let span = size + 2 * WORD;
        let header = match self.region.grow(span) {
            Ok(header) => header,
            Err(err) => {
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    "allocate",
                    "region_exhausted",
                    None,
                    Some(size),
                    "oom",
                    err.to_string(),
                );
                return Err(err);
            }
        };
        self.growths += 1;
        let block = self.region.write_block(header, size, false);
        self.allocated_blocks += 1;
        self.allocated_bytes += size;
        self.record_lifecycle(
            HeapLogLevel::Info,
            "allocate",
            "region_grown",
            Some(block.payload()),
            Some(size),
            "success",
            format!("grew={} end={:#x}", span, self.region.end()),
        );
        self.record_heap_stats("allocate");
        Ok(block.payload())
    }

    /// Claims the first free block that fits, splitting when there is room
    /// for a remainder block. Returns the claimed block and the remainder.
    fn take_first_fit(&mut self, size: usize) -> Option<(Block, Option<Block>)> {
        let mut cursor = self.region.start();
        while self.region.spans(cursor, 2 * WORD) {
            let block = self.region.block_at(cursor);
            if block.free && block.size == size {
                let used = self.region.write_block(block.header, size, false);
                return Some((used, None));
            }
            if block.free && block.size >= size + 2 * WORD {
                let used = self.region.write_block(block.header, size, false);
                let rest =
                    self.region
                        .write_block(used.next_header(), block.size - size - 2 * WORD, true);
                return Some((used, Some(rest)));
            }
            cursor = block.next_header();
        }
        None
    }

    /// Resolves a payload address to its block.
    ///
    /// Only boundaries reached by walking from the region start count.
    /// Absorbed tags left inside a merged block, or user bytes that happen
    /// to look like a tag pair, are never trusted.
    fn block_for_payload(&self, addr: usize) -> Result<Block, InvalidReason> {
        if addr == NULL_ADDR {
            return Err(InvalidReason::Null);
        }
        if addr < self.region.start() || addr > self.region.end() {
            return Err(InvalidReason::OutOfRange);
        }
        for block in self.region.blocks() {
            if block.payload() > addr {
                break;
            }
            if block.payload() != addr {
                continue;
            }
            if !self.region.spans(block.footer(), WORD)
                || self.region.tag_at(block.footer()) != block.tag()
            {
                return Err(InvalidReason::TagMismatch);
            }
            return Ok(block);
        }
        Err(InvalidReason::TagMismatch)
    }

    fn live_block(&self, addr: usize) -> Result<Block, InvalidReason> {
        let block = self.block_for_payload(addr)?;
        if block.free {
            return Err(InvalidReason::AlreadyFree);
        }
        Ok(block)
    }

    /// Frees the block at `addr` and merges it with free neighbours.
    ///
    /// Returns the resulting free block. Null, out-of-range, already-free
    /// and unrecognised addresses are rejected without touching the region.
    pub fn release(&mut self, addr: usize) -> Result<Block, HeapError> {
        let block = match self.live_block(addr) {
            Ok(block) => block,
            Err(reason) => {
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    "release",
                    "invalid_release",
                    Some(addr),
                    None,
                    "ignored",
                    reason.as_str(),
                );
                return Err(HeapError::InvalidRelease { addr, reason });
            }
        };

        let below = self.region.block_before(block.header).filter(|b| b.free);
        let above = self.region.block_after(&block).filter(|b| b.free);

        let mut header = block.header;
        let mut size = block.size;
        if let Some(prev) = below {
            header = prev.header;
            size += prev.span();
        }
        if let Some(next) = above {
            size += next.span();
        }
        // Single write covering none/up/down/both.
        let merged = self.region.write_block(header, size, true);

        self.allocated_blocks -= 1;
        self.allocated_bytes -= block.size;
        let coalesce = match (below.is_some(), above.is_some()) {
            (false, false) => "none",
            (true, false) => "up",
            (false, true) => "down",
            (true, true) => "both",
        };
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "release",
            "free",
            Some(addr),
            Some(block.size),
            "success",
            format!(
                "coalesce={} merged_addr={:#x} merged_size={}",
                coalesce,
                merged.payload(),
                merged.size
            ),
        );
        Ok(merged)
    }

    /// Allocates `size * count` bytes and zero-fills the payload.
    pub fn zero_allocate(&mut self, size: usize, count: usize) -> Result<usize, HeapError> {
        let Some(total) = size.checked_mul(count) else {
            self.record_lifecycle(
                HeapLogLevel::Warn,
                "zero_allocate",
                "count_overflow",
                None,
                None,
                "denied",
                format!("count={} size={}", count, size),
            );
            return Err(HeapError::CountOverflow { size, count });
        };
        let addr = self.allocate(total)?;
        self.region.slice_mut(addr, total).fill(0);
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "zero_allocate",
            "zeroed",
            Some(addr),
            Some(total),
            "success",
            format!("count={} elem_size={}", count, size),
        );
        Ok(addr)
    }

    /// Resizes the block at `addr` to hold at least `new_size` bytes.
    ///
    /// Blocks are never shrunk: if `new_size` fits the current payload the
    /// same address comes back. Otherwise the payload moves to a fresh
    /// block and the old one is released. When the fresh allocation fails
    /// the original block is left as it was. A null `addr` allocates.
    pub fn resize(&mut self, addr: usize, new_size: usize) -> Result<usize, HeapError> {
        if addr == NULL_ADDR {
            let out = self.allocate(new_size);
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "resize",
                "resize_null_as_allocate",
                out.as_ref().ok().copied(),
                Some(new_size),
                if out.is_ok() { "success" } else { "oom" },
                "addr_was_null",
            );
            return out;
        }

        let block = match self.live_block(addr) {
            Ok(block) => block,
            Err(reason) => {
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    "resize",
                    "resize_unknown_block",
                    Some(addr),
                    Some(new_size),
                    "denied",
                    reason.as_str(),
                );
                return Err(HeapError::UnknownBlock { addr, reason });
            }
        };

        if new_size <= block.size {
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "resize",
                "resize_in_place",
                Some(addr),
                Some(new_size),
                "success",
                format!("old_size={}", block.size),
            );
            return Ok(addr);
        }

        let new_addr = match self.allocate(new_size) {
            Ok(new_addr) => new_addr,
            Err(source) => {
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    "resize",
                    "resize_allocate_failed",
                    Some(addr),
                    Some(new_size),
                    "kept_original",
                    source.to_string(),
                );
                return Err(HeapError::ResizeFailed {
                    addr,
                    requested: new_size,
                    source: Box::new(source),
                });
            }
        };
        self.region.copy_within(addr, new_addr, block.size);
        self.release(addr)?;
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "resize",
            "resize_move",
            Some(new_addr),
            Some(new_size),
            "success",
            format!("old_addr={:#x} old_size={}", addr, block.size),
        );
        Ok(new_addr)
    }

    /// Payload bytes of the allocated block at `addr`.
    pub fn payload(&self, addr: usize) -> Result<&[u8], HeapError> {
        let block = self
            .live_block(addr)
            .map_err(|reason| HeapError::UnknownBlock { addr, reason })?;
        Ok(self.region.slice(block.payload(), block.size))
    }

    /// Mutable payload bytes of the allocated block at `addr`.
    pub fn payload_mut(&mut self, addr: usize) -> Result<&mut [u8], HeapError> {
        let block = self
            .live_block(addr)
            .map_err(|reason| HeapError::UnknownBlock { addr, reason })?;
        Ok(self.region.slice_mut(block.payload(), block.size))
    }

    /// Finds the block (free or allocated) whose payload starts at `addr`.
    #[must_use]
    pub fn block_at(&self, addr: usize) -> Option<Block> {
        self.blocks().find(|block| block.payload() == addr)
    }

    /// Walks all blocks in address order.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_, G> {
        self.region.blocks()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            region_start: self.region.start(),
            region_end: self.region.end(),
            growths: self.growths,
            ..HeapStats::default()
        };
        for block in self.blocks() {
            if block.free {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
                stats.largest_free = stats.largest_free.max(block.size);
            } else {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += block.size;
            }
        }
        stats
    }

    /// Checks every region invariant: matching tags, exact tiling, no
    /// adjacent free blocks, and agreement with the allocation counters.
    pub fn verify(&self) -> Result<(), CorruptionError> {
        let end = self.region.end();
        let mut cursor = self.region.start();
        let mut prev_free: Option<usize> = None;
        let mut observed = 0;
        while cursor < end {
            if !self.region.spans(cursor, 2 * WORD) {
                return Err(CorruptionError::Overrun {
                    header: cursor,
                    end,
                });
            }
            let block = self.region.block_at(cursor);
            if !self.region.spans(block.footer(), WORD) {
                return Err(CorruptionError::Overrun {
                    header: cursor,
                    end,
                });
            }
            let footer = self.region.tag_at(block.footer());
            let header = self.region.tag_at(cursor);
            if footer != header {
                return Err(CorruptionError::TagMismatch {
                    header: cursor,
                    header_tag: header.raw(),
                    footer_tag: footer.raw(),
                });
            }
            if block.free {
                if let Some(first) = prev_free {
                    return Err(CorruptionError::AdjacentFree {
                        first,
                        second: cursor,
                    });
                }
                prev_free = Some(cursor);
            } else {
                prev_free = None;
                observed += block.size;
            }
            cursor = block.next_header();
        }
        if observed != self.allocated_bytes {
            return Err(CorruptionError::AccountingDrift {
                tracked: self.allocated_bytes,
                observed,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn region_start(&self) -> usize {
        self.region.start()
    }

    #[must_use]
    pub fn region_end(&self) -> usize {
        self.region.end()
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn growth(&self) -> &G {
        self.region.growth()
    }

    /// Returns the number of allocated blocks.
    #[must_use]
    pub fn allocated_blocks(&self) -> usize {
        self.allocated_blocks
    }

    /// Returns the allocated payload bytes.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Returns a view of allocator lifecycle log records.
    #[must_use]
    pub fn lifecycle_logs(&self) -> &[HeapLogRecord] {
        &self.lifecycle_logs
    }

    /// Drains allocator lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<HeapLogRecord> {
        std::mem::take(&mut self.lifecycle_logs)
    }
}

impl<G> std::fmt::Debug for HeapAllocator<G>
where
    G: RegionGrowth,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("region_start", &self.region.start())
            .field("region_end", &self.region.end())
            .field("allocated_blocks", &self.allocated_blocks)
            .field("allocated_bytes", &self.allocated_bytes)
            .field("growths", &self.growths)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::malloc::tag::Tag;

    const START: usize = 0x0080_0000;

    fn heap() -> HeapAllocator {
        HeapAllocator::new(START)
    }

    #[test]
    fn test_new_state() {
        let heap = heap();
        assert_eq!(heap.region_start(), START);
        assert_eq!(heap.region_end(), START);
        assert_eq!(heap.allocated_blocks(), 0);
        assert_eq!(heap.stats(), HeapStats {
            region_start: START,
            region_end: START,
            ..HeapStats::default()
        });
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_allocate_grows_region() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        assert_eq!(a, START + WORD);
        assert_eq!(heap.region_end(), START + 16 + 2 * WORD);
        assert_eq!(heap.growth().used(), 16 + 2 * WORD);

        let b = heap.allocate(8).unwrap();
        assert_eq!(b, START + 24 + WORD);
        assert_eq!(heap.allocated_blocks(), 2);
        assert_eq!(heap.allocated_bytes(), 24);
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_allocate_zero_bytes() {
        let mut heap = heap();
        let a = heap.allocate(0).unwrap();
        assert_eq!(heap.block_at(a).map(|b| b.size), Some(0));
        assert_eq!(heap.region_end(), START + 2 * WORD);
    }

    #[test]
    fn test_exact_fit_reuse() {
        let mut heap = heap();
        let a = heap.allocate(32).unwrap();
        let _guard = heap.allocate(8).unwrap();
        heap.release(a).unwrap();
        let end = heap.region_end();

        let again = heap.allocate(32).unwrap();
        assert_eq!(again, a);
        assert_eq!(heap.region_end(), end);
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_split_leaves_remainder() {
        let mut heap = heap();
        let a = heap.allocate(64).unwrap();
        let _guard = heap.allocate(4).unwrap();
        heap.release(a).unwrap();
        let end = heap.region_end();

        let x = heap.allocate(16).unwrap();
        assert_eq!(x, a);
        let remainder_addr = a + 16 + 2 * WORD;
        assert_eq!(
            heap.block_at(remainder_addr),
            Some(Block {
                header: remainder_addr - WORD,
                size: 64 - 16 - 2 * WORD,
                free: true,
            })
        );

        let y = heap.allocate(40).unwrap();
        assert_eq!(y, remainder_addr);
        assert_eq!(heap.region_end(), end);
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_split_with_empty_remainder() {
        let mut heap = heap();
        let a = heap.allocate(24).unwrap();
        let _guard = heap.allocate(4).unwrap();
        heap.release(a).unwrap();

        assert_eq!(heap.allocate(16).unwrap(), a);
        let rest = a + 16 + 2 * WORD;
        assert_eq!(heap.block_at(rest).map(|b| (b.size, b.free)), Some((0, true)));
        assert_eq!(heap.allocate(0).unwrap(), rest);
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_no_split_without_room_for_remainder() {
        let mut heap = heap();
        let a = heap.allocate(20).unwrap();
        let _guard = heap.allocate(4).unwrap();
        heap.release(a).unwrap();
        let end = heap.region_end();

        let b = heap.allocate(16).unwrap();
        assert_eq!(b, end + WORD);
        assert_eq!(heap.block_at(a).map(|blk| blk.free), Some(true));
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_first_fit_prefers_lowest_address() {
        let mut heap = heap();
        let a = heap.allocate(48).unwrap();
        let _g1 = heap.allocate(4).unwrap();
        let b = heap.allocate(48).unwrap();
        let _g2 = heap.allocate(4).unwrap();
        heap.release(b).unwrap();
        heap.release(a).unwrap();

        assert_eq!(heap.allocate(48).unwrap(), a);
        assert_eq!(heap.allocate(48).unwrap(), b);
    }

    #[test]
    fn test_release_coalesces_up() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let _guard = heap.allocate(16).unwrap();

        heap.release(a).unwrap();
        let merged = heap.release(b).unwrap();
        assert_eq!(merged.header, a - WORD);
        assert_eq!(merged.size, 16 + 16 + 2 * WORD);

        let end = heap.region_end();
        assert_eq!(heap.allocate(40).unwrap(), a);
        assert_eq!(heap.region_end(), end);
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_release_coalesces_down() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let _guard = heap.allocate(16).unwrap();

        heap.release(b).unwrap();
        let merged = heap.release(a).unwrap();
        assert_eq!(merged.header, a - WORD);
        assert_eq!(merged.size, 40);
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_release_coalesces_both_sides() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let c = heap.allocate(16).unwrap();
        let _guard = heap.allocate(16).unwrap();

        heap.release(a).unwrap();
        heap.release(c).unwrap();
        let merged = heap.release(b).unwrap();
        assert_eq!(merged.header, a - WORD);
        assert_eq!(merged.size, 3 * 16 + 4 * WORD);
        let stats = heap.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free, 64);
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_release_merges_into_trailing_free_block() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        heap.release(b).unwrap();
        heap.release(a).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, 40);
        assert_eq!(stats.allocated_blocks, 0);
    }

    #[test]
    fn test_release_null_and_out_of_range() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();

        assert_eq!(
            heap.release(NULL_ADDR),
            Err(HeapError::InvalidRelease {
                addr: NULL_ADDR,
                reason: InvalidReason::Null
            })
        );
        assert_eq!(
            heap.release(START - 64),
            Err(HeapError::InvalidRelease {
                addr: START - 64,
                reason: InvalidReason::OutOfRange
            })
        );
        let past_end = heap.region_end() + WORD;
        assert_eq!(
            heap.release(past_end),
            Err(HeapError::InvalidRelease {
                addr: past_end,
                reason: InvalidReason::OutOfRange
            })
        );
        assert_eq!(heap.payload(a).map(<[u8]>::len), Ok(16));
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_double_release_rejected() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let _guard = heap.allocate(16).unwrap();
        heap.release(a).unwrap();
        assert_eq!(
            heap.release(a),
            Err(HeapError::InvalidRelease {
                addr: a,
                reason: InvalidReason::AlreadyFree
            })
        );
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_release_mid_payload_rejected() {
        let mut heap = heap();
        let a = heap.allocate(64).unwrap();
        heap.payload_mut(a).unwrap().fill(0xEE);
        assert_eq!(
            heap.release(a + 8),
            Err(HeapError::InvalidRelease {
                addr: a + 8,
                reason: InvalidReason::TagMismatch
            })
        );
        assert_eq!(heap.allocated_blocks(), 1);
    }

    #[test]
    fn test_double_release_after_two_sided_merge() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(32).unwrap();
        let c = heap.allocate(16).unwrap();
        let _guard = heap.allocate(8).unwrap();
        heap.release(a).unwrap();
        heap.release(c).unwrap();
        let merged = heap.release(b).unwrap();
        assert_eq!(merged.payload(), a);

        // b's old tags are still intact inside the merged block.
        assert_eq!(heap.region.tag_at(b - WORD), Tag::new(32, false));
        assert_eq!(
            heap.release(b),
            Err(HeapError::InvalidRelease {
                addr: b,
                reason: InvalidReason::TagMismatch
            })
        );
        assert_eq!(heap.allocated_blocks(), 1);
        assert_eq!(heap.allocated_bytes(), 8);
        assert!(heap.verify().is_ok());
        assert!(heap.payload(b).is_err());
        assert!(heap.resize(b, 8).is_err());
    }

    #[test]
    fn test_release_forged_tag_pair_in_payload() {
        let mut heap = heap();
        let a = heap.allocate(64).unwrap();
        let word = Tag::new(8, false).to_bytes();
        let payload = heap.payload_mut(a).unwrap();
        payload[8..12].copy_from_slice(&word);
        payload[20..24].copy_from_slice(&word);

        assert_eq!(
            heap.release(a + 12),
            Err(HeapError::InvalidRelease {
                addr: a + 12,
                reason: InvalidReason::TagMismatch
            })
        );
        assert_eq!(heap.allocated_bytes(), 64);
        assert!(heap.verify().is_ok());
        assert_eq!(heap.release(a).map(|b| b.size), Ok(64));
    }

    #[test]
    fn test_oversize_rejected_without_mutation() {
        let mut heap = HeapAllocator::with_config(START, HeapConfig::default().with_max_request(128));
        assert_eq!(
            heap.allocate(129),
            Err(HeapError::OversizeRequest {
                requested: 129,
                max: 128
            })
        );
        assert_eq!(heap.region_end(), START);
        assert!(heap.allocate(128).is_ok());
    }

    #[test]
    fn test_region_exhausted() {
        let mut heap = HeapAllocator::with_config(START, HeapConfig::default().with_region_limit(64));
        let a = heap.allocate(40).unwrap();
        assert_eq!(
            heap.allocate(16),
            Err(HeapError::RegionExhausted { requested: 24 })
        );
        assert_eq!(heap.region_end(), START + 48);
        assert_eq!(heap.allocate(8).unwrap(), START + 48 + WORD);
        heap.release(a).unwrap();
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_growth_failure_from_callback() {
        let mut heap =
            HeapAllocator::with_growth(START, |_: usize| -> Option<usize> { None }, HeapConfig::default());
        assert_eq!(
            heap.allocate(8),
            Err(HeapError::RegionExhausted { requested: 16 })
        );
        assert_eq!(heap.region_end(), START);
    }

    #[test]
    fn test_zero_allocate_clears_reused_payload() {
        let mut heap = heap();
        let a = heap.allocate(32).unwrap();
        let _guard = heap.allocate(4).unwrap();
        heap.payload_mut(a).unwrap().fill(0xAB);
        heap.release(a).unwrap();

        let z = heap.zero_allocate(8, 4).unwrap();
        assert_eq!(z, a);
        assert!(heap.payload(z).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_allocate_overflow() {
        let mut heap = heap();
        assert_eq!(
            heap.zero_allocate(usize::MAX, 2),
            Err(HeapError::CountOverflow {
                size: usize::MAX,
                count: 2
            })
        );
        assert_eq!(heap.region_end(), START);
    }

    #[test]
    fn test_resize_in_place() {
        let mut heap = heap();
        let a = heap.allocate(64).unwrap();
        assert_eq!(heap.resize(a, 10).unwrap(), a);
        assert_eq!(heap.resize(a, 64).unwrap(), a);
        assert_eq!(heap.payload(a).unwrap().len(), 64);
    }

    #[test]
    fn test_resize_moves_and_preserves_payload() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let _guard = heap.allocate(4).unwrap();
        let pattern: Vec<u8> = (0u8..16).collect();
        heap.payload_mut(a).unwrap().copy_from_slice(&pattern);

        let moved = heap.resize(a, 64).unwrap();
        assert_ne!(moved, a);
        assert_eq!(&heap.payload(moved).unwrap()[..16], pattern.as_slice());
        assert_eq!(
            heap.payload(a),
            Err(HeapError::UnknownBlock {
                addr: a,
                reason: InvalidReason::AlreadyFree
            })
        );
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_resize_failure_keeps_original() {
        let mut heap = HeapAllocator::with_config(START, HeapConfig::default().with_region_limit(64));
        let a = heap.allocate(16).unwrap();
        heap.payload_mut(a).unwrap().fill(0x5A);

        let err = heap.resize(a, 100).unwrap_err();
        assert_eq!(
            err,
            HeapError::ResizeFailed {
                addr: a,
                requested: 100,
                source: Box::new(HeapError::RegionExhausted { requested: 108 }),
            }
        );
        assert!(heap.payload(a).unwrap().iter().all(|&b| b == 0x5A));
        assert_eq!(heap.allocated_blocks(), 1);
        assert!(heap.verify().is_ok());
    }

    #[test]
    fn test_resize_null_allocates() {
        let mut heap = heap();
        let a = heap.resize(NULL_ADDR, 12).unwrap();
        assert_eq!(heap.payload(a).unwrap().len(), 12);
    }

    #[test]
    fn test_resize_unknown_block() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let _guard = heap.allocate(16).unwrap();
        heap.release(a).unwrap();
        assert_eq!(
            heap.resize(a, 32),
            Err(HeapError::UnknownBlock {
                addr: a,
                reason: InvalidReason::AlreadyFree
            })
        );
    }

    #[test]
    fn test_verify_detects_tag_mismatch() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let footer = a + 16;
        heap.region
            .slice_mut(footer, WORD)
            .copy_from_slice(&Tag::new(12, false).to_bytes());
        assert_eq!(
            heap.verify(),
            Err(CorruptionError::TagMismatch {
                header: a - WORD,
                header_tag: 16,
                footer_tag: 12,
            })
        );
    }

    #[test]
    fn test_verify_detects_adjacent_free() {
        let mut heap = heap();
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        heap.region.write_block(a - WORD, 16, true);
        heap.region.write_block(b - WORD, 16, true);
        heap.allocated_bytes = 0;
        assert_eq!(
            heap.verify(),
            Err(CorruptionError::AdjacentFree {
                first: a - WORD,
                second: b - WORD,
            })
        );
    }

    #[test]
    fn test_lifecycle_logs_include_trace_and_decision_ids() {
        let mut heap = heap();
        let a = heap.allocate(64).unwrap();
        heap.release(a).unwrap();

        let logs = heap.drain_lifecycle_logs();
        assert!(!logs.is_empty());
        assert!(logs.iter().all(|entry| entry.decision_id > 0));
        assert!(
            logs.iter()
                .all(|entry| entry.trace_id.starts_with("core::heap::"))
        );
        assert!(logs.iter().any(|entry| {
            entry.level == HeapLogLevel::Info && entry.event == "region_grown"
        }));
        assert!(logs.iter().any(|entry| {
            entry.level == HeapLogLevel::Debug && entry.event == "heap_stats"
        }));
        assert!(logs.iter().any(|entry| {
            entry.level == HeapLogLevel::Trace
                && entry.event == "free"
                && entry.details.starts_with("coalesce=none")
        }));
        assert!(heap.lifecycle_logs().is_empty());
    }

    #[test]
    fn test_lifecycle_logs_warn_on_rejections() {
        let mut heap = HeapAllocator::with_config(START, HeapConfig::default().with_max_request(8));
        let _ = heap.allocate(9);
        let _ = heap.release(0xDEAD);
        let logs = heap.drain_lifecycle_logs();
        assert!(logs.iter().any(|entry| {
            entry.level == HeapLogLevel::Warn && entry.event == "oversize_request"
        }));
        assert!(logs.iter().any(|entry| {
            entry.level == HeapLogLevel::Warn
                && entry.event == "invalid_release"
                && entry.details == "out_of_range"
        }));
    }

    #[test]
    fn test_lifecycle_logs_can_be_disabled() {
        let mut heap =
            HeapAllocator::with_config(START, HeapConfig::default().with_lifecycle_log(false));
        let a = heap.allocate(8).unwrap();
        heap.release(a).unwrap();
        assert!(heap.lifecycle_logs().is_empty());
    }
}
