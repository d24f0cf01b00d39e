//! The managed region and its growth primitive.
//!
//! The region is `[start, end)`. Its bytes live in an owned arena so that
//! every tag read and write is a bounds-checked slice access; `end` only
//! moves forward, and only through [`Region::grow`].

use super::error::HeapError;
use super::tag::{Block, MAX_TAG_SIZE, Tag, WORD};

/// Largest region a tag can still describe as one merged block.
pub const MAX_REGION_BYTES: usize = MAX_TAG_SIZE + 2 * WORD;

/// Environment primitive that extends the managed region at its tail.
///
/// Returns the start address of `byte_count` freshly available bytes, or
/// `None` when the environment cannot provide them. A zero-byte request
/// always fails.
pub trait RegionGrowth {
    fn grow(&mut self, byte_count: usize) -> Option<usize>;
}

impl<F> RegionGrowth for F
where
    F: FnMut(usize) -> Option<usize>,
{
    fn grow(&mut self, byte_count: usize) -> Option<usize> {
        self(byte_count)
    }
}

/// A program break over a fixed-capacity address range.
///
/// Mirrors an `sbrk` that hands out bytes from one pre-mapped page: the
/// break starts at the region start and never passes `base + limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBreak {
    base: usize,
    brk: usize,
    limit: usize,
}

impl ProgramBreak {
    #[must_use]
    pub const fn new(base: usize, limit: usize) -> Self {
        Self {
            base,
            brk: base,
            limit,
        }
    }

    /// Current break address.
    #[must_use]
    pub const fn current(&self) -> usize {
        self.brk
    }

    /// Bytes handed out so far.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.brk - self.base
    }

    /// Bytes still available below the limit.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.limit - self.used()
    }
}

impl RegionGrowth for ProgramBreak {
    fn grow(&mut self, byte_count: usize) -> Option<usize> {
        if byte_count == 0 || byte_count > self.remaining() {
            return None;
        }
        let start = self.brk;
        self.brk = self.brk.checked_add(byte_count)?;
        Some(start)
    }
}

/// Byte arena backing the managed region.
#[derive(Debug)]
pub struct Region<G> {
    start: usize,
    bytes: Vec<u8>,
    growth: G,
}

impl<G: RegionGrowth> Region<G> {
    /// Creates an empty region (`start == end`).
    pub fn new(start: usize, growth: G) -> Self {
        Self {
            start,
            bytes: Vec::new(),
            growth,
        }
    }

    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.bytes.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn growth(&self) -> &G {
        &self.growth
    }

    /// Asks the growth primitive for `byte_count` more bytes at the tail.
    ///
    /// The primitive is called exactly once, and not at all when the region
    /// would outgrow [`MAX_REGION_BYTES`]. On success the arena is extended
    /// by `byte_count` zeroed bytes and the start of the new bytes returned.
    pub fn grow(&mut self, byte_count: usize) -> Result<usize, HeapError> {
        // Past this size a fully coalesced region would wrap its tag.
        if self
            .bytes
            .len()
            .checked_add(byte_count)
            .is_none_or(|total| total > MAX_REGION_BYTES)
        {
            return Err(HeapError::RegionExhausted {
                requested: byte_count,
            });
        }
        let expected = self.end();
        let Some(addr) = self.growth.grow(byte_count) else {
            return Err(HeapError::RegionExhausted {
                requested: byte_count,
            });
        };
        if addr != expected {
            return Err(HeapError::NonContiguousGrowth {
                expected,
                got: addr,
            });
        }
        self.bytes.resize(self.bytes.len() + byte_count, 0);
        Ok(addr)
    }

    /// Whether `addr..addr + len` lies inside `[start, end)`.
    #[must_use]
    pub fn spans(&self, addr: usize, len: usize) -> bool {
        addr >= self.start
            && addr
                .checked_add(len)
                .is_some_and(|stop| stop <= self.end())
    }

    fn offset(&self, addr: usize) -> usize {
        addr - self.start
    }

    /// Reads the tag word at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if the word is not inside the region; callers check with
    /// [`Region::spans`] first.
    #[must_use]
    pub fn tag_at(&self, addr: usize) -> Tag {
        let off = self.offset(addr);
        let mut word = [0u8; WORD];
        word.copy_from_slice(&self.bytes[off..off + WORD]);
        Tag::from_bytes(word)
    }

    /// Reads the block whose header sits at `header`.
    #[must_use]
    pub fn block_at(&self, header: usize) -> Block {
        let tag = self.tag_at(header);
        Block {
            header,
            size: tag.size(),
            free: tag.is_free(),
        }
    }

    /// Writes header and footer of a block in one step.
    ///
    /// This is the only place tags are written, so header == footer holds
    /// after every mutation.
    pub fn write_block(&mut self, header: usize, size: usize, free: bool) -> Block {
        let block = Block { header, size, free };
        let bytes = block.tag().to_bytes();
        let head = self.offset(block.header);
        let foot = self.offset(block.footer());
        self.bytes[head..head + WORD].copy_from_slice(&bytes);
        self.bytes[foot..foot + WORD].copy_from_slice(&bytes);
        block
    }

    #[must_use]
    pub fn slice(&self, addr: usize, len: usize) -> &[u8] {
        let off = self.offset(addr);
        &self.bytes[off..off + len]
    }

    pub fn slice_mut(&mut self, addr: usize, len: usize) -> &mut [u8] {
        let off = self.offset(addr);
        &mut self.bytes[off..off + len]
    }

    /// The block physically below the one whose header is at `header`,
    /// found through the footer directly beneath that header.
    #[must_use]
    pub fn block_before(&self, header: usize) -> Option<Block> {
        if header < self.start + 2 * WORD {
            return None;
        }
        let footer = self.tag_at(header - WORD);
        let prev = header.checked_sub(2 * WORD + footer.size())?;
        (prev >= self.start).then_some(Block {
            header: prev,
            size: footer.size(),
            free: footer.is_free(),
        })
    }

    /// The block physically above `block`, if the region continues.
    #[must_use]
    pub fn block_after(&self, block: &Block) -> Option<Block> {
        let next = block.next_header();
        self.spans(next, 2 * WORD).then(|| self.block_at(next))
    }

    /// Walks the region block by block from `start`.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_, G> {
        Blocks {
            region: self,
            cursor: self.start,
        }
    }

    /// Copies `len` bytes from `src` to `dst` inside the region.
    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        let src = self.offset(src);
        let dst = self.offset(dst);
        self.bytes.copy_within(src..src + len, dst);
    }
}

/// Address-ordered walk over the blocks of a [`Region`].
pub struct Blocks<'a, G> {
    region: &'a Region<G>,
    cursor: usize,
}

impl<G: RegionGrowth> Iterator for Blocks<'_, G> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if !self.region.spans(self.cursor, 2 * WORD) {
            return None;
        }
        let block = self.region.block_at(self.cursor);
        self.cursor = block.next_header();
        Some(block)
    }
}
