//! Boundary tag encoding.
//!
//! A block is laid out as `[header][payload][footer]`. Header and footer are
//! one `WORD` each and always hold the same value: the payload size with the
//! top bit used as the free flag.

/// Width of a header or footer tag in bytes.
pub const WORD: usize = 4;

/// Bit set in a tag when the block is free.
pub const FREE_FLAG: u32 = 1 << 31;

/// Mask selecting the payload size from a tag.
pub const SIZE_MASK: u32 = !FREE_FLAG;

/// Largest payload size a tag can describe.
pub const MAX_TAG_SIZE: usize = SIZE_MASK as usize;

/// Address returned to mean "no block".
pub const NULL_ADDR: usize = 0;

/// One header or footer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u32);

impl Tag {
    /// Builds a tag for a block of `size` payload bytes.
    ///
    /// `size` must not exceed [`MAX_TAG_SIZE`]; [`super::Region::grow`]
    /// keeps the whole region within that range.
    #[must_use]
    pub const fn new(size: usize, free: bool) -> Self {
        debug_assert!(size <= MAX_TAG_SIZE, "block size exceeds the tag range");
        let size = (size as u32) & SIZE_MASK;
        if free {
            Self(size | FREE_FLAG)
        } else {
            Self(size)
        }
    }

    /// Reinterprets a raw word read from the region.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw word as stored in the region.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Payload size described by this tag.
    #[must_use]
    pub const fn size(self) -> usize {
        (self.0 & SIZE_MASK) as usize
    }

    /// Whether the free flag is set.
    #[must_use]
    pub const fn is_free(self) -> bool {
        self.0 & FREE_FLAG != 0
    }

    #[must_use]
    pub const fn to_bytes(self) -> [u8; WORD] {
        self.0.to_le_bytes()
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; WORD]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }
}

/// A block as seen through its header tag.
///
/// Addresses are absolute (region start plus offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    /// Address of the header tag.
    pub header: usize,
    /// Payload size in bytes.
    pub size: usize,
    /// Whether the block is free.
    pub free: bool,
}

impl Block {
    /// Address handed to callers.
    #[must_use]
    pub const fn payload(&self) -> usize {
        self.header + WORD
    }

    /// Address of the footer tag.
    #[must_use]
    pub const fn footer(&self) -> usize {
        self.header + WORD + self.size
    }

    /// Bytes the block occupies in the region, tags included.
    #[must_use]
    pub const fn span(&self) -> usize {
        self.size + 2 * WORD
    }

    /// Header address of the block that follows this one.
    #[must_use]
    pub const fn next_header(&self) -> usize {
        self.header + self.span()
    }

    #[must_use]
    pub const fn tag(&self) -> Tag {
        Tag::new(self.size, self.free)
    }
}
