//! Allocation records and their fixed-size encoding.
//!
//! Every record owns a heap block of [`RECORD_FOOTPRINT`] bytes holding the
//! encoded form below, so ledger bookkeeping consumes the same region as
//! the allocations it shadows:
//!
//! | offset | width | field                      |
//! |-------:|------:|----------------------------|
//! | 0      | 8     | address (LE)               |
//! | 8      | 8     | requested size (LE)        |
//! | 16     | 1     | freed flag                 |
//! | 17     | 4     | origin line (LE)           |
//! | 21     | 32    | origin file, NUL-terminated |
//! | 53     | 32    | origin function, NUL-terminated |

use crate::site::CallSite;

/// Bytes per origin buffer, terminator included.
pub const ORIGIN_CAPACITY: usize = 32;

/// Encoded size of one record.
pub const RECORD_FOOTPRINT: usize = 8 + 8 + 1 + 4 + 2 * ORIGIN_CAPACITY;

const FREED_OFFSET: usize = 16;

/// Fixed-capacity copy of an origin string.
///
/// Holds at most `ORIGIN_CAPACITY - 1` bytes followed by a NUL. Longer
/// input is cut at the last character boundary that fits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OriginBuf {
    bytes: [u8; ORIGIN_CAPACITY],
    len: u8,
}

impl OriginBuf {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut len = source.len().min(ORIGIN_CAPACITY - 1);
        while !source.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0u8; ORIGIN_CAPACITY];
        bytes[..len].copy_from_slice(&source.as_bytes()[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// Like [`OriginBuf::new`], but drops leading `sep`-separated segments
    /// first so the innermost ones survive. `a::b::open_file` keeps
    /// `open_file` before it keeps `a::b`.
    #[must_use]
    pub fn path_tail(source: &str, sep: &str) -> Self {
        let mut rest = source;
        while rest.len() >= ORIGIN_CAPACITY {
            match rest.split_once(sep) {
                Some((_, tail)) if !tail.is_empty() => rest = tail,
                _ => break,
            }
        }
        Self::new(rest)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // Construction only ever copies whole characters.
        std::str::from_utf8(&self.bytes[..usize::from(self.len)]).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The buffer as stored, including the terminator and zero padding.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ORIGIN_CAPACITY] {
        &self.bytes
    }
}

impl std::fmt::Debug for OriginBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.as_str(), f)
    }
}

impl std::fmt::Display for OriginBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Address returned to the caller, or `NULL_ADDR` if allocation failed.
    pub addr: usize,
    pub requested_size: usize,
    pub freed: bool,
    pub file: OriginBuf,
    pub function: OriginBuf,
    pub line: u32,
    /// Payload address of the block holding this record's encoding.
    pub storage: Option<usize>,
}

impl AllocationRecord {
    #[must_use]
    pub fn new(addr: usize, requested_size: usize, site: CallSite<'_>) -> Self {
        Self {
            addr,
            requested_size,
            freed: false,
            file: OriginBuf::path_tail(site.file, "/"),
            function: OriginBuf::path_tail(site.function, "::"),
            line: site.line,
            storage: None,
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_FOOTPRINT] {
        let mut out = [0u8; RECORD_FOOTPRINT];
        out[0..8].copy_from_slice(&(self.addr as u64).to_le_bytes());
        out[8..16].copy_from_slice(&(self.requested_size as u64).to_le_bytes());
        out[FREED_OFFSET] = u8::from(self.freed);
        out[17..21].copy_from_slice(&self.line.to_le_bytes());
        out[21..21 + ORIGIN_CAPACITY].copy_from_slice(self.file.as_bytes());
        out[21 + ORIGIN_CAPACITY..].copy_from_slice(self.function.as_bytes());
        out
    }

    /// Offset of the freed flag inside the encoding.
    #[must_use]
    pub const fn freed_offset() -> usize {
        FREED_OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_fits_without_truncation() {
        let buf = OriginBuf::new("kmain");
        assert_eq!(buf.as_str(), "kmain");
        assert_eq!(buf.as_bytes()[5], 0);
    }

    #[test]
    fn origin_truncates_to_capacity_minus_terminator() {
        let long = "a".repeat(100);
        let buf = OriginBuf::new(&long);
        assert_eq!(buf.len(), ORIGIN_CAPACITY - 1);
        assert_eq!(buf.as_bytes()[ORIGIN_CAPACITY - 1], 0);
    }

    #[test]
    fn origin_truncates_on_char_boundary() {
        // 30 ASCII bytes then a 3-byte character straddling the limit.
        let source = format!("{}\u{20AC}", "x".repeat(30));
        let buf = OriginBuf::new(&source);
        assert_eq!(buf.as_str(), "x".repeat(30));
    }

    #[test]
    fn path_tail_keeps_innermost_segments() {
        let buf = OriginBuf::path_tail("tagheap_kernel::drivers::block::fs::open_file", "::");
        assert_eq!(buf.as_str(), "drivers::block::fs::open_file");
        let buf = OriginBuf::path_tail("crates/tagheap-tracker/tests/fs/open_test.rs", "/");
        assert_eq!(buf.as_str(), "tests/fs/open_test.rs");
        assert_eq!(OriginBuf::path_tail("k::boot", "::").as_str(), "k::boot");
    }

    #[test]
    fn path_tail_cuts_an_oversized_last_segment() {
        let name = format!("m::{}", "f".repeat(40));
        let buf = OriginBuf::path_tail(&name, "::");
        assert_eq!(buf.as_str(), "f".repeat(ORIGIN_CAPACITY - 1));
    }

    #[test]
    fn record_keeps_function_name_of_deep_path() {
        let site = CallSite::new(
            "crates/tagheap-tracker/tests/kernel_fs_test.rs",
            "kernel_fs_test::kernel::fs::open_file",
            4,
        );
        let record = AllocationRecord::new(0x40_0004, 8, site);
        assert_eq!(record.function.as_str(), "kernel::fs::open_file");
        assert_eq!(record.file.as_str(), "tests/kernel_fs_test.rs");
    }

    #[test]
    fn encode_lays_out_fields() {
        let site = CallSite::new("src/fs.rs", "fs::open", 77);
        let mut record = AllocationRecord::new(0x1234, 48, site);
        record.freed = true;
        let bytes = record.encode();
        assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), 0x1234);
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 48);
        assert_eq!(bytes[AllocationRecord::freed_offset()], 1);
        assert_eq!(u32::from_le_bytes(bytes[17..21].try_into().unwrap()), 77);
        assert_eq!(&bytes[21..30], b"src/fs.rs");
        assert_eq!(&bytes[53..61], b"fs::open");
        assert_eq!(bytes.len(), RECORD_FOOTPRINT);
    }
}
