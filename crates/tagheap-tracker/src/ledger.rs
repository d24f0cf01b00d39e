//! Most-recent-first allocation ledger.

use std::collections::VecDeque;

use crate::record::AllocationRecord;

/// Records of the current tracking session, newest at the front.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: VecDeque<AllocationRecord>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as the new head.
    pub fn push_front(&mut self, record: AllocationRecord) {
        self.records.push_front(record);
    }

    /// The newest record for `addr` that is still live.
    ///
    /// Newest-first order matters once an address is reused after a release.
    pub fn find_live_mut(&mut self, addr: usize) -> Option<&mut AllocationRecord> {
        self.records
            .iter_mut()
            .find(|record| !record.freed && record.addr == addr)
    }

    /// Whether some released record carries `addr`.
    #[must_use]
    pub fn has_freed(&self, addr: usize) -> bool {
        self.records
            .iter()
            .any(|record| record.freed && record.addr == addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.records.iter()
    }

    pub fn freed(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.records.iter().filter(|record| record.freed)
    }

    pub fn unfreed(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.records.iter().filter(|record| !record.freed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Empties the ledger, yielding every record head to tail.
    pub fn drain(&mut self) -> impl Iterator<Item = AllocationRecord> + '_ {
        self.records.drain(..)
    }
}
