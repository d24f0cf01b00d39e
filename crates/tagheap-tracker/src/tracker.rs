//! Tracking overlay over a [`HeapAllocator`].
//!
//! While disabled every call forwards straight to the heap. While enabled,
//! allocations are recorded with their call site at the head of the
//! ledger, releases are matched against the newest live record, and a
//! release with no live match is counted and never reaches the heap.

use std::io::{self, Write};

use tagheap_core::{
    HeapAllocator, HeapError, HeapLogLevel, InvalidReason, NULL_ADDR, ProgramBreak, RegionGrowth,
};

use crate::config::TrackingMode;
use crate::error::TrackerError;
use crate::ledger::Ledger;
use crate::record::{AllocationRecord, RECORD_FOOTPRINT};
use crate::report::{LeakSummary, TrackerTotals};
use crate::site::CallSite;

/// Structured tracker session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerLogRecord {
    pub decision_id: u64,
    /// `tracker::<event>::<id:016x>`.
    pub trace_id: String,
    pub level: HeapLogLevel,
    /// `enable`, `disable`, `invalid_release`, `report`, `teardown`, ...
    pub event: &'static str,
    pub session: u64,
    pub addr: Option<usize>,
    pub size: Option<usize>,
    pub details: String,
    pub ledger_len: usize,
    pub invalid_releases: usize,
}

pub struct Tracker<G = ProgramBreak> {
    heap: HeapAllocator<G>,
    enabled: bool,
    ledger: Ledger,
    totals: TrackerTotals,
    /// Incremented on every `enable` that opens a session.
    session: u64,
    next_decision_id: u64,
    lifecycle_logs: Vec<TrackerLogRecord>,
}

impl Tracker<ProgramBreak> {
    /// Disabled tracker over a fresh default heap at `region_start`.
    #[must_use]
    pub fn new(region_start: usize) -> Self {
        Self::with_heap(HeapAllocator::new(region_start))
    }
}

impl<G: RegionGrowth> Tracker<G> {
    #[must_use]
    pub fn with_heap(heap: HeapAllocator<G>) -> Self {
        Self {
            heap,
            enabled: false,
            ledger: Ledger::new(),
            totals: TrackerTotals::default(),
            session: 0,
            next_decision_id: 1,
            lifecycle_logs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mode(heap: HeapAllocator<G>, mode: TrackingMode) -> Self {
        let mut tracker = Self::with_heap(heap);
        if mode.is_on() {
            tracker.enable();
        }
        tracker
    }

    fn record_event(
        &mut self,
        level: HeapLogLevel,
        event: &'static str,
        addr: Option<usize>,
        size: Option<usize>,
        details: impl Into<String>,
    ) {
        if !self.heap.config().lifecycle_log {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        self.lifecycle_logs.push(TrackerLogRecord {
            decision_id,
            trace_id: format!("tracker::{}::{:016x}", event, decision_id),
            level,
            event,
            session: self.session,
            addr,
            size,
            details: details.into(),
            ledger_len: self.ledger.len(),
            invalid_releases: self.totals.invalid_releases,
        });
    }

    /// Starts a tracking session. A session always begins with an empty
    /// ledger and zeroed counters; leftovers of an unreported session are
    /// torn down first.
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        if !self.ledger.is_empty() || self.totals != TrackerTotals::default() {
            self.teardown();
        }
        self.enabled = true;
        self.session += 1;
        self.record_event(HeapLogLevel::Info, "enable", None, None, "");
    }

    /// Stops recording; later calls pass through. The ledger is kept for
    /// a subsequent `report`.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        self.record_event(HeapLogLevel::Info, "disable", None, None, "");
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn store(&mut self, record: &AllocationRecord) {
        if let Some(storage) = record.storage
            && let Ok(payload) = self.heap.payload_mut(storage)
        {
            payload[..RECORD_FOOTPRINT].copy_from_slice(&record.encode());
        }
    }

    fn record(&mut self, addr: usize, size: usize, site: CallSite<'_>) {
        let mut record = AllocationRecord::new(addr, size, site);
        match self.heap.allocate(RECORD_FOOTPRINT) {
            Ok(storage) => {
                record.storage = Some(storage);
                self.store(&record);
            }
            Err(err) => {
                self.record_event(
                    HeapLogLevel::Warn,
                    "record_storage_unavailable",
                    Some(addr),
                    Some(size),
                    err.to_string(),
                );
            }
        }
        self.ledger.push_front(record);
        self.totals.allocated_bytes = self.totals.allocated_bytes.saturating_add(size);
    }

    /// Allocates `size` bytes, recording the call when enabled. The call is
    /// recorded even when the heap refuses it.
    pub fn allocate(&mut self, size: usize, site: CallSite<'_>) -> Result<usize, TrackerError> {
        if !self.enabled {
            return Ok(self.heap.allocate(size)?);
        }
        let outcome = self.heap.allocate(size);
        let addr = outcome.as_ref().map_or(NULL_ADDR, |&addr| addr);
        self.record(addr, size, site);
        Ok(outcome?)
    }

    /// Releases `addr`. When enabled only addresses with a live record are
    /// forwarded; anything else bumps the invalid-release counter.
    pub fn release(&mut self, addr: usize) -> Result<(), TrackerError> {
        if !self.enabled {
            self.heap.release(addr)?;
            return Ok(());
        }
        if addr == NULL_ADDR {
            self.totals.invalid_releases += 1;
            self.record_event(
                HeapLogLevel::Warn,
                "invalid_release",
                Some(addr),
                None,
                InvalidReason::Null.as_str(),
            );
            return Err(HeapError::InvalidRelease {
                addr,
                reason: InvalidReason::Null,
            }
            .into());
        }
        if self.ledger.find_live_mut(addr).is_none() {
            let already_freed = self.ledger.has_freed(addr);
            self.totals.invalid_releases += 1;
            self.record_event(
                HeapLogLevel::Warn,
                "invalid_release",
                Some(addr),
                None,
                if already_freed {
                    "already_released"
                } else {
                    "never_recorded"
                },
            );
            return Err(TrackerError::UntrackedRelease {
                addr,
                already_freed,
            });
        }
        // The ledger only changes once the heap has accepted the release.
        if let Err(err) = self.heap.release(addr) {
            self.record_event(
                HeapLogLevel::Warn,
                "release_rejected",
                Some(addr),
                None,
                err.to_string(),
            );
            return Err(err.into());
        }
        let closed = self.ledger.find_live_mut(addr).map(|record| {
            record.freed = true;
            *record
        });
        if let Some(record) = closed {
            self.totals.released_bytes += record.requested_size;
            self.store(&record);
        }
        Ok(())
    }

    /// Zero-filled allocation of `size * count` bytes. An overflowing
    /// product never reaches the allocator and is not recorded.
    pub fn zero_allocate(
        &mut self,
        size: usize,
        count: usize,
        site: CallSite<'_>,
    ) -> Result<usize, TrackerError> {
        if !self.enabled {
            return Ok(self.heap.zero_allocate(size, count)?);
        }
        let outcome = self.heap.zero_allocate(size, count);
        if let Some(total) = size.checked_mul(count) {
            let addr = outcome.as_ref().map_or(NULL_ADDR, |&addr| addr);
            self.record(addr, total, site);
        }
        Ok(outcome?)
    }

    /// Resizes a tracked block. A move closes the old record as released
    /// and opens a new one at `site`; a null `addr` is a tracked allocate.
    pub fn resize(
        &mut self,
        addr: usize,
        new_size: usize,
        site: CallSite<'_>,
    ) -> Result<usize, TrackerError> {
        if !self.enabled {
            return Ok(self.heap.resize(addr, new_size)?);
        }
        if addr == NULL_ADDR {
            return self.allocate(new_size, site);
        }
        let Some(old) = self.ledger.find_live_mut(addr).map(|record| *record) else {
            self.record_event(
                HeapLogLevel::Warn,
                "untracked_resize",
                Some(addr),
                Some(new_size),
                "",
            );
            return Err(TrackerError::UntrackedResize { addr });
        };
        let new_addr = self.heap.resize(addr, new_size)?;
        if new_addr != addr {
            if let Some(record) = self.ledger.find_live_mut(addr) {
                record.freed = true;
            }
            let closed = AllocationRecord { freed: true, ..old };
            self.totals.released_bytes += old.requested_size;
            self.store(&closed);
            self.record(new_addr, new_size, site);
        }
        Ok(new_addr)
    }

    /// Current summary without ending the session.
    #[must_use]
    pub fn summary(&self) -> LeakSummary {
        LeakSummary::from_ledger(&self.ledger, self.totals)
    }

    /// Writes the report, then tears the session down and leaves tracking
    /// disabled. The teardown happens even if writing fails.
    pub fn report(&mut self, out: &mut impl Write) -> io::Result<LeakSummary> {
        let summary = self.summary();
        let written = summary.write_to(out);
        self.record_event(
            HeapLogLevel::Info,
            "report",
            None,
            Some(summary.leaked_bytes),
            format!(
                "freed={} unfreed={} invalid_releases={}",
                summary.freed.len(),
                summary.unfreed.len(),
                summary.totals.invalid_releases
            ),
        );
        self.teardown();
        self.disable();
        written.map(|()| summary)
    }

    /// Releases every record's storage through the heap and resets the
    /// ledger and counters.
    pub fn teardown(&mut self) {
        let records = self.ledger.len();
        let storages: Vec<usize> = self.ledger.drain().filter_map(|r| r.storage).collect();
        let mut failures = 0usize;
        for storage in storages {
            if self.heap.release(storage).is_err() {
                failures += 1;
            }
        }
        self.totals = TrackerTotals::default();
        let level = if failures == 0 {
            HeapLogLevel::Info
        } else {
            HeapLogLevel::Warn
        };
        self.record_event(
            level,
            "teardown",
            None,
            None,
            format!("records={records} storage_release_failures={failures}"),
        );
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub fn totals(&self) -> TrackerTotals {
        self.totals
    }

    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    #[must_use]
    pub fn heap(&self) -> &HeapAllocator<G> {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut HeapAllocator<G> {
        &mut self.heap
    }

    #[must_use]
    pub fn into_heap(self) -> HeapAllocator<G> {
        self.heap
    }

    #[must_use]
    pub fn lifecycle_logs(&self) -> &[TrackerLogRecord] {
        &self.lifecycle_logs
    }

    pub fn drain_lifecycle_logs(&mut self) -> Vec<TrackerLogRecord> {
        std::mem::take(&mut self.lifecycle_logs)
    }
}
