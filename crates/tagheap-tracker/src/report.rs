//! Leak report rendering.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::ledger::Ledger;
use crate::record::AllocationRecord;

/// Session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerTotals {
    /// Requested bytes of every recorded allocation, failed ones included.
    pub allocated_bytes: usize,
    /// Requested bytes of records released through the tracker.
    pub released_bytes: usize,
    /// Releases of null, already-released or never-recorded addresses.
    pub invalid_releases: usize,
}

impl TrackerTotals {
    #[must_use]
    pub fn leaked_bytes(&self) -> usize {
        self.allocated_bytes.saturating_sub(self.released_bytes)
    }
}

/// One record as it appears in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub addr: usize,
    pub size: usize,
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl From<&AllocationRecord> for ReportEntry {
    fn from(record: &AllocationRecord) -> Self {
        Self {
            addr: record.addr,
            size: record.requested_size,
            file: record.file.as_str().to_string(),
            function: record.function.as_str().to_string(),
            line: record.line,
        }
    }
}

/// Machine-readable outcome of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakSummary {
    pub freed: Vec<ReportEntry>,
    pub unfreed: Vec<ReportEntry>,
    pub totals: TrackerTotals,
    pub leaked_bytes: usize,
}

impl LeakSummary {
    #[must_use]
    pub fn from_ledger(ledger: &Ledger, totals: TrackerTotals) -> Self {
        Self {
            freed: ledger.freed().map(ReportEntry::from).collect(),
            unfreed: ledger.unfreed().map(ReportEntry::from).collect(),
            totals,
            leaked_bytes: totals.leaked_bytes(),
        }
    }

    /// True when every allocated byte was released.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaked_bytes == 0
    }

    /// Writes the human-readable report.
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "FREED:")?;
        for entry in &self.freed {
            write_entry(out, entry)?;
        }
        writeln!(out)?;
        writeln!(out, "UNFREED:")?;
        for entry in &self.unfreed {
            write_entry(out, entry)?;
        }
        if self.unfreed.is_empty() {
            writeln!(out, "none")?;
        }
        writeln!(out)?;
        writeln!(out, "SUMMARY:")?;
        writeln!(out, "total alloc'd: {} bytes", self.totals.allocated_bytes)?;
        writeln!(out, "total free'd: {} bytes", self.totals.released_bytes)?;
        writeln!(out, "bad free(s): {}", self.totals.invalid_releases)?;
        if self.is_clean() {
            writeln!(out, "all blocks were freed -- no leaks possible")?;
        } else {
            writeln!(out, "{} bytes lost", self.leaked_bytes)?;
        }
        Ok(())
    }
}

fn write_entry(out: &mut impl Write, entry: &ReportEntry) -> io::Result<()> {
    writeln!(
        out,
        "alloc'd {} @ {:#x} in function {} ({}:{})",
        entry.size, entry.addr, entry.function, entry.file, entry.line
    )
}
