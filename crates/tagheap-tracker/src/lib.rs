//! # tagheap-tracker
//!
//! Allocation ledger overlay for [`tagheap_core::HeapAllocator`].
//!
//! A [`Tracker`] owns the heap. Disabled, it forwards every call unchanged.
//! Enabled, it records each allocation's size and call site in a
//! most-recent-first ledger, matches releases against live records, counts
//! releases it cannot match, and renders a leak report on demand.
//!
//! The [`global`] module wraps one tracker in a process-wide handle for
//! callers that cannot thread a `&mut Tracker` through.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod global;
pub mod ledger;
pub mod record;
pub mod report;
pub mod site;
pub mod tracker;

pub use config::{TrackingMode, set_tracking_mode, tracking_mode};
pub use error::TrackerError;
pub use ledger::Ledger;
pub use record::{AllocationRecord, ORIGIN_CAPACITY, OriginBuf, RECORD_FOOTPRINT};
pub use report::{LeakSummary, ReportEntry, TrackerTotals};
pub use site::CallSite;
pub use tracker::{Tracker, TrackerLogRecord};
