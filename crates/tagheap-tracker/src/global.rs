//! Process-wide tracker handle.
//!
//! One [`Tracker`] behind a single `parking_lot::Mutex`. The heap and
//! tracking mode come from the environment (`TAGHEAP_*` variables) at
//! [`init`]. Every entry point returns [`TrackerError::Uninitialized`]
//! until `init` has run.

use std::io::Write;

use parking_lot::{Mutex, const_mutex};
use tagheap_core::{HeapAllocator, HeapConfig, HeapLogRecord};

use crate::config::tracking_mode;
use crate::error::TrackerError;
use crate::report::LeakSummary;
use crate::site::CallSite;
use crate::tracker::{Tracker, TrackerLogRecord};

static TRACKER: Mutex<Option<Tracker>> = const_mutex(None);

/// Installs a fresh tracker over an empty heap at `region_start`,
/// replacing any previous one.
pub fn init(region_start: usize) {
    let heap = HeapAllocator::with_config(region_start, HeapConfig::from_env());
    *TRACKER.lock() = Some(Tracker::with_mode(heap, tracking_mode()));
}

/// Runs `f` with exclusive access to the process-wide tracker.
pub fn with_tracker<R>(f: impl FnOnce(&mut Tracker) -> R) -> Result<R, TrackerError> {
    let mut guard = TRACKER.lock();
    let tracker = guard.as_mut().ok_or(TrackerError::Uninitialized)?;
    Ok(f(tracker))
}

pub fn enable() -> Result<(), TrackerError> {
    with_tracker(Tracker::enable)
}

pub fn disable() -> Result<(), TrackerError> {
    with_tracker(Tracker::disable)
}

pub fn is_enabled() -> Result<bool, TrackerError> {
    with_tracker(|tracker| tracker.is_enabled())
}

pub fn allocate(size: usize, site: CallSite<'_>) -> Result<usize, TrackerError> {
    with_tracker(|tracker| tracker.allocate(size, site))?
}

pub fn release(addr: usize) -> Result<(), TrackerError> {
    with_tracker(|tracker| tracker.release(addr))?
}

pub fn zero_allocate(size: usize, count: usize, site: CallSite<'_>) -> Result<usize, TrackerError> {
    with_tracker(|tracker| tracker.zero_allocate(size, count, site))?
}

pub fn resize(addr: usize, new_size: usize, site: CallSite<'_>) -> Result<usize, TrackerError> {
    with_tracker(|tracker| tracker.resize(addr, new_size, site))?
}

/// Writes the report for the current session and tears it down.
///
/// Lifecycle records still buffered at that point are discarded with the
/// session; call [`drain_lifecycle_logs`] first to keep them.
pub fn report_to(out: &mut impl Write) -> Result<std::io::Result<LeakSummary>, TrackerError> {
    with_tracker(|tracker| {
        let written = tracker.report(out);
        tracker.heap_mut().drain_lifecycle_logs();
        tracker.drain_lifecycle_logs();
        written
    })
}

/// Takes the buffered heap and tracker lifecycle records.
pub fn drain_lifecycle_logs()
-> Result<(Vec<HeapLogRecord>, Vec<TrackerLogRecord>), TrackerError> {
    with_tracker(|tracker| {
        (
            tracker.heap_mut().drain_lifecycle_logs(),
            tracker.drain_lifecycle_logs(),
        )
    })
}

/// Allocates through the process-wide tracker, recording the caller.
#[macro_export]
macro_rules! tracked_alloc {
    ($size:expr) => {
        $crate::global::allocate($size, $crate::call_site!())
    };
}

/// Zero-allocates through the process-wide tracker, recording the caller.
#[macro_export]
macro_rules! tracked_calloc {
    ($size:expr, $count:expr) => {
        $crate::global::zero_allocate($size, $count, $crate::call_site!())
    };
}

/// Releases through the process-wide tracker.
#[macro_export]
macro_rules! tracked_free {
    ($addr:expr) => {
        $crate::global::release($addr)
    };
}
