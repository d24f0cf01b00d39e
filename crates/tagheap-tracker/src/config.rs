//! Tracking mode configuration.
//!
//! The initial mode of the process-wide tracker is read from the
//! `TAGHEAP_TRACK` environment variable:
//! - `off` (default): allocate/release pass straight through to the heap.
//! - `on`: every call is recorded in the ledger until the next report.
//!
//! Owned [`crate::Tracker`] values ignore the variable; they start disabled
//! and are switched with `enable`/`disable`.

use std::sync::atomic::{AtomicU8, Ordering};

pub const ENV_TRACK: &str = "TAGHEAP_TRACK";

/// Whether calls are recorded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingMode {
    /// Zero-overhead pass-through.
    #[default]
    Off,
    /// Record provenance and lifecycle of each allocation.
    On,
}

impl TrackingMode {
    /// Parse from string (case-insensitive). Unknown values mean `Off`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" | "yes" | "track" => Self::On,
            _ => Self::Off,
        }
    }

    #[must_use]
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
        }
    }
}

// 0=unresolved, 1=Off, 2=On.
static CACHED_MODE: AtomicU8 = AtomicU8::new(0);

const MODE_UNRESOLVED: u8 = 0;
const MODE_OFF: u8 = 1;
const MODE_ON: u8 = 2;

fn mode_to_u8(mode: TrackingMode) -> u8 {
    match mode {
        TrackingMode::Off => MODE_OFF,
        TrackingMode::On => MODE_ON,
    }
}

fn u8_to_mode(v: u8) -> TrackingMode {
    match v {
        MODE_ON => TrackingMode::On,
        _ => TrackingMode::Off,
    }
}

/// Configured tracking mode (reads the environment on first call, caches
/// thereafter).
#[must_use]
pub fn tracking_mode() -> TrackingMode {
    let cached = CACHED_MODE.load(Ordering::Relaxed);
    if cached != MODE_UNRESOLVED {
        return u8_to_mode(cached);
    }
    let mode = std::env::var(ENV_TRACK)
        .map(|v| TrackingMode::from_str_loose(&v))
        .unwrap_or_default();
    // First resolver wins; a racing reader may have stored the same value.
    match CACHED_MODE.compare_exchange(
        MODE_UNRESOLVED,
        mode_to_u8(mode),
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => mode,
        Err(existing) => u8_to_mode(existing),
    }
}

/// Overrides the cached mode, e.g. from a CLI flag.
pub fn set_tracking_mode(mode: TrackingMode) {
    CACHED_MODE.store(mode_to_u8(mode), Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tracking_modes() {
        assert_eq!(TrackingMode::from_str_loose("on"), TrackingMode::On);
        assert_eq!(TrackingMode::from_str_loose("TRACK"), TrackingMode::On);
        assert_eq!(TrackingMode::from_str_loose(" yes "), TrackingMode::On);
        assert_eq!(TrackingMode::from_str_loose("1"), TrackingMode::On);
        assert_eq!(TrackingMode::from_str_loose("off"), TrackingMode::Off);
        assert_eq!(TrackingMode::from_str_loose("bogus"), TrackingMode::Off);
    }

    #[test]
    fn default_is_off() {
        assert_eq!(TrackingMode::default(), TrackingMode::Off);
        assert!(!TrackingMode::Off.is_on());
        assert!(TrackingMode::On.is_on());
    }

    #[test]
    fn cached_mode_is_process_sticky_until_overridden() {
        let previous = CACHED_MODE.swap(MODE_ON, Ordering::SeqCst);
        assert_eq!(tracking_mode(), TrackingMode::On);
        assert_eq!(tracking_mode(), TrackingMode::On);

        set_tracking_mode(TrackingMode::Off);
        assert_eq!(tracking_mode(), TrackingMode::Off);

        CACHED_MODE.store(previous, Ordering::SeqCst);
    }
}
