//! Heap configuration.
//!
//! Defaults describe the original runtime: one 4 MiB page mapped at the heap
//! location, and no single request larger than that page. Each field can be
//! overridden from the environment:
//! - `TAGHEAP_MAX_REQUEST`: largest payload `allocate` accepts
//! - `TAGHEAP_REGION_LIMIT`: bytes the default program break may hand out
//! - `TAGHEAP_LIFECYCLE_LOG`: `on`/`off` for allocator lifecycle records
//!
//! Sizes accept decimal or `0x` hex, with optional `_` separators.

use crate::malloc::tag::{MAX_TAG_SIZE, WORD};

/// Default cap on a single request (4 MiB).
pub const DEFAULT_MAX_REQUEST: usize = 4 * 1024 * 1024;

/// Default capacity of the program break (4 MiB).
pub const DEFAULT_REGION_LIMIT: usize = 4 * 1024 * 1024;

pub const ENV_MAX_REQUEST: &str = "TAGHEAP_MAX_REQUEST";
pub const ENV_REGION_LIMIT: &str = "TAGHEAP_REGION_LIMIT";
pub const ENV_LIFECYCLE_LOG: &str = "TAGHEAP_LIFECYCLE_LOG";

/// Tunables for a [`crate::HeapAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Largest payload a single `allocate` accepts.
    pub max_request: usize,
    /// Bytes the default [`crate::ProgramBreak`] may hand out.
    pub region_limit: usize,
    /// Whether lifecycle records are kept.
    pub lifecycle_log: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            max_request: DEFAULT_MAX_REQUEST,
            region_limit: DEFAULT_REGION_LIMIT,
            lifecycle_log: true,
        }
    }
}

impl HeapConfig {
    /// Reads overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unparsable values keep
    /// their defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_MAX_REQUEST).as_deref().and_then(parse_size) {
            config.max_request = v;
        }
        if let Some(v) = lookup(ENV_REGION_LIMIT).as_deref().and_then(parse_size) {
            config.region_limit = v;
        }
        if let Some(v) = lookup(ENV_LIFECYCLE_LOG).as_deref().and_then(parse_switch) {
            config.lifecycle_log = v;
        }
        config.clamped()
    }

    #[must_use]
    pub fn with_max_request(mut self, max_request: usize) -> Self {
        self.max_request = max_request;
        self.clamped()
    }

    #[must_use]
    pub fn with_region_limit(mut self, region_limit: usize) -> Self {
        self.region_limit = region_limit;
        self.clamped()
    }

    #[must_use]
    pub fn with_lifecycle_log(mut self, enabled: bool) -> Self {
        self.lifecycle_log = enabled;
        self
    }

    /// Keeps every size a tag must describe below the free-flag bit.
    ///
    /// A merged free block can span the whole region minus one tag pair, so
    /// the region limit is what bounds tag sizes.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.region_limit = self.region_limit.min(MAX_TAG_SIZE);
        self.max_request = self.max_request.min(MAX_TAG_SIZE - 2 * WORD);
        self
    }
}

/// Parses a byte count in decimal or `0x` hex.
#[must_use]
pub fn parse_size(raw: &str) -> Option<usize> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != '_').collect();
    if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        usize::from_str_radix(hex, 16).ok()
    } else {
        cleaned.parse().ok()
    }
}

/// Parses an on/off switch (case-insensitive).
#[must_use]
pub fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Some(true),
        "off" | "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_size_accepts_decimal_and_hex() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("0x1000"), Some(4096));
        assert_eq!(parse_size(" 0X40_0000 "), Some(0x40_0000));
        assert_eq!(parse_size("1_024"), Some(1024));
        assert_eq!(parse_size("four"), None);
    }

    #[test]
    fn parse_switch_is_loose() {
        assert_eq!(parse_switch("ON"), Some(true));
        assert_eq!(parse_switch("no"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
    }

    #[test]
    fn from_lookup_overrides_and_keeps_defaults() {
        let env: HashMap<&str, &str> = [
            (ENV_MAX_REQUEST, "0x100"),
            (ENV_LIFECYCLE_LOG, "off"),
            (ENV_REGION_LIMIT, "garbage"),
        ]
        .into_iter()
        .collect();
        let config = HeapConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.max_request, 0x100);
        assert_eq!(config.region_limit, DEFAULT_REGION_LIMIT);
        assert!(!config.lifecycle_log);
    }

    #[test]
    fn clamped_keeps_sizes_below_flag_bit() {
        let config = HeapConfig::default()
            .with_region_limit(usize::MAX)
            .with_max_request(usize::MAX);
        assert_eq!(config.region_limit, MAX_TAG_SIZE);
        assert_eq!(config.max_request, MAX_TAG_SIZE - 2 * WORD);
    }
}
