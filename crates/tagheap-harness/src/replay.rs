//! Scripted replay of heap/tracker operations.
//!
//! A [`ReplayScript`] is a JSON document naming a region, an initial
//! tracking flag and a list of operations. Allocations are bound to labels
//! so later steps can refer to them. After every step the heap invariants
//! are checked; a step whose result differs from its expectation stops the
//! replay with [`HarnessError::Step`].
//!
//! ```json
//! {
//!   "region_start": 8388608,
//!   "tracking": true,
//!   "ops": [
//!     { "op": "alloc", "label": "a", "size": 32 },
//!     { "op": "fill", "label": "a", "byte": 171 },
//!     { "op": "resize", "label": "a", "size": 64 },
//!     { "op": "check", "label": "a", "byte": 171, "len": 32 },
//!     { "op": "free", "label": "a" },
//!     { "op": "free", "label": "a", "expect": "err" },
//!     { "op": "report", "expect_leaked": 0, "expect_invalid": 1 }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tagheap_core::{HeapAllocator, HeapConfig, HeapStats};
use tagheap_tracker::{CallSite, LeakSummary, Tracker, TrackerError, TrackingMode};

use crate::error::HarnessError;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Verdict};

/// Region start used when a script does not name one.
pub const DEFAULT_REGION_START: usize = 0x0080_0000;

const REPLAY_FILE: &str = "<replay>";

fn default_region_start() -> usize {
    DEFAULT_REGION_START
}

/// Expected result of a fallible step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    #[default]
    Ok,
    Err,
}

/// One scripted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayOp {
    Alloc {
        label: String,
        size: usize,
        /// Require the address already bound to this label (reuse checks).
        #[serde(default)]
        same_as: Option<String>,
        #[serde(default)]
        expect: Expect,
    },
    Calloc {
        label: String,
        size: usize,
        count: usize,
        #[serde(default)]
        expect: Expect,
    },
    Resize {
        label: String,
        size: usize,
        #[serde(default)]
        expect: Expect,
    },
    Free {
        label: String,
        #[serde(default)]
        expect: Expect,
    },
    FreeAddr {
        addr: usize,
        #[serde(default)]
        expect: Expect,
    },
    Fill {
        label: String,
        byte: u8,
    },
    Check {
        label: String,
        byte: u8,
        /// Bytes to check from the payload start; the whole payload if absent.
        #[serde(default)]
        len: Option<usize>,
    },
    Enable,
    Disable,
    Report {
        #[serde(default)]
        expect_leaked: Option<usize>,
        #[serde(default)]
        expect_invalid: Option<usize>,
    },
}

impl ReplayOp {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Alloc { .. } => "alloc",
            Self::Calloc { .. } => "calloc",
            Self::Resize { .. } => "resize",
            Self::Free { .. } => "free",
            Self::FreeAddr { .. } => "free_addr",
            Self::Fill { .. } => "fill",
            Self::Check { .. } => "check",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Report { .. } => "report",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayScript {
    #[serde(default = "default_region_start")]
    pub region_start: usize,
    #[serde(default)]
    pub tracking: bool,
    #[serde(default)]
    pub max_request: Option<usize>,
    #[serde(default)]
    pub region_limit: Option<usize>,
    pub ops: Vec<ReplayOp>,
}

impl ReplayScript {
    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    #[must_use]
    pub fn config(&self) -> HeapConfig {
        let mut config = HeapConfig::default();
        if let Some(max) = self.max_request {
            config = config.with_max_request(max);
        }
        if let Some(limit) = self.region_limit {
            config = config.with_region_limit(limit);
        }
        config
    }
}

/// Serializable view of [`HeapStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsView {
    pub region_start: usize,
    pub region_end: usize,
    pub region_bytes: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
    pub growths: u64,
}

impl From<HeapStats> for StatsView {
    fn from(stats: HeapStats) -> Self {
        Self {
            region_start: stats.region_start,
            region_end: stats.region_end,
            region_bytes: stats.region_bytes(),
            allocated_blocks: stats.allocated_blocks,
            allocated_bytes: stats.allocated_bytes,
            free_blocks: stats.free_blocks,
            free_bytes: stats.free_bytes,
            largest_free: stats.largest_free,
            growths: stats.growths,
        }
    }
}

/// Result of a completed replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub steps: usize,
    pub reports: Vec<LeakSummary>,
    /// Text of every report step, in order.
    pub report_text: String,
    pub stats: StatsView,
}

struct Replayer {
    tracker: Tracker,
    labels: HashMap<String, usize>,
    reports: Vec<LeakSummary>,
    report_text: Vec<u8>,
}

impl Replayer {
    fn addr_of(&self, step: usize, op: &'static str, label: &str) -> Result<usize, HarnessError> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| HarnessError::Step {
                step,
                op,
                message: format!("unknown label '{label}'"),
            })
    }

    fn expect<T: std::fmt::Debug>(
        step: usize,
        op: &'static str,
        expect: Expect,
        result: &Result<T, TrackerError>,
    ) -> Result<(), HarnessError> {
        match (expect, result) {
            (Expect::Ok, Ok(_)) | (Expect::Err, Err(_)) => Ok(()),
            (Expect::Ok, Err(err)) => Err(HarnessError::Step {
                step,
                op,
                message: format!("expected success, got error: {err}"),
            }),
            (Expect::Err, Ok(value)) => Err(HarnessError::Step {
                step,
                op,
                message: format!("expected an error, got {value:?}"),
            }),
        }
    }

    fn run_op(&mut self, step: usize, op: &ReplayOp) -> Result<(), HarnessError> {
        let name = op.name();
        match op {
            ReplayOp::Alloc {
                label,
                size,
                same_as,
                expect,
            } => {
                let site = CallSite::new(REPLAY_FILE, label, step as u32);
                let result = self.tracker.allocate(*size, site);
                Self::expect(step, name, *expect, &result)?;
                if let Ok(addr) = result {
                    if let Some(other) = same_as {
                        let wanted = self.addr_of(step, name, other)?;
                        if wanted != addr {
                            return Err(HarnessError::Step {
                                step,
                                op: name,
                                message: format!(
                                    "expected address {wanted:#x} of '{other}', got {addr:#x}"
                                ),
                            });
                        }
                    }
                    self.labels.insert(label.clone(), addr);
                }
            }
            ReplayOp::Calloc {
                label,
                size,
                count,
                expect,
            } => {
                let site = CallSite::new(REPLAY_FILE, label, step as u32);
                let result = self.tracker.zero_allocate(*size, *count, site);
                Self::expect(step, name, *expect, &result)?;
                if let Ok(addr) = result {
                    self.labels.insert(label.clone(), addr);
                }
            }
            ReplayOp::Resize {
                label,
                size,
                expect,
            } => {
                let addr = self.addr_of(step, name, label)?;
                let site = CallSite::new(REPLAY_FILE, label, step as u32);
                let result = self.tracker.resize(addr, *size, site);
                Self::expect(step, name, *expect, &result)?;
                if let Ok(new_addr) = result {
                    self.labels.insert(label.clone(), new_addr);
                }
            }
            ReplayOp::Free { label, expect } => {
                let addr = self.addr_of(step, name, label)?;
                let result = self.tracker.release(addr);
                Self::expect(step, name, *expect, &result)?;
            }
            ReplayOp::FreeAddr { addr, expect } => {
                let result = self.tracker.release(*addr);
                Self::expect(step, name, *expect, &result)?;
            }
            ReplayOp::Fill { label, byte } => {
                let addr = self.addr_of(step, name, label)?;
                let payload = self
                    .tracker
                    .heap_mut()
                    .payload_mut(addr)
                    .map_err(|err| step_error(step, name, &err))?;
                payload.fill(*byte);
            }
            ReplayOp::Check { label, byte, len } => {
                let addr = self.addr_of(step, name, label)?;
                let payload = self
                    .tracker
                    .heap()
                    .payload(addr)
                    .map_err(|err| step_error(step, name, &err))?;
                let len = len.unwrap_or(payload.len());
                let Some(window) = payload.get(..len) else {
                    return Err(HarnessError::Step {
                        step,
                        op: name,
                        message: format!("payload has {} bytes, asked for {len}", payload.len()),
                    });
                };
                if let Some(pos) = window.iter().position(|b| b != byte) {
                    return Err(HarnessError::Step {
                        step,
                        op: name,
                        message: format!(
                            "byte {pos} of '{label}' is {:#04x}, expected {byte:#04x}",
                            window[pos]
                        ),
                    });
                }
            }
            ReplayOp::Enable => self.tracker.enable(),
            ReplayOp::Disable => self.tracker.disable(),
            ReplayOp::Report {
                expect_leaked,
                expect_invalid,
            } => {
                let summary = self.tracker.report(&mut self.report_text)?;
                if let Some(leaked) = expect_leaked
                    && summary.leaked_bytes != *leaked
                {
                    return Err(HarnessError::Step {
                        step,
                        op: name,
                        message: format!(
                            "expected {leaked} leaked bytes, report shows {}",
                            summary.leaked_bytes
                        ),
                    });
                }
                if let Some(invalid) = expect_invalid
                    && summary.totals.invalid_releases != *invalid
                {
                    return Err(HarnessError::Step {
                        step,
                        op: name,
                        message: format!(
                            "expected {invalid} invalid releases, report shows {}",
                            summary.totals.invalid_releases
                        ),
                    });
                }
                self.reports.push(summary);
            }
        }
        Ok(())
    }
}

fn step_error(step: usize, op: &'static str, err: &dyn std::fmt::Display) -> HarnessError {
    HarnessError::Step {
        step,
        op,
        message: err.to_string(),
    }
}

/// Runs `script` against a fresh tracker, streaming lifecycle records to
/// `emitter` when one is given.
pub fn run_replay<W: Write>(
    script: &ReplayScript,
    mut emitter: Option<&mut LogEmitter<W>>,
) -> Result<ReplayOutcome, HarnessError> {
    let heap = HeapAllocator::with_config(script.region_start, script.config());
    let mode = if script.tracking {
        TrackingMode::On
    } else {
        TrackingMode::Off
    };
    let mut replayer = Replayer {
        tracker: Tracker::with_mode(heap, mode),
        labels: HashMap::new(),
        reports: Vec::new(),
        report_text: Vec::new(),
    };

    if let Some(emitter) = emitter.as_deref_mut() {
        emitter.emit_entry(
            LogEntry::new("", LogLevel::Info, "replay_start").with_details(serde_json::json!({
                "region_start": script.region_start,
                "tracking": script.tracking,
                "ops": script.ops.len(),
            })),
        )?;
    }

    for (step, op) in script.ops.iter().enumerate() {
        let result = replayer.run_op(step, op).and_then(|()| {
            replayer
                .tracker
                .heap()
                .verify()
                .map_err(|source| HarnessError::Corruption { step, source })
        });

        if let Some(emitter) = emitter.as_deref_mut() {
            let heap_records = replayer.tracker.heap_mut().drain_lifecycle_logs();
            emitter.emit_heap_records(&heap_records, Some(step))?;
            let tracker_records = replayer.tracker.drain_lifecycle_logs();
            emitter.emit_tracker_records(&tracker_records, Some(step))?;
            let (level, verdict) = if result.is_ok() {
                (LogLevel::Info, Verdict::Pass)
            } else {
                (LogLevel::Error, Verdict::Fail)
            };
            let mut entry = LogEntry::new("", level, "replay_step")
                .with_step(step)
                .with_symbol(op.name())
                .with_verdict(verdict);
            if let Err(err) = &result {
                entry = entry.with_details(serde_json::json!({ "error": err.to_string() }));
            }
            emitter.emit_entry(entry)?;
        }
        result?;
    }

    if let Some(emitter) = emitter {
        emitter.flush()?;
    }

    Ok(ReplayOutcome {
        steps: script.ops.len(),
        reports: replayer.reports,
        report_text: String::from_utf8_lossy(&replayer.report_text).into_owned(),
        stats: replayer.tracker.heap().stats().into(),
    })
}
