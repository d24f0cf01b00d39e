//! Deterministic allocate/release/resize churn.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tagheap_core::{HeapAllocator, HeapConfig, HeapError};
use tagheap_tracker::{CallSite, LeakSummary, Tracker, TrackerError, TrackingMode};

use crate::error::HarnessError;
use crate::replay::{DEFAULT_REGION_START, StatsView};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Verdict};

const STRESS_SITE: CallSite<'static> = CallSite::new("<stress>", "stress::churn", 0);

/// Largest request the churn issues.
pub const MAX_STRESS_REQUEST: usize = 512;

#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        // A zero state would stay zero forever.
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressOutcome {
    pub seed: u64,
    pub steps: usize,
    pub allocations: usize,
    pub releases: usize,
    pub resizes: usize,
    /// Requests the heap refused (region exhausted).
    pub refusals: usize,
    pub peak_live: usize,
    /// Heap state before the final drain.
    pub stats: StatsView,
    /// Tracker report after every live block was released.
    pub summary: LeakSummary,
}

#[derive(Clone, Copy)]
struct Live {
    addr: usize,
    size: usize,
    fill: u8,
}

fn check_fill(
    tracker: &Tracker,
    step: usize,
    live: &Live,
) -> Result<(), HarnessError> {
    let payload = tracker
        .heap()
        .payload(live.addr)
        .map_err(|err| HarnessError::Step {
            step,
            op: "check",
            message: err.to_string(),
        })?;
    if payload[..live.size].iter().any(|&b| b != live.fill) {
        return Err(HarnessError::Step {
            step,
            op: "check",
            message: format!("payload of {:#x} lost its fill byte", live.addr),
        });
    }
    Ok(())
}

fn is_refusal(err: &TrackerError) -> bool {
    matches!(
        err,
        TrackerError::Heap(
            HeapError::RegionExhausted { .. }
                | HeapError::ResizeFailed { .. }
        )
    )
}

/// Runs `steps` random operations against a tracked heap seeded with
/// `seed`. Fails on the first broken invariant or corrupted payload.
pub fn run_stress<W: Write>(
    seed: u64,
    steps: usize,
    config: HeapConfig,
    mut emitter: Option<&mut LogEmitter<W>>,
) -> Result<StressOutcome, HarnessError> {
    let heap = HeapAllocator::with_config(DEFAULT_REGION_START, config.with_lifecycle_log(false));
    let mut tracker = Tracker::with_mode(heap, TrackingMode::On);
    let mut rng = XorShift64::new(seed);
    let mut live: Vec<Live> = Vec::new();
    let mut outcome_counts = (0usize, 0usize, 0usize, 0usize);
    let mut peak_live = 0usize;

    if let Some(emitter) = emitter.as_deref_mut() {
        emitter.emit_entry(
            LogEntry::new("", LogLevel::Info, "stress_start")
                .with_details(serde_json::json!({ "seed": seed, "steps": steps })),
        )?;
    }

    for step in 0..steps {
        let roll = rng.gen_range(0, 9);
        let op = if live.is_empty() || roll < 5 {
            let size = rng.gen_range(0, MAX_STRESS_REQUEST);
            let fill = rng.gen_range(1, 255) as u8;
            match tracker.allocate(size, STRESS_SITE) {
                Ok(addr) => {
                    tracker.heap_mut().payload_mut(addr)?.fill(fill);
                    live.push(Live { addr, size, fill });
                    outcome_counts.0 += 1;
                }
                Err(err) if is_refusal(&err) => outcome_counts.3 += 1,
                Err(err) => return Err(step_failure(step, "alloc", &err)),
            }
            "alloc"
        } else if roll < 8 {
            let victim = live.swap_remove(rng.gen_range(0, live.len() - 1));
            check_fill(&tracker, step, &victim)?;
            tracker
                .release(victim.addr)
                .map_err(|err| step_failure(step, "free", &err))?;
            outcome_counts.1 += 1;
            "free"
        } else {
            let idx = rng.gen_range(0, live.len() - 1);
            let old = live[idx];
            let new_size = rng.gen_range(0, MAX_STRESS_REQUEST * 2);
            match tracker.resize(old.addr, new_size, STRESS_SITE) {
                Ok(addr) => {
                    let moved = Live { addr, ..old };
                    check_fill(&tracker, step, &moved)?;
                    if new_size > old.size {
                        tracker.heap_mut().payload_mut(addr)?.fill(old.fill);
                    }
                    live[idx] = Live {
                        addr,
                        size: old.size.max(new_size),
                        fill: old.fill,
                    };
                    outcome_counts.2 += 1;
                }
                Err(err) if is_refusal(&err) => {
                    check_fill(&tracker, step, &old)?;
                    outcome_counts.3 += 1;
                }
                Err(err) => return Err(step_failure(step, "resize", &err)),
            }
            "resize"
        };
        peak_live = peak_live.max(live.len());

        if let Err(source) = tracker.heap().verify() {
            if let Some(emitter) = emitter.as_deref_mut() {
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Error, "stress_corruption")
                        .with_step(step)
                        .with_symbol(op)
                        .with_verdict(Verdict::Fail)
                        .with_details(serde_json::json!({ "error": source.to_string() })),
                )?;
            }
            return Err(HarnessError::Corruption { step, source });
        }
    }

    let stats = tracker.heap().stats().into();
    for entry in live.drain(..) {
        tracker
            .release(entry.addr)
            .map_err(|err| step_failure(steps, "drain", &err))?;
    }
    let summary = tracker.report(&mut std::io::sink())?;
    tracker
        .heap()
        .verify()
        .map_err(|source| HarnessError::Corruption {
            step: steps,
            source,
        })?;

    let (allocations, releases, resizes, refusals) = outcome_counts;
    let outcome = StressOutcome {
        seed,
        steps,
        allocations,
        releases,
        resizes,
        refusals,
        peak_live,
        stats,
        summary,
    };

    if let Some(emitter) = emitter {
        emitter.emit_tracker_records(&tracker.drain_lifecycle_logs(), None)?;
        emitter.emit_entry(
            LogEntry::new("", LogLevel::Info, "stress_done")
                .with_verdict(Verdict::Pass)
                .with_details(serde_json::to_value(&outcome)?),
        )?;
        emitter.flush()?;
    }
    Ok(outcome)
}

fn step_failure(step: usize, op: &'static str, err: &TrackerError) -> HarnessError {
    HarnessError::Step {
        step,
        op,
        message: err.to_string(),
    }
}
