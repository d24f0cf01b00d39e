//! Test tooling for tagheap.
//!
//! - Replay: run a JSON script of heap/tracker operations with per-step checks
//! - Stress: seeded random churn against a tracked heap
//! - Structured logs: JSONL emission and validation for both

#![forbid(unsafe_code)]

pub mod error;
pub mod replay;
pub mod stress;
pub mod structured_log;

pub use error::HarnessError;
pub use replay::{ReplayOp, ReplayOutcome, ReplayScript, StatsView, run_replay};
pub use stress::{StressOutcome, run_stress};
