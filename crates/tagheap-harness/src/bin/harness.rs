//! CLI entrypoint for the tagheap harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tagheap_core::HeapConfig;
use tagheap_harness::structured_log::{LogEmitter, StreamKind, validate_log_file};
use tagheap_harness::{ReplayScript, run_replay, run_stress};

/// Replay and stress tooling for tagheap.
#[derive(Debug, Parser)]
#[command(name = "tagheap-harness")]
#[command(about = "Replay and stress tooling for the tagheap allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a JSON replay script.
    Replay {
        /// Script path.
        #[arg(long)]
        script: PathBuf,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Write the text of every report step here (stdout if omitted).
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Run seeded random churn against a tracked heap.
    Stress {
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        /// Number of operations to run.
        #[arg(long, default_value_t = 10_000)]
        steps: usize,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        /// Log path.
        #[arg(long)]
        log: PathBuf,
    },
}

fn parse_seed(raw: &str) -> Result<u64, String> {
    let cleaned = raw.trim().replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse::<u64>(),
    };
    parsed.map_err(|err| format!("invalid seed {raw:?}: {err}"))
}

fn run_id(prefix: &str) -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    format!("{prefix}-{millis}")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            script,
            log,
            report,
        } => {
            eprintln!("Replaying {}", script.display());
            let parsed = ReplayScript::from_file(&script)?;
            let outcome = match log {
                Some(path) => {
                    let mut emitter =
                        LogEmitter::to_file(&path, &run_id("replay"), StreamKind::Replay)?;
                    run_replay(&parsed, Some(&mut emitter))?
                }
                None => run_replay::<Vec<u8>>(&parsed, None)?,
            };
            match report {
                Some(path) => std::fs::write(&path, &outcome.report_text)?,
                None => print!("{}", outcome.report_text),
            }
            eprintln!(
                "{} steps ok, {} report(s), region {} bytes",
                outcome.steps,
                outcome.reports.len(),
                outcome.stats.region_bytes
            );
        }
        Command::Stress { seed, steps, log } => {
            let seed = parse_seed(&seed)?;
            let config = HeapConfig::from_env();
            let outcome = match log {
                Some(path) => {
                    let mut emitter =
                        LogEmitter::to_file(&path, &run_id("stress"), StreamKind::Stress)?;
                    run_stress(seed, steps, config, Some(&mut emitter))?
                }
                None => run_stress::<Vec<u8>>(seed, steps, config, None)?,
            };
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(format!(
                    "{} of {lines} line(s) in {} failed validation",
                    errors.len(),
                    log.display()
                )
                .into());
            }
            println!("{lines} line(s) valid");
        }
    }

    Ok(())
}
