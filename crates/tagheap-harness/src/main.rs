//! Trace-driven driver for the tagheap allocator.
//!
//! `run` replays a JSON trace against a fresh heap and reports space
//! utilization, `check` replays with the consistency checker after
//! every op, and `synth` generates deterministic workload traces.

mod replay;
mod trace;

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use tagheap_core::heap::arena::DEFAULT_ARENA_LIMIT;
use tagheap_core::{FitPolicy, HeapConfig};

use crate::replay::ReplayError;
use crate::trace::{Trace, TraceError};

#[derive(Debug, Error)]
enum HarnessError {
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("failed to write report {path}: {source}")]
    Report {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Driver and checker for the tagheap allocator.
#[derive(Debug, Parser)]
#[command(name = "tagheap")]
#[command(about = "Trace-driven driver and checker for the tagheap allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a trace and report utilization.
    Run {
        /// Trace JSON file to replay.
        #[arg(long)]
        trace: PathBuf,
        /// Output report path (JSON; if omitted, prints to stdout).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Arena growth ceiling in bytes.
        #[arg(long, default_value_t = DEFAULT_ARENA_LIMIT)]
        arena_limit: usize,
        /// Qualifying candidates scanned before best-fit settles
        /// (0 scans exhaustively).
        #[arg(long, default_value_t = 3)]
        scan_limit: usize,
        /// Take the first block that fits instead of best fit.
        #[arg(long)]
        first_fit: bool,
    },
    /// Replay a trace with the consistency checker after every op.
    Check {
        /// Trace JSON file to replay.
        #[arg(long)]
        trace: PathBuf,
    },
    /// Synthesize a deterministic workload trace.
    Synth {
        /// Output trace path (JSON).
        #[arg(long)]
        output: PathBuf,
        /// Seed for the workload generator.
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of generator steps.
        #[arg(long, default_value_t = 1000)]
        steps: usize,
        /// Largest request size in bytes.
        #[arg(long, default_value_t = 4096)]
        max_size: usize,
    },
}

fn main() -> Result<(), HarnessError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            trace,
            report,
            arena_limit,
            scan_limit,
            first_fit,
        } => {
            let trace = Trace::load(&trace)?;
            let fit_policy = if first_fit {
                FitPolicy::FirstFit
            } else {
                FitPolicy::BoundedBestFit { scan_limit }
            };
            let config = HeapConfig {
                arena_limit,
                fit_policy,
                ..HeapConfig::default()
            };
            let result = replay::run(&trace, config, false)?;
            let text = serde_json::to_string_pretty(&result)?;
            match report {
                Some(path) => fs::write(&path, text).map_err(|source| HarnessError::Report {
                    path: path.display().to_string(),
                    source,
                })?,
                None => println!("{text}"),
            }
        }
        Command::Check { trace } => {
            let trace = Trace::load(&trace)?;
            let result = replay::run(&trace, HeapConfig::default(), true)?;
            println!(
                "{}: {} ops, consistent, utilization {:.3}",
                result.trace, result.ops, result.utilization
            );
        }
        Command::Synth {
            output,
            seed,
            steps,
            max_size,
        } => {
            let trace = Trace::synthesize("synth", seed, steps, max_size);
            trace.save(&output)?;
            println!("wrote {} ops to {}", trace.ops.len(), output.display());
        }
    }
    Ok(())
}
