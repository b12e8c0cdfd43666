//! Allocation trace files.
//!
//! A trace is a named sequence of allocator operations keyed by small
//! integer ids, stored as JSON. Traces either come from a file or are
//! synthesized deterministically from a seed.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reading, writing, or parsing trace files.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The trace file could not be read.
    #[error("failed to read trace {path}: {source}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The trace file could not be written.
    #[error("failed to write trace {path}: {source}")]
    Write {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The trace file is not valid JSON for the trace schema.
    #[error("failed to parse trace {path}: {source}")]
    Parse {
        /// Offending path.
        path: String,
        /// Underlying decode error.
        source: serde_json::Error,
    },
    /// The trace could not be encoded to JSON.
    #[error("failed to encode trace: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One step of an allocation workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum TraceOp {
    /// Allocate `size` bytes and bind the result to `id`.
    Alloc {
        /// Workload-local handle for the allocation.
        id: usize,
        /// Requested usable bytes.
        size: usize,
    },
    /// Resize the allocation bound to `id` to `size` bytes.
    Realloc {
        /// Handle of an existing allocation.
        id: usize,
        /// New requested usable bytes.
        size: usize,
    },
    /// Free the allocation bound to `id`.
    Free {
        /// Handle of an existing allocation.
        id: usize,
    },
}

/// A named allocation workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Human-readable trace name, echoed into reports.
    pub name: String,
    /// The operations, applied in order.
    pub ops: Vec<TraceOp>,
}

impl Trace {
    /// Loads a trace from a JSON file.
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let text = fs::read_to_string(path).map_err(|source| TraceError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| TraceError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Writes the trace as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), TraceError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| TraceError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Synthesizes a deterministic pseudo-random workload.
    ///
    /// Roughly half the steps allocate, a quarter free, a quarter
    /// resize; every allocation left live at the end is freed so the
    /// trace round-trips the heap back to empty.
    pub fn synthesize(name: &str, seed: u64, steps: usize, max_size: usize) -> Self {
        fn lcg(state: &mut u64) -> u64 {
            *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            *state
        }

        let mut rng = seed;
        let mut ops = Vec::with_capacity(steps);
        let mut live: Vec<usize> = Vec::new();
        let mut next_id = 0usize;
        let max_size = max_size.max(1);

        for _ in 0..steps {
            let r = lcg(&mut rng);
            match r % 4 {
                0 | 1 => {
                    let size = ((r >> 8) as usize % max_size) + 1;
                    ops.push(TraceOp::Alloc { id: next_id, size });
                    live.push(next_id);
                    next_id += 1;
                }
                2 if !live.is_empty() => {
                    let idx = (r as usize >> 16) % live.len();
                    let id = live.swap_remove(idx);
                    ops.push(TraceOp::Free { id });
                }
                3 if !live.is_empty() => {
                    let idx = (r as usize >> 16) % live.len();
                    let size = ((r >> 24) as usize % max_size) + 1;
                    ops.push(TraceOp::Realloc { id: live[idx], size });
                }
                _ => {}
            }
        }
        for id in live {
            ops.push(TraceOp::Free { id });
        }

        Self {
            name: name.to_string(),
            ops,
        }
    }
}
