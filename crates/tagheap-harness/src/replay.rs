//! Trace replay against a live heap.
//!
//! Replays a trace, filling every allocation with a per-id byte pattern
//! and verifying it before each free or resize (catches payload
//! clobbering the way the classic driver does), then reports space
//! utilization: peak requested live bytes over the final arena length.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use tagheap_core::{Heap, HeapConfig};

use crate::trace::{Trace, TraceOp};

/// Errors surfaced while replaying a trace.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// An op referenced an id with no live allocation.
    #[error("op {index}: unknown allocation id {id}")]
    UnknownId {
        /// Index of the offending op.
        index: usize,
        /// The unbound id.
        id: usize,
    },
    /// An alloc op reused an id that is still live.
    #[error("op {index}: allocation id {id} is already live")]
    DuplicateId {
        /// Index of the offending op.
        index: usize,
        /// The reused id.
        id: usize,
    },
    /// The heap reported out-of-memory.
    #[error("op {index}: request for {size} bytes failed (out of memory)")]
    OutOfMemory {
        /// Index of the offending op.
        index: usize,
        /// Requested usable bytes.
        size: usize,
    },
    /// A payload byte did not survive.
    #[error("op {index}: payload of allocation {id} was clobbered")]
    PayloadMismatch {
        /// Index of the offending op.
        index: usize,
        /// Allocation whose payload failed verification.
        id: usize,
    },
    /// The consistency checker found violations.
    #[error("op {index}: heap inconsistent: {violations:?}")]
    Inconsistent {
        /// Index of the op after which the check ran.
        index: usize,
        /// Rendered violation messages.
        violations: Vec<String>,
    },
}

/// Replay outcome for one trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    /// Trace name.
    pub trace: String,
    /// Number of ops applied.
    pub ops: usize,
    /// Peak sum of requested live bytes over the run.
    pub peak_live_bytes: usize,
    /// Final arena length in bytes.
    pub arena_len: usize,
    /// `peak_live_bytes / arena_len`.
    pub utilization: f64,
    /// Whether the final consistency check passed.
    pub consistent: bool,
}

fn pattern(id: usize, i: usize) -> u8 {
    (id as u8).wrapping_mul(31).wrapping_add(i as u8) ^ 0x55
}

/// Applies trace ops to a heap while tracking a shadow model of live
/// allocations.
pub struct Replayer {
    heap: Heap,
    live: HashMap<usize, (usize, usize)>, // id -> (ptr, requested size)
    requested_live: usize,
    peak_live: usize,
    applied: usize,
}

impl Replayer {
    /// Creates a replayer over a fresh heap.
    pub fn new(config: HeapConfig) -> Self {
        Self {
            heap: Heap::with_config(config),
            live: HashMap::new(),
            requested_live: 0,
            peak_live: 0,
            applied: 0,
        }
    }

    /// Applies one op, verifying payload integrity around it.
    pub fn apply(&mut self, index: usize, op: TraceOp) -> Result<(), ReplayError> {
        match op {
            TraceOp::Alloc { id, size } => {
                if self.live.contains_key(&id) {
                    return Err(ReplayError::DuplicateId { index, id });
                }
                let ptr = self
                    .heap
                    .allocate(size)
                    .ok_or(ReplayError::OutOfMemory { index, size })?;
                self.fill(ptr, size, id);
                self.live.insert(id, (ptr, size));
                self.requested_live += size;
                self.peak_live = self.peak_live.max(self.requested_live);
            }
            TraceOp::Realloc { id, size } => {
                let (ptr, old_size) = *self
                    .live
                    .get(&id)
                    .ok_or(ReplayError::UnknownId { index, id })?;
                self.verify(index, ptr, old_size, id)?;
                let new_ptr = self
                    .heap
                    .resize(Some(ptr), size)
                    .ok_or(ReplayError::OutOfMemory { index, size })?;
                // The old payload prefix must survive the move.
                self.verify(index, new_ptr, old_size.min(size), id)?;
                self.fill(new_ptr, size, id);
                self.live.insert(id, (new_ptr, size));
                self.requested_live = self.requested_live - old_size + size;
                self.peak_live = self.peak_live.max(self.requested_live);
            }
            TraceOp::Free { id } => {
                let (ptr, size) = self
                    .live
                    .remove(&id)
                    .ok_or(ReplayError::UnknownId { index, id })?;
                self.verify(index, ptr, size, id)?;
                self.heap.deallocate(ptr);
                self.requested_live -= size;
            }
        }
        self.applied += 1;
        Ok(())
    }

    /// Runs the consistency checker, reporting any violations.
    pub fn check(&self, index: usize) -> Result<(), ReplayError> {
        let violations = self.heap.check_report();
        if violations.is_empty() {
            return Ok(());
        }
        Err(ReplayError::Inconsistent {
            index,
            violations: violations.iter().map(|v| v.to_string()).collect(),
        })
    }

    /// Finishes the run and produces the report.
    pub fn into_report(self, trace_name: &str) -> TraceReport {
        let stats = self.heap.stats();
        let utilization = if stats.arena_len == 0 {
            0.0
        } else {
            self.peak_live as f64 / stats.arena_len as f64
        };
        TraceReport {
            trace: trace_name.to_string(),
            ops: self.applied,
            peak_live_bytes: self.peak_live,
            arena_len: stats.arena_len,
            utilization,
            consistent: self.heap.check(),
        }
    }

    fn fill(&mut self, ptr: usize, len: usize, id: usize) {
        let payload = self.heap.payload_mut(ptr);
        for (i, byte) in payload[..len].iter_mut().enumerate() {
            *byte = pattern(id, i);
        }
    }

    fn verify(&self, index: usize, ptr: usize, len: usize, id: usize) -> Result<(), ReplayError> {
        let payload = self.heap.payload(ptr);
        for i in 0..len {
            if payload[i] != pattern(id, i) {
                return Err(ReplayError::PayloadMismatch { index, id });
            }
        }
        Ok(())
    }
}

/// Replays a whole trace.
///
/// With `check_every_op` the consistency checker runs after every op
/// (slow, diagnostic); otherwise only once at the end via the report.
pub fn run(
    trace: &Trace,
    config: HeapConfig,
    check_every_op: bool,
) -> Result<TraceReport, ReplayError> {
    let mut replayer = Replayer::new(config);
    for (index, &op) in trace.ops.iter().enumerate() {
        replayer.apply(index, op)?;
        if check_every_op {
            replayer.check(index)?;
        }
    }
    Ok(replayer.into_report(&trace.name))
}
