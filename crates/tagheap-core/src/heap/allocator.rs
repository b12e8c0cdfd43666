//! Core allocator state and operations.
//!
//! [`Heap`] owns the arena, the segregated free-list index, and the
//! placement configuration, and implements the public operations:
//! `allocate`, `deallocate`, `resize`, and `reset`. All addresses given
//! out are payload offsets into the arena; `0` is the null equivalent.
//!
//! Structured lifecycle records are appended for every operation outcome
//! and can be drained by diagnostic tooling; the hot paths never consult
//! them.

use super::arena::{Arena, ArenaError, DEFAULT_ARENA_LIMIT};
use super::check;
use super::freelist::{self, FreeLists, NO_NODE};
use super::layout::{self, DSIZE, MIN_BLOCK, Tag};
use super::size_class::{self, NUM_CLASSES};

/// Arena growth granularity when no fit exists (bytes).
pub const CHUNK_SIZE: usize = 4096;

/// Default upper bound (exclusive) on adjusted sizes that are carved
/// from the front of a candidate block rather than the back.
pub const SMALL_SPLIT_THRESHOLD: usize = 128;

/// Fit-search policy over the segregated index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitPolicy {
    /// Take the first block in class order that satisfies the request.
    FirstFit,
    /// Track the minimum-waste candidate within a class, but stop once
    /// `scan_limit` satisfying candidates have been examined and return
    /// the best of those. `0` means exhaustive best-fit.
    ///
    /// The early exit trades a little utilization for throughput; it is
    /// deliberate tuning, not an approximation to be "fixed".
    BoundedBestFit {
        /// Number of satisfying candidates examined before giving up on
        /// finding a tighter fit in the same class.
        scan_limit: usize,
    },
}

impl Default for FitPolicy {
    fn default() -> Self {
        Self::BoundedBestFit { scan_limit: 3 }
    }
}

/// Allocator construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct HeapConfig {
    /// Hard arena limit in bytes; growth past this reports out-of-memory.
    /// Clamped up to the bootstrap minimum so construction cannot fail.
    pub arena_limit: usize,
    /// Fit-search policy.
    pub fit_policy: FitPolicy,
    /// Adjusted sizes below this are placed at the front of a split
    /// candidate (sequential locality for small objects); sizes at or
    /// above it are placed at the back (keeps the free remainder
    /// coalescable with whatever precedes the candidate).
    pub small_split_threshold: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            arena_limit: DEFAULT_ARENA_LIMIT,
            fit_policy: FitPolicy::default(),
            small_split_threshold: SMALL_SPLIT_THRESHOLD,
        }
    }
}

/// Heap lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured heap lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: HeapLogLevel,
    /// Public operation (`allocate`, `deallocate`, `resize`, `reset`).
    pub op: &'static str,
    /// Event kind (`alloc`, `free`, `extend`, `grow_in_place`, ...).
    pub event: &'static str,
    /// Payload offset involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size class involved in the event.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: currently active allocation count.
    pub active_count: usize,
    /// Snapshot: total block bytes currently allocated.
    pub live_bytes: usize,
    /// Snapshot: arena length in bytes.
    pub arena_len: usize,
}

/// Point-in-time accounting snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of live allocations.
    pub active_count: usize,
    /// Total block bytes (tags included) currently allocated.
    pub live_bytes: usize,
    /// Arena length in bytes.
    pub arena_len: usize,
    /// Configured arena limit in bytes.
    pub arena_limit: usize,
}

/// A single-threaded segregated-list heap over a growable arena.
pub struct Heap {
    /// The managed byte region.
    arena: Arena,
    /// Segregated free-list index.
    lists: FreeLists,
    /// Placement and growth configuration.
    config: HeapConfig,
    /// Monotonic lifecycle decision id.
    next_decision_id: u64,
    /// Structured lifecycle records.
    lifecycle_logs: Vec<HeapLogRecord>,
    /// Number of live allocations.
    active_count: usize,
    /// Total block bytes currently allocated.
    live_bytes: usize,
}

impl Heap {
    /// Creates a heap with the default configuration.
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Creates a heap with the given configuration.
    pub fn with_config(mut config: HeapConfig) -> Self {
        config.arena_limit = config.arena_limit.max(2 * DSIZE);
        let mut heap = Self {
            arena: Arena::with_limit(config.arena_limit),
            lists: FreeLists::new(),
            config,
            next_decision_id: 1,
            lifecycle_logs: Vec::new(),
            active_count: 0,
            live_bytes: 0,
        };
        heap.init_arena();
        heap
    }

    /// Resets the heap to its initial state: all free-list heads empty,
    /// arena holding only the alignment padding and the sentinel blocks.
    pub fn reset(&mut self) {
        self.arena = Arena::with_limit(self.config.arena_limit);
        self.lists.reset();
        self.active_count = 0;
        self.live_bytes = 0;
        self.init_arena();
    }

    /// Lays down the minimal arena: one padding word, the prologue block
    /// (minimum size, always allocated), and the epilogue tag (size 0,
    /// allocated) that terminates forward traversal.
    fn init_arena(&mut self) {
        // The limit is clamped to the bootstrap size, so this grow on an
        // empty arena cannot fail.
        let _ = self.arena.grow(2 * DSIZE);
        self.arena.write_word(0, 0);
        layout::write_tags(&mut self.arena, layout::HEAP_BASE, Tag::pack(DSIZE, true));
        let epilogue = layout::next_block(&self.arena, layout::HEAP_BASE);
        layout::write_header(&mut self.arena, epilogue, Tag::pack(0, true));
        self.record(
            HeapLogLevel::Debug,
            "reset",
            "init",
            None,
            None,
            None,
            "success",
            String::new(),
        );
    }

    /// Allocates a block with at least `size` usable bytes.
    ///
    /// Returns the payload offset, or `None` for a zero-size request or
    /// when the arena cannot grow far enough. A failed allocation leaves
    /// the heap valid for smaller future requests.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            self.record(
                HeapLogLevel::Trace,
                "allocate",
                "zero_size",
                None,
                Some(0),
                None,
                "noop",
                String::new(),
            );
            return None;
        }

        let Some(asize) = adjusted_size(size) else {
            self.record(
                HeapLogLevel::Warn,
                "allocate",
                "alloc",
                None,
                Some(size),
                None,
                "oom",
                "adjusted size overflows the address width",
            );
            return None;
        };
        let class = size_class::class_of(asize);

        if let Some(candidate) = self.find_fit(asize) {
            let ptr = self.place(candidate, asize);
            self.note_allocated(ptr);
            self.record(
                HeapLogLevel::Trace,
                "allocate",
                "alloc",
                Some(ptr),
                Some(size),
                Some(class),
                "success",
                "path=fit",
            );
            return Some(ptr);
        }

        let extend = asize.max(CHUNK_SIZE);
        let block = match self.extend_heap(extend) {
            Ok(block) => block,
            Err(err) => {
                self.record(
                    HeapLogLevel::Warn,
                    "allocate",
                    "alloc",
                    None,
                    Some(size),
                    Some(class),
                    "oom",
                    err.to_string(),
                );
                return None;
            }
        };
        let ptr = self.place(block, asize);
        self.note_allocated(ptr);
        self.record(
            HeapLogLevel::Trace,
            "allocate",
            "alloc",
            Some(ptr),
            Some(size),
            Some(class),
            "success",
            "path=extend",
        );
        Some(ptr)
    }

    /// Frees the block at payload offset `ptr` and coalesces it with any
    /// free neighbors.
    ///
    /// No-op for `0`. Passing an offset that is not a live allocation
    /// from this heap is not validated and corrupts the block structure,
    /// matching the minimal-overhead contract.
    pub fn deallocate(&mut self, ptr: usize) {
        if ptr == 0 {
            self.record(
                HeapLogLevel::Trace,
                "deallocate",
                "free_null",
                Some(0),
                None,
                None,
                "noop",
                String::new(),
            );
            return;
        }

        let size = layout::block_size(&self.arena, ptr);
        layout::write_tags(&mut self.arena, ptr, Tag::pack(size, false));
        self.note_freed(ptr, size);
        let merged = self.coalesce(ptr);
        self.record(
            HeapLogLevel::Trace,
            "deallocate",
            "free",
            Some(ptr),
            Some(size),
            Some(size_class::class_of(size)),
            "success",
            format!("merged_at={merged}"),
        );
    }

    /// Resizes the allocation at `ptr` to at least `size` usable bytes.
    ///
    /// `ptr == None` behaves as [`Heap::allocate`]; `size == 0` behaves
    /// as [`Heap::deallocate`] and returns `None`. A shrink keeps the
    /// block and its size unchanged. A grow first tries to absorb free
    /// neighbors in place before falling back to allocate-copy-free; on
    /// out-of-memory the original allocation is left intact.
    pub fn resize(&mut self, ptr: Option<usize>, size: usize) -> Option<usize> {
        if size == 0 {
            if let Some(p) = ptr {
                self.deallocate(p);
            }
            self.record(
                HeapLogLevel::Trace,
                "resize",
                "zero_as_free",
                ptr,
                Some(0),
                None,
                "freed",
                String::new(),
            );
            return None;
        }
        let Some(p) = ptr else {
            let out = self.allocate(size);
            self.record(
                HeapLogLevel::Trace,
                "resize",
                "null_as_alloc",
                out,
                Some(size),
                None,
                if out.is_some() { "success" } else { "oom" },
                String::new(),
            );
            return out;
        };

        let old_size = layout::block_size(&self.arena, p);
        let Some(asize) = adjusted_size(size) else {
            self.record(
                HeapLogLevel::Warn,
                "resize",
                "grow",
                Some(p),
                Some(size),
                None,
                "oom",
                "adjusted size overflows the address width",
            );
            return None;
        };

        if asize <= old_size {
            self.record(
                HeapLogLevel::Trace,
                "resize",
                "shrink_noop",
                Some(p),
                Some(size),
                None,
                "success",
                format!("old_size={old_size}"),
            );
            return Some(p);
        }

        if let Some(np) = self.fast_search(p, asize) {
            if np != p {
                // Identity shifted backward onto the absorbed
                // predecessor; move the live payload before trimming.
                self.arena.copy(p, np, old_size - DSIZE);
            }
            self.trim_in_place(np, asize);
            let new_size = layout::block_size(&self.arena, np);
            self.live_bytes += new_size - old_size;
            self.record(
                HeapLogLevel::Trace,
                "resize",
                "grow_in_place",
                Some(np),
                Some(size),
                Some(size_class::class_of(new_size)),
                "success",
                format!("old_ptr={p} old_size={old_size} moved={}", np != p),
            );
            return Some(np);
        }

        let Some(np) = self.allocate(size) else {
            self.record(
                HeapLogLevel::Warn,
                "resize",
                "relocate",
                Some(p),
                Some(size),
                None,
                "oom",
                "allocation for relocation failed; original block kept",
            );
            return None;
        };
        let copy_len = (old_size - DSIZE).min(layout::block_size(&self.arena, np) - DSIZE);
        self.arena.copy(p, np, copy_len);
        self.deallocate(p);
        self.record(
            HeapLogLevel::Trace,
            "resize",
            "relocate",
            Some(np),
            Some(size),
            None,
            "success",
            format!("old_ptr={p} old_size={old_size}"),
        );
        Some(np)
    }

    /// Runs the consistency checker; `true` means no violations.
    ///
    /// Diagnostic only: normal operations never call this and never
    /// validate their own preconditions.
    pub fn check(&self) -> bool {
        check::check_report(self).is_empty()
    }

    /// Runs the consistency checker and returns every violation found.
    pub fn check_report(&self) -> Vec<check::CheckError> {
        check::check_report(self)
    }

    // ------------------------------------------------------------------
    // Placement engine
    // ------------------------------------------------------------------

    /// Searches the segregated index for a block of at least `asize`
    /// bytes, starting at the request's own class and moving upward.
    /// Returns `None` when no class yields a fit (the caller grows the
    /// arena).
    fn find_fit(&self, asize: usize) -> Option<usize> {
        for class in size_class::class_of(asize)..NUM_CLASSES {
            let found = match self.config.fit_policy {
                FitPolicy::FirstFit => self.first_fit_in(class, asize),
                FitPolicy::BoundedBestFit { scan_limit } => {
                    self.best_fit_in(class, asize, scan_limit)
                }
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn first_fit_in(&self, class: usize, asize: usize) -> Option<usize> {
        let mut link = self.lists.head(class);
        while link != NO_NODE {
            let bp = freelist::node_at(link);
            if layout::block_size(&self.arena, bp) >= asize {
                return Some(bp);
            }
            link = freelist::succ_of(&self.arena, bp);
        }
        None
    }

    fn best_fit_in(&self, class: usize, asize: usize, scan_limit: usize) -> Option<usize> {
        let mut best = None;
        let mut min_waste = usize::MAX;
        let mut satisfying = 0usize;

        let mut link = self.lists.head(class);
        while link != NO_NODE {
            let bp = freelist::node_at(link);
            let size = layout::block_size(&self.arena, bp);
            if size >= asize {
                let waste = size - asize;
                if waste < min_waste {
                    min_waste = waste;
                    best = Some(bp);
                }
                satisfying += 1;
                if satisfying == scan_limit {
                    return best;
                }
            }
            link = freelist::succ_of(&self.arena, bp);
        }
        best
    }

    /// Carves an `asize`-byte allocated block out of the free candidate
    /// at `bp`, removing the candidate from the index first.
    ///
    /// Three-way policy: remainders below the minimum block size are not
    /// split off (the requester pays the overshoot); small requests are
    /// carved from the front; larger ones from the back, leaving the
    /// remainder addressable as one coalescable unit with whatever
    /// precedes it. Returns the allocated payload offset.
    fn place(&mut self, bp: usize, asize: usize) -> usize {
        let csize = layout::block_size(&self.arena, bp);
        let waste = csize - asize;
        self.lists.remove(&mut self.arena, bp);

        if waste < MIN_BLOCK {
            layout::write_tags(&mut self.arena, bp, Tag::pack(csize, true));
            bp
        } else if asize < self.config.small_split_threshold {
            layout::write_tags(&mut self.arena, bp, Tag::pack(asize, true));
            let rest = layout::next_block(&self.arena, bp);
            layout::write_tags(&mut self.arena, rest, Tag::pack(waste, false));
            self.lists.insert(&mut self.arena, rest);
            bp
        } else {
            layout::write_tags(&mut self.arena, bp, Tag::pack(waste, false));
            let back = layout::next_block(&self.arena, bp);
            layout::write_tags(&mut self.arena, back, Tag::pack(asize, true));
            self.lists.insert(&mut self.arena, bp);
            back
        }
    }

    /// Finalizes an already-allocated region of at least `asize` bytes
    /// at `bp` after a grow-in-place, splitting off the tail remainder
    /// when it is worth keeping as a free block.
    fn trim_in_place(&mut self, bp: usize, asize: usize) {
        let csize = layout::block_size(&self.arena, bp);
        let waste = csize - asize;

        if waste >= MIN_BLOCK {
            layout::write_tags(&mut self.arena, bp, Tag::pack(asize, true));
            let rest = layout::next_block(&self.arena, bp);
            layout::write_tags(&mut self.arena, rest, Tag::pack(waste, false));
            self.lists.insert(&mut self.arena, rest);
        } else {
            layout::write_tags(&mut self.arena, bp, Tag::pack(csize, true));
        }
    }

    // ------------------------------------------------------------------
    // Resize fast path
    // ------------------------------------------------------------------

    /// Inspects only the immediate neighbors of the allocated block at
    /// `bp` for free space that would satisfy `asize` bytes in place.
    ///
    /// On success the absorbed region is already tagged allocated at the
    /// returned offset (possibly the predecessor's) and still needs
    /// [`Heap::trim_in_place`]. Returns `None` when the neighbors cannot
    /// help.
    fn fast_search(&mut self, bp: usize, asize: usize) -> Option<usize> {
        let prev = layout::prev_block(&self.arena, bp);
        let next = layout::next_block(&self.arena, bp);
        let prev_alloc = layout::is_allocated(&self.arena, prev);
        let next_alloc = layout::is_allocated(&self.arena, next);
        let mut csize = layout::block_size(&self.arena, bp);

        if prev_alloc && !next_alloc {
            csize += layout::block_size(&self.arena, next);
            if csize >= asize {
                self.lists.remove(&mut self.arena, next);
                layout::write_tags(&mut self.arena, bp, Tag::pack(csize, true));
                return Some(bp);
            }
            return None;
        }

        if !prev_alloc && !next_alloc {
            csize += layout::block_size(&self.arena, next);
            if csize >= asize {
                self.lists.remove(&mut self.arena, next);
                layout::write_tags(&mut self.arena, bp, Tag::pack(csize, true));
                return Some(bp);
            }
            csize += layout::block_size(&self.arena, prev);
            if csize >= asize {
                self.lists.remove(&mut self.arena, prev);
                self.lists.remove(&mut self.arena, next);
                layout::write_tags(&mut self.arena, prev, Tag::pack(csize, true));
                return Some(prev);
            }
            return None;
        }

        None
    }

    // ------------------------------------------------------------------
    // Coalescing engine
    // ------------------------------------------------------------------

    /// Merges the freshly-freed block at `bp` with any free neighbors
    /// and registers the result in the index. Returns the (possibly
    /// relocated) identity of the merged free block.
    fn coalesce(&mut self, bp: usize) -> usize {
        let prev = layout::prev_block(&self.arena, bp);
        let next = layout::next_block(&self.arena, bp);
        let prev_alloc = layout::is_allocated(&self.arena, prev);
        let next_alloc = layout::is_allocated(&self.arena, next);
        let mut size = layout::block_size(&self.arena, bp);

        let merged = match (prev_alloc, next_alloc) {
            (true, true) => bp,
            (true, false) => {
                size += layout::block_size(&self.arena, next);
                self.lists.remove(&mut self.arena, next);
                layout::write_tags(&mut self.arena, bp, Tag::pack(size, false));
                bp
            }
            (false, true) => {
                size += layout::block_size(&self.arena, prev);
                self.lists.remove(&mut self.arena, prev);
                layout::write_tags(&mut self.arena, prev, Tag::pack(size, false));
                prev
            }
            (false, false) => {
                size += layout::block_size(&self.arena, prev)
                    + layout::block_size(&self.arena, next);
                self.lists.remove(&mut self.arena, prev);
                self.lists.remove(&mut self.arena, next);
                layout::write_tags(&mut self.arena, prev, Tag::pack(size, false));
                prev
            }
        };
        self.lists.insert(&mut self.arena, merged);
        merged
    }

    // ------------------------------------------------------------------
    // Arena growth
    // ------------------------------------------------------------------

    /// Extends the arena by at least `bytes` (aligned), formats the new
    /// span as one free block over the old epilogue, writes a fresh
    /// epilogue, and coalesces with the preceding block.
    fn extend_heap(&mut self, bytes: usize) -> Result<usize, ArenaError> {
        let size = layout::align_up(bytes);
        let bp = self.arena.grow(size)?;
        layout::write_tags(&mut self.arena, bp, Tag::pack(size, false));
        let epilogue = layout::next_block(&self.arena, bp);
        layout::write_header(&mut self.arena, epilogue, Tag::pack(0, true));
        self.record(
            HeapLogLevel::Debug,
            "allocate",
            "extend",
            Some(bp),
            Some(size),
            None,
            "success",
            String::new(),
        );
        Ok(self.coalesce(bp))
    }

    // ------------------------------------------------------------------
    // Accounting and diagnostics
    // ------------------------------------------------------------------

    fn note_allocated(&mut self, ptr: usize) {
        self.active_count += 1;
        self.live_bytes += layout::block_size(&self.arena, ptr);
    }

    fn note_freed(&mut self, ptr: usize, size: usize) {
        match self.active_count.checked_sub(1) {
            Some(next) => self.active_count = next,
            None => {
                self.active_count = 0;
                self.record(
                    HeapLogLevel::Error,
                    "deallocate",
                    "invariant_active_count_underflow",
                    Some(ptr),
                    Some(size),
                    None,
                    "recovered",
                    "checked_sub failed",
                );
            }
        }
        match self.live_bytes.checked_sub(size) {
            Some(next) => self.live_bytes = next,
            None => {
                self.live_bytes = 0;
                self.record(
                    HeapLogLevel::Error,
                    "deallocate",
                    "invariant_live_bytes_underflow",
                    Some(ptr),
                    Some(size),
                    None,
                    "recovered",
                    "checked_sub failed",
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        level: HeapLogLevel,
        op: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        class: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        let trace_id = format!("core::heap::{}::{:016x}", op, decision_id);
        self.lifecycle_logs.push(HeapLogRecord {
            decision_id,
            trace_id,
            level,
            op,
            event,
            ptr,
            size,
            class,
            outcome,
            details: details.into(),
            active_count: self.active_count,
            live_bytes: self.live_bytes,
            arena_len: self.arena.len(),
        });
    }

    /// Returns a view of the lifecycle log records.
    pub fn lifecycle_logs(&self) -> &[HeapLogRecord] {
        &self.lifecycle_logs
    }

    /// Drains the lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<HeapLogRecord> {
        std::mem::take(&mut self.lifecycle_logs)
    }

    /// Point-in-time accounting snapshot.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            active_count: self.active_count,
            live_bytes: self.live_bytes,
            arena_len: self.arena.len(),
            arena_limit: self.arena.limit(),
        }
    }

    /// The managed arena (read-only).
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub(crate) fn lists(&self) -> &FreeLists {
        &self.lists
    }

    #[cfg(test)]
    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    /// Usable payload bytes of the allocation at `ptr`.
    pub fn usable_size(&self, ptr: usize) -> usize {
        layout::block_size(&self.arena, ptr) - DSIZE
    }

    /// Borrows the full usable payload span of the allocation at `ptr`.
    pub fn payload(&self, ptr: usize) -> &[u8] {
        self.arena.bytes(ptr, self.usable_size(ptr))
    }

    /// Mutably borrows the full usable payload span at `ptr`.
    pub fn payload_mut(&mut self, ptr: usize) -> &mut [u8] {
        let len = self.usable_size(ptr);
        self.arena.bytes_mut(ptr, len)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Rounds a request up to alignment and adds the tag-pair overhead.
///
/// `None` when the adjusted size would overflow the address width.
fn adjusted_size(size: usize) -> Option<usize> {
    size.checked_add(layout::ALIGNMENT - 1)
        .map(|s| s & !(layout::ALIGNMENT - 1))
        .and_then(|s| s.checked_add(DSIZE))
}
