//! Heap allocation.
//!
//! Implements the allocator with a segregated free-list design:
//! - Block layout: boundary tags (header + footer) packing size and an
//!   allocated bit, enabling O(1) traversal in both directions
//! - Free blocks: indexed by ten size-class lists with intrusive links
//!   stored inside the free payload as offsets from the heap base
//! - Deallocation: eager boundary-tag coalescing with both neighbors
//! - Placement: bounded best-fit search plus a front/back split policy

pub mod allocator;
pub mod arena;
pub mod check;
pub mod freelist;
pub mod layout;
pub mod size_class;

pub use allocator::{FitPolicy, Heap, HeapConfig, HeapStats};
pub use arena::{Arena, ArenaError};
pub use check::CheckError;
pub use freelist::FreeLists;
pub use layout::Tag;
