//! # tagheap-core
//!
//! A dynamic memory allocator over a single contiguous, growable arena,
//! written entirely in safe Rust. Blocks carry boundary tags (size and
//! allocated bit duplicated at both ends), free blocks are indexed by ten
//! segregated size-class lists, and adjacent free blocks are coalesced
//! eagerly. Addresses handed to callers are payload offsets into the
//! arena rather than raw pointers; offset `0` is the null equivalent.
//!
//! The allocator is single-threaded by construction: a [`Heap`] value owns
//! all of its state and is passed explicitly to every operation. Callers
//! needing concurrent access must serialize externally.

#![deny(unsafe_code)]

pub mod heap;

pub use heap::allocator::{FitPolicy, Heap, HeapConfig, HeapLogLevel, HeapLogRecord, HeapStats};
pub use heap::arena::{Arena, ArenaError};
pub use heap::check::CheckError;
