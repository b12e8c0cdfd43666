//! Heap consistency checker.
//!
//! Advisory diagnostic tooling: walks every block by boundary tags,
//! walks every size-class list by links, and reports each violation
//! found. Nothing here is called by the allocation paths, and nothing
//! is recovered; a violation means a caller broke the contract or the
//! allocator has a bug.

use std::collections::BTreeSet;

use thiserror::Error;

use super::allocator::Heap;
use super::freelist::{self, NO_NODE};
use super::layout::{self, ALIGNMENT, DSIZE, HEAP_BASE};
use super::size_class::{self, NUM_CLASSES};

/// A single consistency violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CheckError {
    /// The prologue sentinel is not a minimum-size allocated block.
    #[error("bad prologue block at the arena base")]
    BadPrologue,
    /// The terminating sentinel is not a zero-size allocated tag.
    #[error("bad epilogue tag for block at offset {0}")]
    BadEpilogue(usize),
    /// A block payload offset is not double-word aligned.
    #[error("block at offset {0} is not double-word aligned")]
    Misaligned(usize),
    /// A block's header and footer tags disagree.
    #[error("header does not match footer for block at offset {0}")]
    TagMismatch(usize),
    /// A block's encoded size runs past the end of the arena.
    #[error("block at offset {0} extends past the arena end")]
    OutOfBounds(usize),
    /// A block marked allocated was found in a free list.
    #[error("allocated block at offset {ptr} linked in class {class} free list")]
    AllocatedInList {
        /// Payload offset of the offending block.
        ptr: usize,
        /// Class list it was found in.
        class: usize,
    },
    /// A listed free block sits in a class that does not match its size.
    #[error("free block at offset {ptr} linked in class {found}, expected class {expected}")]
    WrongClass {
        /// Payload offset of the offending block.
        ptr: usize,
        /// Class list it was found in.
        found: usize,
        /// Class its size maps to.
        expected: usize,
    },
    /// A block appears more than once across the class lists.
    #[error("block at offset {0} linked more than once")]
    DoublyListed(usize),
    /// A free block in the arena is missing from its class list.
    #[error("free block at offset {ptr} missing from class {class} free list")]
    NotListed {
        /// Payload offset of the unlisted free block.
        ptr: usize,
        /// Class list it should be in.
        class: usize,
    },
    /// A listed offset does not correspond to any block found in the
    /// arena walk.
    #[error("listed offset {ptr} in class {class} is not a block in the arena")]
    UnknownListed {
        /// The phantom offset.
        ptr: usize,
        /// Class list it was found in.
        class: usize,
    },
}

/// Walks the whole heap and every free list, returning all violations.
pub fn check_report(heap: &Heap) -> Vec<CheckError> {
    let mut errors = Vec::new();
    let arena = heap.arena();

    if layout::block_size(arena, HEAP_BASE) != DSIZE || !layout::is_allocated(arena, HEAP_BASE) {
        errors.push(CheckError::BadPrologue);
        return errors;
    }

    // Forward walk by boundary tags, collecting linkable free blocks.
    let mut free_blocks = BTreeSet::new();
    let mut bp = HEAP_BASE;
    loop {
        let size = layout::block_size(arena, bp);
        if size == 0 {
            break;
        }
        if bp % ALIGNMENT != 0 {
            errors.push(CheckError::Misaligned(bp));
            return errors;
        }
        if bp + size > arena.len() {
            errors.push(CheckError::OutOfBounds(bp));
            return errors;
        }
        if layout::header(arena, bp) != layout::footer(arena, bp) {
            errors.push(CheckError::TagMismatch(bp));
        }
        if !layout::is_allocated(arena, bp) && size > DSIZE {
            free_blocks.insert(bp);
        }
        bp = layout::next_block(arena, bp);
    }
    if !layout::is_allocated(arena, bp) {
        errors.push(CheckError::BadEpilogue(bp));
    }

    // List walk: membership, class placement, duplication.
    let mut listed = BTreeSet::new();
    for class in 0..NUM_CLASSES {
        let mut link = heap.lists().head(class);
        let mut steps = 0usize;
        while link != NO_NODE {
            let node = freelist::node_at(link);
            if !free_blocks.contains(&node) {
                if layout::is_allocated(arena, node) {
                    errors.push(CheckError::AllocatedInList { ptr: node, class });
                } else {
                    errors.push(CheckError::UnknownListed { ptr: node, class });
                }
                break;
            }
            let expected = size_class::class_of(layout::block_size(arena, node));
            if expected != class {
                errors.push(CheckError::WrongClass {
                    ptr: node,
                    found: class,
                    expected,
                });
            }
            if !listed.insert(node) {
                errors.push(CheckError::DoublyListed(node));
                break;
            }
            // A corrupted link cycle cannot run longer than the arena
            // has room for distinct nodes.
            steps += 1;
            if steps > arena.len() / DSIZE {
                break;
            }
            link = freelist::succ_of(arena, node);
        }
    }

    // Partition: every linkable free block must be listed exactly once.
    for &bp in &free_blocks {
        if !listed.contains(&bp) {
            errors.push(CheckError::NotListed {
                ptr: bp,
                class: size_class::class_of(layout::block_size(arena, bp)),
            });
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::layout::Tag;

    #[test]
    fn test_fresh_heap_is_clean() {
        let heap = Heap::new();
        assert!(check_report(&heap).is_empty());
    }

    #[test]
    fn test_busy_heap_is_clean() {
        let mut heap = Heap::new();
        let ptrs: Vec<usize> = [24, 100, 200, 1000, 24, 5000]
            .iter()
            .map(|&n| heap.allocate(n).unwrap())
            .collect();
        for &p in ptrs.iter().step_by(2) {
            heap.deallocate(p);
        }
        assert!(check_report(&heap).is_empty());
    }

    #[test]
    fn test_detects_tag_mismatch() {
        let mut heap = Heap::new();
        let a = heap.allocate(64).unwrap();
        let size = heap.usable_size(a) + DSIZE;
        // Clobber the footer with a different size.
        let footer_at = a + size - DSIZE;
        heap.arena_mut()
            .write_word(footer_at, Tag::pack(size + 8, true).raw());
        assert!(
            check_report(&heap).contains(&CheckError::TagMismatch(a)),
            "clobbered footer must be reported"
        );
    }

    #[test]
    fn test_detects_bad_prologue() {
        let mut heap = Heap::new();
        heap.arena_mut()
            .write_word(layout::header_at(HEAP_BASE), Tag::pack(DSIZE, false).raw());
        assert_eq!(check_report(&heap), vec![CheckError::BadPrologue]);
    }

    #[test]
    fn test_detects_bad_epilogue() {
        let mut heap = Heap::new();
        let a = heap.allocate(64).unwrap();
        heap.deallocate(a);
        // The epilogue header is the last word of the arena.
        let len = heap.stats().arena_len;
        heap.arena_mut()
            .write_word(len - layout::WSIZE, Tag::pack(0, false).raw());
        assert!(
            check_report(&heap)
                .iter()
                .any(|e| matches!(e, CheckError::BadEpilogue(_)))
        );
    }

    #[test]
    fn test_detects_allocated_block_in_list() {
        let mut heap = Heap::new();
        let a = heap.allocate(64).unwrap();
        heap.deallocate(a);
        // Flip the freed block's tags to allocated without unlinking it.
        let size = layout::block_size(heap.arena(), a);
        let tag = Tag::pack(size, true);
        let arena = heap.arena_mut();
        layout::write_tags(arena, a, tag);
        assert!(
            check_report(&heap)
                .iter()
                .any(|e| matches!(e, CheckError::AllocatedInList { .. }))
        );
    }

    #[test]
    fn test_detects_unlisted_free_block() {
        let mut heap = Heap::new();
        let a = heap.allocate(64).unwrap();
        let _guard = heap.allocate(24).unwrap();
        // Mark the block free behind the index's back.
        let size = layout::block_size(heap.arena(), a);
        let tag = Tag::pack(size, false);
        let arena = heap.arena_mut();
        layout::write_tags(arena, a, tag);
        assert!(check_report(&heap).contains(&CheckError::NotListed {
            ptr: a,
            class: size_class::class_of(size)
        }));
    }
}
