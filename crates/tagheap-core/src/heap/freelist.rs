//! Segregated free-list index.
//!
//! One intrusive doubly-linked list per size class. A free block's
//! payload is reinterpreted as a list node: the first word holds the
//! predecessor link, the second the successor link. Links are offsets
//! from [`HEAP_BASE`], with `0` meaning "no neighbor" (the base is the
//! prologue payload and never a valid node).
//!
//! Blocks of the bare tag-pair size carry no payload, so they are never
//! linked; insert and remove apply the same guard symmetrically, which
//! means a block that was never inserted is never erroneously spliced.

use super::arena::Arena;
use super::layout::{self, DSIZE, HEAP_BASE, WSIZE};
use super::size_class::{self, NUM_CLASSES};

/// Link value meaning "no neighbor".
pub const NO_NODE: u32 = 0;

/// Reads a free block's predecessor link.
pub(crate) fn pred_of(arena: &Arena, bp: usize) -> u32 {
    arena.read_word(bp)
}

/// Reads a free block's successor link.
pub(crate) fn succ_of(arena: &Arena, bp: usize) -> u32 {
    arena.read_word(bp + WSIZE)
}

fn set_pred(arena: &mut Arena, bp: usize, link: u32) {
    arena.write_word(bp, link);
}

fn set_succ(arena: &mut Arena, bp: usize, link: u32) {
    arena.write_word(bp + WSIZE, link);
}

/// Converts a link value back to a payload offset.
pub(crate) fn node_at(link: u32) -> usize {
    HEAP_BASE + link as usize
}

fn link_to(bp: usize) -> u32 {
    (bp - HEAP_BASE) as u32
}

/// The ten size-class list heads.
///
/// Each head is a link value (`0` if the class is empty). All list
/// surgery is O(1) via the in-payload links.
#[derive(Debug)]
pub struct FreeLists {
    heads: [u32; NUM_CLASSES],
}

impl FreeLists {
    /// Creates an index with all classes empty.
    pub fn new() -> Self {
        Self {
            heads: [NO_NODE; NUM_CLASSES],
        }
    }

    /// Empties every class list.
    pub fn reset(&mut self) {
        self.heads = [NO_NODE; NUM_CLASSES];
    }

    /// Head link of the given class (`0` if empty).
    pub fn head(&self, class: usize) -> u32 {
        self.heads[class]
    }

    /// Pushes the free block at `bp` onto the head of its class list.
    ///
    /// No-op for blocks too small to hold the two link words.
    pub fn insert(&mut self, arena: &mut Arena, bp: usize) {
        let size = layout::block_size(arena, bp);
        if size <= DSIZE {
            return;
        }

        let class = size_class::class_of(size);
        let link = link_to(bp);

        set_pred(arena, bp, NO_NODE);
        set_succ(arena, bp, self.heads[class]);
        if self.heads[class] != NO_NODE {
            set_pred(arena, node_at(self.heads[class]), link);
        }
        self.heads[class] = link;
    }

    /// Splices the block at `bp` out of its class list.
    ///
    /// No-op for blocks too small to have been inserted.
    pub fn remove(&mut self, arena: &mut Arena, bp: usize) {
        let size = layout::block_size(arena, bp);
        if size <= DSIZE {
            return;
        }

        let pred = pred_of(arena, bp);
        let succ = succ_of(arena, bp);
        let class = size_class::class_of(size);

        match (pred, succ) {
            (NO_NODE, NO_NODE) => {
                self.heads[class] = NO_NODE;
            }
            (NO_NODE, succ) => {
                self.heads[class] = succ;
                set_pred(arena, node_at(succ), NO_NODE);
            }
            (pred, NO_NODE) => {
                set_succ(arena, node_at(pred), NO_NODE);
            }
            (pred, succ) => {
                set_succ(arena, node_at(pred), succ);
                set_pred(arena, node_at(succ), pred);
            }
        }
    }
}

impl Default for FreeLists {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::layout::Tag;

    /// Lays out `sizes` as consecutive free blocks after a prologue-sized
    /// gap, returning their payload offsets.
    fn build_blocks(arena: &mut Arena, sizes: &[usize]) -> Vec<usize> {
        let total: usize = sizes.iter().sum();
        arena.grow(2 * DSIZE + total).unwrap();
        let mut bp = HEAP_BASE + DSIZE;
        let mut out = Vec::new();
        for &size in sizes {
            layout::write_tags(arena, bp, Tag::pack(size, false));
            out.push(bp);
            bp += size;
        }
        out
    }

    #[test]
    fn test_insert_pushes_at_head() {
        let mut arena = Arena::with_limit(1 << 16);
        let mut lists = FreeLists::new();
        let blocks = build_blocks(&mut arena, &[32, 32]);

        lists.insert(&mut arena, blocks[0]);
        lists.insert(&mut arena, blocks[1]);

        let class = size_class::class_of(32);
        assert_eq!(node_at(lists.head(class)), blocks[1]);
        assert_eq!(node_at(succ_of(&arena, blocks[1])), blocks[0]);
        assert_eq!(pred_of(&arena, blocks[1]), NO_NODE);
        assert_eq!(succ_of(&arena, blocks[0]), NO_NODE);
    }

    #[test]
    fn test_insert_selects_class_by_size() {
        let mut arena = Arena::with_limit(1 << 16);
        let mut lists = FreeLists::new();
        let blocks = build_blocks(&mut arena, &[16, 72, 4096]);

        for &bp in &blocks {
            lists.insert(&mut arena, bp);
        }
        assert_eq!(node_at(lists.head(0)), blocks[0]);
        assert_eq!(node_at(lists.head(2)), blocks[1]);
        assert_eq!(node_at(lists.head(7)), blocks[2]);
    }

    #[test]
    fn test_remove_middle_node() {
        let mut arena = Arena::with_limit(1 << 16);
        let mut lists = FreeLists::new();
        let blocks = build_blocks(&mut arena, &[32, 32, 32]);
        for &bp in &blocks {
            lists.insert(&mut arena, bp);
        }
        // List order is now [2, 1, 0]; remove the middle.
        lists.remove(&mut arena, blocks[1]);

        let class = size_class::class_of(32);
        assert_eq!(node_at(lists.head(class)), blocks[2]);
        assert_eq!(node_at(succ_of(&arena, blocks[2])), blocks[0]);
        assert_eq!(node_at(pred_of(&arena, blocks[0])), blocks[2]);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut arena = Arena::with_limit(1 << 16);
        let mut lists = FreeLists::new();
        let blocks = build_blocks(&mut arena, &[32, 32, 32]);
        for &bp in &blocks {
            lists.insert(&mut arena, bp);
        }
        let class = size_class::class_of(32);

        lists.remove(&mut arena, blocks[2]); // head
        assert_eq!(node_at(lists.head(class)), blocks[1]);
        assert_eq!(pred_of(&arena, blocks[1]), NO_NODE);

        lists.remove(&mut arena, blocks[0]); // tail
        assert_eq!(succ_of(&arena, blocks[1]), NO_NODE);

        lists.remove(&mut arena, blocks[1]); // only node
        assert_eq!(lists.head(class), NO_NODE);
    }

    #[test]
    fn test_bare_block_never_linked() {
        let mut arena = Arena::with_limit(1 << 16);
        let mut lists = FreeLists::new();
        let blocks = build_blocks(&mut arena, &[8]);

        lists.insert(&mut arena, blocks[0]);
        for class in 0..NUM_CLASSES {
            assert_eq!(lists.head(class), NO_NODE);
        }
        // Symmetric guard: removing it must not splice anything.
        lists.remove(&mut arena, blocks[0]);
    }
}
