//! Block layout codec.
//!
//! Every block starts with a one-word header tag and ends with an
//! identical footer tag. A tag packs the block size (always a multiple
//! of the 8-byte alignment, so the low bits are free) with an allocated
//! bit in bit 0. Block handles are payload offsets: the first byte after
//! the header. All operations here are pure offset arithmetic; they
//! assume well-formed tags and do not verify them (that is the
//! consistency checker's job).

use super::arena::Arena;

/// Word and header/footer size in bytes.
pub const WSIZE: usize = 4;

/// Double-word size in bytes: tag-pair overhead and the bare block size.
pub const DSIZE: usize = 8;

/// Payload alignment in bytes.
pub const ALIGNMENT: usize = 8;

/// Minimum useful block size: two tag words plus two link-offset slots.
///
/// Blocks below this (the bare 8-byte tag pair) carry no payload and can
/// never be linked into a free list.
pub const MIN_BLOCK: usize = 16;

/// Offset of the heap base: the prologue block's payload.
///
/// Free-list links are stored relative to this base, which makes `0` a
/// safe "no neighbor" sentinel since no real block payload can sit at
/// the base itself.
pub const HEAP_BASE: usize = 2 * WSIZE;

/// Rounds `size` up to the nearest multiple of [`ALIGNMENT`].
pub fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// A boundary tag: block size packed with the allocated bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(u32);

impl Tag {
    /// Packs a size and allocated flag into a tag word.
    pub fn pack(size: usize, allocated: bool) -> Self {
        Self(size as u32 | u32::from(allocated))
    }

    /// Reconstructs a tag from its raw word.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw tag word.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Block size encoded in the tag (low alignment bits masked off).
    pub fn size(self) -> usize {
        (self.0 & !(ALIGNMENT as u32 - 1)) as usize
    }

    /// Whether the allocated bit is set.
    pub fn is_allocated(self) -> bool {
        self.0 & 1 != 0
    }
}

/// Offset of the header tag for block payload `bp`.
pub fn header_at(bp: usize) -> usize {
    bp - WSIZE
}

/// Reads the header tag of the block at payload offset `bp`.
pub fn header(arena: &Arena, bp: usize) -> Tag {
    Tag::from_raw(arena.read_word(header_at(bp)))
}

/// Reads the footer tag of the block at payload offset `bp`.
///
/// The footer offset is derived from the header's size field.
pub fn footer(arena: &Arena, bp: usize) -> Tag {
    let size = header(arena, bp).size();
    Tag::from_raw(arena.read_word(bp + size - DSIZE))
}

/// Total size of the block at payload offset `bp`, tags included.
pub fn block_size(arena: &Arena, bp: usize) -> usize {
    header(arena, bp).size()
}

/// Whether the block at payload offset `bp` is marked allocated.
pub fn is_allocated(arena: &Arena, bp: usize) -> bool {
    header(arena, bp).is_allocated()
}

/// Writes `tag` as the header of the block at payload offset `bp`.
pub fn write_header(arena: &mut Arena, bp: usize, tag: Tag) {
    arena.write_word(header_at(bp), tag.raw());
}

/// Writes `tag` as the footer of the block at payload offset `bp`.
///
/// Uses the size carried by `tag` itself to find the footer slot, so the
/// header need not be written first.
pub fn write_footer(arena: &mut Arena, bp: usize, tag: Tag) {
    arena.write_word(bp + tag.size() - DSIZE, tag.raw());
}

/// Writes `tag` redundantly as both header and footer.
pub fn write_tags(arena: &mut Arena, bp: usize, tag: Tag) {
    write_header(arena, bp, tag);
    write_footer(arena, bp, tag);
}

/// Payload offset of the block immediately following `bp`.
pub fn next_block(arena: &Arena, bp: usize) -> usize {
    bp + header(arena, bp).size()
}

/// Payload offset of the block immediately preceding `bp`.
///
/// Reads the preceding block's footer, which sits just before `bp`'s
/// header. This is the backward-traversal half of the boundary-tag
/// scheme.
pub fn prev_block(arena: &Arena, bp: usize) -> usize {
    let prev_size = Tag::from_raw(arena.read_word(bp - DSIZE)).size();
    bp - prev_size
}
