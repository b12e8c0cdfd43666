//! The managed memory arena and its growth primitive.
//!
//! The arena is one contiguous byte region that grows only by appending
//! at its high end and never shrinks. `grow` follows the classic sbrk
//! contract: it extends the region and returns the previous length, so
//! the caller knows where the newly added span starts. A hard byte limit
//! stands in for the environment running out of memory.

use thiserror::Error;

/// Default arena limit (20 MiB).
pub const DEFAULT_ARENA_LIMIT: usize = 20 * (1 << 20);

/// Errors from the arena growth primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// The growth request would push the arena past its configured limit.
    #[error("arena limit of {limit} bytes exceeded by request for {requested} more bytes")]
    LimitExceeded {
        /// Configured hard limit in bytes.
        limit: usize,
        /// Size of the rejected growth request in bytes.
        requested: usize,
    },
}

/// A contiguous, growable, never-shrinking byte region.
///
/// All block metadata and payloads live inside `bytes`; the allocator
/// addresses them by offset. Tag words are stored little-endian.
#[derive(Debug)]
pub struct Arena {
    bytes: Vec<u8>,
    limit: usize,
}

impl Arena {
    /// Creates an empty arena with the given hard byte limit.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Extends the arena by `extra` zeroed bytes.
    ///
    /// Returns the previous length (the offset where the new span
    /// begins), or [`ArenaError::LimitExceeded`] if the request would
    /// overshoot the limit. On failure the arena is unchanged.
    pub fn grow(&mut self, extra: usize) -> Result<usize, ArenaError> {
        let old_len = self.bytes.len();
        match old_len.checked_add(extra) {
            Some(new_len) if new_len <= self.limit => {
                self.bytes.resize(new_len, 0);
                Ok(old_len)
            }
            _ => Err(ArenaError::LimitExceeded {
                limit: self.limit,
                requested: extra,
            }),
        }
    }

    /// Current length of the managed region in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the arena holds no bytes yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Configured hard limit in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Reads the 4-byte word at `at`.
    pub fn read_word(&self, at: usize) -> u32 {
        let b = &self.bytes[at..at + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Writes the 4-byte word at `at`.
    pub fn write_word(&mut self, at: usize, word: u32) {
        self.bytes[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }

    /// Borrows `len` payload bytes starting at `at`.
    pub fn bytes(&self, at: usize, len: usize) -> &[u8] {
        &self.bytes[at..at + len]
    }

    /// Mutably borrows `len` payload bytes starting at `at`.
    pub fn bytes_mut(&mut self, at: usize, len: usize) -> &mut [u8] {
        &mut self.bytes[at..at + len]
    }

    /// Copies `len` bytes from offset `src` to offset `dst`.
    ///
    /// The ranges may overlap.
    pub fn copy(&mut self, src: usize, dst: usize, len: usize) {
        self.bytes.copy_within(src..src + len, dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_returns_previous_length() {
        let mut arena = Arena::with_limit(1024);
        assert_eq!(arena.grow(16).unwrap(), 0);
        assert_eq!(arena.grow(32).unwrap(), 16);
        assert_eq!(arena.len(), 48);
    }

    #[test]
    fn test_grow_zero_fills() {
        let mut arena = Arena::with_limit(64);
        arena.grow(8).unwrap();
        assert_eq!(arena.bytes(0, 8), &[0u8; 8]);
    }

    #[test]
    fn test_grow_past_limit_fails_and_preserves_state() {
        let mut arena = Arena::with_limit(32);
        arena.grow(16).unwrap();
        let err = arena.grow(17).unwrap_err();
        assert_eq!(
            err,
            ArenaError::LimitExceeded {
                limit: 32,
                requested: 17
            }
        );
        assert_eq!(arena.len(), 16, "failed grow must not change the arena");
        assert_eq!(arena.grow(16).unwrap(), 16);
    }

    #[test]
    fn test_word_round_trip() {
        let mut arena = Arena::with_limit(64);
        arena.grow(16).unwrap();
        arena.write_word(4, 0xDEAD_BEEF);
        assert_eq!(arena.read_word(4), 0xDEAD_BEEF);
        assert_eq!(arena.read_word(0), 0);
    }

    #[test]
    fn test_copy_overlapping() {
        let mut arena = Arena::with_limit(64);
        arena.grow(16).unwrap();
        for i in 0..8 {
            arena.bytes_mut(8, 8)[i] = i as u8;
        }
        arena.copy(8, 4, 8);
        assert_eq!(arena.bytes(4, 8), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }
}
