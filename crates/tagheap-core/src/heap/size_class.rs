//! Size classes for the segregated free-list index.
//!
//! Free blocks are partitioned into ten classes by total block size.
//! The first nine classes have fixed upper bounds; the last is unbounded.
//! A block of size S always lives in the unique class whose bounds
//! contain S, which keeps fit searches short.

/// Number of size classes.
pub const NUM_CLASSES: usize = 10;

/// Inclusive upper bounds of the bounded classes, in bytes.
///
/// The final class (index 9) has no upper bound.
pub const CLASS_BOUNDS: [usize; NUM_CLASSES - 1] = [16, 64, 128, 256, 512, 1024, 2048, 4096, 8192];

/// Maps a block size to its class index.
///
/// Monotonic: a larger size never maps to a smaller-bound class.
pub fn class_of(size: usize) -> usize {
    for (class, &bound) in CLASS_BOUNDS.iter().enumerate() {
        if size <= bound {
            return class;
        }
    }
    NUM_CLASSES - 1
}
