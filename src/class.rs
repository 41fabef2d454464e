//! The size-class table: a static mapping from a requested byte count
//! to one of `CLASS_COUNT` size classes.  Class 0 is the *large*
//! class and is served by direct mapping instead of a fixed chunk
//! size; see `bucket.rs`.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")))]
use disabled_contracts::*;

use crate::node::Chunk;

/// Number of size classes, including the large class at index 0.
pub(crate) const CLASS_COUNT: usize = 11;

/// Index of the large (direct-mapped) class.
pub(crate) const LARGE_CLASS: usize = 0;

static_assertions::const_assert!(CLASS_COUNT >= 2);

/// Returns the fixed chunk size for `class`, or 0 for the large
/// class.
///
/// `chunk_size(i) == 8 << i` for `i >= 1`, matching the spec's
/// `{16, 32, 64, ..., 8192}` table.
#[inline]
#[ensures(class == LARGE_CLASS -> ret == 0)]
#[ensures(class != LARGE_CLASS -> ret == 8usize << class)]
pub(crate) fn chunk_size(class: usize) -> usize {
    debug_assert!(class < CLASS_COUNT);
    if class == LARGE_CLASS {
        0
    } else {
        8usize << class
    }
}

/// The largest request size still served by a small (non-large)
/// class.
pub(crate) fn max_small_size() -> usize {
    chunk_size(CLASS_COUNT - 1)
}

/// Selects the size class for a request of `size` bytes, where `size`
/// has already been raised to at least `size_of::<Chunk>()`.
///
/// This is a linear first-fit scan, not a rounded-log computation:
/// the table is small (`CLASS_COUNT - 1` small classes) and the spec
/// calls the scan out as intentional rather than an optimization
/// opportunity.
#[requires(size >= std::mem::size_of::<Chunk>())]
#[ensures(ret < CLASS_COUNT)]
#[ensures(ret != LARGE_CLASS -> size <= chunk_size(ret))]
#[ensures(ret == LARGE_CLASS -> size > max_small_size())]
pub(crate) fn select_class(size: usize) -> usize {
    for class in 1..CLASS_COUNT {
        if size <= chunk_size(class) {
            return class;
        }
    }

    LARGE_CLASS
}
