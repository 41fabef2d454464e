//! A general-purpose dynamic memory allocator: a multi-arena,
//! size-class (bucket) design that services arbitrary-size requests
//! from raw, anonymous pages obtained from the operating system, and
//! returns memory to the OS only for large allocations.
//!
//! The public surface is three operations — [`allocate`], [`free`],
//! [`reallocate`] — plus a C ABI front door for non-Rust callers, the
//! same shape the teacher crate this allocator is descended from
//! exposes for its class-based slab allocator.
mod arena;
mod bucket;
mod class;
mod map;
mod mapper;
mod node;

#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
mod debug_allocation_map;

use std::ffi::c_void;
use std::ptr::NonNull;

use arena::BoundArena;
use class::LARGE_CLASS;
use node::Chunk;

/// Allocates at least `size` bytes and returns a pointer to them.
///
/// Exact bytes made available: `max(size, size_of::<Chunk>())` for
/// small-class requests, `size` for large ones.
///
/// # Panics
///
/// Panics if the operating system refuses the underlying mapping
/// (§7: resource exhaustion is fatal, not a recoverable error).
///
/// In debug/test builds, `debug_assert!`s that `size > 0`: the spec
/// defines zero-byte requests as a precondition violation (undefined
/// behavior), not a recoverable error (§7).
pub fn allocate(size: usize) -> NonNull<u8> {
    debug_assert!(size > 0, "allocate requires a non-zero size");

    let mut arena = BoundArena::acquire();
    let mapper = mapper::default_mapper();
    let class = class::select_class(size.max(std::mem::size_of::<Chunk>()));

    let ptr = if class == LARGE_CLASS {
        arena.bucket_mut(LARGE_CLASS).allocate_large(size, mapper)
    } else {
        arena.bucket_mut(class).allocate_small(mapper)
    };

    #[cfg(any(
        all(test, feature = "check_contracts_in_tests"),
        feature = "check_contracts"
    ))]
    debug_allocation_map::mark_allocated(arena.index(), class, ptr)
        .expect("allocate produced an address already marked live");

    ptr
}

/// Returns a pointer previously obtained from [`allocate`] or
/// [`reallocate`] to the allocator.
///
/// # Safety
///
/// `ptr` must have been returned by this crate's `allocate` or
/// `reallocate` and not already freed. Per §9.2, `ptr` must be freed
/// by a thread bound to the same arena it was allocated from — there
/// is no cross-arena free in this design; doing so is undefined
/// behavior and is only caught when the debug allocation map (§10.3)
/// is compiled in.
pub fn free(ptr: NonNull<u8>) {
    let mut arena = BoundArena::acquire();
    let class = arena.find_owning_class(ptr.as_ptr() as usize);

    #[cfg(any(
        all(test, feature = "check_contracts_in_tests"),
        feature = "check_contracts"
    ))]
    debug_allocation_map::mark_released(arena.index(), class, ptr)
        .expect("free of an invalid pointer");

    if class == LARGE_CLASS {
        unsafe { arena.bucket_mut(LARGE_CLASS).free_large(ptr) }
    } else {
        unsafe { arena.bucket_mut(class).free_small(ptr) }
    }
}

/// Resizes the allocation at `ptr` to hold at least `size` bytes,
/// preserving the first `previous_size(ptr)` bytes of content.
///
/// Returns `ptr` unchanged if its current class already satisfies
/// `size`. Otherwise allocates fresh memory rounded up to at least
/// the system page size (amortizing repeated growth, e.g. for
/// vector-like callers), copies the old contents, and frees `ptr`.
///
/// # Safety
///
/// Same pointer requirements as [`free`]: `ptr` must be live and
/// freeable by the calling thread.
pub fn reallocate(ptr: NonNull<u8>, size: usize) -> NonNull<u8> {
    debug_assert!(size > 0, "reallocate requires a non-zero size");

    let mut arena = BoundArena::acquire();
    let old_class = arena.find_owning_class(ptr.as_ptr() as usize);
    let previous_size = if old_class == LARGE_CLASS {
        unsafe { arena.bucket(LARGE_CLASS).previous_large_size(ptr) }
    } else {
        arena.bucket(old_class).chunk_size()
    };

    if previous_size >= size {
        return ptr;
    }

    let mapper = mapper::default_mapper();
    let grown = size.max(mapper.page_size());
    let new_class = class::select_class(grown.max(std::mem::size_of::<Chunk>()));

    let new_ptr = if new_class == LARGE_CLASS {
        arena.bucket_mut(LARGE_CLASS).allocate_large(grown, mapper)
    } else {
        arena.bucket_mut(new_class).allocate_small(mapper)
    };

    // SAFETY: `ptr` has at least `previous_size` live bytes (the
    // invariant this function's own preconditions guarantee), and
    // `new_ptr` was just allocated with room for at least `size` >
    // `previous_size` bytes; the two spans cannot overlap.
    unsafe {
        std::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), previous_size);
    }

    #[cfg(any(
        all(test, feature = "check_contracts_in_tests"),
        feature = "check_contracts"
    ))]
    debug_allocation_map::mark_released(arena.index(), old_class, ptr)
        .expect("reallocate of an invalid pointer");

    if old_class == LARGE_CLASS {
        unsafe { arena.bucket_mut(LARGE_CLASS).free_large(ptr) }
    } else {
        unsafe { arena.bucket_mut(old_class).free_small(ptr) }
    }

    #[cfg(any(
        all(test, feature = "check_contracts_in_tests"),
        feature = "check_contracts"
    ))]
    debug_allocation_map::mark_allocated(arena.index(), new_class, new_ptr)
        .expect("reallocate produced an address already marked live");

    new_ptr
}

/// Allocates at least `size` bytes, C ABI.
///
/// # Safety
///
/// See [`allocate`].
#[no_mangle]
pub unsafe extern "C" fn bucketalloc_allocate(size: usize) -> *mut c_void {
    allocate(size).as_ptr() as *mut c_void
}

/// Frees a pointer previously returned by `bucketalloc_allocate` or
/// `bucketalloc_reallocate`, C ABI. A NULL `ptr` is a no-op.
///
/// # Safety
///
/// See [`free`].
#[no_mangle]
pub unsafe extern "C" fn bucketalloc_free(ptr: *mut c_void) {
    if let Some(ptr) = NonNull::new(ptr as *mut u8) {
        free(ptr);
    }
}

/// Resizes a pointer previously returned by `bucketalloc_allocate` or
/// `bucketalloc_reallocate`, C ABI.
///
/// # Safety
///
/// See [`reallocate`].
#[no_mangle]
pub unsafe extern "C" fn bucketalloc_reallocate(ptr: *mut c_void, size: usize) -> *mut c_void {
    let ptr = NonNull::new(ptr as *mut u8).expect("bucketalloc_reallocate requires a non-null ptr");
    reallocate(ptr, size).as_ptr() as *mut c_void
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use std::collections::HashMap;

    // Returns the byte span `[ptr, ptr + len)` for an allocation.
    fn span(ptr: NonNull<u8>, len: usize) -> (usize, usize) {
        let base = ptr.as_ptr() as usize;
        (base, base + len)
    }

    fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
        a.0 < b.1 && b.0 < a.1
    }

    proptest! {
        // Property 1 (non-overlap) and property 4 (size-class
        // containment): interleave allocate/free on random sizes and
        // slots, and check every pair of simultaneously-live
        // allocations never overlaps.
        #[test]
        fn random_order_non_overlap(
            ops in vec((0..24usize, 8..20_000usize), 1..400)
        ) {
            let mut slots: HashMap<usize, (NonNull<u8>, usize)> = HashMap::new();

            for (slot, size) in ops {
                if let Some((old_ptr, old_len)) = slots.remove(&slot) {
                    free(old_ptr);
                    let _ = old_len;
                }

                let ptr = allocate(size);
                let new_span = span(ptr, size);

                for &(other_ptr, other_len) in slots.values() {
                    prop_assert!(!overlaps(new_span, span(other_ptr, other_len)));
                }

                slots.insert(slot, (ptr, size));
            }

            for (ptr, _) in slots.into_values() {
                free(ptr);
            }
        }

        // Property 3 (reallocate preserves prefix), generalized across
        // random starting and growth sizes.
        #[test]
        fn reallocate_preserves_prefix_property(
            start in 1..4000usize,
            growth in 0..20_000usize,
        ) {
            let size = start;
            let ptr = allocate(size);
            unsafe {
                for i in 0..size.min(256) {
                    *ptr.as_ptr().add(i) = (i % 256) as u8;
                }
            }

            let grown_size = size + growth + 1;
            let grown = reallocate(ptr, grown_size);

            unsafe {
                for i in 0..size.min(256) {
                    prop_assert_eq!(*grown.as_ptr().add(i), (i % 256) as u8);
                }
            }

            free(grown);
        }
    }
}
