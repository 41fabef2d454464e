//! Thin wrappers around the OS page-mapping primitives
//! (`mmap`/`munmap`), via `libc`.
//!
//! This is the one module in the crate allowed to know that "a page
//! of memory" is, on this platform, something `mmap` hands out.
//! Everything above this module goes through the `Mapper` trait in
//! `mapper.rs` instead of calling these functions directly.
use std::ffi::c_void;
use std::ptr::NonNull;

fn page_size_or_die() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if ret <= 0 {
        panic!("unable to determine page size");
    }

    ret as usize
}

lazy_static::lazy_static! {
    static ref PAGE_SIZE: usize = page_size_or_die();
}

/// Returns the system page size.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE
}

/// Maps a fresh, anonymous, read-write, process-private region of
/// `size` bytes.
///
/// `size` must be a non-zero multiple of the page size.  On mapping
/// failure this function panics: the spec has no recoverable error
/// path for OS-resource exhaustion (§7, "Resource exhaustion ...
/// fatal: halt").
pub(crate) fn map_anonymous(size: usize) -> NonNull<u8> {
    debug_assert!(size > 0 && size % page_size() == 0);

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        panic!(
            "mmap({} bytes) failed: errno={}",
            size,
            std::io::Error::last_os_error()
        );
    }

    // SAFETY: mmap never returns NULL on success.
    unsafe { NonNull::new_unchecked(ptr as *mut u8) }
}

/// Releases a region previously obtained from `map_anonymous`.
///
/// # Safety
///
/// `base` and `size` must together describe exactly one mapping
/// returned by a single prior `map_anonymous` call; no outstanding
/// reference to that range may survive the call.
pub(crate) unsafe fn unmap(base: NonNull<u8>, size: usize) {
    debug_assert!(size > 0 && size % page_size() == 0);

    let ret = libc::munmap(base.as_ptr() as *mut c_void, size);
    debug_assert_eq!(ret, 0, "munmap should not fail for a valid mapping");
}

/// Rounds `size` up to the next multiple of the page size.
#[inline]
pub(crate) fn round_up_to_page(size: usize) -> usize {
    let page = page_size();
    ((size + page - 1) / page) * page
}

#[test]
fn test_page_size() {
    assert_ne!(page_size(), 0);
    assert_eq!(page_size() % 4096, 0);
}

#[test]
fn smoke_test() {
    let size = page_size() * 4;
    let base = map_anonymous(size);

    // The mapping should be zero-filled and writable.
    unsafe {
        let slice = std::slice::from_raw_parts_mut(base.as_ptr(), size);
        assert!(slice.iter().all(|&b| b == 0));
        slice[0] = 0xAA;
        slice[size - 1] = 0xAA;
        assert_eq!(slice[0], 0xAA);

        unmap(base, size);
    }
}

#[test]
fn round_up_matches_page_size() {
    let page = page_size();
    assert_eq!(round_up_to_page(1), page);
    assert_eq!(round_up_to_page(page), page);
    assert_eq!(round_up_to_page(page + 1), 2 * page);
}
