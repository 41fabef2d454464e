//! A `Mapper` is responsible for acquiring and releasing anonymous
//! memory from the operating system on behalf of arenas.  Splitting
//! this out of `arena.rs`/`bucket.rs` keeps the allocator's
//! bucket/chunk/block bookkeeping testable against a fake page
//! source, the same role the teacher crate's `Mapper` trait plays for
//! its `Mill`.
use std::ptr::NonNull;

/// Supplies and reclaims page-granular anonymous memory.
///
/// This crate's allocator never has alignment or guard-page needs
/// beyond page granularity (§1 Non-goals: "no security hardening"),
/// so unlike the teacher's `Mapper` this trait has no `data_size` /
/// `prefix` / `suffix` parameters: every `reserve` is a plain,
/// independently releasable mapping.
pub(crate) trait Mapper: Sync {
    /// The mapping granularity.  All sizes passed to `reserve`/
    /// `release` must be multiples of this value.
    fn page_size(&self) -> usize;

    /// Reserves and zero-fills a fresh region of at least `size`
    /// bytes, rounded up to the page size.  Panics on OS mapping
    /// failure (§7: resource exhaustion is fatal).
    fn reserve(&self, size: usize) -> NonNull<u8>;

    /// Releases a region previously obtained from a single `reserve`
    /// call.
    ///
    /// # Safety
    ///
    /// `base`/`size` must describe exactly one prior `reserve`
    /// mapping, with no outstanding references to it.
    unsafe fn release(&self, base: NonNull<u8>, size: usize);
}

#[derive(Debug)]
struct DefaultMapper;

impl Mapper for DefaultMapper {
    fn page_size(&self) -> usize {
        crate::map::page_size()
    }

    fn reserve(&self, size: usize) -> NonNull<u8> {
        crate::map::map_anonymous(crate::map::round_up_to_page(size))
    }

    unsafe fn release(&self, base: NonNull<u8>, size: usize) {
        crate::map::unmap(base, crate::map::round_up_to_page(size))
    }
}

lazy_static::lazy_static! {
    static ref DEFAULT_MAPPER: DefaultMapper = DefaultMapper;
}

/// Returns the process-wide default mapper: a thin, direct wrapper
/// around `mmap`/`munmap`.
pub(crate) fn default_mapper() -> &'static dyn Mapper {
    &*DEFAULT_MAPPER
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_mapper_reserves_zeroed_pages() {
        let mapper = default_mapper();
        let size = mapper.page_size();
        let base = mapper.reserve(size);

        unsafe {
            let slice = std::slice::from_raw_parts(base.as_ptr(), size);
            assert!(slice.iter().all(|&b| b == 0));
            mapper.release(base, size);
        }
    }
}
