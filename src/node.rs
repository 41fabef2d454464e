//! Intrusive free-list nodes: `Chunk`, `Block`, and `Page`.
//!
//! None of these types ever own heap memory in the Rust sense: each is
//! a typed view over a span of bytes that the allocator itself mapped
//! in (via a `Page`) or received back from the mutator (via `free`).
//! Constructing one from a raw address is the one place in this crate
//! where "this address is safe to reinterpret as a list node" has to
//! be taken on faith from the caller; every other module only ever
//! receives nodes that were built this way.
use std::ptr::NonNull;

/// A fixed-size-class free cell.  Its size is implicit in the owning
/// bucket's `chunk_size`; the node itself only stores the intrusive
/// link.
#[repr(C)]
pub(crate) struct Chunk {
    pub(crate) next: Option<NonNull<Chunk>>,
}

/// A contiguous free span of variable size: either an unsliced slab
/// remainder (small classes) or a cached large mapping (large class).
#[repr(C)]
pub(crate) struct Block {
    pub(crate) size: usize,
    pub(crate) next: Option<NonNull<Block>>,
}

/// The header living at the base of a slab mapping.  Only `next` is
/// meaningful; it threads every slab page owned by a bucket onto one
/// list so `free` can test address containment against it.
#[repr(C)]
pub(crate) struct Page {
    pub(crate) next: Option<NonNull<Page>>,
}

static_assertions::const_assert!(std::mem::size_of::<Chunk>() <= 16);
static_assertions::const_assert!(std::mem::size_of::<Block>() <= 16);
static_assertions::const_assert!(std::mem::size_of::<Page>() <= 16);

impl Chunk {
    /// Reinterprets a just-freed allocation as a `Chunk` so it can be
    /// pushed onto a bucket's `chunk_head`.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live allocation of at least
    /// `size_of::<Chunk>()` writable bytes that the caller is done
    /// with; nothing else may alias it from this point on.
    #[inline]
    pub(crate) unsafe fn from_allocation(ptr: NonNull<u8>) -> NonNull<Chunk> {
        ptr.cast()
    }

    /// Views this chunk as the raw address handed back to the
    /// mutator.
    #[inline]
    pub(crate) fn as_allocation(node: NonNull<Chunk>) -> NonNull<u8> {
        node.cast()
    }
}

impl Block {
    /// Builds a `Block` header in place at `base`, recording `size`
    /// and leaving `next` unset.
    ///
    /// # Safety
    ///
    /// `base` must point at `size_of::<Block>()` writable bytes that
    /// nothing else currently references.
    #[inline]
    pub(crate) unsafe fn install(base: NonNull<u8>, size: usize) -> NonNull<Block> {
        let mut node: NonNull<Block> = base.cast();
        node.as_mut().size = size;
        node.as_mut().next = None;
        node
    }

    /// Returns the address `offset` bytes past this block's base,
    /// reinterpreted as a fresh `Block` header.  Used by
    /// `Bucket::slice` to shrink a block in place.
    ///
    /// # Safety
    ///
    /// `offset <= node's size` and the resulting address must still
    /// fall inside the owning slab page.
    #[inline]
    pub(crate) unsafe fn offset(node: NonNull<Block>, offset: usize) -> NonNull<u8> {
        NonNull::new_unchecked((node.as_ptr() as *mut u8).add(offset))
    }

    /// Reinterprets a previously returned large allocation (its
    /// `Block` header immediately precedes the user pointer) back
    /// into a `Block`.
    ///
    /// # Safety
    ///
    /// `user_ptr` must be the address previously returned by the
    /// large-allocation path, i.e. `header + OVERHEAD` for a live
    /// `Block` header.
    #[inline]
    pub(crate) unsafe fn header_of(user_ptr: NonNull<u8>, overhead: usize) -> NonNull<Block> {
        NonNull::new_unchecked((user_ptr.as_ptr() as *mut u8).sub(overhead)).cast()
    }

    /// The address the mutator sees: this block's base plus the
    /// overhead prefix.
    ///
    /// # Safety
    ///
    /// `overhead` must match the prefix size used when the block was
    /// carved out.
    #[inline]
    pub(crate) unsafe fn user_ptr(node: NonNull<Block>, overhead: usize) -> NonNull<u8> {
        NonNull::new_unchecked((node.as_ptr() as *mut u8).add(overhead))
    }
}

impl Page {
    /// Builds a `Page` header in place at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point at a fresh slab mapping of at least
    /// `size_of::<Page>()` bytes.
    #[inline]
    pub(crate) unsafe fn install(base: NonNull<u8>) -> NonNull<Page> {
        let mut node: NonNull<Page> = base.cast();
        node.as_mut().next = None;
        node
    }

    /// Returns true iff `addr` falls strictly inside the `size`-byte
    /// slab owned by this page header.
    #[inline]
    pub(crate) fn contains(node: NonNull<Page>, addr: usize, size: usize) -> bool {
        let base = node.as_ptr() as usize;
        addr > base && addr < base + size
    }
}
