//! This module tracks the internal status of allocated objects in
//! debug builds, narrowed to this crate's (arena, class) addressing
//! instead of the teacher's `Class` handles.
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

struct AllocationInfo {
    arena: usize,
    class: usize,
    live: bool, // True if owned by the mutator
}

lazy_static::lazy_static! {
    static ref ALLOCATION_STATE_MAP: Mutex<HashMap<usize, AllocationInfo>> = Default::default();
}

/// Marks this allocation as returned to the mutator.  Fails if the
/// address is already marked live under any (arena, class).
pub(crate) fn mark_allocated(
    arena: usize,
    class: usize,
    ptr: NonNull<u8>,
) -> Result<(), &'static str> {
    let mut map = ALLOCATION_STATE_MAP.lock().unwrap();
    let info = map
        .entry(ptr.as_ptr() as usize)
        .or_insert(AllocationInfo { arena, class, live: false });

    if info.live {
        return Err("double allocation");
    }

    info.arena = arena;
    info.class = class;
    info.live = true;
    Ok(())
}

/// Marks this allocation as released by the mutator.
///
/// Per §9.2, a pointer must be freed by a thread bound to the arena it
/// was allocated from; when `arena`/`class` disagree with the
/// recorded values this reports the mismatch rather than silently
/// accepting a cross-arena or cross-class free.
pub(crate) fn mark_released(
    arena: usize,
    class: usize,
    ptr: NonNull<u8>,
) -> Result<(), &'static str> {
    let mut map = ALLOCATION_STATE_MAP.lock().unwrap();
    let info = map
        .get_mut(&(ptr.as_ptr() as usize))
        .ok_or("released unknown address")?;

    if !info.live {
        return Err("double free");
    }

    if info.arena != arena || info.class != class {
        return Err("cross-arena or cross-class free");
    }

    info.live = false;
    Ok(())
}
