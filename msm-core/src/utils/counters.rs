//! Global counters for scratch memory held by `RuntimeArena`s.
//!
//! Updated when an arena is constructed and when it is dropped, so tests can
//! check that growing the cached arena releases the smaller buffers and never
//! holds both allocations at once.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Bytes currently owned by live arenas.
pub static ARENA_LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
/// High-water mark of `ARENA_LIVE_BYTES` since the last reset.
pub static ARENA_PEAK_BYTES: AtomicUsize = AtomicUsize::new(0);
/// Number of arenas constructed with a non-empty layout.
pub static ARENA_ALLOCATION_COUNT: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn record_arena_allocation(bytes: usize) {
    let live = ARENA_LIVE_BYTES.fetch_add(bytes, Ordering::SeqCst) + bytes;
    ARENA_PEAK_BYTES.fetch_max(live, Ordering::SeqCst);
    ARENA_ALLOCATION_COUNT.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn record_arena_release(bytes: usize) {
    ARENA_LIVE_BYTES.fetch_sub(bytes, Ordering::SeqCst);
}

pub fn arena_live_bytes() -> usize {
    ARENA_LIVE_BYTES.load(Ordering::SeqCst)
}

pub fn arena_peak_bytes() -> usize {
    ARENA_PEAK_BYTES.load(Ordering::SeqCst)
}

pub fn arena_allocation_count() -> usize {
    ARENA_ALLOCATION_COUNT.load(Ordering::SeqCst)
}

/// Resets the peak to the current live total.
pub fn reset_arena_peak() {
    ARENA_PEAK_BYTES.store(arena_live_bytes(), Ordering::SeqCst);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaCounts {
    pub live_bytes: usize,
    pub peak_bytes: usize,
    pub allocations: usize,
}

pub fn get_arena_counts() -> ArenaCounts {
    ArenaCounts {
        live_bytes: arena_live_bytes(),
        peak_bytes: arena_peak_bytes(),
        allocations: arena_allocation_count(),
    }
}
