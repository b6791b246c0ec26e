use std::{
    alloc::{Layout, GlobalAlloc},
    ptr::NonNull,
};
use cfg_if::cfg_if;

use crate::alloc::Allocator;

static MI_MALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Allocator calling directly to the system allocator (mimalloc)
///
/// All `Mallocator`s compare equal, memory allocated by one can be freed by any other.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Mallocator;

/// Process-wide allocation counters of the [`Mallocator`]
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct MallocStats {
    /// Number of allocations that weren't freed yet
    pub live_allocs: usize,
    /// Number of bytes that weren't freed yet
    pub live_bytes:  usize,
}

#[cfg(feature = "memory_tracking")]
mod tracking {
    use core::sync::atomic::AtomicUsize;

    pub static LIVE_ALLOCS: AtomicUsize = AtomicUsize::new(0);
    pub static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
}

impl Mallocator {
    /// Get the current allocation counters.
    ///
    /// Always returns zeroed stats when the `memory_tracking` feature is disabled.
    pub fn stats() -> MallocStats {
        #[allow(unused_mut)]
        let mut stats = MallocStats::default();
        cfg_if!{
            if #[cfg(feature = "memory_tracking")] {
                use core::sync::atomic::Ordering;
                stats.live_allocs = tracking::LIVE_ALLOCS.load(Ordering::Relaxed);
                stats.live_bytes = tracking::LIVE_BYTES.load(Ordering::Relaxed);
            }
        }
        stats
    }

    fn track_alloc(_layout: Layout) {
        cfg_if!{
            if #[cfg(feature = "memory_tracking")] {
                use core::sync::atomic::Ordering;
                tracking::LIVE_ALLOCS.fetch_add(1, Ordering::Relaxed);
                tracking::LIVE_BYTES.fetch_add(_layout.size(), Ordering::Relaxed);
            }
        }
    }

    fn track_dealloc(_layout: Layout) {
        cfg_if!{
            if #[cfg(feature = "memory_tracking")] {
                use core::sync::atomic::Ordering;
                tracking::LIVE_ALLOCS.fetch_sub(1, Ordering::Relaxed);
                tracking::LIVE_BYTES.fetch_sub(_layout.size(), Ordering::Relaxed);
            }
        }
    }
}

impl Allocator for Mallocator {
    unsafe fn alloc(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = NonNull::new(MI_MALLOC.alloc(layout));
        if ptr.is_some() {
            Self::track_alloc(layout);
        }
        ptr
    }

    unsafe fn dealloc(&mut self, ptr: NonNull<u8>, layout: Layout) {
        MI_MALLOC.dealloc(ptr.as_ptr(), layout);
        Self::track_dealloc(layout);
    }
}
