use std::{
    alloc::Layout,
    cell::RefCell,
    ptr::NonNull,
    rc::Rc,
};

use crate::alloc::{Allocator, AllocPolicy, primitives::Mallocator};

/// Counters kept by a [`TrackingAllocator`]
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct AllocStats {
    /// Number of successful allocations
    pub allocs:          usize,
    /// Number of deallocations
    pub deallocs:        usize,
    /// Number of allocation requests that were refused
    pub failed_allocs:   usize,
    /// Bytes currently allocated
    pub live_bytes:      usize,
    /// Number of values constructed through the allocator
    pub constructs:      usize,
    /// Number of values destroyed through the allocator
    pub destroys:        usize,
    /// Number of times the allocator was selected for a copied container
    pub copy_selections: usize,
}

impl AllocStats {
    /// Number of allocations that weren't freed yet
    pub fn live_allocs(&self) -> usize {
        self.allocs - self.deallocs
    }

    /// Number of values that were constructed, but not destroyed yet
    pub fn live_values(&self) -> usize {
        self.constructs - self.destroys
    }
}

struct TrackingState {
    stats:           AllocStats,
    /// Number of allocations that may still succeed, `None` when unlimited
    allocs_left:     Option<usize>,
    /// Maximum number of live bytes, `None` when unlimited
    byte_budget:     Option<usize>,
    /// Number of values that may still be constructed before `construct` panics, `None` when unlimited
    constructs_left: Option<usize>,
}

/// Allocator wrapping another allocator, keeping track of what goes through it.
///
/// All clones of a tracking allocator share their counters and limits.
/// Two tracking allocators compare equal when they share the same id and their inner allocators compare equal,
/// allocators with a different id are considered to manage unrelated memory.
///
/// Limits make allocations fail on demand, which allows the allocation failure paths of containers to be exercised.
pub struct TrackingAllocator<A: Allocator = Mallocator> {
    inner:  A,
    id:     u16,
    policy: AllocPolicy,
    state:  Rc<RefCell<TrackingState>>,
}

impl TrackingAllocator<Mallocator> {
    /// Create a new tracking allocator on top of the [`Mallocator`]
    pub fn new(id: u16) -> Self {
        Self::new_in(Mallocator, id)
    }
}

impl<A: Allocator> TrackingAllocator<A> {
    /// Create a new tracking allocator on top of `inner`
    pub fn new_in(inner: A, id: u16) -> Self {
        Self {
            inner,
            id,
            policy: AllocPolicy::DEFAULT,
            state: Rc::new(RefCell::new(TrackingState { stats: AllocStats::default(), allocs_left: None, byte_budget: None, constructs_left: None })),
        }
    }

    /// Get a copy of the allocator using the given propagation policy.
    ///
    /// The returned allocator still shares its counters with `self`.
    pub fn with_policy(mut self, policy: AllocPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Get the id of the allocator
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Get the current counters
    pub fn stats(&self) -> AllocStats {
        self.state.borrow().stats
    }

    /// Limit the number of allocations that may still succeed, `None` removes the limit
    pub fn set_allocs_left(&self, allocs_left: Option<usize>) {
        self.state.borrow_mut().allocs_left = allocs_left;
    }

    /// Limit the number of bytes that may be live at the same time, `None` removes the limit
    pub fn set_byte_budget(&self, budget: Option<usize>) {
        self.state.borrow_mut().byte_budget = budget;
    }

    /// Limit the number of values that may still be constructed, `None` removes the limit.
    ///
    /// Once the limit is reached, `construct` panics without writing the value.
    pub fn set_constructs_left(&self, constructs_left: Option<usize>) {
        self.state.borrow_mut().constructs_left = constructs_left;
    }
}

impl<A: Allocator> Clone for TrackingAllocator<A> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), id: self.id, policy: self.policy, state: self.state.clone() }
    }
}

impl<A: Allocator> PartialEq for TrackingAllocator<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.inner == other.inner
    }
}

impl<A: Allocator> core::fmt::Debug for TrackingAllocator<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrackingAllocator")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("stats", &self.stats())
        .finish()
    }
}

impl<A: Allocator> Allocator for TrackingAllocator<A> {
    unsafe fn alloc(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let mut state = self.state.borrow_mut();

        let over_budget = state.byte_budget.map_or(false, |budget| state.stats.live_bytes + layout.size() > budget);
        if over_budget || state.allocs_left == Some(0) {
            state.stats.failed_allocs += 1;
            return None;
        }

        let Some(ptr) = self.inner.alloc(layout) else {
            state.stats.failed_allocs += 1;
            return None;
        };

        if let Some(left) = &mut state.allocs_left {
            *left -= 1;
        }
        state.stats.allocs += 1;
        state.stats.live_bytes += layout.size();
        Some(ptr)
    }

    unsafe fn dealloc(&mut self, ptr: NonNull<u8>, layout: Layout) {
        {
            let mut state = self.state.borrow_mut();
            assert!(state.stats.live_bytes >= layout.size(), "Deallocating more memory than was allocated by the tracking allocator ({})", self.id);
            state.stats.deallocs += 1;
            state.stats.live_bytes -= layout.size();
        }
        self.inner.dealloc(ptr, layout);
    }

    unsafe fn construct<T>(&mut self, ptr: NonNull<T>, value: T) {
        let limit_reached = match self.state.borrow_mut().constructs_left.as_mut() {
            Some(0) => true,
            Some(left) => { *left -= 1; false },
            None => false,
        };
        if limit_reached {
            panic!("Construction limit of the tracking allocator ({}) reached", self.id);
        }
        self.inner.construct(ptr, value);
        self.state.borrow_mut().stats.constructs += 1;
    }

    unsafe fn destroy<T>(&mut self, ptr: NonNull<T>) {
        // Counted first, a panicking destructor is outside of the contract, but shouldn't hide the destroy
        self.state.borrow_mut().stats.destroys += 1;
        self.inner.destroy(ptr);
    }

    fn policy(&self) -> AllocPolicy {
        self.policy
    }

    fn select_on_copy(&self) -> Self {
        self.state.borrow_mut().stats.copy_selections += 1;
        Self { inner: self.inner.select_on_copy(), id: self.id, policy: self.policy, state: self.state.clone() }
    }
}
