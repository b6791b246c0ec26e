use core::{
    alloc::Layout,
    ptr::{self, NonNull},
};

//------------------------------------------------------------------------------------------------------------------------------

/// Policy deciding what happens to an allocator when the container using it is copied or moved.
///
/// The policy is a runtime value handed out by [`Allocator::policy`], so two instances of the same allocator type can behave differently.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AllocPolicy {
    /// On copy assignment, the destination adopts the allocator of the source.
    pub propagate_on_copy_assign: bool,
    /// On move assignment, the destination adopts the allocator of the source.
    ///
    /// When this is not set and the allocators compare unequal, the elements are moved one by one, as the buffer can't change owners.
    pub propagate_on_move_assign: bool,
    /// On copy construction, the new container gets its allocator from [`Allocator::select_on_copy`] instead of a clone of the source's allocator.
    pub select_on_copy_construct: bool,
}

impl AllocPolicy {
    /// Never propagate, always clone on copy construction.
    pub const DEFAULT: Self = Self {
        propagate_on_copy_assign: false,
        propagate_on_move_assign: false,
        select_on_copy_construct: false,
    };

    /// Propagate on both copy and move assignment.
    pub const PROPAGATE: Self = Self {
        propagate_on_copy_assign: true,
        propagate_on_move_assign: true,
        select_on_copy_construct: false,
    };

    pub const fn with_propagate_on_copy_assign(mut self, propagate: bool) -> Self {
        self.propagate_on_copy_assign = propagate;
        self
    }

    pub const fn with_propagate_on_move_assign(mut self, propagate: bool) -> Self {
        self.propagate_on_move_assign = propagate;
        self
    }

    pub const fn with_select_on_copy_construct(mut self, select: bool) -> Self {
        self.select_on_copy_construct = select;
        self
    }
}

impl Default for AllocPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

//------------------------------------------------------------------------------------------------------------------------------

/// Allocator/Arena that can provide access to heap memory for containers
///
/// Two allocators compare equal when memory allocated by one can be deallocated by the other.
pub trait Allocator: Clone + PartialEq {
    /// Allocate memory from an allocator/arena
    ///
    /// # Return
    ///
    /// If no memory could be allocated, `None` should be returned.
    ///
    /// # Safety
    ///
    /// `layout` must have a non-zero size.
    unsafe fn alloc(&mut self, layout: Layout) -> Option<NonNull<u8>>;

    /// Deallocate an allocation
    ///
    /// # Panics
    ///
    /// Deallocation may panic, since an incorrect allocation should not happen
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated with `layout` by this allocator, or an allocator comparing equal to it.
    unsafe fn dealloc(&mut self, ptr: NonNull<u8>, layout: Layout);

    /// Construct `value` in the uninitialized memory at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and properly aligned.
    #[inline]
    unsafe fn construct<T>(&mut self, ptr: NonNull<T>, value: T) {
        ptr.as_ptr().write(value);
    }

    /// Destroy the value at `ptr`, leaving the memory uninitialized.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a value constructed by [`Allocator::construct`] that wasn't destroyed yet.
    #[inline]
    unsafe fn destroy<T>(&mut self, ptr: NonNull<T>) {
        ptr::drop_in_place(ptr.as_ptr());
    }

    /// Get the propagation policy of the allocator
    #[inline]
    fn policy(&self) -> AllocPolicy {
        AllocPolicy::DEFAULT
    }

    /// Get the allocator a copied container should use, when [`AllocPolicy::select_on_copy_construct`] is set.
    #[inline]
    fn select_on_copy(&self) -> Self {
        self.clone()
    }
}
