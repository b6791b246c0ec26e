use core::{
    alloc::Layout,
    mem::{self, ManuallyDrop},
    ptr::{self, NonNull},
};

use crate::{
    alloc::Allocator,
    collections::TryReserveError,
};

#[inline]
pub(crate) const fn is_zst<T>() -> bool {
    mem::size_of::<T>() == 0
}

/// Maximum number of elements of `T` a single buffer can hold, so that its size in bytes fits in an `isize`.
#[inline]
pub(crate) const fn max_len<T>() -> usize {
    if is_zst::<T>() {
        usize::MAX
    } else {
        isize::MAX as usize / mem::size_of::<T>()
    }
}

/// Get the layout of a buffer of `cap` elements.
pub(crate) fn buffer_layout<T>(cap: usize) -> Result<Layout, TryReserveError> {
    if cap > max_len::<T>() {
        return Err(TryReserveError::CapacityOverflow);
    }
    Layout::array::<T>(cap).map_err(|_| TryReserveError::CapacityOverflow)
}

/// Allocate an uninitialized buffer of `cap` elements.
///
/// Zero-sized elements and empty buffers don't go through the allocator and return a dangling pointer.
pub(crate) fn allocate<T, A: Allocator>(alloc: &mut A, cap: usize) -> Result<NonNull<T>, TryReserveError> {
    if is_zst::<T>() || cap == 0 {
        return Ok(NonNull::dangling());
    }

    let layout = buffer_layout::<T>(cap)?;
    // SAFETY: `layout` has a non-zero size
    match unsafe { alloc.alloc(layout) } {
        Some(ptr) => Ok(ptr.cast()),
        None => Err(TryReserveError::AllocError { layout }),
    }
}

/// Deallocate a buffer returned by [`allocate`].
///
/// # Safety
///
/// `ptr` must have been returned by [`allocate`] with the same `cap`, using `alloc` or an allocator that compares equal to it.
pub(crate) unsafe fn deallocate<T, A: Allocator>(alloc: &mut A, ptr: NonNull<T>, cap: usize) {
    if is_zst::<T>() || cap == 0 {
        return;
    }
    let layout = Layout::from_size_align_unchecked(mem::size_of::<T>() * cap, mem::align_of::<T>());
    alloc.dealloc(ptr.cast(), layout);
}

/// Destroy `len` consecutive elements starting at `ptr`, front to back.
///
/// # Safety
///
/// All elements in the range must be live, they are uninitialized afterwards.
pub(crate) unsafe fn destroy_range<T, A: Allocator>(alloc: &mut A, ptr: *mut T, len: usize) {
    for i in 0..len {
        alloc.destroy(NonNull::new_unchecked(ptr.add(i)));
    }
}

/// New buffer being filled in before it replaces the buffer of a container.
///
/// Values constructed into the staging buffer are owned by it until [`StagingBuffer::finish`] is called,
/// elements relocated into it are not, as their original copies still belong to the old buffer.
/// Dropping an unfinished staging buffer destroys the values it owns and releases the allocation,
/// which leaves the container exactly as it was before the staging buffer was created.
pub(crate) struct StagingBuffer<'a, T, A: Allocator> {
    alloc:      &'a mut A,
    ptr:        NonNull<T>,
    cap:        usize,
    init_start: usize,
    init_end:   usize,
}

impl<'a, T, A: Allocator> StagingBuffer<'a, T, A> {
    /// Allocate a staging buffer of exactly `cap` elements
    pub fn new(alloc: &'a mut A, cap: usize) -> Result<Self, TryReserveError> {
        let ptr = allocate(alloc, cap)?;
        Ok(Self { alloc, ptr, cap, init_start: 0, init_end: 0 })
    }

    /// Bitwise copy `count` elements from `src` to the slots starting at `index`.
    ///
    /// # Safety
    ///
    /// `src` must point to `count` live elements outside of the staging buffer, the destination range must lie within the capacity and not overlap any constructed value.
    #[inline]
    pub unsafe fn relocate(&mut self, src: *const T, index: usize, count: usize) {
        ptr::copy_nonoverlapping(src, self.ptr.as_ptr().add(index), count);
    }

    /// Set the slot the next call to [`StagingBuffer::construct_next`] will construct in.
    ///
    /// Must be called before anything was constructed.
    #[inline]
    pub fn begin_construct(&mut self, index: usize) {
        debug_assert!(self.init_start == self.init_end, "values were already constructed in the staging buffer");
        self.init_start = index;
        self.init_end = index;
    }

    /// Construct `value` in the next slot.
    ///
    /// # Safety
    ///
    /// The slot must lie within the capacity and may not hold a relocated element.
    #[inline]
    pub unsafe fn construct_next(&mut self, value: T) {
        self.alloc.construct(NonNull::new_unchecked(self.ptr.as_ptr().add(self.init_end)), value);
        self.init_end += 1;
    }

    /// Hand over the buffer and the values constructed in it, returning the pointer and capacity of the buffer.
    pub fn finish(self) -> (NonNull<T>, usize) {
        let me = ManuallyDrop::new(self);
        (me.ptr, me.cap)
    }
}

impl<T, A: Allocator> Drop for StagingBuffer<'_, T, A> {
    fn drop(&mut self) {
        unsafe {
            destroy_range(self.alloc, self.ptr.as_ptr().add(self.init_start), self.init_end - self.init_start);
            deallocate(self.alloc, self.ptr, self.cap);
        }
    }
}
