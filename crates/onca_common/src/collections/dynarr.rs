use core::{
    borrow::{Borrow, BorrowMut},
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem::{self, ManuallyDrop},
    ops::{Deref, DerefMut, Index, IndexMut},
    ptr::{self, NonNull},
    slice::{self, SliceIndex},
};

use onca_logging::{LogCategory, log_verbose, log_warning};
use scopeguard::ScopeGuard;

use crate::alloc::{Allocator, primitives::Mallocator};
use super::{
    imp::buffer::{self, StagingBuffer},
    grow_capacity, handle_reserve, impl_slice_partial_eq_generic,
    OutOfRangeError, TryReserveError,
};

mod cursor;
mod into_iter;

pub use cursor::{Cursor, CursorMut};
pub use into_iter::IntoIter;

const LOG_CAT: LogCategory = LogCategory::new_with_sub("Collections", "DynArr");

/// Create a [`DynArr`] containing the arguments.
///
/// - `dynarr![]` creates an empty dynamic array.
/// - `dynarr![x; n]` creates a dynamic array containing `n` clones of `x`.
/// - `dynarr![a, b, c]` creates a dynamic array containing the given elements.
///
/// ```
/// use onca_common::dynarr;
///
/// let arr = dynarr![1, 2, 3];
/// assert_eq!(arr, [1, 2, 3]);
///
/// let arr = dynarr![0u8; 4];
/// assert_eq!(arr, [0, 0, 0, 0]);
/// ```
#[macro_export]
macro_rules! dynarr {
    () => {
        $crate::collections::DynArr::new()
    };
    ($elem:expr; $n:expr) => {
        $crate::collections::DynArr::from_elem($elem, $n)
    };
    ($($x:expr),+ $(,)?) => {
        $crate::collections::DynArr::from([$($x),+])
    };
}

#[cfg(test)]
mod tests;

/// A contiguous growable array type, also known as a dynamic array, or DynArr.
///
/// Dynamic arrays have *O*(1) indexing, amortized *O*(1) push (to the end), and *O*(1) pop (from the back).
///
/// _Note: It was decided to not name this `Vec` as in the standard library, as this is easily confusable with a math vector_
///
/// # Allocators
///
/// All memory is requested from the array's [`Allocator`], and every element is constructed and destroyed through it.
/// What happens to the allocator when an array is copied or moved into another array is decided by the [`AllocPolicy`](crate::alloc::AllocPolicy) of the source's allocator,
/// see [`DynArr::clone_from`] and [`DynArr::move_from`].
///
/// # Capacity and reallocation
///
/// The capacity of a dynamic array is the number of elements it can hold without reallocating,
/// the elements past the length are allocated, but uninitialized.
/// A dynamic array created with [`DynArr::new`] does not allocate until elements are added to it.
///
/// When an element is added to a full array, the capacity is doubled (starting from 1).
/// [`DynArr::reserve`], [`DynArr::resize`] and [`DynArr::insert_n`] allocate exactly the capacity they need.
/// `DynArr` never shrinks itself, use [`DynArr::shrink_to_fit`] to release unused memory.
///
/// Zero-sized elements never allocate, and the capacity of such an array is always `usize::MAX`.
///
/// # Guarantees
///
/// When a fallible operation fails, or an element operation panics, the array is always left in a valid state.
/// Operations that reallocate ([`reserve`](DynArr::reserve), [`push`](DynArr::push), [`resize`](DynArr::resize), and inserts that don't fit)
/// additionally leave the array untouched: either they succeed, or nothing changed.
///
/// # Cursors
///
/// Next to slices, positions in the array can be represented by a [`Cursor`] or [`CursorMut`], which are used by [`DynArr::insert`] and [`DynArr::erase`].
/// Any operation that reallocates invalidates all cursors into the array.
pub struct DynArr<T, A: Allocator = Mallocator> {
    ptr:      NonNull<T>,
    len:      usize,
    cap:      usize,
    alloc:    A,
    _phantom: PhantomData<T>,
}

impl<T> DynArr<T, Mallocator> {
    /// Constructs a new, empty `DynArr<T>`.
    ///
    /// The dynamic array will not allocate until elements are pushed onto it.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { ptr: NonNull::dangling(), len: 0, cap: 0, alloc: Mallocator, _phantom: PhantomData }
    }

    /// Constructs a new `DynArr<T>` with exactly the specified capacity.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity exceeds `isize::MAX` _bytes_.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_in(capacity, Mallocator)
    }

    /// Tries to construct a new `DynArr<T>` with exactly the specified capacity.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        Self::try_with_capacity_in(capacity, Mallocator)
    }

    /// Constructs a `DynArr<T>` containing `n` clones of `elem`.
    pub fn from_elem(elem: T, n: usize) -> Self where
        T: Clone
    {
        Self::from_elem_in(elem, n, Mallocator)
    }
}

impl<T, A: Allocator> DynArr<T, A> {
    /// Constructs a new, empty `DynArr<T, A>` using the provided allocator.
    ///
    /// The dynamic array will not allocate until elements are pushed onto it.
    #[inline]
    #[must_use]
    pub const fn new_in(alloc: A) -> Self {
        Self { ptr: NonNull::dangling(), len: 0, cap: 0, alloc, _phantom: PhantomData }
    }

    /// Constructs a new `DynArr<T, A>` with exactly the specified capacity, using the provided allocator.
    ///
    /// If `capacity` is 0, the dynamic array will not allocate.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity exceeds `isize::MAX` _bytes_.
    #[must_use]
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Self {
        handle_reserve(Self::try_with_capacity_in(capacity, alloc))
    }

    /// Tries to construct a new `DynArr<T, A>` with exactly the specified capacity, using the provided allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity exceeds `isize::MAX` _bytes_, or if the allocator reports an allocation failure.
    pub fn try_with_capacity_in(capacity: usize, mut alloc: A) -> Result<Self, TryReserveError> {
        let ptr = buffer::allocate(&mut alloc, capacity)?;
        Ok(Self { ptr, len: 0, cap: capacity, alloc, _phantom: PhantomData })
    }

    /// Constructs a `DynArr<T, A>` containing `n` clones of `elem`, using the provided allocator.
    pub fn from_elem_in(elem: T, n: usize, alloc: A) -> Self where
        T: Clone
    {
        let mut arr = Self::with_capacity_in(n, alloc);
        arr.resize(n, elem);
        arr
    }

    /// Returns the number of elements in the dynamic array.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the dynamic array contains no elements.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the total number of elements the dynamic array can hold without reallocating.
    ///
    /// For zero-sized elements, this is always `usize::MAX`.
    #[inline]
    pub const fn capacity(&self) -> usize {
        if buffer::is_zst::<T>() { usize::MAX } else { self.cap }
    }

    /// Returns the maximum number of elements a dynamic array of `T` can ever hold.
    #[inline]
    pub const fn max_size(&self) -> usize {
        buffer::max_len::<T>()
    }

    /// Returns a raw pointer to the dynamic array's buffer, or a dangling pointer when nothing is allocated.
    #[inline]
    pub const fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Returns an unsafe mutable pointer to the dynamic array's buffer, or a dangling pointer when nothing is allocated.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Returns a reference to the allocator used by the dynamic array.
    #[inline]
    pub const fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Extracts a slice containing the entire dynamic array.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Extracts a mutable slice containing the entire dynamic array.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Returns the first element, or `None` if the dynamic array is empty.
    #[inline]
    pub fn front(&self) -> Option<&T> {
        self.as_slice().first()
    }

    /// Returns a mutable reference to the first element, or `None` if the dynamic array is empty.
    #[inline]
    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.as_mut_slice().first_mut()
    }

    /// Returns the last element, or `None` if the dynamic array is empty.
    #[inline]
    pub fn back(&self) -> Option<&T> {
        self.as_slice().last()
    }

    /// Returns a mutable reference to the last element, or `None` if the dynamic array is empty.
    #[inline]
    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.as_mut_slice().last_mut()
    }

    /// Returns the element at `index`, or an error if `index` is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use onca_common::{dynarr, collections::OutOfRangeError};
    ///
    /// let arr = dynarr![1, 2, 3];
    /// assert_eq!(arr.at(1), Ok(&2));
    /// assert_eq!(arr.at(3), Err(OutOfRangeError { index: 3, len: 3 }));
    /// ```
    pub fn at(&self, index: usize) -> Result<&T, OutOfRangeError> {
        let len = self.len;
        self.as_slice().get(index).ok_or(OutOfRangeError { index, len })
    }

    /// Returns a mutable reference to the element at `index`, or an error if `index` is out of range.
    pub fn at_mut(&mut self, index: usize) -> Result<&mut T, OutOfRangeError> {
        let len = self.len;
        self.as_mut_slice().get_mut(index).ok_or(OutOfRangeError { index, len })
    }

    /// Returns a cursor to the first element.
    #[inline]
    pub fn begin(&self) -> Cursor<T> {
        Cursor::from_ptr(self.ptr.as_ptr())
    }

    /// Returns a cursor one past the last element.
    #[inline]
    pub fn end(&self) -> Cursor<T> {
        Cursor::from_ptr(cursor::offset_ptr(self.ptr.as_ptr(), self.len as isize))
    }

    /// Returns a mutable cursor to the first element.
    #[inline]
    pub fn begin_mut(&mut self) -> CursorMut<T> {
        self.cursor_at(0)
    }

    /// Returns a mutable cursor one past the last element.
    #[inline]
    pub fn end_mut(&mut self) -> CursorMut<T> {
        self.cursor_at(self.len)
    }

    /// Reserves capacity for a total of `new_capacity` elements.
    ///
    /// Unlike [`Vec::reserve`], the argument is the total capacity, not the number of additional elements.
    /// If the capacity is already big enough, nothing happens, otherwise exactly `new_capacity` elements are allocated.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity exceeds `isize::MAX` _bytes_.
    ///
    /// # Examples
    ///
    /// ```
    /// use onca_common::dynarr;
    ///
    /// let mut arr = dynarr![1];
    /// arr.reserve(10);
    /// assert_eq!(arr.capacity(), 10);
    /// ```
    pub fn reserve(&mut self, new_capacity: usize) {
        handle_reserve(self.try_reserve(new_capacity))
    }

    /// Tries to reserve capacity for a total of `new_capacity` elements.
    ///
    /// # Errors
    ///
    /// If the capacity exceeds [`DynArr::max_size`], or the allocator reports a failure, an error is returned and the dynamic array is left untouched.
    pub fn try_reserve(&mut self, new_capacity: usize) -> Result<(), TryReserveError> {
        if new_capacity <= self.capacity() {
            return Ok(());
        }
        if new_capacity > self.max_size() {
            return Err(TryReserveError::CapacityOverflow);
        }
        self.try_realloc(new_capacity)
    }

    /// Shrinks the capacity of the dynamic array to its length.
    ///
    /// An empty dynamic array releases its buffer.
    /// This is only a request, if the new buffer can't be allocated, the dynamic array keeps its current buffer.
    pub fn shrink_to_fit(&mut self) {
        if buffer::is_zst::<T>() || self.cap == self.len {
            return;
        }

        if self.len == 0 {
            unsafe { buffer::deallocate(&mut self.alloc, self.ptr, self.cap) };
            self.ptr = NonNull::dangling();
            self.cap = 0;
            return;
        }

        if let Err(err) = self.try_realloc(self.len) {
            log_warning!(LOG_CAT, "Could not shrink dynamic array from capacity {} to {}: {err}", self.cap, self.len);
        }
    }

    /// Shortens the dynamic array, keeping the first `len` elements and destroying the rest.
    ///
    /// If `len` is greater or equal to the current length, this has no effect.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }

        let old_len = self.len;
        // Shrink first, so a panicking destructor can't cause elements to be destroyed twice
        self.len = len;
        unsafe { buffer::destroy_range(&mut self.alloc, self.ptr.as_ptr().add(len), old_len - len) };
    }

    /// Destroys all elements, the capacity is left unchanged.
    #[inline]
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Resizes the dynamic array to `new_len` elements.
    ///
    /// When growing, clones of `value` are appended, reallocating to exactly `new_len` elements if the capacity is insufficient.
    /// When shrinking, the trailing elements are destroyed.
    ///
    /// If cloning panics, the dynamic array is left untouched.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity exceeds `isize::MAX` _bytes_.
    pub fn resize(&mut self, new_len: usize, value: T) where
        T: Clone
    {
        handle_reserve(self.try_resize(new_len, value))
    }

    /// Tries to resize the dynamic array to `new_len` elements, see [`DynArr::resize`].
    pub fn try_resize(&mut self, new_len: usize, value: T) -> Result<(), TryReserveError> where
        T: Clone
    {
        self.try_resize_with(new_len, || value.clone())
    }

    /// Resizes the dynamic array to `new_len` elements, appending values generated by `f`.
    ///
    /// See [`DynArr::resize`].
    pub fn resize_with<F: FnMut() -> T>(&mut self, new_len: usize, f: F) {
        handle_reserve(self.try_resize_with(new_len, f))
    }

    /// Resizes the dynamic array to `new_len` elements, appending default values.
    ///
    /// See [`DynArr::resize`].
    pub fn resize_default(&mut self, new_len: usize) where
        T: Default
    {
        handle_reserve(self.try_resize_with(new_len, T::default))
    }

    /// Tries to resize the dynamic array to `new_len` elements, appending values generated by `f`.
    ///
    /// # Errors
    ///
    /// If the capacity exceeds [`DynArr::max_size`], or the allocator reports a failure, an error is returned and the dynamic array is left untouched.
    pub fn try_resize_with<F: FnMut() -> T>(&mut self, new_len: usize, mut f: F) -> Result<(), TryReserveError> {
        if new_len <= self.len {
            self.truncate(new_len);
            return Ok(());
        }
        if new_len > self.max_size() {
            return Err(TryReserveError::CapacityOverflow);
        }

        if new_len > self.capacity() {
            let old_len = self.len;
            let mut staging = StagingBuffer::new(&mut self.alloc, new_len)?;
            staging.begin_construct(old_len);
            for _ in old_len..new_len {
                unsafe { staging.construct_next(f()) };
            }
            unsafe { staging.relocate(self.ptr.as_ptr(), 0, old_len) };

            let (ptr, cap) = staging.finish();
            self.replace_buffer(ptr, cap);
            self.len = new_len;
        } else {
            let old_len = self.len;
            let mut arr = scopeguard::guard(self, |arr| arr.truncate(old_len));
            for _ in old_len..new_len {
                let value = f();
                unsafe { arr.construct_at_end(value) };
            }
            ScopeGuard::into_inner(arr);
        }
        Ok(())
    }

    /// Replaces the content of the dynamic array with the values of `iter`.
    ///
    /// If the iterator panics or an allocation fails, the dynamic array contains the values appended so far.
    pub fn assign_iter<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        handle_reserve(self.try_assign_iter(iter))
    }

    /// Tries to replace the content of the dynamic array with the values of `iter`, see [`DynArr::assign_iter`].
    pub fn try_assign_iter<I: IntoIterator<Item = T>>(&mut self, iter: I) -> Result<(), TryReserveError> {
        self.clear();
        self.try_extend_iter(iter.into_iter())
    }

    /// Replaces the content of the dynamic array with clones of the elements in `values`.
    pub fn assign_from_slice(&mut self, values: &[T]) where
        T: Clone
    {
        handle_reserve(self.try_assign_from_slice(values))
    }

    /// Tries to replace the content of the dynamic array with clones of the elements in `values`, see [`DynArr::assign_from_slice`].
    pub fn try_assign_from_slice(&mut self, values: &[T]) -> Result<(), TryReserveError> where
        T: Clone
    {
        self.clear();
        self.try_reserve(values.len())?;
        for value in values {
            unsafe { self.construct_at_end(value.clone()) };
        }
        Ok(())
    }

    /// Replaces the content of the dynamic array with `count` clones of `value`.
    pub fn assign_n(&mut self, count: usize, value: T) where
        T: Clone
    {
        handle_reserve(self.try_assign_n(count, value))
    }

    /// Tries to replace the content of the dynamic array with `count` clones of `value`, see [`DynArr::assign_n`].
    pub fn try_assign_n(&mut self, count: usize, value: T) -> Result<(), TryReserveError> where
        T: Clone
    {
        self.clear();
        self.try_resize(count, value)
    }

    /// Appends an element to the back of the dynamic array.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity exceeds `isize::MAX` _bytes_.
    ///
    /// # Examples
    ///
    /// ```
    /// use onca_common::dynarr;
    ///
    /// let mut arr = dynarr![1, 2];
    /// arr.push(3);
    /// assert_eq!(arr, [1, 2, 3]);
    /// ```
    pub fn push(&mut self, value: T) {
        handle_reserve(self.try_push(value))
    }

    /// Tries to append an element to the back of the dynamic array.
    ///
    /// # Errors
    ///
    /// If the array needs to grow and the new capacity can't be allocated, an error is returned and the dynamic array is left untouched.
    pub fn try_push(&mut self, value: T) -> Result<(), TryReserveError> {
        self.try_emplace_back(move || value).map(|_| ())
    }

    /// Appends the element returned by `f` to the back of the dynamic array, and returns a reference to it.
    ///
    /// `f` is called when the slot for the new element is ready, if it panics the dynamic array is left untouched.
    pub fn emplace_back<F: FnOnce() -> T>(&mut self, f: F) -> &mut T {
        handle_reserve(self.try_emplace_back(f))
    }

    /// Tries to append the element returned by `f` to the back of the dynamic array, see [`DynArr::emplace_back`].
    pub fn try_emplace_back<F: FnOnce() -> T>(&mut self, f: F) -> Result<&mut T, TryReserveError> {
        if self.len == self.capacity() {
            let min_cap = self.len.checked_add(1).ok_or(TryReserveError::CapacityOverflow)?;
            let new_cap = grow_capacity(self.cap, min_cap, self.max_size())?;
            let old_len = self.len;

            let mut staging = StagingBuffer::new(&mut self.alloc, new_cap)?;
            unsafe { staging.relocate(self.ptr.as_ptr(), 0, old_len) };
            staging.begin_construct(old_len);
            unsafe { staging.construct_next(f()) };

            let (ptr, cap) = staging.finish();
            self.replace_buffer(ptr, cap);
            self.len += 1;
        } else {
            unsafe { self.construct_at_end(f()) };
        }
        Ok(unsafe { &mut *self.ptr.as_ptr().add(self.len - 1) })
    }

    /// Removes the last element and returns it, or `None` if the dynamic array is empty.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            None
        } else {
            self.len -= 1;
            Some(unsafe { ptr::read(self.ptr.as_ptr().add(self.len)) })
        }
    }

    /// Destroys the last element.
    ///
    /// # Panics
    ///
    /// Panics if the dynamic array is empty.
    pub fn pop_back(&mut self) {
        assert!(self.len > 0, "Cannot pop the back of an empty dynamic array");
        self.len -= 1;
        unsafe { self.alloc.destroy(NonNull::new_unchecked(self.ptr.as_ptr().add(self.len))) };
    }

    /// Inserts `value` before `pos`, returning a cursor to the inserted element.
    ///
    /// If the dynamic array is full, the capacity is doubled.
    ///
    /// # Panics
    ///
    /// Panics if `pos` does not lie in the dynamic array, or if the new capacity exceeds `isize::MAX` _bytes_.
    ///
    /// # Examples
    ///
    /// ```
    /// use onca_common::dynarr;
    ///
    /// let mut arr = dynarr!['a', 'c'];
    /// arr.insert(arr.begin() + 1, 'b');
    /// assert_eq!(arr, ['a', 'b', 'c']);
    /// ```
    pub fn insert(&mut self, pos: impl Into<Cursor<T>>, value: T) -> CursorMut<T> {
        handle_reserve(self.try_insert(pos, value))
    }

    /// Tries to insert `value` before `pos`, see [`DynArr::insert`].
    pub fn try_insert(&mut self, pos: impl Into<Cursor<T>>, value: T) -> Result<CursorMut<T>, TryReserveError> {
        let index = self.index_of(pos.into());

        if self.len < self.capacity() {
            let tail = self.len - index;
            self.len = index;
            unsafe {
                let slot = self.ptr.as_ptr().add(index);
                ptr::copy(slot, slot.add(1), tail);
            }

            let mut gap = FillGap { arr: &mut *self, index, filled: 0, count: 1, tail };
            unsafe {
                let slot = gap.arr.ptr.as_ptr().add(index);
                gap.arr.alloc.construct(NonNull::new_unchecked(slot), value);
            }
            gap.filled = 1;
        } else {
            let min_cap = self.len.checked_add(1).ok_or(TryReserveError::CapacityOverflow)?;
            let new_cap = grow_capacity(self.cap, min_cap, self.max_size())?;
            let old_len = self.len;

            let mut staging = StagingBuffer::new(&mut self.alloc, new_cap)?;
            staging.begin_construct(index);
            unsafe {
                staging.construct_next(value);
                staging.relocate(self.ptr.as_ptr(), 0, index);
                staging.relocate(self.ptr.as_ptr().add(index), index + 1, old_len - index);
            }

            let (ptr, cap) = staging.finish();
            self.replace_buffer(ptr, cap);
            self.len += 1;
        }
        Ok(self.cursor_at(index))
    }

    /// Inserts `count` clones of `value` before `pos`, returning a cursor to the first inserted element.
    ///
    /// If the result doesn't fit, exactly the required capacity is allocated and a panicking clone leaves the array untouched.
    /// If it does fit and more elements are inserted than follow `pos`, the clones that end up past the current end are made first,
    /// a panic while making those leaves the array untouched.
    /// A panicking clone in the remaining part of the gap leaves the array with the clones that were made so far.
    ///
    /// # Panics
    ///
    /// Panics if `pos` does not lie in the dynamic array, or if the new capacity exceeds `isize::MAX` _bytes_.
    ///
    /// # Examples
    ///
    /// ```
    /// use onca_common::dynarr;
    ///
    /// let mut arr = dynarr!['a', 'b', 'c', 'd'];
    /// arr.insert_n(arr.begin() + 2, 2, &'x');
    /// assert_eq!(arr, ['a', 'b', 'x', 'x', 'c', 'd']);
    /// ```
    pub fn insert_n(&mut self, pos: impl Into<Cursor<T>>, count: usize, value: &T) -> CursorMut<T> where
        T: Clone
    {
        handle_reserve(self.try_insert_n(pos, count, value))
    }

    /// Tries to insert `count` clones of `value` before `pos`, see [`DynArr::insert_n`].
    pub fn try_insert_n(&mut self, pos: impl Into<Cursor<T>>, count: usize, value: &T) -> Result<CursorMut<T>, TryReserveError> where
        T: Clone
    {
        let index = self.index_of(pos.into());
        if count == 0 {
            return Ok(self.cursor_at(index));
        }

        let new_len = self.len.checked_add(count).ok_or(TryReserveError::CapacityOverflow)?;
        if new_len > self.max_size() {
            return Err(TryReserveError::CapacityOverflow);
        }

        if new_len <= self.capacity() {
            let tail = self.len - index;
            if count > tail {
                // Copies landing past the current end are made before anything moves
                let old_len = self.len;
                let mut arr = scopeguard::guard(&mut *self, |arr| arr.truncate(old_len));
                for _ in tail..count {
                    let value = value.clone();
                    unsafe { arr.construct_at_end(value) };
                }
                ScopeGuard::into_inner(arr);
            }

            // Elements in the gap and after it are owned by the guard until it is dropped
            self.len = index;
            unsafe {
                let slot = self.ptr.as_ptr().add(index);
                ptr::copy(slot, slot.add(count), tail);
            }

            let gap_len = count.min(tail);
            let mut gap = FillGap { arr: &mut *self, index, filled: 0, count: gap_len, tail: count.max(tail) };
            while gap.filled < gap_len {
                let value = value.clone();
                unsafe {
                    let slot = gap.arr.ptr.as_ptr().add(index + gap.filled);
                    gap.arr.alloc.construct(NonNull::new_unchecked(slot), value);
                }
                gap.filled += 1;
            }
        } else {
            let old_len = self.len;
            let mut staging = StagingBuffer::new(&mut self.alloc, new_len)?;
            staging.begin_construct(index);
            for _ in 0..count {
                unsafe { staging.construct_next(value.clone()) };
            }
            unsafe {
                staging.relocate(self.ptr.as_ptr(), 0, index);
                staging.relocate(self.ptr.as_ptr().add(index), index + count, old_len - index);
            }

            let (ptr, cap) = staging.finish();
            self.replace_buffer(ptr, cap);
            self.len = new_len;
        }
        Ok(self.cursor_at(index))
    }

    /// Destroys the element at `pos`, shifting all elements after it down.
    ///
    /// Returns a cursor to the element that now occupies `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` does not point to an element of the dynamic array.
    ///
    /// # Examples
    ///
    /// ```
    /// use onca_common::dynarr;
    ///
    /// let mut arr = dynarr!['a', 'b', 'c', 'd'];
    /// arr.erase(arr.begin() + 1);
    /// assert_eq!(arr, ['a', 'c', 'd']);
    /// ```
    pub fn erase(&mut self, pos: impl Into<Cursor<T>>) -> CursorMut<T> {
        let index = self.index_of(pos.into());
        assert!(index < self.len, "Cannot erase the end of a dynamic array");
        self.erase_indices(index, index + 1)
    }

    /// Destroys the elements in `[first, last)`, shifting all elements after them down.
    ///
    /// Returns a cursor to the element that now occupies `first`.
    ///
    /// # Panics
    ///
    /// Panics if the range does not lie in the dynamic array, or if `first` comes after `last`.
    pub fn erase_range(&mut self, first: impl Into<Cursor<T>>, last: impl Into<Cursor<T>>) -> CursorMut<T> {
        let first = self.index_of(first.into());
        let last = self.index_of(last.into());
        assert!(first <= last, "Invalid range to erase from a dynamic array: {first} > {last}");
        self.erase_indices(first, last)
    }

    /// Moves the content of the dynamic array out, leaving it empty and unallocated.
    pub fn take(&mut self) -> Self {
        let alloc = self.alloc.clone();
        mem::replace(self, Self::new_in(alloc))
    }

    /// Tries to clone the dynamic array.
    ///
    /// Exactly the capacity of `self` is allocated.
    /// The allocator of the clone is selected with [`Allocator::select_on_copy`] if its policy asks for it, otherwise the allocator is cloned.
    ///
    /// If cloning an element panics, the already cloned elements are destroyed and the allocation is released.
    pub fn try_clone(&self) -> Result<Self, TryReserveError> where
        T: Clone
    {
        let alloc = if self.alloc.policy().select_on_copy_construct {
            self.alloc.select_on_copy()
        } else {
            self.alloc.clone()
        };

        let mut arr = Self::new_in(alloc);
        let mut staging = StagingBuffer::new(&mut arr.alloc, self.cap)?;
        for value in self.iter() {
            unsafe { staging.construct_next(value.clone()) };
        }

        let (ptr, cap) = staging.finish();
        arr.ptr = ptr;
        arr.cap = cap;
        arr.len = self.len;
        Ok(arr)
    }

    /// Tries to make `self` a copy of `source`, see [`DynArr::clone_from`].
    ///
    /// # Errors
    ///
    /// If new storage is needed and can't be allocated, an error is returned.
    /// When `source` propagates its allocator and it differs from the allocator of `self`, the dynamic array is left untouched:
    /// its elements, storage and allocator are unchanged.
    /// Otherwise the dynamic array keeps its elements and storage, and has adopted the allocator of `source` if it propagates, which compares equal to its own.
    pub fn try_clone_from(&mut self, source: &Self) -> Result<(), TryReserveError> where
        T: Clone
    {
        if source.alloc.policy().propagate_on_copy_assign {
            if self.alloc != source.alloc {
                // Our memory can't be released by the new allocator, so the copy is built with it before releasing anything
                let mut alloc = source.alloc.clone();
                let mut staging = StagingBuffer::new(&mut alloc, source.cap)?;
                for value in source.iter() {
                    unsafe { staging.construct_next(value.clone()) };
                }

                let (ptr, cap) = staging.finish();
                self.release();
                self.alloc = alloc;
                self.ptr = ptr;
                self.cap = cap;
                self.len = source.len;
                return Ok(());
            }
            self.alloc = source.alloc.clone();
        }

        if source.len > self.capacity() {
            let mut staging = StagingBuffer::new(&mut self.alloc, source.cap)?;
            for value in source.iter() {
                unsafe { staging.construct_next(value.clone()) };
            }

            let (ptr, cap) = staging.finish();
            self.clear();
            self.replace_buffer(ptr, cap);
            self.len = source.len;
        } else {
            let common = self.len.min(source.len);
            self.truncate(source.len);
            self.as_mut_slice()[..common].clone_from_slice(&source[..common]);
            for value in &source[common..] {
                unsafe { self.construct_at_end(value.clone()) };
            }
        }
        Ok(())
    }

    /// Moves all elements of `source` into `self`, replacing the current content, see [`DynArr::try_move_from`].
    ///
    /// # Panics
    ///
    /// Panics if the elements need to be moved one by one and the storage can't be allocated.
    pub fn move_from(&mut self, source: &mut Self) {
        handle_reserve(self.try_move_from(source))
    }

    /// Tries to move all elements of `source` into `self`, replacing the current content.
    ///
    /// If the allocator of `source` propagates on move assignment, `self` adopts both the allocator and the buffer of `source`.
    /// If the allocators compare equal, `self` adopts the buffer of `source`.
    /// Otherwise, the buffer can't change owners and the elements are moved one by one into storage allocated by `self`'s allocator.
    ///
    /// On success, `source` is left empty and unallocated.
    ///
    /// # Errors
    ///
    /// If the elements are moved one by one and the storage can't be allocated, an error is returned and both arrays are left untouched.
    pub fn try_move_from(&mut self, source: &mut Self) -> Result<(), TryReserveError> {
        let propagate = source.alloc.policy().propagate_on_move_assign;
        if propagate || self.alloc == source.alloc {
            self.release();
            if propagate {
                self.alloc = source.alloc.clone();
            }
            self.ptr = mem::replace(&mut source.ptr, NonNull::dangling());
            self.len = mem::take(&mut source.len);
            self.cap = mem::take(&mut source.cap);
            return Ok(());
        }

        if source.len > self.capacity() {
            let ptr = buffer::allocate(&mut self.alloc, source.len)?;
            self.clear();
            self.replace_buffer(ptr, source.len);
        } else {
            self.clear();
        }

        unsafe { ptr::copy_nonoverlapping(source.ptr.as_ptr(), self.ptr.as_ptr(), source.len) };
        self.len = mem::take(&mut source.len);
        source.release();
        Ok(())
    }

    //--------------------------------------------------------------

    #[inline]
    fn cursor_at(&self, index: usize) -> CursorMut<T> {
        CursorMut::from_ptr(cursor::offset_ptr(self.ptr.as_ptr(), index as isize) as *mut T)
    }

    /// Get the index a cursor points to, which may be the end of the array.
    fn index_of(&self, pos: Cursor<T>) -> usize {
        let offset = cursor::ptr_distance(pos.as_ptr(), self.ptr.as_ptr());
        assert!(offset >= 0 && offset as usize <= self.len, "Cursor does not point into the dynamic array");
        offset as usize
    }

    /// Construct `value` in the first unused slot.
    ///
    /// # Safety
    ///
    /// The length needs to be less than the capacity.
    #[inline]
    unsafe fn construct_at_end(&mut self, value: T) {
        let slot = NonNull::new_unchecked(self.ptr.as_ptr().add(self.len));
        self.alloc.construct(slot, value);
        self.len += 1;
    }

    /// Relocate all elements to a new buffer of exactly `new_cap` elements.
    fn try_realloc(&mut self, new_cap: usize) -> Result<(), TryReserveError> {
        debug_assert!(new_cap >= self.len);

        let len = self.len;
        let mut staging = StagingBuffer::new(&mut self.alloc, new_cap)?;
        unsafe { staging.relocate(self.ptr.as_ptr(), 0, len) };

        let (ptr, cap) = staging.finish();
        self.replace_buffer(ptr, cap);
        Ok(())
    }

    /// Release the current buffer and use the new buffer.
    ///
    /// The current buffer may not contain any live elements, they are expected to be destroyed or relocated.
    fn replace_buffer(&mut self, ptr: NonNull<T>, cap: usize) {
        log_verbose!(LOG_CAT, "Moving dynamic array storage from capacity {} to {}", self.cap, cap);
        unsafe { buffer::deallocate(&mut self.alloc, self.ptr, self.cap) };
        self.ptr = ptr;
        self.cap = cap;
    }

    /// Destroy all elements and release the buffer.
    fn release(&mut self) {
        self.clear();
        unsafe { buffer::deallocate(&mut self.alloc, self.ptr, self.cap) };
        self.ptr = NonNull::dangling();
        self.cap = 0;
    }

    fn erase_indices(&mut self, first: usize, last: usize) -> CursorMut<T> {
        if first != last {
            let old_len = self.len;
            self.len = first;
            unsafe {
                let base = self.ptr.as_ptr();
                buffer::destroy_range(&mut self.alloc, base.add(first), last - first);
                ptr::copy(base.add(last), base.add(first), old_len - last);
            }
            self.len = old_len - (last - first);
        }
        self.cursor_at(first)
    }

    fn try_extend_iter<I: Iterator<Item = T>>(&mut self, iter: I) -> Result<(), TryReserveError> {
        let (lower, _) = iter.size_hint();
        let required = self.len.checked_add(lower).ok_or(TryReserveError::CapacityOverflow)?;
        if required > self.capacity() {
            let new_cap = grow_capacity(self.cap, required, self.max_size())?;
            self.try_realloc(new_cap)?;
        }

        for value in iter {
            self.try_push(value)?;
        }
        Ok(())
    }
}

/// Gap of uninitialized slots in a dynamic array, which is filled front to back.
///
/// When dropped, the elements after the gap are moved down to close the part of the gap that wasn't filled.
struct FillGap<'a, T, A: Allocator> {
    arr:    &'a mut DynArr<T, A>,
    index:  usize,
    filled: usize,
    count:  usize,
    tail:   usize,
}

impl<T, A: Allocator> Drop for FillGap<'_, T, A> {
    fn drop(&mut self) {
        unsafe {
            if self.filled != self.count {
                let base = self.arr.ptr.as_ptr();
                ptr::copy(base.add(self.index + self.count), base.add(self.index + self.filled), self.tail);
            }
        }
        self.arr.len = self.index + self.filled + self.tail;
    }
}

//--------------------------------------------------------------

impl<T, A: Allocator> Drop for DynArr<T, A> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T, A: Allocator> Deref for DynArr<T, A> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, A: Allocator> DerefMut for DynArr<T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T, I: SliceIndex<[T]>, A: Allocator> Index<I> for DynArr<T, A> {
    type Output = I::Output;

    #[inline]
    fn index(&self, index: I) -> &Self::Output {
        Index::index(&**self, index)
    }
}

impl<T, I: SliceIndex<[T]>, A: Allocator> IndexMut<I> for DynArr<T, A> {
    #[inline]
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        IndexMut::index_mut(&mut **self, index)
    }
}

impl<T: Clone, A: Allocator> Clone for DynArr<T, A> {
    fn clone(&self) -> Self {
        handle_reserve(self.try_clone())
    }

    /// Makes `self` a copy of `source`.
    ///
    /// If the allocator of `source` propagates on copy assignment, `self` adopts it.
    /// When the allocators differ, the copy is built with the allocator of `source` first and the old storage is released afterwards, so a panicking clone leaves `self` untouched.
    /// If `source` has more elements than fit in `self`, the capacity of `source` is allocated and a panicking clone leaves `self` untouched.
    /// Otherwise the storage of `self` is reused, and a panicking clone leaves `self` partially assigned.
    fn clone_from(&mut self, source: &Self) {
        handle_reserve(self.try_clone_from(source))
    }
}

impl<T: Hash, A: Allocator> Hash for DynArr<T, A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Hash::hash(&**self, state)
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for DynArr<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T, A: Allocator + Default> Default for DynArr<T, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<T, A: Allocator> AsRef<[T]> for DynArr<T, A> {
    fn as_ref(&self) -> &[T] {
        self
    }
}

impl<T, A: Allocator> AsMut<[T]> for DynArr<T, A> {
    fn as_mut(&mut self) -> &mut [T] {
        self
    }
}

impl<T, A: Allocator> Borrow<[T]> for DynArr<T, A> {
    fn borrow(&self) -> &[T] {
        self
    }
}

impl<T, A: Allocator> BorrowMut<[T]> for DynArr<T, A> {
    fn borrow_mut(&mut self) -> &mut [T] {
        self
    }
}

impl<T, A: Allocator + Default> FromIterator<T> for DynArr<T, A> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut arr = Self::new_in(A::default());
        arr.extend(iter);
        arr
    }
}

impl<T, A: Allocator> Extend<T> for DynArr<T, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        handle_reserve(self.try_extend_iter(iter.into_iter()))
    }
}

impl<'a, T: Copy + 'a, A: Allocator> Extend<&'a T> for DynArr<T, A> {
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        handle_reserve(self.try_extend_iter(iter.into_iter().copied()))
    }
}

impl<T, const N: usize> From<[T; N]> for DynArr<T> {
    fn from(values: [T; N]) -> Self {
        let mut arr = Self::with_capacity(N);
        for value in values {
            unsafe { arr.construct_at_end(value) };
        }
        arr
    }
}

impl<T: Clone> From<&[T]> for DynArr<T> {
    fn from(values: &[T]) -> Self {
        let mut arr = Self::new();
        arr.assign_from_slice(values);
        arr
    }
}

impl<T, A: Allocator> IntoIterator for DynArr<T, A> {
    type Item = T;
    type IntoIter = IntoIter<T, A>;

    fn into_iter(self) -> Self::IntoIter {
        let me = ManuallyDrop::new(self);
        // The allocator is moved into the iterator, `me` is never dropped
        let alloc = unsafe { ptr::read(&me.alloc) };
        IntoIter::new(me.ptr, me.cap, me.len, alloc)
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a DynArr<T, A> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a mut DynArr<T, A> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl_slice_partial_eq_generic!([A0: Allocator, A1: Allocator] DynArr<T, A0>, DynArr<U, A1>);
impl_slice_partial_eq_generic!([A: Allocator] DynArr<T, A>, &[U]);
impl_slice_partial_eq_generic!([A: Allocator] DynArr<T, A>, &mut [U]);
impl_slice_partial_eq_generic!([A: Allocator] &[T], DynArr<U, A>);
impl_slice_partial_eq_generic!([A: Allocator] &mut [T], DynArr<U, A>);
impl_slice_partial_eq_generic!([A: Allocator] DynArr<T, A>, [U]);
impl_slice_partial_eq_generic!([A: Allocator] [T], DynArr<U, A>);
impl_slice_partial_eq_generic!([A: Allocator, const N: usize] DynArr<T, A>, [U; N]);
impl_slice_partial_eq_generic!([A: Allocator, const N: usize] DynArr<T, A>, &[U; N]);
impl_slice_partial_eq_generic!([A: Allocator, const N: usize] [T; N], DynArr<U, A>);

impl<T: Eq, A: Allocator> Eq for DynArr<T, A> {}

impl<T: PartialOrd, A: Allocator> PartialOrd for DynArr<T, A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        PartialOrd::partial_cmp(&**self, &**other)
    }
}

impl<T: Ord, A: Allocator> Ord for DynArr<T, A> {
    fn cmp(&self, other: &Self) -> Ordering {
        Ord::cmp(&**self, &**other)
    }
}

unsafe impl<T: Send, A: Allocator + Send> Send for DynArr<T, A> {}
unsafe impl<T: Sync, A: Allocator + Sync> Sync for DynArr<T, A> {}
