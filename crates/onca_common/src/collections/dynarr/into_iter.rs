use core::{
    fmt,
    iter::FusedIterator,
    marker::PhantomData,
    ptr::{self, NonNull},
    slice,
};

use crate::{
    alloc::{Allocator, primitives::Mallocator},
    collections::imp::buffer,
};

/// An iterator that moves out of a dynamic array.
///
/// This `struct` is created by the `into_iter` method on [`DynArr`](super::DynArr).
/// Elements that aren't consumed are destroyed through the array's allocator when the iterator is dropped, after which the buffer is released.
pub struct IntoIter<T, A: Allocator = Mallocator> {
    buf:      NonNull<T>,
    cap:      usize,
    alloc:    A,
    /// Index of the next element returned from the front
    start:    usize,
    /// One past the index of the next element returned from the back
    end:      usize,
    _phantom: PhantomData<T>,
}

impl<T, A: Allocator> IntoIter<T, A> {
    pub(super) fn new(buf: NonNull<T>, cap: usize, len: usize, alloc: A) -> Self {
        Self { buf, cap, alloc, start: 0, end: len, _phantom: PhantomData }
    }

    /// Returns the remaining items of this iterator as a slice.
    ///
    /// # Examples
    ///
    /// ```
    /// use onca_common::dynarr;
    ///
    /// let arr = dynarr!['a', 'b', 'c'];
    /// let mut into_iter = arr.into_iter();
    /// assert_eq!(into_iter.as_slice(), &['a', 'b', 'c']);
    /// let _ = into_iter.next().unwrap();
    /// assert_eq!(into_iter.as_slice(), &['b', 'c']);
    /// ```
    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.buf.as_ptr().add(self.start), self.end - self.start) }
    }

    /// Returns the remaining items of this iterator as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.buf.as_ptr().add(self.start), self.end - self.start) }
    }

    /// Returns a reference to the allocator of the iterated dynamic array.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for IntoIter<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IntoIter").field(&self.as_slice()).finish()
    }
}

impl<T, A: Allocator> Iterator for IntoIter<T, A> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        if self.start == self.end {
            None
        } else {
            let value = unsafe { ptr::read(self.buf.as_ptr().add(self.start)) };
            self.start += 1;
            Some(value)
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.end - self.start;
        (len, Some(len))
    }

    #[inline]
    fn count(self) -> usize {
        self.len()
    }
}

impl<T, A: Allocator> DoubleEndedIterator for IntoIter<T, A> {
    #[inline]
    fn next_back(&mut self) -> Option<T> {
        if self.start == self.end {
            None
        } else {
            self.end -= 1;
            Some(unsafe { ptr::read(self.buf.as_ptr().add(self.end)) })
        }
    }
}

impl<T, A: Allocator> ExactSizeIterator for IntoIter<T, A> {}

impl<T, A: Allocator> FusedIterator for IntoIter<T, A> {}

impl<T, A: Allocator> Drop for IntoIter<T, A> {
    fn drop(&mut self) {
        let start = self.start;
        let remaining = self.end - self.start;
        self.start = self.end;
        unsafe {
            buffer::destroy_range(&mut self.alloc, self.buf.as_ptr().add(start), remaining);
            buffer::deallocate(&mut self.alloc, self.buf, self.cap);
        }
    }
}

unsafe impl<T: Send, A: Allocator + Send> Send for IntoIter<T, A> {}
unsafe impl<T: Sync, A: Allocator + Sync> Sync for IntoIter<T, A> {}
