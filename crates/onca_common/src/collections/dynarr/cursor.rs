use core::{
    cmp::Ordering,
    fmt,
    mem,
    ops::{Add, AddAssign, Sub, SubAssign},
    ptr::{self, NonNull},
};

/// Offset a pointer by `count` elements, without requiring the result to stay inside of an allocation.
///
/// Zero-sized elements advance the address by 1 byte per element, so positions in a zero-sized array can still be told apart.
#[inline]
pub(crate) fn offset_ptr<T>(ptr: *const T, count: isize) -> *const T {
    if mem::size_of::<T>() == 0 {
        (ptr as *const u8).wrapping_offset(count) as *const T
    } else {
        ptr.wrapping_offset(count)
    }
}

/// Get the number of elements between `lhs` and `rhs`, counterpart of [`offset_ptr`].
#[inline]
pub(crate) fn ptr_distance<T>(lhs: *const T, rhs: *const T) -> isize {
    let byte_diff = (lhs as usize).wrapping_sub(rhs as usize) as isize;
    byte_diff / mem::size_of::<T>().max(1) as isize
}

#[inline]
unsafe fn deref_ptr<'a, T>(ptr: *const T) -> &'a T {
    if mem::size_of::<T>() == 0 {
        &*NonNull::dangling().as_ptr()
    } else {
        &*ptr
    }
}

#[inline]
unsafe fn deref_ptr_mut<'a, T>(ptr: *mut T) -> &'a mut T {
    if mem::size_of::<T>() == 0 {
        &mut *NonNull::dangling().as_ptr()
    } else {
        &mut *ptr
    }
}

macro_rules! impl_cursor {
    ($name:ident, $ptr:ty, $cast:ident) => {
        impl<T> $name<T> {
            /// Create a cursor at the given position
            #[inline]
            pub const fn from_ptr(ptr: $ptr) -> Self {
                Self { ptr }
            }

            /// Get the raw position of the cursor
            #[inline]
            pub const fn base(&self) -> $ptr {
                self.ptr
            }

            /// Get a pointer to the element at the cursor
            #[inline]
            pub const fn as_ptr(&self) -> *const T {
                self.ptr as *const T
            }

            /// Get a reference to the element at the cursor.
            ///
            /// # Safety
            ///
            /// The cursor must point to a live element, and the element must outlive the returned reference.
            #[inline]
            pub unsafe fn get<'a>(&self) -> &'a T {
                deref_ptr(self.ptr)
            }

            /// Get a reference to the element `n` elements away from the cursor.
            ///
            /// # Safety
            ///
            /// The position `n` elements away must hold a live element, and the element must outlive the returned reference.
            #[inline]
            pub unsafe fn at<'a>(&self, n: isize) -> &'a T {
                deref_ptr(offset_ptr(self.ptr as *const T, n))
            }

            /// Move the cursor to the next element, returning the moved cursor
            #[inline]
            pub fn inc(&mut self) -> &mut Self {
                *self += 1;
                self
            }

            /// Move the cursor to the next element, returning the cursor from before the move
            #[inline]
            pub fn post_inc(&mut self) -> Self {
                let old = *self;
                *self += 1;
                old
            }

            /// Move the cursor to the previous element, returning the moved cursor
            #[inline]
            pub fn dec(&mut self) -> &mut Self {
                *self -= 1;
                self
            }

            /// Move the cursor to the previous element, returning the cursor from before the move
            #[inline]
            pub fn post_dec(&mut self) -> Self {
                let old = *self;
                *self -= 1;
                old
            }
        }

        impl<T> Clone for $name<T> {
            #[inline]
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self { ptr: ptr::$cast() }
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.ptr).finish()
            }
        }

        impl<T> PartialEq for $name<T> {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                self.ptr == other.ptr
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> PartialOrd for $name<T> {
            #[inline]
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl<T> Ord for $name<T> {
            #[inline]
            fn cmp(&self, other: &Self) -> Ordering {
                self.ptr.cmp(&other.ptr)
            }
        }

        impl<T> Add<isize> for $name<T> {
            type Output = Self;

            #[inline]
            fn add(self, rhs: isize) -> Self {
                Self { ptr: offset_ptr(self.ptr as *const T, rhs) as $ptr }
            }
        }

        impl<T> Add<$name<T>> for isize {
            type Output = $name<T>;

            #[inline]
            fn add(self, rhs: $name<T>) -> $name<T> {
                rhs + self
            }
        }

        impl<T> Sub<isize> for $name<T> {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: isize) -> Self {
                Self { ptr: offset_ptr(self.ptr as *const T, rhs.wrapping_neg()) as $ptr }
            }
        }

        impl<T> Sub for $name<T> {
            type Output = isize;

            #[inline]
            fn sub(self, rhs: Self) -> isize {
                ptr_distance(self.ptr as *const T, rhs.ptr as *const T)
            }
        }

        impl<T> AddAssign<isize> for $name<T> {
            #[inline]
            fn add_assign(&mut self, rhs: isize) {
                *self = *self + rhs;
            }
        }

        impl<T> SubAssign<isize> for $name<T> {
            #[inline]
            fn sub_assign(&mut self, rhs: isize) {
                *self = *self - rhs;
            }
        }
    };
}

/// Random access position inside of a [`DynArr`](super::DynArr), giving shared access to the elements.
///
/// A cursor does not borrow the array it was created from, it is a plain position.
/// Moving a cursor never fails and is never checked, only dereferencing it is `unsafe`.
/// A cursor is only meaningful as long as the array it points into isn't reallocated, and comparing or subtracting cursors is only meaningful for cursors into the same array.
pub struct Cursor<T> {
    ptr: *const T,
}
impl_cursor!(Cursor, *const T, null);

/// Random access position inside of a [`DynArr`](super::DynArr), giving mutable access to the elements.
///
/// See [`Cursor`] for the rules around using cursors.
pub struct CursorMut<T> {
    ptr: *mut T,
}
impl_cursor!(CursorMut, *mut T, null_mut);

impl<T> CursorMut<T> {
    /// Get a mutable pointer to the element at the cursor
    #[inline]
    pub const fn as_mut_ptr(&self) -> *mut T {
        self.ptr
    }

    /// Get a mutable reference to the element at the cursor.
    ///
    /// # Safety
    ///
    /// The cursor must point to a live element, the element must outlive the returned reference, and no other reference to it may exist.
    #[inline]
    pub unsafe fn get_mut<'a>(&self) -> &'a mut T {
        deref_ptr_mut(self.ptr)
    }

    /// Get a mutable reference to the element `n` elements away from the cursor.
    ///
    /// # Safety
    ///
    /// Same as [`CursorMut::get_mut`], for the position `n` elements away.
    #[inline]
    pub unsafe fn at_mut<'a>(&self, n: isize) -> &'a mut T {
        deref_ptr_mut(offset_ptr(self.ptr as *const T, n) as *mut T)
    }
}

impl<T> From<CursorMut<T>> for Cursor<T> {
    #[inline]
    fn from(cursor: CursorMut<T>) -> Self {
        Self { ptr: cursor.ptr as *const T }
    }
}

static_assertions::assert_eq_size!(Cursor<u64>, *const u64);
static_assertions::assert_eq_size!(CursorMut<u64>, *mut u64);
