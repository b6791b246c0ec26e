
mod imp;

mod dynarr;

use core::{alloc::Layout, fmt};

pub use dynarr::*;

//--------------------------------------------------------------

macro_rules! impl_slice_partial_eq_generic {
    ([$($vars:tt)*] $lhs:ty, $rhs:ty $(where $ty:ty: $bound:ident)?) => {
        impl<T, U, $($vars)*> PartialEq<$rhs> for $lhs  where
            T : PartialEq<U>,
            $($ty: $bound)?
        {
            #[inline]
            fn eq(&self, other: &$rhs) -> bool { self[..] == other[..] }
            #[inline]
            fn ne(&self, other: &$rhs) -> bool { self[..] != other[..] }
        }
    };
}
use impl_slice_partial_eq_generic;

//--------------------------------------------------------------

/// Error returned when a container could not reserve the memory it needed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TryReserveError {
    /// The requested capacity exceeds the maximum number of elements the container can hold.
    CapacityOverflow,
    /// The allocator could not provide memory for the given layout.
    AllocError {
        layout: Layout,
    },
}

impl fmt::Display for TryReserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityOverflow => f.write_str("memory allocation failed because the computed capacity exceeded the collection's maximum"),
            Self::AllocError { layout } => write!(f, "memory allocation of {} bytes (align {}) failed", layout.size(), layout.align()),
        }
    }
}

impl std::error::Error for TryReserveError {}

/// Error returned by checked element access when the index lies outside of the container.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OutOfRangeError {
    pub index: usize,
    pub len:   usize,
}

impl fmt::Display for OutOfRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index {} out of range for container of length {}", self.index, self.len)
    }
}

impl std::error::Error for OutOfRangeError {}

/// Turn the result of a fallible reservation into a panic or an allocation error handler call.
#[inline]
#[track_caller]
pub(crate) fn handle_reserve<R>(res: Result<R, TryReserveError>) -> R {
    match res {
        Ok(val) => val,
        Err(TryReserveError::CapacityOverflow) => capacity_overflow(),
        Err(TryReserveError::AllocError { layout }) => std::alloc::handle_alloc_error(layout),
    }
}

#[cold]
#[track_caller]
fn capacity_overflow() -> ! {
    panic!("capacity overflow");
}

//--------------------------------------------------------------

/// Calculate the capacity a full container should grow to when it needs room for at least `min_capacity` elements.
///
/// Doubles the current capacity (at least 1), or returns the minimum required capacity, whichever is bigger, clamped to `max_len`.
pub(crate) fn grow_capacity(cur_capacity: usize, min_capacity: usize, max_len: usize) -> Result<usize, TryReserveError> {
    if min_capacity > max_len {
        return Err(TryReserveError::CapacityOverflow);
    }
    let double_cap = cur_capacity.saturating_mul(2).max(1);
    Ok(double_cap.max(min_capacity).min(max_len))
}

#[cfg(test)]
mod tests {
    use std::alloc::Layout;

    use super::*;

    #[test]
    fn grow_doubles_or_takes_min() {
        assert_eq!(grow_capacity(0, 1, 100), Ok(1));
        assert_eq!(grow_capacity(4, 5, 100), Ok(8));
        assert_eq!(grow_capacity(4, 13, 100), Ok(13));
        assert_eq!(grow_capacity(60, 61, 100), Ok(100));
        assert_eq!(grow_capacity(60, 101, 100), Err(TryReserveError::CapacityOverflow));
    }

    #[test]
    fn error_display() {
        let layout = Layout::new::<[u32; 4]>();
        assert_eq!(TryReserveError::AllocError { layout }.to_string(), "memory allocation of 16 bytes (align 4) failed");
        assert_eq!(OutOfRangeError { index: 5, len: 2 }.to_string(), "index 5 out of range for container of length 2");
    }

    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn handle_reserve_panics_on_overflow() {
        handle_reserve::<()>(Err(TryReserveError::CapacityOverflow));
    }
}
