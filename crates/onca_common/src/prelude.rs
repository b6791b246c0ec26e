pub use crate::alloc::{Allocator, AllocPolicy, primitives::Mallocator};

pub use crate::collections::{DynArr, Cursor, CursorMut};
pub use crate::dynarr;
