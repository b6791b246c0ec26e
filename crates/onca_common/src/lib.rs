//! Common building blocks: the allocator abstraction and allocator-aware containers.

pub mod alloc;
pub mod collections;

pub mod prelude;
