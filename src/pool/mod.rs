//! Pool of bump arenas, heap-ordered by remaining capacity
//!
//! ## Modules
//! - `allocator` - the [`PoolAllocator`] implementation
//! - `heap` - the sift primitives maintaining the max-heap order

mod allocator;
mod heap;

pub use allocator::PoolAllocator;
