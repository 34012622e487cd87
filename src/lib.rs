//! # polyalloc
//!
//! Composable policy-based memory allocators.
//!
//! This crate provides a small family of raw-memory allocators that all
//! speak one contract — [`Allocator`] — and compose into custom
//! allocation strategies:
//!
//! - [`StackAllocator`]: monotonic bump arena with LIFO tip reclaim
//! - [`GlobalAllocator`]: system heap with live-block tracking
//! - [`FallbackAllocator`]: try a primary, overflow into a secondary
//! - [`PoolAllocator`]: growable pool of arenas, heap-ordered by
//!   remaining capacity
//! - [`SegregatingAllocator`]: route by request size to a "little" or
//!   "big" backend
//!
//! Composites expose the same contract as leaves, so strategies nest
//! arbitrarily. Every block an allocator hands out must come back to the
//! allocator that produced it; composites dispatch that routing
//! internally.
//!
//! ## Quick start
//!
//! ```
//! use polyalloc::prelude::*;
//!
//! # fn main() -> polyalloc::AllocResult<()> {
//! // Small objects from pooled arenas, big ones straight from the heap.
//! let alloc: SegregatingAllocator<256, _, _> = SegregatingAllocator::new(
//!     PoolAllocator::<4096, _>::new(GlobalAllocator::new()),
//!     GlobalAllocator::new(),
//! );
//!
//! let block = alloc.allocate(64, 8)?;
//! assert!(alloc.owns(block));
//! unsafe { alloc.deallocate(block)? };
//! # Ok(())
//! # }
//! ```
//!
//! ## Locking
//!
//! Leaf allocators are parameterized by a lock strategy (see
//! [`lock`]). The default [`NoopLock`] compiles away and pins the
//! allocator to one thread; substituting [`SyncLock`] makes that leaf
//! thread-safe. Composites never lock; linearization is the locked
//! leaves' job.
//!
//! ## Features
//!
//! - `logging` (default): allocation-path events via `tracing`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

mod block;
mod error;
mod stats;
mod traits;
mod utils;

pub mod adaptor;
pub mod fallback;
pub mod global;
pub mod lock;
pub mod pool;
pub mod segregating;
pub mod stack;

pub use adaptor::Adaptor;
pub use block::Block;
pub use error::{AllocError, AllocErrorKind, AllocResult};
pub use fallback::FallbackAllocator;
pub use global::GlobalAllocator;
pub use lock::{NoopLock, SyncLock};
pub use pool::PoolAllocator;
pub use segregating::SegregatingAllocator;
pub use stack::{StackAllocator, StackConfig};
pub use stats::{AllocatorStats, StatisticsProvider};
pub use traits::{Allocator, MemoryUsage};

/// Convenient re-exports of the commonly used types and traits.
pub mod prelude {
    pub use crate::adaptor::Adaptor;
    pub use crate::block::Block;
    pub use crate::error::{AllocError, AllocErrorKind, AllocResult};
    pub use crate::fallback::FallbackAllocator;
    pub use crate::global::GlobalAllocator;
    pub use crate::lock::{NoopLock, SyncLock};
    pub use crate::pool::PoolAllocator;
    pub use crate::segregating::SegregatingAllocator;
    pub use crate::stack::{StackAllocator, StackConfig};
    pub use crate::stats::{AllocatorStats, StatisticsProvider};
    pub use crate::traits::{Allocator, MemoryUsage};
}
