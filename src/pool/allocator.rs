//! Main pool allocator implementation
//!
//! # Safety
//!
//! The pool owns a growable collection of fixed-size bump arenas:
//! - every arena's buffer is provisioned from the upstream allocator and
//!   returned to it when the pool drops; the arena headers live in the
//!   heap-ordered vec and may be swapped freely because issued addresses
//!   point into the stable buffers, not the headers
//! - all arena access happens under the pool's lock strategy `L`; the
//!   arenas themselves run lock-free (`NoopLock`)
//! - every outstanding block belongs to exactly one arena, so ownership
//!   dispatch is a scan over disjoint address ranges
//!
//! ## Invariants
//!
//! - the vec is a max-heap keyed by each arena's remaining capacity
//!   after every public operation
//! - a successful allocation from the root decreases its key: sift down
//! - a free or shrink increases an arbitrary key: sift up from its index
//! - an in-place grow decreases an arbitrary key: sift both ways

use lock_api::{Mutex, RawMutex};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

use super::heap;
use crate::block::Block;
use crate::error::{AllocError, AllocResult};
use crate::lock::NoopLock;
use crate::stack::{StackAllocator, StackConfig};
use crate::traits::{Allocator, MemoryUsage};
use crate::utils::{copy_prefix, CACHE_LINE};

/// One pool member: a bump arena over an upstream-provisioned buffer.
struct Arena<const N: usize> {
    stack: StackAllocator<N, NoopLock>,
    backing: Block,
}

impl<const N: usize> Arena<N> {
    #[inline]
    fn key(&self) -> usize {
        self.stack.max_size()
    }
}

/// Pool of `N`-byte bump arenas kept as a max-heap by remaining capacity.
///
/// Requests go to the arena with the most room (the heap root); when even
/// that one is full, a new arena is provisioned from the upstream
/// allocator. Blocks larger than `N` are never serviceable here and fail
/// up front — compose with [`FallbackAllocator`](crate::FallbackAllocator)
/// or [`SegregatingAllocator`](crate::SegregatingAllocator) to route
/// oversized requests elsewhere.
///
/// ```
/// use polyalloc::{Allocator, GlobalAllocator, PoolAllocator};
///
/// let pool: PoolAllocator<4096, _> = PoolAllocator::new(GlobalAllocator::new());
/// let block = pool.allocate(1000, 8).unwrap();
/// # unsafe { pool.deallocate(block).unwrap() };
/// ```
pub struct PoolAllocator<const N: usize, U: Allocator, L: RawMutex = NoopLock> {
    upstream: U,
    arenas: Mutex<L, Vec<Arena<N>>>,
}

impl<const N: usize, U: Allocator> PoolAllocator<N, U> {
    /// Creates an empty pool with the default (no-op) lock; arenas are
    /// provisioned on demand.
    pub fn new(upstream: U) -> Self {
        Self::with_lock(upstream)
    }
}

impl<const N: usize, U: Allocator, L: RawMutex> PoolAllocator<N, U, L> {
    /// Creates an empty pool with an explicit lock strategy named in the
    /// type, e.g. `PoolAllocator::<4096, _, SyncLock>::with_lock(..)`.
    pub fn with_lock(upstream: U) -> Self {
        Self {
            upstream,
            arenas: Mutex::new(Vec::new()),
        }
    }

    /// The allocator arena buffers are provisioned from.
    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Number of arenas currently provisioned.
    #[must_use]
    pub fn arena_count(&self) -> usize {
        self.arenas.lock().len()
    }

    /// Remaining capacity of each arena, in internal heap order. The
    /// first entry is the root: the arena with the most room.
    #[must_use]
    pub fn remaining_capacities(&self) -> Vec<usize> {
        self.arenas.lock().iter().map(Arena::key).collect()
    }

    fn provision(&self) -> AllocResult<Arena<N>> {
        let backing = self.upstream.allocate(N, CACHE_LINE)?;
        #[cfg(feature = "logging")]
        debug!(arena_bytes = N, "provisioning pool arena");
        Ok(Arena {
            stack: StackAllocator::from_block(backing, StackConfig::production()),
            backing,
        })
    }

    /// Allocation core; callers hold the pool lock.
    fn allocate_locked(
        &self,
        arenas: &mut Vec<Arena<N>>,
        size: usize,
        align: usize,
    ) -> AllocResult<Block> {
        if size > N {
            return Err(AllocError::out_of_capacity(size, align));
        }

        if let Some(root) = arenas.first() {
            match root.stack.allocate(size, align) {
                Ok(block) => {
                    // The root's key decreased.
                    heap::sift_down(arenas, 0, Arena::key);
                    return Ok(block);
                }
                Err(err) if err.is_out_of_capacity() => {}
                Err(err) => return Err(err),
            }
        }

        let arena = self.provision()?;
        match arena.stack.allocate(size, align) {
            Ok(block) => {
                arenas.push(arena);
                let last = arenas.len() - 1;
                heap::sift_up(arenas, last, Arena::key);
                Ok(block)
            }
            Err(err) => {
                // Even a fresh arena cannot hold it (an alignment above
                // the cache line can defeat the full capacity).
                let _returned = unsafe { self.upstream.deallocate(arena.backing) };
                debug_assert!(_returned.is_ok());
                Err(err)
            }
        }
    }
}

// SAFETY: Every block is issued by exactly one arena over a stable
// upstream buffer; all heap reordering swaps arena headers, never
// buffers; failed operations leave both the arenas and the caller's
// block untouched.
unsafe impl<const N: usize, U: Allocator, L: RawMutex> Allocator for PoolAllocator<N, U, L> {
    fn allocate(&self, size: usize, align: usize) -> AllocResult<Block> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let mut arenas = self.arenas.lock();
        self.allocate_locked(&mut arenas, size, align)
    }

    unsafe fn reallocate(
        &self,
        block: Block,
        new_size: usize,
        align: usize,
    ) -> AllocResult<Block> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let mut arenas = self.arenas.lock();

        if block.size() == 0 {
            // Zero-size descriptors occupy no arena range (deallocate
            // accepts them the same way); growing one is a plain pool
            // allocation.
            return self.allocate_locked(&mut arenas, new_size, align);
        }

        let idx = arenas
            .iter()
            .position(|arena| arena.stack.owns(block))
            .ok_or_else(|| AllocError::not_owned(block))?;

        if new_size > N {
            // No arena will ever hold it; the block stays intact.
            return Err(AllocError::out_of_capacity(new_size, align));
        }

        // SAFETY: dispatched to the owning arena.
        match unsafe { arenas[idx].stack.reallocate(block, new_size, align) } {
            Ok(moved) => {
                // In-place resize may have moved the key either way.
                let settled = heap::sift_up(&mut arenas, idx, Arena::key);
                heap::sift_down(&mut arenas, settled, Arena::key);
                Ok(moved)
            }
            Err(err) if err.is_out_of_capacity() => {
                // Pool-level migration: a home anywhere in the pool,
                // possibly a freshly provisioned arena.
                let fresh = self.allocate_locked(&mut arenas, new_size, align)?;
                // SAFETY: block is live, fresh was just issued, and the
                // two ranges live in disjoint arena buffers (or disjoint
                // ranges of the same buffer past the old tip).
                unsafe { copy_prefix(block, fresh) };

                // The allocation's sifting may have moved the owner.
                let owner = arenas
                    .iter()
                    .position(|arena| arena.stack.owns(block))
                    .ok_or_else(|| AllocError::not_owned(block))?;
                // SAFETY: dispatched to the owning arena.
                unsafe { arenas[owner].stack.deallocate(block)? };
                heap::sift_up(&mut arenas, owner, Arena::key);
                #[cfg(feature = "logging")]
                trace!(
                    old_size = block.size(),
                    new_size,
                    "migrated block between pool arenas"
                );
                Ok(fresh)
            }
            Err(err) => Err(err),
        }
    }

    unsafe fn deallocate(&self, block: Block) -> AllocResult<()> {
        if block.size() == 0 {
            // Zero-size descriptors occupy no arena range.
            return Ok(());
        }
        let mut arenas = self.arenas.lock();
        let idx = arenas
            .iter()
            .position(|arena| arena.stack.owns(block))
            .ok_or_else(|| AllocError::not_owned(block))?;
        // SAFETY: dispatched to the owning arena.
        unsafe { arenas[idx].stack.deallocate(block)? };
        // The arena's key may have increased.
        heap::sift_up(&mut arenas, idx, Arena::key);
        Ok(())
    }

    fn deallocate_all(&self) {
        let arenas = self.arenas.lock();
        for arena in arenas.iter() {
            arena.stack.deallocate_all();
        }
        // All keys reset to N simultaneously; heap order is preserved.
    }

    fn max_size(&self) -> usize {
        N
    }

    fn owns(&self, block: Block) -> bool {
        self.arenas
            .lock()
            .iter()
            .any(|arena| arena.stack.owns(block))
    }
}

impl<const N: usize, U: Allocator, L: RawMutex> MemoryUsage for PoolAllocator<N, U, L> {
    fn used_memory(&self) -> usize {
        self.arenas
            .lock()
            .iter()
            .map(|arena| arena.stack.used())
            .sum()
    }

    fn available_memory(&self) -> Option<usize> {
        // The pool grows on demand; its limit is the upstream's.
        None
    }
}

impl<const N: usize, U: Allocator, L: RawMutex> Drop for PoolAllocator<N, U, L> {
    fn drop(&mut self) {
        let arenas = self.arenas.get_mut();
        for arena in arenas.drain(..) {
            // SAFETY: backing came from the upstream and the arena that
            // used it is dropped without touching the buffer (external
            // backing is never freed by the arena itself).
            let _returned = unsafe { self.upstream.deallocate(arena.backing) };
            debug_assert!(_returned.is_ok(), "pool backing rejected by upstream");
        }
    }
}

impl<const N: usize, U: Allocator, L: RawMutex> core::fmt::Debug for PoolAllocator<N, U, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("arena_size", &N)
            .field("arenas", &self.arenas.lock().len())
            .finish()
    }
}
