//! The allocator contract
//!
//! Every backend in this crate — leaf or composite — exposes exactly the
//! operations of [`Allocator`], taking and returning [`Block`]
//! descriptors by value. Composites ([`FallbackAllocator`],
//! [`PoolAllocator`], [`SegregatingAllocator`]) satisfy the same
//! contract as the leaves they wrap, so allocation strategies compose
//! recursively.
//!
//! The trait is dyn-compatible; heterogeneous setups can route through
//! `&dyn Allocator` or `Box<dyn Allocator>`, while the generic composers
//! monomorphize the dispatch away.
//!
//! [`FallbackAllocator`]: crate::FallbackAllocator
//! [`PoolAllocator`]: crate::PoolAllocator
//! [`SegregatingAllocator`]: crate::SegregatingAllocator

use crate::block::Block;
use crate::error::AllocResult;

/// Uniform contract over every allocator in the crate.
///
/// All methods take `&self`; leaves keep their mutable state behind a
/// pluggable lock (see [`crate::lock`]). `allocate` and `reallocate` are
/// the only operations a correct caller should expect to fail;
/// `deallocate` fails only on a caller bug (a block this allocator never
/// issued).
///
/// # Safety
///
/// Implementors must uphold, for every block they return from
/// `allocate(size, align)`:
///
/// - the block spans at least `size` bytes of memory valid for reads and
///   writes until the block is released,
/// - the block's address is a multiple of `align`,
/// - `owns(block)` is true until the block is released (zero-size
///   descriptors from arenas excepted; they occupy no range),
/// - on a failed `allocate`/`reallocate` the allocator's observable
///   state and the caller's input block are unchanged.
pub unsafe trait Allocator {
    /// Produces a block of at least `size` bytes aligned to `align`.
    ///
    /// `align` must be a power of two; violations are caught by debug
    /// assertions only. `size == 0` never fails: backends return a
    /// distinct or positionally meaningful zero-size descriptor.
    ///
    /// # Errors
    ///
    /// `OutOfCapacity` if the backend has no room for the request.
    fn allocate(&self, size: usize, align: usize) -> AllocResult<Block>;

    /// Produces a block of at least `new_size` bytes containing the
    /// first `min(block.size, new_size)` bytes of `block`.
    ///
    /// On success the input block is consumed. On failure the input
    /// block is untouched and still owned.
    ///
    /// # Errors
    ///
    /// `OutOfCapacity` if no backend can hold the new size; `NotOwned`
    /// if `block` was not issued by this allocator.
    ///
    /// # Safety
    ///
    /// `block` must have been returned by this allocator (or a child it
    /// dispatches for) and not yet released, with its descriptor
    /// unmodified except for the alignment field.
    unsafe fn reallocate(&self, block: Block, new_size: usize, align: usize)
        -> AllocResult<Block>;

    /// Releases a previously issued block.
    ///
    /// # Errors
    ///
    /// `NotOwned` if `block` was not issued by this allocator. Double
    /// frees are undefined; backends detect them where cheap.
    ///
    /// # Safety
    ///
    /// Same descriptor requirements as [`Allocator::reallocate`]; after
    /// this call the block's memory must not be touched.
    unsafe fn deallocate(&self, block: Block) -> AllocResult<()>;

    /// Releases every live block. Idempotent; recursive for composites.
    ///
    /// Every outstanding descriptor is invalidated, so callers must not
    /// touch previously issued memory afterwards.
    fn deallocate_all(&self);

    /// Advisory upper bound on a single request this allocator would
    /// presently satisfy. Not a guarantee under concurrent use.
    fn max_size(&self) -> usize;

    /// True iff `block` was issued by this allocator and is still live.
    fn owns(&self, block: Block) -> bool;
}

// SAFETY: Forwarding preserves the implementor's guarantees verbatim.
unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> AllocResult<Block> {
        (**self).allocate(size, align)
    }

    #[inline]
    unsafe fn reallocate(
        &self,
        block: Block,
        new_size: usize,
        align: usize,
    ) -> AllocResult<Block> {
        // SAFETY: Caller's contract forwarded unchanged.
        unsafe { (**self).reallocate(block, new_size, align) }
    }

    #[inline]
    unsafe fn deallocate(&self, block: Block) -> AllocResult<()> {
        // SAFETY: Caller's contract forwarded unchanged.
        unsafe { (**self).deallocate(block) }
    }

    #[inline]
    fn deallocate_all(&self) {
        (**self).deallocate_all();
    }

    #[inline]
    fn max_size(&self) -> usize {
        (**self).max_size()
    }

    #[inline]
    fn owns(&self, block: Block) -> bool {
        (**self).owns(block)
    }
}

// SAFETY: Forwarding preserves the implementor's guarantees verbatim.
unsafe impl<A: Allocator + ?Sized> Allocator for Box<A> {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> AllocResult<Block> {
        (**self).allocate(size, align)
    }

    #[inline]
    unsafe fn reallocate(
        &self,
        block: Block,
        new_size: usize,
        align: usize,
    ) -> AllocResult<Block> {
        // SAFETY: Caller's contract forwarded unchanged.
        unsafe { (**self).reallocate(block, new_size, align) }
    }

    #[inline]
    unsafe fn deallocate(&self, block: Block) -> AllocResult<()> {
        // SAFETY: Caller's contract forwarded unchanged.
        unsafe { (**self).deallocate(block) }
    }

    #[inline]
    fn deallocate_all(&self) {
        (**self).deallocate_all();
    }

    #[inline]
    fn max_size(&self) -> usize {
        (**self).max_size()
    }

    #[inline]
    fn owns(&self, block: Block) -> bool {
        (**self).owns(block)
    }
}

/// Memory usage reporting for the leaf allocators.
///
/// `available_memory` is `None` for backends without an inherent limit
/// (the system heap, or a pool that provisions arenas on demand).
pub trait MemoryUsage {
    /// Bytes currently checked out of this allocator.
    fn used_memory(&self) -> usize;

    /// Bytes still available, when the backend has a fixed capacity.
    fn available_memory(&self) -> Option<usize>;

    /// Total capacity, when fixed.
    fn total_memory(&self) -> Option<usize> {
        self.available_memory()
            .map(|available| self.used_memory() + available)
    }
}
