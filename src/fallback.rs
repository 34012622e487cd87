//! Primary/secondary allocator composition
//!
//! Requests go to the primary; when (and only when) the primary reports
//! `OutOfCapacity`, the secondary takes over. This is the one place in
//! the crate where a live block routinely migrates between backends:
//! a `reallocate` whose owning side has no room is satisfied by copying
//! the bytes into the other side.

use crate::block::Block;
use crate::error::{AllocError, AllocResult};
use crate::traits::Allocator;
use crate::utils::copy_prefix;

#[cfg(feature = "logging")]
use tracing::trace;

/// Tries `primary` first; falls back to `secondary` on capacity failure.
///
/// Children are owned by value and may themselves be composites, so
/// arbitrary cascade depths compose out of pairs:
///
/// ```
/// use polyalloc::{FallbackAllocator, GlobalAllocator, StackAllocator};
///
/// // A small arena for the hot path, backed by the heap.
/// let alloc = FallbackAllocator::new(
///     StackAllocator::<4096>::new(),
///     GlobalAllocator::new(),
/// );
/// # let _ = alloc;
/// ```
#[derive(Debug)]
pub struct FallbackAllocator<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackAllocator<P, S> {
    /// Composes two allocators into a fallback pair.
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    /// The preferred backend.
    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// The overflow backend.
    pub fn secondary(&self) -> &S {
        &self.secondary
    }

    /// Decomposes into the two children.
    pub fn into_inner(self) -> (P, S) {
        (self.primary, self.secondary)
    }
}

/// Reallocates within `owner`, migrating to `other` when the owner has
/// no room. On migration failure the original block stays intact.
unsafe fn reallocate_or_migrate<A, B>(
    owner: &A,
    other: &B,
    block: Block,
    new_size: usize,
    align: usize,
) -> AllocResult<Block>
where
    A: Allocator + ?Sized,
    B: Allocator + ?Sized,
{
    // SAFETY: caller guarantees block was issued by owner.
    match unsafe { owner.reallocate(block, new_size, align) } {
        Ok(moved) => Ok(moved),
        Err(err) if err.is_out_of_capacity() => {
            let fresh = other.allocate(new_size, align)?;
            #[cfg(feature = "logging")]
            trace!(
                old_size = block.size(),
                new_size,
                "migrating block across fallback backends"
            );
            // SAFETY: block is live, fresh was just issued by the other
            // backend, ranges are disjoint.
            unsafe { copy_prefix(block, fresh) };
            // SAFETY: block is owned by owner per the caller's dispatch.
            unsafe { owner.deallocate(block)? };
            Ok(fresh)
        }
        Err(err) => Err(err),
    }
}

// SAFETY: Both children uphold the contract; dispatch preserves the
// issuing backend for every block, so each block returns to the backend
// that produced it.
unsafe impl<P: Allocator, S: Allocator> Allocator for FallbackAllocator<P, S> {
    fn allocate(&self, size: usize, align: usize) -> AllocResult<Block> {
        match self.primary.allocate(size, align) {
            Ok(block) => Ok(block),
            Err(err) if err.is_out_of_capacity() => {
                #[cfg(feature = "logging")]
                trace!(size, align, "primary exhausted, trying secondary");
                self.secondary.allocate(size, align)
            }
            Err(err) => Err(err),
        }
    }

    unsafe fn reallocate(
        &self,
        block: Block,
        new_size: usize,
        align: usize,
    ) -> AllocResult<Block> {
        if self.primary.owns(block) {
            // SAFETY: dispatched to the owning child.
            unsafe {
                reallocate_or_migrate(&self.primary, &self.secondary, block, new_size, align)
            }
        } else if self.secondary.owns(block) {
            // SAFETY: dispatched to the owning child.
            unsafe {
                reallocate_or_migrate(&self.secondary, &self.primary, block, new_size, align)
            }
        } else if block.size() == 0 {
            // Arena-issued zero-size descriptors are tracked by neither
            // child; growing one is a plain allocation.
            self.allocate(new_size, align)
        } else {
            Err(AllocError::not_owned(block))
        }
    }

    unsafe fn deallocate(&self, block: Block) -> AllocResult<()> {
        if self.primary.owns(block) {
            // SAFETY: dispatched to the owning child.
            unsafe { self.primary.deallocate(block) }
        } else if self.secondary.owns(block) {
            // SAFETY: dispatched to the owning child.
            unsafe { self.secondary.deallocate(block) }
        } else if block.size() == 0 {
            // Arena-issued zero-size descriptors occupy no range and are
            // not tracked by either child.
            Ok(())
        } else {
            Err(AllocError::not_owned(block))
        }
    }

    fn deallocate_all(&self) {
        self.primary.deallocate_all();
        self.secondary.deallocate_all();
    }

    fn max_size(&self) -> usize {
        self.primary.max_size().max(self.secondary.max_size())
    }

    fn owns(&self, block: Block) -> bool {
        self.primary.owns(block) || self.secondary.owns(block)
    }
}
