//! Size-thresholded allocator demultiplexer
//!
//! Routes every operation by size: requests of at most `THRESHOLD` bytes
//! go to the `little` shelf, larger ones to `big`. Routing decisions for
//! live blocks use the descriptor's recorded size, never the current
//! request alone, so a reallocation that crosses the threshold migrates
//! the block deterministically between shelves.

use crate::block::Block;
use crate::error::AllocResult;
use crate::traits::Allocator;
use crate::utils::copy_prefix;

#[cfg(feature = "logging")]
use tracing::trace;

/// Routes allocations by request size to a `little` or `big` backend.
///
/// A classic pairing puts a pool of small arenas on the little shelf and
/// the heap on the big one:
///
/// ```
/// use polyalloc::{GlobalAllocator, PoolAllocator, SegregatingAllocator};
///
/// let alloc: SegregatingAllocator<256, _, _> = SegregatingAllocator::new(
///     PoolAllocator::<4096, _>::new(GlobalAllocator::new()),
///     GlobalAllocator::new(),
/// );
/// # let _ = alloc;
/// ```
#[derive(Debug)]
pub struct SegregatingAllocator<const THRESHOLD: usize, Little, Big> {
    little: Little,
    big: Big,
}

impl<const THRESHOLD: usize, Little, Big> SegregatingAllocator<THRESHOLD, Little, Big> {
    /// Composes the two shelves.
    pub fn new(little: Little, big: Big) -> Self {
        Self { little, big }
    }

    /// The shelf serving requests of at most `THRESHOLD` bytes.
    pub fn little(&self) -> &Little {
        &self.little
    }

    /// The shelf serving requests above `THRESHOLD` bytes.
    pub fn big(&self) -> &Big {
        &self.big
    }

    /// Decomposes into the two shelves.
    pub fn into_inner(self) -> (Little, Big) {
        (self.little, self.big)
    }

    #[inline]
    fn is_little(size: usize) -> bool {
        size <= THRESHOLD
    }
}

// SAFETY: Routing is a pure function of the recorded size, so every
// block returns to the shelf that issued it; migrations copy before the
// source block is released.
unsafe impl<const THRESHOLD: usize, Little, Big> Allocator
    for SegregatingAllocator<THRESHOLD, Little, Big>
where
    Little: Allocator,
    Big: Allocator,
{
    fn allocate(&self, size: usize, align: usize) -> AllocResult<Block> {
        if Self::is_little(size) {
            self.little.allocate(size, align)
        } else {
            self.big.allocate(size, align)
        }
    }

    unsafe fn reallocate(
        &self,
        block: Block,
        new_size: usize,
        align: usize,
    ) -> AllocResult<Block> {
        match (Self::is_little(block.size()), Self::is_little(new_size)) {
            // Staying on one shelf: plain delegation.
            (true, true) => {
                // SAFETY: little issued every block recorded at or below
                // the threshold.
                unsafe { self.little.reallocate(block, new_size, align) }
            }
            (false, false) => {
                // SAFETY: big issued every block recorded above the
                // threshold.
                unsafe { self.big.reallocate(block, new_size, align) }
            }
            // Crossing the threshold: allocate on the target shelf, copy
            // the overlapping prefix, release from the source shelf.
            (true, false) => {
                let fresh = self.big.allocate(new_size, align)?;
                #[cfg(feature = "logging")]
                trace!(old_size = block.size(), new_size, "promoting block to big shelf");
                // SAFETY: block is live on little, fresh is a disjoint
                // big-shelf range.
                unsafe { copy_prefix(block, fresh) };
                // SAFETY: block was recorded little-sized, so little
                // issued it.
                unsafe { self.little.deallocate(block)? };
                Ok(fresh)
            }
            (false, true) => {
                let fresh = self.little.allocate(new_size, align)?;
                #[cfg(feature = "logging")]
                trace!(old_size = block.size(), new_size, "demoting block to little shelf");
                // SAFETY: block is live on big, fresh is a disjoint
                // little-shelf range.
                unsafe { copy_prefix(block, fresh) };
                // SAFETY: block was recorded big-sized, so big issued it.
                unsafe { self.big.deallocate(block)? };
                Ok(fresh)
            }
        }
    }

    unsafe fn deallocate(&self, block: Block) -> AllocResult<()> {
        if Self::is_little(block.size()) {
            // SAFETY: routed to the issuing shelf by recorded size.
            unsafe { self.little.deallocate(block) }
        } else {
            // SAFETY: routed to the issuing shelf by recorded size.
            unsafe { self.big.deallocate(block) }
        }
    }

    fn deallocate_all(&self) {
        self.big.deallocate_all();
        self.little.deallocate_all();
    }

    fn max_size(&self) -> usize {
        // A big shelf smaller than the threshold can happen; the little
        // shelf still accepts up to THRESHOLD.
        THRESHOLD.max(self.big.max_size())
    }

    fn owns(&self, block: Block) -> bool {
        if Self::is_little(block.size()) {
            self.little.owns(block)
        } else {
            self.big.owns(block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GlobalAllocator, StackAllocator};

    #[test]
    fn routes_by_request_size() {
        let alloc: SegregatingAllocator<64, _, _> = SegregatingAllocator::new(
            StackAllocator::<1024>::new(),
            GlobalAllocator::new(),
        );

        let small = alloc.allocate(32, 8).unwrap();
        let large = alloc.allocate(100, 8).unwrap();
        assert!(alloc.little().owns(small));
        assert!(alloc.big().owns(large));

        unsafe {
            alloc.deallocate(large).unwrap();
            alloc.deallocate(small).unwrap();
        }
    }

    #[test]
    fn threshold_boundary_goes_little() {
        let alloc: SegregatingAllocator<64, _, _> = SegregatingAllocator::new(
            StackAllocator::<1024>::new(),
            GlobalAllocator::new(),
        );
        let at_threshold = alloc.allocate(64, 8).unwrap();
        assert!(alloc.little().owns(at_threshold));
        unsafe { alloc.deallocate(at_threshold).unwrap() };
    }
}
