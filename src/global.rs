//! System-heap-backed allocator with live-block tracking
//!
//! # Safety
//!
//! This module delegates every allocation to [`std::alloc::System`] and
//! records the issued descriptors in a hash set:
//! - the set's contents exactly equal the blocks currently checked out,
//!   so `owns` is a membership test and a forged or double-freed
//!   descriptor surfaces as `NotOwned` instead of corrupting the heap
//! - stored entries keep the allocation-time alignment; a caller who
//!   rebuilds a descriptor with alignment zero still frees with the
//!   exact original [`Layout`] (descriptor equality ignores alignment)
//! - zero-size requests round the backing allocation up to one byte so
//!   every descriptor has a distinct address and full round-trip
//!
//! ## Invariants
//!
//! - every pointer passed to `System.dealloc`/`System.realloc` came from
//!   `System.alloc` with the layout rebuilt from its stored entry
//! - set mutation happens under the lock strategy `L`

use core::alloc::Layout;
use core::ptr::NonNull;
use std::alloc::{GlobalAlloc, System};
use std::collections::HashSet;

use lock_api::{Mutex, RawMutex};

#[cfg(feature = "logging")]
use tracing::trace;

use crate::block::Block;
use crate::error::{AllocError, AllocResult};
use crate::lock::NoopLock;
use crate::stats::{AllocatorStats, OpCounters, StatisticsProvider};
use crate::traits::{Allocator, MemoryUsage};
use crate::utils::copy_prefix;

#[derive(Debug, Default)]
struct GlobalState {
    blocks: HashSet<Block>,
    live_bytes: usize,
    counters: OpCounters,
}

/// Allocator over the system heap.
///
/// Unlike the raw heap, this wrapper knows what it handed out: every
/// live block sits in a tracking set, `deallocate_all` can release
/// everything at once, and dropping the allocator frees whatever the
/// caller forgot.
///
/// `L` is the lock strategy guarding the tracking set; the system heap
/// itself is inherently thread-safe.
pub struct GlobalAllocator<L: RawMutex = NoopLock> {
    state: Mutex<L, GlobalState>,
}

impl GlobalAllocator {
    /// Creates an allocator with an empty tracking set and the default
    /// (no-op) lock. For a thread-safe instance use
    /// `GlobalAllocator::<SyncLock>::default()`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<L: RawMutex> GlobalAllocator<L> {
    /// Number of blocks currently checked out.
    #[must_use]
    pub fn tracked_blocks(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Rebuilds the layout a stored entry was allocated with.
    fn layout_of(stored: Block) -> Layout {
        // Infallible: the entry was created from a valid layout.
        Layout::from_size_align(stored.size().max(1), stored.align().max(1))
            .unwrap_or(Layout::new::<u8>())
    }

    fn release_locked(state: &mut GlobalState, block: Block) -> AllocResult<()> {
        let stored = state
            .blocks
            .take(&block)
            .ok_or_else(|| AllocError::not_owned(block))?;
        state.live_bytes -= stored.size();
        state.counters.deallocations += 1;
        // SAFETY: stored came out of the tracking set, so its pointer was
        // produced by System.alloc with exactly this layout and has not
        // been freed (removal above is the only path out of the set).
        unsafe { System.dealloc(stored.as_ptr(), Self::layout_of(stored)) };
        Ok(())
    }
}

impl<L: RawMutex> Default for GlobalAllocator<L> {
    fn default() -> Self {
        Self {
            state: Mutex::new(GlobalState::default()),
        }
    }
}

// SAFETY: System returns well-aligned pointers valid for the requested
// layout; the tracking set guarantees each pointer is freed exactly once
// and with its original layout.
unsafe impl<L: RawMutex> Allocator for GlobalAllocator<L> {
    fn allocate(&self, size: usize, align: usize) -> AllocResult<Block> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let layout = Layout::from_size_align(size.max(1), align.max(1))
            .map_err(|_| AllocError::out_of_capacity(size, align))?;

        // SAFETY: layout has non-zero size.
        let ptr = unsafe { System.alloc(layout) };
        let Some(memory) = NonNull::new(ptr) else {
            let mut state = self.state.lock();
            state.counters.failed += 1;
            return Err(AllocError::out_of_capacity(size, align));
        };

        let block = Block::new(memory, size, align.max(1));
        let mut state = self.state.lock();
        state.blocks.insert(block);
        state.live_bytes += size;
        state.counters.allocations += 1;
        let live_bytes = state.live_bytes;
        state.counters.note_peak(live_bytes);
        Ok(block)
    }

    unsafe fn reallocate(
        &self,
        block: Block,
        new_size: usize,
        align: usize,
    ) -> AllocResult<Block> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let mut state = self.state.lock();
        let stored = state
            .blocks
            .get(&block)
            .copied()
            .ok_or_else(|| AllocError::not_owned(block))?;

        let new_block = if align <= stored.align() {
            // The existing placement already satisfies the requested
            // alignment; let the system move the bytes.
            let old_layout = Self::layout_of(stored);
            // SAFETY: stored's pointer came from System.alloc with
            // old_layout; on failure the old allocation is untouched.
            let ptr = unsafe { System.realloc(stored.as_ptr(), old_layout, new_size.max(1)) };
            let Some(memory) = NonNull::new(ptr) else {
                state.counters.failed += 1;
                return Err(AllocError::out_of_capacity(new_size, align));
            };
            Block::new(memory, new_size, stored.align())
        } else {
            // Stricter alignment: fresh placement, copy, free the old.
            let new_layout = Layout::from_size_align(new_size.max(1), align)
                .map_err(|_| AllocError::out_of_capacity(new_size, align))?;
            // SAFETY: new_layout has non-zero size.
            let ptr = unsafe { System.alloc(new_layout) };
            let Some(memory) = NonNull::new(ptr) else {
                state.counters.failed += 1;
                return Err(AllocError::out_of_capacity(new_size, align));
            };
            let fresh = Block::new(memory, new_size, align);
            // SAFETY: stored is live, fresh was just allocated, ranges
            // are disjoint.
            unsafe { copy_prefix(stored, fresh) };
            // SAFETY: stored's pointer and layout match its allocation.
            unsafe { System.dealloc(stored.as_ptr(), Self::layout_of(stored)) };
            fresh
        };

        state.blocks.remove(&stored);
        state.blocks.insert(new_block);
        state.live_bytes = state.live_bytes - stored.size() + new_size;
        state.counters.reallocations += 1;
        let live_bytes = state.live_bytes;
        state.counters.note_peak(live_bytes);
        Ok(new_block)
    }

    unsafe fn deallocate(&self, block: Block) -> AllocResult<()> {
        let mut state = self.state.lock();
        Self::release_locked(&mut state, block)
    }

    fn deallocate_all(&self) {
        let mut state = self.state.lock();
        let GlobalState { blocks, live_bytes, .. } = &mut *state;
        #[cfg(feature = "logging")]
        if !blocks.is_empty() {
            trace!(blocks = blocks.len(), bytes = *live_bytes, "releasing all tracked blocks");
        }
        for stored in blocks.drain() {
            // SAFETY: every entry in the set is a live System allocation
            // with the layout rebuilt from its stored fields.
            unsafe { System.dealloc(stored.as_ptr(), Self::layout_of(stored)) };
        }
        *live_bytes = 0;
    }

    fn max_size(&self) -> usize {
        isize::MAX as usize
    }

    fn owns(&self, block: Block) -> bool {
        self.state.lock().blocks.contains(&block)
    }
}

impl<L: RawMutex> MemoryUsage for GlobalAllocator<L> {
    fn used_memory(&self) -> usize {
        self.state.lock().live_bytes
    }

    fn available_memory(&self) -> Option<usize> {
        // The system heap has no inherent limit this wrapper could name.
        None
    }
}

impl<L: RawMutex> StatisticsProvider for GlobalAllocator<L> {
    fn statistics(&self) -> AllocatorStats {
        let state = self.state.lock();
        state.counters.snapshot(state.live_bytes)
    }

    fn reset_statistics(&self) {
        let mut state = self.state.lock();
        state.counters = OpCounters::default();
    }
}

impl<L: RawMutex> Drop for GlobalAllocator<L> {
    fn drop(&mut self) {
        self.deallocate_all();
    }
}

impl<L: RawMutex> core::fmt::Debug for GlobalAllocator<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GlobalAllocator")
            .field("tracked_blocks", &state.blocks.len())
            .field("live_bytes", &state.live_bytes)
            .finish()
    }
}
