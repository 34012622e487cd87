//! Main stack allocator implementation
//!
//! # Safety
//!
//! This module hands out disjoint sub-ranges of one fixed buffer:
//! - the buffer lives behind a stable pointer for the allocator's whole
//!   lifetime (heap storage, never moved), so issued addresses stay valid
//!   while the arena lives
//! - the cursor and the live-block counter are only touched under the
//!   lock strategy `L`
//! - issued ranges never overlap: the cursor is monotonically
//!   non-decreasing between resets and every allocation advances it past
//!   the range it returned
//!
//! ## Invariants
//!
//! - `0 <= top <= N`
//! - no issued block's byte range extends past `base + top`
//! - `top` rewinds only when the freed block ends exactly at the tip, or
//!   wholesale when the last live block is released (`outstanding == 0`
//!   resets `top` to zero, the only point where interior waste is
//!   recovered)

use core::alloc::Layout;
use core::ptr::{self, NonNull};
use std::alloc::{alloc, dealloc, handle_alloc_error};

use lock_api::{Mutex, RawMutex};

use super::StackConfig;
use crate::block::Block;
use crate::error::{AllocError, AllocResult};
use crate::lock::NoopLock;
use crate::stats::{AllocatorStats, OpCounters, StatisticsProvider};
use crate::traits::{Allocator, MemoryUsage};
use crate::utils::{align_up, padding_for, copy_prefix, CACHE_LINE};

/// Whether the arena buffer is freed on drop or belongs to an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backing {
    Owned,
    External,
}

/// Cursor state; lives behind the lock.
#[derive(Debug, Default)]
struct StackState {
    /// Offset of the first free byte.
    top: usize,
    /// Live blocks issued and not yet released.
    outstanding: usize,
    counters: OpCounters,
}

/// Monotonic bump arena over a fixed `N`-byte buffer.
///
/// Allocation advances a cursor; deallocation rewinds it only when the
/// freed block ends exactly at the tip. Interior frees are recorded but
/// not reclaimed individually — their space returns when the last live
/// block goes away and the whole arena resets.
///
/// # Memory layout
/// ```text
/// [base]---[block]--[pad]--[block]---[top]------[free]------[base+N]
///           <------- issued ------->  <------ available ------>
/// ```
///
/// The buffer is aligned to a cache line (64 bytes), so a fresh arena
/// serves any alignment up to 64 with zero padding.
///
/// `L` is the lock strategy: [`NoopLock`] (default, single-threaded,
/// compiles away) or [`SyncLock`](crate::lock::SyncLock).
pub struct StackAllocator<const N: usize, L: RawMutex = NoopLock> {
    storage: NonNull<u8>,
    backing: Backing,
    config: StackConfig,
    state: Mutex<L, StackState>,
}

impl<const N: usize> StackAllocator<N> {
    /// Creates an arena with its own heap-allocated buffer and the
    /// default (no-op) lock.
    ///
    /// Aborts via [`handle_alloc_error`] if the process cannot provide
    /// `N` bytes, matching the std collections' behavior. For an
    /// explicit lock strategy use [`with_config`](Self::with_config)
    /// with the lock named in the type.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StackConfig::default())
    }
}

impl<const N: usize, L: RawMutex> StackAllocator<N, L> {
    /// Creates an arena with a custom configuration.
    #[must_use]
    pub fn with_config(config: StackConfig) -> Self {
        let storage = Self::allocate_storage();
        if let Some(pattern) = config.alloc_pattern {
            // SAFETY: storage spans N writable bytes (just allocated).
            unsafe { ptr::write_bytes(storage.as_ptr(), pattern, N) };
        }
        Self {
            storage,
            backing: Backing::Owned,
            config,
            state: Mutex::new(StackState::default()),
        }
    }

    /// Builds an arena over a buffer provisioned by an upstream
    /// allocator. The caller keeps ownership of the backing block and
    /// must release it after dropping the arena.
    pub(crate) fn from_block(backing: Block, config: StackConfig) -> Self {
        debug_assert!(backing.size() >= N, "backing block smaller than arena");
        debug_assert_eq!(
            backing.addr() % CACHE_LINE,
            0,
            "backing block must be cache-line aligned"
        );
        Self {
            storage: backing.memory(),
            backing: Backing::External,
            config,
            state: Mutex::new(StackState::default()),
        }
    }

    fn allocate_storage() -> NonNull<u8> {
        if N == 0 {
            // Dangling but well-aligned; never dereferenced.
            return match NonNull::new(CACHE_LINE as *mut u8) {
                Some(ptr) => ptr,
                None => unreachable!(),
            };
        }
        let layout = Self::storage_layout();
        // SAFETY: layout has non-zero size (N > 0 checked above).
        let ptr = unsafe { alloc(layout) };
        match NonNull::new(ptr) {
            Some(storage) => storage,
            None => handle_alloc_error(layout),
        }
    }

    fn storage_layout() -> Layout {
        match Layout::from_size_align(N, CACHE_LINE) {
            Ok(layout) => layout,
            Err(_) => panic!("arena of {N} bytes exceeds the address space"),
        }
    }

    /// Total buffer size in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes consumed since the last reset, alignment padding included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.state.lock().top
    }

    /// Bytes still available for a single maximally sized request.
    #[must_use]
    pub fn available(&self) -> usize {
        N - self.state.lock().top
    }

    /// Live blocks issued and not yet released.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().outstanding
    }

    #[inline]
    fn base(&self) -> usize {
        self.storage.as_ptr() as usize
    }

    fn owns_locked(&self, state: &StackState, block: Block) -> bool {
        let addr = block.addr();
        addr >= self.base() && addr < self.base() + state.top
    }

    fn allocate_locked(
        &self,
        state: &mut StackState,
        size: usize,
        align: usize,
    ) -> AllocResult<Block> {
        let base = self.base();
        if size == 0 {
            // Consumes no space; the descriptor marks the aligned tip.
            let addr = align_up(base + state.top, align);
            // SAFETY: base is non-null and align_up of a non-zero address
            // is non-zero.
            let memory = unsafe { NonNull::new_unchecked(addr as *mut u8) };
            return Ok(Block::new(memory, 0, align));
        }

        let pad = padding_for(base + state.top, align);
        match pad
            .checked_add(size)
            .and_then(|needed| state.top.checked_add(needed))
        {
            Some(new_top) if new_top <= N => {
                state.top += pad;
                let addr = base + state.top;
                state.top = new_top;
                state.outstanding += 1;
                if self.config.track_stats {
                    state.counters.allocations += 1;
                    state.counters.note_peak(state.top);
                }
                if let Some(pattern) = self.config.alloc_pattern {
                    // SAFETY: [addr, addr + size) is inside the buffer
                    // (new_top <= N checked above) and exclusively ours
                    // until the block is handed to the caller.
                    unsafe { ptr::write_bytes(addr as *mut u8, pattern, size) };
                }
                // SAFETY: addr points into a live non-null buffer.
                let memory = unsafe { NonNull::new_unchecked(addr as *mut u8) };
                Ok(Block::new(memory, size, align))
            }
            _ => {
                if self.config.track_stats {
                    state.counters.failed += 1;
                }
                Err(AllocError::out_of_capacity(size, align))
            }
        }
    }

    fn deallocate_locked(&self, state: &mut StackState, block: Block) -> AllocResult<()> {
        if block.size() == 0 {
            // Zero-size descriptors occupy no range and are not tracked.
            return Ok(());
        }
        if !self.owns_locked(state, block) {
            return Err(AllocError::not_owned(block));
        }
        debug_assert!(state.outstanding > 0, "double free of an arena block");

        if block.end_addr() == self.base() + state.top {
            if let Some(pattern) = self.config.dealloc_pattern {
                // SAFETY: the block's range is inside the buffer and dead
                // after this call.
                unsafe { ptr::write_bytes(block.as_ptr(), pattern, block.size()) };
            }
            state.top -= block.size();
        }

        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            state.top = 0;
        }
        if self.config.track_stats {
            state.counters.deallocations += 1;
        }
        Ok(())
    }
}

impl<const N: usize, L: RawMutex> Default for StackAllocator<N, L> {
    fn default() -> Self {
        Self::with_config(StackConfig::default())
    }
}

// SAFETY: Every issued range is a disjoint sub-range of the stable
// buffer; cursor mutations happen under the lock; failed operations
// leave the cursor untouched.
unsafe impl<const N: usize, L: RawMutex> Allocator for StackAllocator<N, L> {
    fn allocate(&self, size: usize, align: usize) -> AllocResult<Block> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let mut state = self.state.lock();
        self.allocate_locked(&mut state, size, align)
    }

    unsafe fn reallocate(
        &self,
        block: Block,
        new_size: usize,
        align: usize,
    ) -> AllocResult<Block> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let mut state = self.state.lock();

        if block.size() == 0 {
            // Zero-size descriptors occupy no range and carry no bytes
            // (deallocate_locked accepts them the same way, ahead of the
            // ownership test); growing one is a plain allocation.
            let fresh = self.allocate_locked(&mut state, new_size, align)?;
            if self.config.track_stats {
                state.counters.reallocations += 1;
            }
            return Ok(fresh);
        }

        if !self.owns_locked(&state, block) {
            return Err(AllocError::not_owned(block));
        }

        if new_size == 0 {
            self.deallocate_locked(&mut state, block)?;
            if self.config.track_stats {
                state.counters.reallocations += 1;
            }
            let addr = align_up(self.base() + state.top, align);
            // SAFETY: aligned address within or just past a live buffer;
            // never dereferenced for a zero-size block.
            let memory = unsafe { NonNull::new_unchecked(addr as *mut u8) };
            return Ok(Block::new(memory, 0, align));
        }

        // A block ending at the tip resizes in place and keeps its
        // address, whatever alignment the new request carries.
        if block.end_addr() == self.base() + state.top {
            let offset = block.addr() - self.base();
            return match offset.checked_add(new_size) {
                Some(new_top) if new_top <= N => {
                    state.top = new_top;
                    if self.config.track_stats {
                        state.counters.reallocations += 1;
                        let top = state.top;
                        state.counters.note_peak(top);
                    }
                    Ok(Block::new(block.memory(), new_size, align))
                }
                _ => {
                    if self.config.track_stats {
                        state.counters.failed += 1;
                    }
                    Err(AllocError::out_of_capacity(new_size, align))
                }
            };
        }

        // Not at the tip: fresh allocation, copy, interior release of
        // the old range.
        let fresh = self.allocate_locked(&mut state, new_size, align)?;
        // SAFETY: block is live (ownership checked above), fresh was just
        // issued, and the two ranges are disjoint because fresh sits past
        // the old tip.
        unsafe { copy_prefix(block, fresh) };

        // The fresh block is now the tip, so the old one is interior:
        // record the free without rewinding.
        state.outstanding = state.outstanding.saturating_sub(1);
        if self.config.track_stats {
            state.counters.deallocations += 1;
            state.counters.reallocations += 1;
        }
        Ok(fresh)
    }

    unsafe fn deallocate(&self, block: Block) -> AllocResult<()> {
        let mut state = self.state.lock();
        self.deallocate_locked(&mut state, block)
    }

    fn deallocate_all(&self) {
        let mut state = self.state.lock();
        state.top = 0;
        state.outstanding = 0;
    }

    fn max_size(&self) -> usize {
        N - self.state.lock().top
    }

    fn owns(&self, block: Block) -> bool {
        let state = self.state.lock();
        self.owns_locked(&state, block)
    }
}

impl<const N: usize, L: RawMutex> MemoryUsage for StackAllocator<N, L> {
    fn used_memory(&self) -> usize {
        self.used()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.available())
    }
}

impl<const N: usize, L: RawMutex> StatisticsProvider for StackAllocator<N, L> {
    fn statistics(&self) -> AllocatorStats {
        let state = self.state.lock();
        state.counters.snapshot(state.top)
    }

    fn reset_statistics(&self) {
        let mut state = self.state.lock();
        state.counters = OpCounters::default();
    }
}

impl<const N: usize, L: RawMutex> Drop for StackAllocator<N, L> {
    fn drop(&mut self) {
        if self.backing == Backing::Owned && N != 0 {
            // Layout validity was proven at construction.
            if let Ok(layout) = Layout::from_size_align(N, CACHE_LINE) {
                // SAFETY: storage was allocated with exactly this layout
                // and is not referenced past this point.
                unsafe { dealloc(self.storage.as_ptr(), layout) };
            }
        }
    }
}

impl<const N: usize, L: RawMutex> core::fmt::Debug for StackAllocator<N, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StackAllocator")
            .field("capacity", &N)
            .field("top", &state.top)
            .field("outstanding", &state.outstanding)
            .finish()
    }
}

// SAFETY: The buffer is exclusively owned (or exclusively borrowed from
// an upstream that outlives the arena) and carries no thread affinity;
// moving the allocator does not move the buffer.
unsafe impl<const N: usize, L: RawMutex + Send> Send for StackAllocator<N, L> {}

// SAFETY: All state mutation goes through the lock. With a real mutex
// (`L: Sync`) operations on one instance linearize; with NoopLock the
// allocator is !Sync and can never be shared.
unsafe impl<const N: usize, L: RawMutex + Sync> Sync for StackAllocator<N, L> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_arena_base_is_cache_line_aligned() {
        let arena = StackAllocator::<256>::new();
        assert_eq!(arena.base() % CACHE_LINE, 0);
        assert_eq!(arena.max_size(), 256);
    }

    #[test]
    fn zero_capacity_arena_never_faults() {
        let arena = StackAllocator::<0>::new();
        assert_eq!(arena.max_size(), 0);
        assert!(arena.allocate(1, 1).is_err());
        let zero = arena.allocate(0, 8).unwrap();
        assert_eq!(zero.size(), 0);
    }

    #[test]
    fn padding_counts_against_capacity() {
        let arena = StackAllocator::<128>::new();
        let a = arena.allocate(10, 1).unwrap();
        // Next 8-aligned offset is 16: six bytes of padding consumed.
        let b = arena.allocate(8, 8).unwrap();
        assert_eq!(b.addr() % 8, 0);
        assert_eq!(arena.max_size(), 128 - 16 - 8);
        unsafe {
            arena.deallocate(b).unwrap();
            arena.deallocate(a).unwrap();
        }
        assert_eq!(arena.max_size(), 128);
    }

    #[test]
    fn interior_realloc_failure_keeps_block_live() {
        let arena = StackAllocator::<128>::new();
        let a = arena.allocate(64, 8).unwrap();
        let _b = arena.allocate(64, 8).unwrap();
        // a is interior and there is no room for a fresh copy.
        let err = unsafe { arena.reallocate(a, 96, 8) }.unwrap_err();
        assert!(err.is_out_of_capacity());
        assert!(arena.owns(a));
    }

    #[test]
    fn statistics_track_operations() {
        let arena = StackAllocator::<256, NoopLock>::with_config(StackConfig::debug());
        let a = arena.allocate(32, 8).unwrap();
        let _ = arena.allocate(512, 8);
        unsafe { arena.deallocate(a).unwrap() };

        let stats = arena.statistics();
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.deallocation_count, 1);
        assert_eq!(stats.failed_allocations, 1);
        assert_eq!(stats.peak_allocated_bytes, 32);
    }
}
