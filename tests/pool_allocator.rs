//! Integration tests for the arena pool

use polyalloc::{Allocator, GlobalAllocator, MemoryUsage, PoolAllocator};

/// Max-heap property over the pool's internal key array: every parent's
/// remaining capacity is at least its children's.
fn assert_max_heap(keys: &[usize]) {
    for idx in 1..keys.len() {
        let parent = (idx - 1) / 2;
        assert!(
            keys[parent] >= keys[idx],
            "heap property violated at {idx}: {keys:?}"
        );
    }
}

#[test]
fn test_growth_provisions_expected_arenas() {
    let pool: PoolAllocator<4096, _> = PoolAllocator::new(GlobalAllocator::new());
    let mut blocks = Vec::new();

    for _ in 0..10 {
        let block = pool.allocate(1000, 8).expect("allocation failed");
        blocks.push(block);
        assert_max_heap(&pool.remaining_capacities());
    }

    // 10,000 bytes at 4,096 per arena: three arenas.
    assert_eq!(pool.arena_count(), 3);

    // Every block is owned by the pool (by exactly one arena underneath).
    for block in &blocks {
        assert!(pool.owns(*block));
    }

    for block in blocks {
        unsafe { pool.deallocate(block).expect("deallocation failed") };
        assert_max_heap(&pool.remaining_capacities());
    }
    assert_eq!(pool.used_memory(), 0);
}

#[test]
fn test_oversized_request_is_rejected() {
    let pool: PoolAllocator<1024, _> = PoolAllocator::new(GlobalAllocator::new());

    let err = pool.allocate(1025, 8).unwrap_err();
    assert!(err.is_out_of_capacity());
    assert_eq!(pool.arena_count(), 0);
    assert_eq!(pool.max_size(), 1024);
}

#[test]
fn test_root_arena_serves_while_it_fits() {
    let pool: PoolAllocator<1024, _> = PoolAllocator::new(GlobalAllocator::new());

    // Three allocations fit one arena.
    let a = pool.allocate(300, 8).expect("allocation failed");
    let b = pool.allocate(300, 8).expect("allocation failed");
    let c = pool.allocate(300, 8).expect("allocation failed");
    assert_eq!(pool.arena_count(), 1);

    // The fourth does not: a second arena appears.
    let d = pool.allocate(300, 8).expect("allocation failed");
    assert_eq!(pool.arena_count(), 2);
    assert_max_heap(&pool.remaining_capacities());

    for block in [a, b, c, d] {
        unsafe { pool.deallocate(block).expect("deallocation failed") };
    }
}

#[test]
fn test_free_raises_arena_in_heap() {
    let pool: PoolAllocator<1024, _> = PoolAllocator::new(GlobalAllocator::new());

    // Fill the first arena almost completely, then start a second.
    let big = pool.allocate(1000, 8).expect("allocation failed");
    let small = pool.allocate(200, 8).expect("allocation failed");
    assert_eq!(pool.arena_count(), 2);

    // Freeing the big block resets its arena to full capacity; it must
    // climb back to the root.
    unsafe { pool.deallocate(big).expect("deallocation failed") };
    let keys = pool.remaining_capacities();
    assert_max_heap(&keys);
    assert_eq!(keys[0], 1024);

    unsafe { pool.deallocate(small).expect("deallocation failed") };
}

#[test]
fn test_reallocate_in_place_at_tip() {
    let pool: PoolAllocator<1024, _> = PoolAllocator::new(GlobalAllocator::new());

    let block = pool.allocate(100, 8).expect("allocation failed");
    let grown = unsafe { pool.reallocate(block, 400, 8) }.expect("grow failed");
    assert_eq!(grown.addr(), block.addr(), "tip block must grow in place");
    assert_eq!(pool.arena_count(), 1);
    assert_max_heap(&pool.remaining_capacities());

    unsafe { pool.deallocate(grown).expect("deallocation failed") };
}

#[test]
fn test_reallocate_migrates_across_arenas() {
    let pool: PoolAllocator<1024, _> = PoolAllocator::new(GlobalAllocator::new());

    let a = pool.allocate(600, 8).expect("allocation failed");
    let b = pool.allocate(300, 8).expect("allocation failed");
    unsafe {
        for i in 0..600 {
            a.as_ptr().add(i).write((i % 249) as u8);
        }
    }

    // a is interior and its arena is nearly full: the pool must find a
    // home elsewhere and preserve the bytes.
    let moved = unsafe { pool.reallocate(a, 900, 8) }.expect("migration failed");
    assert_eq!(pool.arena_count(), 2);
    assert_max_heap(&pool.remaining_capacities());
    assert!(pool.owns(moved));
    unsafe {
        for i in 0..600 {
            assert_eq!(*moved.as_ptr().add(i), (i % 249) as u8);
        }
    }

    unsafe {
        pool.deallocate(moved).expect("deallocation failed");
        pool.deallocate(b).expect("deallocation failed");
    }
    assert_eq!(pool.used_memory(), 0);
}

#[test]
fn test_reallocate_grows_zero_size_block() {
    let pool: PoolAllocator<1024, _> = PoolAllocator::new(GlobalAllocator::new());

    let zero = pool.allocate(0, 8).expect("zero-size allocation failed");
    assert_eq!(zero.size(), 0);

    let grown = unsafe { pool.reallocate(zero, 256, 8) }.expect("grow from zero failed");
    assert_eq!(grown.size(), 256);
    assert!(pool.owns(grown));
    assert_max_heap(&pool.remaining_capacities());

    unsafe { pool.deallocate(grown).expect("deallocation failed") };
    assert_eq!(pool.used_memory(), 0);
}

#[test]
fn test_reallocate_beyond_arena_size_fails_intact() {
    let pool: PoolAllocator<1024, _> = PoolAllocator::new(GlobalAllocator::new());

    let block = pool.allocate(500, 8).expect("allocation failed");
    unsafe { block.as_ptr().write_bytes(0x66, 500) };

    let err = unsafe { pool.reallocate(block, 1500, 8) }.unwrap_err();
    assert!(err.is_out_of_capacity());
    assert!(pool.owns(block));
    unsafe {
        assert_eq!(*block.as_ptr(), 0x66);
        pool.deallocate(block).expect("deallocation failed");
    }
}

#[test]
fn test_not_owned_block_is_rejected() {
    let pool: PoolAllocator<1024, _> = PoolAllocator::new(GlobalAllocator::new());
    let stranger = GlobalAllocator::new();

    let foreign = stranger.allocate(64, 8).expect("allocation failed");
    let err = unsafe { pool.deallocate(foreign) }.unwrap_err();
    assert!(err.is_not_owned());

    unsafe { stranger.deallocate(foreign).expect("deallocation failed") };
}

#[test]
fn test_deallocate_all_restores_every_arena() {
    let pool: PoolAllocator<2048, _> = PoolAllocator::new(GlobalAllocator::new());

    for _ in 0..8 {
        let _ = pool.allocate(1500, 8).expect("allocation failed");
    }
    let provisioned = pool.arena_count();
    assert!(provisioned >= 8, "1500-byte blocks cannot share a 2048 arena");

    pool.deallocate_all();
    let keys = pool.remaining_capacities();
    assert_eq!(keys.len(), provisioned);
    assert!(keys.iter().all(|&key| key == 2048));
    assert_eq!(pool.used_memory(), 0);

    // Idempotent.
    pool.deallocate_all();
    assert_eq!(pool.arena_count(), provisioned);

    // Freed arenas are reused before new ones are provisioned.
    let _ = pool.allocate(2048, 1).expect("full-arena allocation failed");
    assert_eq!(pool.arena_count(), provisioned);
}

#[test]
fn test_mixed_operation_sequence_keeps_heap_ordered() {
    let pool: PoolAllocator<512, _> = PoolAllocator::new(GlobalAllocator::new());
    let mut live = Vec::new();

    for round in 0..6 {
        for size in [64usize, 128, 200] {
            let block = pool.allocate(size, 8).expect("allocation failed");
            live.push(block);
            assert_max_heap(&pool.remaining_capacities());
        }
        // Free every other block from this round.
        if round % 2 == 0 {
            let block = live.remove(live.len() / 2);
            unsafe { pool.deallocate(block).expect("deallocation failed") };
            assert_max_heap(&pool.remaining_capacities());
        }
    }

    for block in live {
        unsafe { pool.deallocate(block).expect("deallocation failed") };
        assert_max_heap(&pool.remaining_capacities());
    }
}
