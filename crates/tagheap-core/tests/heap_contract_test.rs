//! End-to-end contract tests for the heap allocator: alignment,
//! capacity, overlap, coalescing, reuse, resize semantics, and the
//! out-of-memory boundary, plus a deterministic random workload checked
//! against a shadow model.

use tagheap_core::{FitPolicy, Heap, HeapConfig};

const ALIGNMENT: usize = 8;

/// Per-allocation fill byte, unique enough to catch cross-block writes.
fn pattern(id: usize, i: usize) -> u8 {
    (id as u8).wrapping_mul(31).wrapping_add(i as u8) ^ 0x55
}

fn fill(heap: &mut Heap, ptr: usize, len: usize, id: usize) {
    let payload = heap.payload_mut(ptr);
    for (i, byte) in payload[..len].iter_mut().enumerate() {
        *byte = pattern(id, i);
    }
}

fn verify(heap: &Heap, ptr: usize, len: usize, id: usize) {
    let payload = heap.payload(ptr);
    for i in 0..len {
        assert_eq!(
            payload[i],
            pattern(id, i),
            "payload byte {i} of allocation {id} was clobbered"
        );
    }
}

#[test]
fn alignment_holds_for_every_successful_allocation() {
    let mut heap = Heap::new();
    for (id, size) in [1, 2, 7, 8, 9, 100, 513, 4095, 4096, 20000]
        .into_iter()
        .enumerate()
    {
        let ptr = heap.allocate(size).unwrap();
        assert_eq!(ptr % ALIGNMENT, 0);
        assert!(heap.usable_size(ptr) >= size);
        fill(&mut heap, ptr, size, id);
    }
    assert!(heap.check());
}

#[test]
fn full_payload_writes_never_cross_blocks() {
    let mut heap = Heap::new();
    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(100).unwrap();
    let a_len = heap.usable_size(a);
    let b_len = heap.usable_size(b);

    fill(&mut heap, a, a_len, 1);
    fill(&mut heap, b, b_len, 2);
    verify(&heap, a, a_len, 1);
    verify(&heap, b, b_len, 2);
    assert!(heap.check(), "full-span writes must not touch metadata");
}

#[test]
fn live_blocks_are_pairwise_disjoint() {
    let mut heap = Heap::new();
    let mut live: Vec<(usize, usize)> = Vec::new();
    for (id, size) in [24, 100, 9000, 64, 300, 64, 2000].into_iter().enumerate() {
        // Free one in the middle now and then to force list reuse.
        if id % 3 == 2 {
            let (ptr, _) = live.remove(live.len() / 2);
            heap.deallocate(ptr);
        }
        let ptr = heap.allocate(size).unwrap();
        live.push((ptr, heap.usable_size(ptr)));
    }

    for (i, &(p1, l1)) in live.iter().enumerate() {
        for &(p2, l2) in live.iter().skip(i + 1) {
            assert!(
                p1 + l1 <= p2 || p2 + l2 <= p1,
                "blocks [{p1}, {}) and [{p2}, {}) overlap",
                p1 + l1,
                p2 + l2
            );
        }
    }
}

#[test]
fn free_then_reallocate_same_size_round_trips() {
    let mut heap = Heap::new();
    for n in [1, 16, 100, 1000, 8000] {
        let a = heap.allocate(n).unwrap();
        heap.deallocate(a);
        let b = heap.allocate(n).unwrap();
        assert!(heap.usable_size(b) >= n);
        heap.deallocate(b);
    }
    assert!(heap.check());
}

#[test]
fn coalescing_closes_gaps_in_either_free_order() {
    for reversed in [false, true] {
        let mut heap = Heap::new();
        let p = heap.allocate(64).unwrap();
        let q = heap.allocate(64).unwrap();
        if reversed {
            heap.deallocate(q);
            heap.deallocate(p);
        } else {
            heap.deallocate(p);
            heap.deallocate(q);
        }
        assert!(heap.check());

        // One merged block spans both extents (and the trailing chunk
        // remainder): an allocation needing the combined space succeeds
        // at `p` without growing the arena.
        let len_before = heap.stats().arena_len;
        let big = heap.allocate(4088).unwrap();
        assert_eq!(big, p, "merged block must be anchored at the first extent");
        assert_eq!(heap.stats().arena_len, len_before, "no arena growth");
    }
}

#[test]
fn freed_size_class_slot_is_reused_without_growth() {
    let mut heap = Heap::new();
    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(200).unwrap();
    heap.deallocate(a);
    let len_before = heap.stats().arena_len;

    let c = heap.allocate(90).unwrap();
    assert_eq!(c, a);
    assert_eq!(heap.stats().arena_len, len_before);
    heap.deallocate(b);
    heap.deallocate(c);
    assert!(heap.check());
}

#[test]
fn resize_shrink_keeps_address_and_size() {
    let mut heap = Heap::new();
    let a = heap.allocate(500).unwrap();
    let before = heap.usable_size(a);
    let b = heap.resize(Some(a), 100).unwrap();
    assert_eq!(b, a);
    assert_eq!(heap.usable_size(b), before);
    assert!(heap.usable_size(b) >= 500);
}

#[test]
fn resize_grows_in_place_into_adjacent_free_block() {
    let mut heap = Heap::new();
    let a = heap.allocate(100).unwrap();
    let after = heap_alloc_after(&mut heap, a);
    heap.deallocate(after);
    fill(&mut heap, a, 100, 7);

    let b = heap.resize(Some(a), 150).unwrap();
    assert_eq!(b, a, "adjacent free space absorbed without a copy");
    assert!(heap.usable_size(b) >= 150);
    verify(&heap, b, 100, 7);
    assert!(heap.check());
}

/// Allocates a block that lands immediately after `prev`.
fn heap_alloc_after(heap: &mut Heap, prev: usize) -> usize {
    let ptr = heap.allocate(100).unwrap();
    assert_eq!(
        ptr,
        prev + heap.usable_size(prev) + 8,
        "expected sequential placement"
    );
    ptr
}

#[test]
fn oversized_request_fails_without_corrupting_the_heap() {
    let mut heap = Heap::with_config(HeapConfig {
        arena_limit: 64 * 1024,
        ..HeapConfig::default()
    });
    let a = heap.allocate(1000).unwrap();
    fill(&mut heap, a, 1000, 3);

    assert_eq!(heap.allocate(1 << 20), None);
    assert_eq!(heap.resize(Some(a), 1 << 20), None);

    verify(&heap, a, 1000, 3);
    let b = heap.allocate(1000).unwrap();
    assert!(heap.usable_size(b) >= 1000);
    assert!(heap.check());
}

#[test]
fn deterministic_random_workload_matches_shadow_model() {
    fn lcg(state: &mut u64) -> u64 {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        *state
    }

    for policy in [
        FitPolicy::default(),
        FitPolicy::FirstFit,
        FitPolicy::BoundedBestFit { scan_limit: 0 },
    ] {
        let mut heap = Heap::with_config(HeapConfig {
            fit_policy: policy,
            ..HeapConfig::default()
        });
        let mut rng = 0xA5A5_5A5A_DEAD_BEEFu64;
        let mut live: Vec<(usize, usize, usize)> = Vec::new(); // (ptr, size, id)
        let mut next_id = 0usize;

        for step in 0..2000 {
            let r = lcg(&mut rng);
            match r % 4 {
                0 | 1 => {
                    let size = ((r >> 8) as usize % 2048) + 1;
                    let ptr = heap.allocate(size).expect("workload fits the default limit");
                    let id = next_id;
                    next_id += 1;
                    fill(&mut heap, ptr, size, id);
                    live.push((ptr, size, id));
                }
                2 if !live.is_empty() => {
                    let idx = (r as usize >> 16) % live.len();
                    let (ptr, size, id) = live.swap_remove(idx);
                    verify(&heap, ptr, size, id);
                    heap.deallocate(ptr);
                }
                3 if !live.is_empty() => {
                    let idx = (r as usize >> 16) % live.len();
                    let (ptr, size, id) = live[idx];
                    verify(&heap, ptr, size, id);
                    let new_size = ((r >> 24) as usize % 3072) + 1;
                    let new_ptr = heap
                        .resize(Some(ptr), new_size)
                        .expect("workload fits the default limit");
                    // The preserved prefix is the old live payload.
                    let kept = size.min(new_size);
                    verify(&heap, new_ptr, kept, id);
                    fill(&mut heap, new_ptr, new_size.max(kept), id);
                    live[idx] = (new_ptr, new_size.max(kept), id);
                }
                _ => {}
            }

            assert_eq!(heap.stats().active_count, live.len());
            if step % 97 == 0 {
                assert!(heap.check(), "consistency violated at step {step}");
            }
        }

        for (ptr, size, id) in live.drain(..) {
            verify(&heap, ptr, size, id);
            heap.deallocate(ptr);
        }
        assert_eq!(heap.stats().active_count, 0);
        assert!(heap.check());
    }
}
