#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::iter;

use segalloc::{BlockInfo, Heap, HeapConfig, HeapPtr, VecRegion};

fn with_test_heap<F>(config: HeapConfig, test_fn: F)
where
    F: FnOnce(&mut Heap),
{
    let _ = env_logger::builder().is_test(true).try_init();
    let config = HeapConfig {
        verify: true,
        ..config
    };
    let mut heap = Heap::init(VecRegion::with_limit(1 << 20), config).unwrap();
    test_fn(&mut heap);
    heap.check().unwrap();
}

fn alloc(heap: &mut Heap, size: usize) -> HeapPtr {
    heap.allocate(size).unwrap().unwrap()
}

fn free_blocks(heap: &Heap) -> Vec<BlockInfo> {
    heap.blocks().filter(|block| !block.allocated).collect()
}

#[test]
fn released_block_is_reused() {
    with_test_heap(HeapConfig::default(), |heap| {
        let a = alloc(heap, 24);
        let b = alloc(heap, 40);
        heap.release(Some(a));

        let len = heap.len();
        let c = alloc(heap, 16);
        assert_eq!(c, a);
        assert_eq!(heap.len(), len);
        // too little is left over after `c` to split, so only the tail is free
        let free = free_blocks(heap);
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].ptr.offset(), b.offset() + 48);
        assert_eq!(heap.usable_size(c), 28);
    });
}

#[test]
fn large_request_prefers_smaller_class() {
    with_test_heap(HeapConfig::default(), |heap| {
        let small = alloc(heap, 2044);
        let _guard = alloc(heap, 8);
        let large = alloc(heap, 4092);
        let _guard = alloc(heap, 8);
        heap.release(Some(small));
        heap.release(Some(large));

        let sizes: Vec<_> = free_blocks(heap).iter().map(|block| block.size).collect();
        assert!(sizes.contains(&2048));
        assert!(sizes.contains(&4096));

        let len = heap.len();
        assert_eq!(alloc(heap, 2000), small);
        assert_eq!(heap.len(), len);
    });
}

/// Frees a 1800-byte and then a 2048-byte block of the same class, so the
/// 2048-byte one heads the list.
fn with_two_blocks_in_class<F>(config: HeapConfig, test_fn: F)
where
    F: FnOnce(&mut Heap, HeapPtr, HeapPtr),
{
    with_test_heap(config, |heap| {
        let tight = alloc(heap, 1796);
        let _guard = alloc(heap, 8);
        let loose = alloc(heap, 2044);
        let _guard = alloc(heap, 8);
        heap.release(Some(tight));
        heap.release(Some(loose));
        test_fn(heap, tight, loose);
    });
}

#[test]
fn large_class_is_searched_best_fit() {
    with_two_blocks_in_class(HeapConfig::default(), |heap, tight, _loose| {
        assert_eq!(alloc(heap, 1700), tight);
    });
}

#[test]
fn first_fit_everywhere_takes_list_head() {
    let config = HeapConfig {
        first_fit_classes: usize::MAX,
        ..HeapConfig::default()
    };
    with_two_blocks_in_class(config, |heap, _tight, loose| {
        assert_eq!(alloc(heap, 1700), loose);
    });
}

#[test]
fn adjacent_holes_merge_for_double_request() {
    with_test_heap(HeapConfig::default(), |heap| {
        let blocks: Vec<_> = iter::repeat_with(|| alloc(heap, 64)).take(10).collect();
        for &ptr in blocks.iter().skip(3).take(2) {
            heap.release(Some(ptr));
        }
        for &ptr in blocks.iter().skip(7).step_by(2) {
            heap.release(Some(ptr));
        }

        let len = heap.len();
        let merged = alloc(heap, 136);
        assert_eq!(merged, blocks[3]);
        assert_eq!(heap.len(), len);
        assert_eq!(heap.usable_size(merged), 140);
    });
}

#[test]
fn releasing_everything_leaves_one_free_block() {
    with_test_heap(HeapConfig::default(), |heap| {
        let ptrs: Vec<_> = (1..=200).map(|i| alloc(heap, i * 37 % 3000 + 1)).collect();
        for (i, &ptr) in ptrs.iter().enumerate() {
            if i % 3 == 0 {
                heap.release(Some(ptr));
            }
        }
        for (i, &ptr) in ptrs.iter().enumerate().rev() {
            if i % 3 != 0 {
                heap.release(Some(ptr));
            }
        }

        let stats = heap.stats();
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(heap.free_list_lengths().sum::<usize>(), 1);
    });
}

#[test]
fn reallocate_grows_and_shrinks() {
    with_test_heap(HeapConfig::default(), |heap| {
        let mut ptr = alloc(heap, 10);
        for (i, byte) in heap.payload_mut(ptr)[..10].iter_mut().enumerate() {
            *byte = u8::try_from(i).unwrap();
        }
        for size in [100, 3000, 20, 10_000, 5] {
            ptr = heap.reallocate(Some(ptr), size).unwrap().unwrap();
            let keep = size.min(10);
            let expected: Vec<u8> = (0..keep).map(|i| u8::try_from(i).unwrap()).collect();
            assert_eq!(&heap.payload(ptr)[..keep], &expected[..]);
        }
        assert_eq!(heap.stats().allocated_blocks, 1);
    });
}

#[test]
fn independent_heaps() {
    with_test_heap(HeapConfig::default(), |first| {
        with_test_heap(HeapConfig::default(), |second| {
            let a = alloc(first, 32);
            let b = alloc(second, 32);
            assert_eq!(a, b);
            first.payload_mut(a).fill(1);
            second.payload_mut(b).fill(2);
            assert!(first.payload(a).iter().all(|&byte| byte == 1));
            assert!(second.payload(b).iter().all(|&byte| byte == 2));
        });
    });
}
