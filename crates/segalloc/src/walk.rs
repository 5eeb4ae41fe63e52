//! Read-only views of the heap layout.

use core::iter::FusedIterator;

use heap_region::HeapRegion;
use log::debug;

use crate::{
    block::{HeapPtr, WORD},
    heap::{Heap, prologue_len},
};

/// One block as seen by a walk of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[display(
    "{ptr}: {size:#x} bytes, {}, prev {}",
    if *allocated { "allocated" } else { "free" },
    if *prev_allocated { "allocated" } else { "free" }
)]
pub struct BlockInfo {
    /// Payload offset of the block.
    pub ptr: HeapPtr,
    /// Full block size, header included.
    pub size: usize,
    /// Whether the block is handed out.
    pub allocated: bool,
    /// Whether the block immediately below is allocated.
    pub prev_allocated: bool,
}

/// Iterator over the blocks of a heap in address order.
///
/// Created by [`Heap::blocks`]. The epilogue is not yielded.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    mem: &'a [u8],
    next: Option<HeapPtr>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let ptr = self.next.take()?;
        let tag = ptr.header(self.mem);
        if tag.size() == 0 {
            return None;
        }
        self.next = Some(ptr.next(self.mem));
        Some(BlockInfo {
            ptr,
            size: tag.size(),
            allocated: tag.is_allocated(),
            prev_allocated: tag.is_prev_allocated(),
        })
    }
}

impl FusedIterator for Blocks<'_> {}

/// Occupancy summary of a heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Size of the heap in bytes, prologue included.
    pub heap_size: usize,
    pub allocated_blocks: usize,
    /// Usable bytes of the allocated blocks.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    /// Full size of the free blocks.
    pub free_bytes: usize,
}

impl<R> Heap<R>
where
    R: HeapRegion,
{
    /// Returns an iterator over every block from the prologue to the
    /// epilogue.
    ///
    /// The walk trusts the block tags. Run [`check`](Self::check) first on a
    /// heap that may be corrupted.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            mem: self.memory(),
            next: Some(HeapPtr::at(prologue_len(self.bank()))),
        }
    }

    /// Tallies the allocated and free blocks of the heap.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                heap_size: self.len(),
                ..HeapStats::default()
            },
            |mut stats, block| {
                if block.allocated {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += block.size - WORD;
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.size;
                }
                stats
            },
        )
    }

    /// Returns the number of blocks in each free list, by class index.
    pub fn free_list_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        let mem = self.memory();
        let bank = self.bank();
        (0..bank.class_count()).map(move |class| bank.iter(mem, class).count())
    }

    /// Logs every block of the heap at debug level.
    pub fn dump(&self) {
        debug!("heap of {:#x} bytes:", self.len());
        for block in self.blocks() {
            debug!("  {block}");
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::{string::ToString as _, vec::Vec};
    use core::iter;

    use heap_region::VecRegion;

    use super::*;
    use crate::config::HeapConfig;

    fn test_heap() -> Heap {
        let _ = env_logger::builder().is_test(true).try_init();
        Heap::init(VecRegion::with_limit(1 << 16), HeapConfig::default()).unwrap()
    }

    #[test]
    fn test_blocks_of_fresh_heap() {
        let heap = test_heap();
        let blocks: Vec<_> = heap.blocks().collect();
        assert_eq!(
            blocks,
            [BlockInfo {
                ptr: HeapPtr::at(144),
                size: 256,
                allocated: false,
                prev_allocated: true,
            }]
        );
    }

    #[test]
    fn test_blocks_in_address_order() {
        let mut heap = test_heap();
        let a = heap.allocate(8).unwrap().unwrap();
        let b = heap.allocate(100).unwrap().unwrap();
        heap.release(Some(a));

        let blocks: Vec<_> = heap.blocks().map(|b| (b.ptr, b.size, b.allocated)).collect();
        assert_eq!(
            blocks,
            [
                (a, 16, false),
                (b, 104, true),
                (HeapPtr::at(144 + 16 + 104), 136, false),
            ]
        );
        assert!(!heap.blocks().nth(1).unwrap().prev_allocated);
    }

    #[test]
    fn test_stats() {
        let mut heap = test_heap();
        assert_eq!(
            heap.stats(),
            HeapStats {
                heap_size: 400,
                allocated_blocks: 0,
                allocated_bytes: 0,
                free_blocks: 1,
                free_bytes: 256,
            }
        );

        heap.allocate(24).unwrap();
        heap.allocate(60).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.allocated_blocks, 2);
        assert_eq!(stats.allocated_bytes, 28 + 60);
        assert_eq!(stats.free_bytes, 256 - 32 - 64);
    }

    #[test]
    fn test_free_list_lengths() {
        let mut heap = test_heap();
        let ptrs: Vec<_> = iter::repeat_with(|| heap.allocate(24).unwrap())
            .take(6)
            .collect();
        for &ptr in ptrs.iter().step_by(2) {
            heap.release(ptr);
        }
        let lengths: Vec<_> = heap.free_list_lengths().collect();
        assert_eq!(lengths.len(), 33);
        // three 32-byte holes and the tail
        assert_eq!(lengths[2], 3);
        assert_eq!(lengths.iter().sum::<usize>(), 4);
    }

    #[test]
    fn test_block_info_display() {
        let info = BlockInfo {
            ptr: HeapPtr::at(0x90),
            size: 0x20,
            allocated: true,
            prev_allocated: false,
        };
        assert_eq!(info.to_string(), "0x90: 0x20 bytes, allocated, prev free");
        test_heap().dump();
    }
}
