//! Heap consistency checker.
//!
//! The checker walks the heap twice: once block by block from the prologue to
//! the epilogue, and once along every free list. It only reads the heap and
//! never trusts a tag or a link before bounding it, so it reports corruption
//! instead of tripping over it.
//!
//! Block alignment and size granularity hold by construction of the tag
//! encoding. A misaligned link shows up as a [`StrayListEntry`].
//!
//! [`StrayListEntry`]: CheckError::StrayListEntry

use alloc::{vec, vec::Vec};

use heap_region::HeapRegion;
use log::error;
use snafu::{Snafu, ensure};
use snafu_utils::Location;

use crate::{
    block::{HeapPtr, MIN_BLOCK_SIZE, Tag, WORD, read_word},
    free_list::FreeListBank,
    heap::{Heap, prologue_len},
};

/// A violated heap invariant, with the offset where it was found.
#[derive(Debug, Snafu)]
pub enum CheckError {
    #[snafu(display("heap of {heap_len} bytes cannot hold its {prologue_len}-byte prologue"))]
    PrologueTruncated {
        heap_len: usize,
        prologue_len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block {block:#x} of {size} bytes is below the minimum block size"))]
    UndersizedBlock {
        block: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block {block:#x} of {size} bytes runs past the heap top {heap_len:#x}"))]
    BlockOutOfBounds {
        block: usize,
        size: usize,
        heap_len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "block {block:#x} records prev_allocated={recorded}, but its predecessor disagrees"
    ))]
    PrevAllocatedMismatch {
        block: usize,
        recorded: bool,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free blocks {first:#x} and {second:#x} are adjacent"))]
    UncoalescedNeighbors {
        first: usize,
        second: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free block {block:#x} has header {header:?} but footer {footer:?}"))]
    TagMismatch {
        block: usize,
        header: Tag,
        footer: Tag,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("epilogue found at {at:#x}, heap top is {heap_len:#x}"))]
    EpilogueMisplaced {
        at: usize,
        heap_len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("list {class} holds {block:#x}, which is not a free block"))]
    StrayListEntry {
        class: usize,
        block: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free block {block:#x} is listed more than once (again in list {class})"))]
    DuplicateListEntry {
        class: usize,
        block: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free block {block:#x} is in list {class}, but belongs in list {expected}"))]
    WrongClass {
        block: usize,
        class: usize,
        expected: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "free block {block:#x} records predecessor {recorded:?}, list order gives {expected:?}"
    ))]
    BrokenLink {
        block: usize,
        recorded: Option<usize>,
        expected: Option<usize>,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free block {block:#x} is in no free list"))]
    UnlistedFreeBlock {
        block: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl<R> Heap<R>
where
    R: HeapRegion,
{
    /// Verifies every structural invariant of the heap and reports the first
    /// violation found.
    pub fn check(&self) -> Result<(), CheckError> {
        check_heap(self.memory(), self.bank())
    }

    /// Runs [`check`](Self::check) and panics with a full report on failure.
    ///
    /// Builds with `panic = "abort"` terminate the process here.
    #[track_caller]
    pub fn check_or_abort(&self) {
        if let Err(err) = self.check() {
            error!("heap consistency check failed: {err}");
            snafu_utils::report(err);
        }
    }
}

pub(crate) fn check_heap(mem: &[u8], bank: &FreeListBank) -> Result<(), CheckError> {
    let heap_len = mem.len();
    let first = prologue_len(bank);
    ensure!(
        heap_len >= first,
        PrologueTruncatedSnafu {
            heap_len,
            prologue_len: first,
        }
    );

    let free_blocks = walk_blocks(mem, first)?;
    walk_lists(mem, bank, &free_blocks)
}

/// Walks the blocks in address order and returns the offsets of the free
/// ones, sorted.
fn walk_blocks(mem: &[u8], first: usize) -> Result<Vec<usize>, CheckError> {
    let heap_len = mem.len();
    let mut free_blocks = Vec::new();
    let mut prev: Option<(usize, Tag)> = None;
    let mut block = first;

    loop {
        let tag = Tag::unpack(read_word(mem, block - WORD));
        let prev_allocated = prev.is_none_or(|(_, prev_tag)| prev_tag.is_allocated());
        ensure!(
            tag.is_prev_allocated() == prev_allocated,
            PrevAllocatedMismatchSnafu {
                block,
                recorded: tag.is_prev_allocated(),
            }
        );

        if tag.is_epilogue() {
            ensure!(
                block == heap_len,
                EpilogueMisplacedSnafu {
                    at: block,
                    heap_len,
                }
            );
            return Ok(free_blocks);
        }

        let size = tag.size();
        ensure!(size >= MIN_BLOCK_SIZE, UndersizedBlockSnafu { block, size });
        ensure!(
            size <= heap_len - block,
            BlockOutOfBoundsSnafu {
                block,
                size,
                heap_len,
            }
        );

        if !tag.is_allocated() {
            if let Some((prev_block, prev_tag)) = prev {
                ensure!(
                    prev_tag.is_allocated(),
                    UncoalescedNeighborsSnafu {
                        first: prev_block,
                        second: block,
                    }
                );
            }
            let footer = HeapPtr::at(block).footer(mem);
            ensure!(
                footer == tag,
                TagMismatchSnafu {
                    block,
                    header: tag,
                    footer,
                }
            );
            free_blocks.push(block);
        }

        prev = Some((block, tag));
        block += size;
    }
}

/// Walks every free list and matches its entries against the free blocks
/// found in the heap.
fn walk_lists(mem: &[u8], bank: &FreeListBank, free_blocks: &[usize]) -> Result<(), CheckError> {
    let mut listed = vec![false; free_blocks.len()];

    for class in 0..bank.class_count() {
        let mut expected_pred: Option<HeapPtr> = None;
        let mut cursor = bank.head(mem, class);
        while let Some(block) = cursor {
            let offset = block.offset();
            let Ok(index) = free_blocks.binary_search(&offset) else {
                return StrayListEntrySnafu {
                    class,
                    block: offset,
                }
                .fail();
            };
            ensure!(
                !listed[index],
                DuplicateListEntrySnafu {
                    class,
                    block: offset,
                }
            );
            listed[index] = true;

            let expected = bank.class_of(block.size(mem));
            ensure!(
                expected == class,
                WrongClassSnafu {
                    block: offset,
                    class,
                    expected,
                }
            );
            let recorded = block.pred(mem);
            ensure!(
                recorded == expected_pred,
                BrokenLinkSnafu {
                    block: offset,
                    recorded: recorded.map(HeapPtr::offset),
                    expected: expected_pred.map(HeapPtr::offset),
                }
            );

            expected_pred = cursor;
            cursor = block.succ(mem);
        }
    }

    if let Some(index) = listed.iter().position(|&listed| !listed) {
        return UnlistedFreeBlockSnafu {
            block: free_blocks[index],
        }
        .fail();
    }
    Ok(())
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use heap_region::VecRegion;

    use super::*;
    use crate::{block::write_link, config::HeapConfig};

    /// Builds a heap with blocks `a`, `b`, `c` allocated, `b` released, and a
    /// free tail, then lets `corrupt` damage it.
    fn with_corrupted_heap<F>(corrupt: F) -> Result<(), CheckError>
    where
        F: FnOnce(&mut [u8], &FreeListBank, [HeapPtr; 4]),
    {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut heap = Heap::init(VecRegion::with_limit(1 << 16), HeapConfig::default()).unwrap();
        let a = heap.allocate(40).unwrap().unwrap();
        let b = heap.allocate(40).unwrap().unwrap();
        let c = heap.allocate(40).unwrap().unwrap();
        heap.release(Some(b));
        heap.check().unwrap();

        let (mem, bank) = heap.parts_mut();
        let tail = c.next(mem);
        corrupt(mem, bank, [a, b, c, tail]);
        heap.check()
    }

    #[test]
    fn test_clean_heap_passes() {
        with_corrupted_heap(|_, _, _| {}).unwrap();
    }

    #[test]
    fn test_truncated_prologue() {
        let bank = FreeListBank::new(HeapConfig::default().size_classes);
        let err = check_heap(&[0; 64], &bank).unwrap_err();
        assert!(matches!(
            err,
            CheckError::PrologueTruncated {
                heap_len: 64,
                prologue_len: 144,
                ..
            }
        ));
    }

    #[test]
    fn test_prev_allocated_mismatch() {
        let err = with_corrupted_heap(|mem, _, [_, _, c, _]| {
            let tag = c.header(mem);
            c.set_header(mem, tag.with_prev_allocated(true));
        })
        .unwrap_err();
        assert!(matches!(
            err,
            CheckError::PrevAllocatedMismatch { recorded: true, .. }
        ));
    }

    #[test]
    fn test_tag_mismatch() {
        let err = with_corrupted_heap(|mem, _, [_, b, _, _]| {
            let size = b.size(mem);
            crate::block::write_word(mem, b.footer_offset(size), Tag::free(size, false).pack());
        })
        .unwrap_err();
        assert!(matches!(err, CheckError::TagMismatch { .. }));
    }

    #[test]
    fn test_uncoalesced_neighbors() {
        let err = with_corrupted_heap(|mem, bank, [a, b, _, _]| {
            let size = a.size(mem);
            a.set_tags(mem, Tag::free(size, true));
            b.set_prev_allocated(mem, false);
            bank.insert(mem, a);
        })
        .unwrap_err();
        assert!(matches!(err, CheckError::UncoalescedNeighbors { .. }));
    }

    #[test]
    fn test_undersized_block() {
        let err = with_corrupted_heap(|mem, _, [a, _, _, _]| {
            a.set_header(mem, Tag::allocated(8, true));
        })
        .unwrap_err();
        assert!(matches!(err, CheckError::UndersizedBlock { size: 8, .. }));
    }

    #[test]
    fn test_block_out_of_bounds() {
        let err = with_corrupted_heap(|mem, _, [_, _, _, tail]| {
            tail.set_header(mem, Tag::free(1 << 20, true));
        })
        .unwrap_err();
        assert!(matches!(
            err,
            CheckError::BlockOutOfBounds { size: 0x10_0000, .. }
        ));
    }

    #[test]
    fn test_epilogue_misplaced() {
        let err = with_corrupted_heap(|mem, _, [a, _, _, _]| {
            a.set_header(mem, Tag::epilogue(true));
        })
        .unwrap_err();
        assert!(matches!(err, CheckError::EpilogueMisplaced { .. }));
    }

    #[test]
    fn test_stray_list_entry() {
        let err = with_corrupted_heap(|mem, bank, [a, _, _, _]| {
            bank.insert(mem, a);
        })
        .unwrap_err();
        assert!(matches!(err, CheckError::StrayListEntry { .. }));
    }

    #[test]
    fn test_unlisted_free_block() {
        let err = with_corrupted_heap(|mem, bank, [_, b, _, _]| {
            bank.remove(mem, b);
        })
        .unwrap_err();
        assert!(matches!(err, CheckError::UnlistedFreeBlock { .. }));
    }

    #[test]
    fn test_wrong_class() {
        let err = with_corrupted_heap(|mem, bank, [_, b, _, _]| {
            bank.remove(mem, b);
            b.set_pred(mem, None);
            b.set_succ(mem, None);
            // the head of list 0 lives at the start of the prologue
            write_link(mem, 0, Some(b));
        })
        .unwrap_err();
        assert!(matches!(
            err,
            CheckError::WrongClass {
                class: 0,
                expected: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_broken_link() {
        let err = with_corrupted_heap(|mem, _, [_, b, _, _]| {
            b.set_pred(mem, Some(b));
        })
        .unwrap_err();
        assert!(matches!(
            err,
            CheckError::BrokenLink { expected: None, .. }
        ));
    }

    #[test]
    fn test_list_cycle() {
        let err = with_corrupted_heap(|mem, _, [_, b, _, _]| {
            b.set_succ(mem, Some(b));
        })
        .unwrap_err();
        assert!(matches!(err, CheckError::DuplicateListEntry { .. }));
    }

    #[test]
    #[should_panic(expected = "Critical error occurred")]
    fn test_check_or_abort_panics() {
        let mut heap = Heap::init(VecRegion::with_limit(1 << 16), HeapConfig::default()).unwrap();
        let ptr = heap.allocate(40).unwrap().unwrap();
        let (mem, _) = heap.parts_mut();
        ptr.set_header(mem, Tag::allocated(8, true));
        heap.check_or_abort();
    }
}
