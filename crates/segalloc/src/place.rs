//! Fit search and block splitting.
//!
//! Small classes are searched first-fit. Large classes are searched best-fit,
//! and the search stops at the first class that yields any fit.

use log::trace;

use crate::{
    block::{HeapPtr, MIN_BLOCK_SIZE, Tag},
    free_list::FreeListBank,
};

/// Finds a free block of at least `size` bytes.
///
/// Classes below `first_fit_classes` return their first fitting block.
/// Other classes are scanned completely for the block with the least slack.
pub(crate) fn find_fit(
    mem: &[u8],
    bank: &FreeListBank,
    first_fit_classes: usize,
    size: usize,
) -> Option<HeapPtr> {
    let mut best: Option<(HeapPtr, usize)> = None;
    for class in bank.class_of(size)..bank.class_count() {
        if class < first_fit_classes {
            if let Some(block) = bank.iter(mem, class).find(|block| block.size(mem) >= size) {
                return Some(block);
            }
            continue;
        }

        for block in bank.iter(mem, class) {
            let block_size = block.size(mem);
            if block_size < size {
                continue;
            }
            let slack = block_size - size;
            if best.is_none_or(|(_, best_slack)| slack < best_slack) {
                best = Some((block, slack));
            }
        }
        if let Some((block, _)) = best {
            return Some(block);
        }
    }
    None
}

/// Allocates `size` bytes at the start of the free block `block`.
///
/// The block is taken off its free list. If the leftover space can hold a
/// block of its own, it is split off and filed as a new free block;
/// otherwise the whole block is handed out.
pub(crate) fn place(mem: &mut [u8], bank: &FreeListBank, block: HeapPtr, size: usize) -> HeapPtr {
    let tag = block.header(mem);
    assert!(
        !tag.is_allocated() && tag.size() >= size,
        "cannot place {size} bytes in block {block} ({tag:?})"
    );
    bank.remove(mem, block);

    let remainder = tag.size() - size;
    if remainder < MIN_BLOCK_SIZE {
        block.set_header(mem, Tag::allocated(tag.size(), tag.is_prev_allocated()));
        block.next(mem).set_prev_allocated(mem, true);
    } else {
        block.set_header(mem, Tag::allocated(size, tag.is_prev_allocated()));
        let rest = block.next(mem);
        rest.set_tags(mem, Tag::free(remainder, true));
        bank.insert(mem, rest);
        trace!("place({block}, {size}): split off {rest} ({remainder} bytes)");
    }
    block
}
