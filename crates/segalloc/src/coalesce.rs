//! Boundary-tag coalescing.

use log::trace;

use crate::{
    block::{HeapPtr, Tag},
    free_list::FreeListBank,
};

/// Merges a newly freed block with its free neighbours and files the result
/// in the free-list bank.
///
/// `block` must carry free tags and must not be on any free list yet. Its
/// successor's previous-allocated flag must already be clear. The
/// previous-allocated flag in `block`'s own header tells whether the block
/// below is free, so the footer of an allocated predecessor is never read.
///
/// Returns the block that now covers `block`.
pub(crate) fn coalesce(mem: &mut [u8], bank: &FreeListBank, block: HeapPtr) -> HeapPtr {
    let tag = block.header(mem);
    let next = block.next(mem);
    let next_tag = next.header(mem);

    let merged = match (tag.is_prev_allocated(), next_tag.is_allocated()) {
        (true, true) => block,
        (true, false) => {
            bank.remove(mem, next);
            let size = tag.size() + next_tag.size();
            block.set_tags(mem, Tag::free(size, true));
            block
        }
        (false, true) => {
            let prev = block.prev(mem);
            let prev_tag = prev.header(mem);
            bank.remove(mem, prev);
            let size = prev_tag.size() + tag.size();
            prev.set_tags(mem, Tag::free(size, prev_tag.is_prev_allocated()));
            prev
        }
        (false, false) => {
            let prev = block.prev(mem);
            let prev_tag = prev.header(mem);
            bank.remove(mem, prev);
            bank.remove(mem, next);
            let size = prev_tag.size() + tag.size() + next_tag.size();
            prev.set_tags(mem, Tag::free(size, prev_tag.is_prev_allocated()));
            prev
        }
    };

    if merged != block || merged.size(mem) != tag.size() {
        trace!(
            "coalesce({block}): merged into {merged} ({} bytes)",
            merged.size(mem)
        );
    }
    bank.insert(mem, merged);
    merged
}
