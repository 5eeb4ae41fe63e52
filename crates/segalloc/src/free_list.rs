//! Segregated bank of explicit free lists.
//!
//! The bank keeps one doubly-linked list per size class. List heads live in
//! the heap prologue as link words, one per class, and list nodes are the free
//! blocks themselves: their first two payload words hold the predecessor and
//! successor offsets.
//!
//! ```text
//! prologue                         heap
//! ┌────┬────┬────┬─────┐
//! │ c0 │ c1 │ c2 │ ... │      ┌───────┐     ┌───────┐
//! └────┴──┬─┴────┴─────┘      │ free  │◄───►│ free  │
//!         └──────────────────►│ 24 B  │     │ 24 B  │
//!                             └───────┘     └───────┘
//! ```
//!
//! Insertion is LIFO: a block pushed onto a list becomes its new head.

use crate::{
    block::{HeapPtr, WORD, read_link, write_link},
    config::SizeClasses,
};

#[derive(Debug, Clone)]
pub(crate) struct FreeListBank {
    classes: SizeClasses,
}

impl FreeListBank {
    pub(crate) fn new(classes: SizeClasses) -> Self {
        Self { classes }
    }

    pub(crate) fn class_count(&self) -> usize {
        self.classes.count()
    }

    pub(crate) fn class_of(&self, size: usize) -> usize {
        self.classes.class_of(size)
    }

    /// Bytes occupied by the list heads at the start of the heap.
    pub(crate) fn heads_len(&self) -> usize {
        self.class_count() * WORD
    }

    fn head_offset(&self, class: usize) -> usize {
        assert!(class < self.class_count(), "size class {class} out of range");
        class * WORD
    }

    /// Empties every list.
    pub(crate) fn reset(&self, mem: &mut [u8]) {
        for class in 0..self.class_count() {
            self.set_head(mem, class, None);
        }
    }

    pub(crate) fn head(&self, mem: &[u8], class: usize) -> Option<HeapPtr> {
        read_link(mem, self.head_offset(class))
    }

    fn set_head(&self, mem: &mut [u8], class: usize, head: Option<HeapPtr>) {
        write_link(mem, self.head_offset(class), head);
    }

    /// Pushes a free block onto the front of its class list.
    ///
    /// The block's header must already hold its final size.
    pub(crate) fn insert(&self, mem: &mut [u8], block: HeapPtr) {
        let class = self.class_of(block.size(mem));
        let head = self.head(mem, class);
        block.set_pred(mem, None);
        block.set_succ(mem, head);
        if let Some(head) = head {
            head.set_pred(mem, Some(block));
        }
        self.set_head(mem, class, Some(block));
    }

    /// Unlinks a free block from the list of its current class.
    ///
    /// The block must currently be a member of that list.
    pub(crate) fn remove(&self, mem: &mut [u8], block: HeapPtr) {
        let class = self.class_of(block.size(mem));
        let pred = block.pred(mem);
        let succ = block.succ(mem);
        match pred {
            Some(pred) => pred.set_succ(mem, succ),
            None => self.set_head(mem, class, succ),
        }
        if let Some(succ) = succ {
            succ.set_pred(mem, pred);
        }
    }

    /// Walks the list of `class` from its head.
    pub(crate) fn iter<'a>(&self, mem: &'a [u8], class: usize) -> ListIter<'a> {
        ListIter {
            mem,
            next: self.head(mem, class),
        }
    }
}

pub(crate) struct ListIter<'a> {
    mem: &'a [u8],
    next: Option<HeapPtr>,
}

impl Iterator for ListIter<'_> {
    type Item = HeapPtr;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.succ(self.mem);
        Some(current)
    }
}
