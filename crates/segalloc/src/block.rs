//! Block metadata encoding and offset-based block addressing.
//!
//! Every block starts with a one-word header. Free blocks additionally carry a
//! footer (a copy of the header in their last word) and two link words at the
//! start of their payload. Allocated blocks have no footer; their successor
//! records whether they are allocated in its own header instead.
//!
//! ```text
//! Allocated block:
//! ┌──────────┬──────────────────────────────────────┐
//! │ header   │ payload (size - 4 bytes)             │
//! └──────────┴──────────────────────────────────────┘
//!            ▲
//!            └── HeapPtr
//!
//! Free block:
//! ┌──────────┬──────────┬──────────┬───────────────┬──────────┐
//! │ header   │ pred     │ succ     │ unused        │ footer   │
//! └──────────┴──────────┴──────────┴───────────────┴──────────┘
//!            ▲
//!            └── HeapPtr
//! ```
//!
//! Header and footer words hold the block size in the bits above the three
//! low-order bits, which are free because sizes are multiples of
//! [`ALIGN`]. Bit 0 is the allocated flag and bit 1 the previous-allocated
//! flag.
//!
//! Link words hold offsets from the heap base, with zero meaning "no block".
//! Zero is never a valid payload offset because the prologue occupies the
//! start of the heap.
//!
//! All raw word access goes through this module and is bounds-checked.

use core::{num::NonZeroU32, ops::Range};

use bitflags::bitflags;

/// Size of a header, footer, or link word.
pub const WORD: usize = size_of::<u32>();

/// Size of two words.
pub const DWORD: usize = 2 * WORD;

/// Alignment of every payload offset and every block size.
pub const ALIGN: usize = DWORD;

/// Smallest block that can hold a header, two links, and a footer.
pub const MIN_BLOCK_SIZE: usize = 2 * DWORD;

/// Largest block size a header word can encode.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX as usize) & !(ALIGN - 1);

const SIZE_MASK: u32 = !0b111;

bitflags! {
    /// Flag bits stored below the size in a header or footer word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u32 {
        /// The block itself is allocated.
        const ALLOCATED = 0b01;
        /// The block immediately before this one in address order is allocated.
        const PREV_ALLOCATED = 0b10;
    }
}

/// A decoded header or footer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    size: u32,
    flags: BlockFlags,
}

impl Tag {
    /// Creates a tag from its three fields.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a multiple of [`ALIGN`] or does not fit in a
    /// header word.
    #[must_use]
    pub fn new(size: usize, allocated: bool, prev_allocated: bool) -> Self {
        assert!(
            size.is_multiple_of(ALIGN) && size <= MAX_BLOCK_SIZE,
            "block size {size:#x} cannot be encoded"
        );
        let mut flags = BlockFlags::empty();
        flags.set(BlockFlags::ALLOCATED, allocated);
        flags.set(BlockFlags::PREV_ALLOCATED, prev_allocated);
        #[expect(clippy::cast_possible_truncation)]
        let size = size as u32;
        Self { size, flags }
    }

    /// Tag of an allocated block.
    #[must_use]
    pub fn allocated(size: usize, prev_allocated: bool) -> Self {
        Self::new(size, true, prev_allocated)
    }

    /// Tag of a free block.
    #[must_use]
    pub fn free(size: usize, prev_allocated: bool) -> Self {
        Self::new(size, false, prev_allocated)
    }

    /// Tag of the zero-sized, always-allocated block that ends the heap.
    #[must_use]
    pub fn epilogue(prev_allocated: bool) -> Self {
        Self::new(0, true, prev_allocated)
    }

    /// Encodes the tag into a metadata word.
    #[must_use]
    pub fn pack(self) -> u32 {
        self.size | self.flags.bits()
    }

    /// Decodes a metadata word. Reserved bits are ignored.
    #[must_use]
    pub fn unpack(word: u32) -> Self {
        Self {
            size: word & SIZE_MASK,
            flags: BlockFlags::from_bits_truncate(word),
        }
    }

    /// Full block size in bytes, header included. Zero for the epilogue.
    #[must_use]
    pub fn size(self) -> usize {
        self.size as usize
    }

    /// Returns the raw flag bits.
    #[must_use]
    pub fn flags(self) -> BlockFlags {
        self.flags
    }

    /// Returns `true` if the block is handed out.
    #[must_use]
    pub fn is_allocated(self) -> bool {
        self.flags.contains(BlockFlags::ALLOCATED)
    }

    /// Returns `true` if the block immediately below is allocated, or is the
    /// prologue.
    #[must_use]
    pub fn is_prev_allocated(self) -> bool {
        self.flags.contains(BlockFlags::PREV_ALLOCATED)
    }

    /// Returns `true` for the end-of-heap marker.
    #[must_use]
    pub fn is_epilogue(self) -> bool {
        self.size == 0 && self.is_allocated()
    }

    /// Returns a copy with the previous-allocated flag replaced.
    #[must_use]
    pub fn with_prev_allocated(mut self, prev_allocated: bool) -> Self {
        self.flags.set(BlockFlags::PREV_ALLOCATED, prev_allocated);
        self
    }
}

/// Reads the word at `offset`.
///
/// # Panics
///
/// Panics if the word is not entirely inside `mem`.
pub(crate) fn read_word(mem: &[u8], offset: usize) -> u32 {
    let mut bytes = [0; WORD];
    bytes.copy_from_slice(&mem[word_range(mem.len(), offset)]);
    u32::from_le_bytes(bytes)
}

/// Writes `word` at `offset`.
///
/// # Panics
///
/// Panics if the word is not entirely inside `mem`.
pub(crate) fn write_word(mem: &mut [u8], offset: usize, word: u32) {
    let range = word_range(mem.len(), offset);
    mem[range].copy_from_slice(&word.to_le_bytes());
}

fn word_range(heap_len: usize, offset: usize) -> Range<usize> {
    assert!(
        offset.checked_add(WORD).is_some_and(|end| end <= heap_len),
        "word at {offset:#x} lies outside the heap ({heap_len:#x} bytes)"
    );
    offset..offset + WORD
}

/// Location of a block, expressed as the offset of its payload from the heap
/// base.
///
/// This is the handle handed out by the allocator in place of a raw pointer.
/// Its header lives one word below the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("{_0:#x}")]
pub struct HeapPtr(NonZeroU32);

impl HeapPtr {
    /// Creates a handle for the payload at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is zero or beyond the encodable range.
    pub(crate) fn at(offset: usize) -> Self {
        let raw = u32::try_from(offset).ok().and_then(NonZeroU32::new);
        let Some(raw) = raw else {
            panic!("invalid block offset {offset:#x}");
        };
        Self(raw)
    }

    fn from_link(word: u32) -> Option<Self> {
        NonZeroU32::new(word).map(Self)
    }

    fn to_link(ptr: Option<Self>) -> u32 {
        ptr.map_or(0, |ptr| ptr.0.get())
    }

    /// Offset of the payload from the heap base.
    #[must_use]
    pub fn offset(self) -> usize {
        self.0.get() as usize
    }

    pub(crate) fn header_offset(self) -> usize {
        self.offset() - WORD
    }

    pub(crate) fn header(self, mem: &[u8]) -> Tag {
        Tag::unpack(read_word(mem, self.header_offset()))
    }

    pub(crate) fn set_header(self, mem: &mut [u8], tag: Tag) {
        write_word(mem, self.header_offset(), tag.pack());
    }

    /// Size of the block, read from its header.
    pub(crate) fn size(self, mem: &[u8]) -> usize {
        self.header(mem).size()
    }

    /// Offset of the footer word of a block of `size` bytes.
    pub(crate) fn footer_offset(self, size: usize) -> usize {
        self.offset() + size - DWORD
    }

    /// Reads the footer. Only meaningful for free blocks.
    pub(crate) fn footer(self, mem: &[u8]) -> Tag {
        let size = self.size(mem);
        Tag::unpack(read_word(mem, self.footer_offset(size)))
    }

    /// Writes `tag` to both the header and the footer.
    pub(crate) fn set_tags(self, mem: &mut [u8], tag: Tag) {
        self.set_header(mem, tag);
        write_word(mem, self.footer_offset(tag.size()), tag.pack());
    }

    /// Updates the previous-allocated flag in the header, and in the footer as
    /// well when the block is free.
    pub(crate) fn set_prev_allocated(self, mem: &mut [u8], prev_allocated: bool) {
        let tag = self.header(mem).with_prev_allocated(prev_allocated);
        if tag.is_allocated() {
            self.set_header(mem, tag);
        } else {
            self.set_tags(mem, tag);
        }
    }

    /// The block immediately after this one.
    pub(crate) fn next(self, mem: &[u8]) -> Self {
        Self::at(self.offset() + self.size(mem))
    }

    /// The block immediately before this one.
    ///
    /// Only valid while the previous block is free, since it is located
    /// through that block's footer.
    pub(crate) fn prev(self, mem: &[u8]) -> Self {
        let prev_size = Tag::unpack(read_word(mem, self.offset() - DWORD)).size();
        Self::at(self.offset() - prev_size)
    }

    pub(crate) fn pred(self, mem: &[u8]) -> Option<Self> {
        Self::from_link(read_word(mem, self.offset()))
    }

    pub(crate) fn set_pred(self, mem: &mut [u8], pred: Option<Self>) {
        write_word(mem, self.offset(), Self::to_link(pred));
    }

    pub(crate) fn succ(self, mem: &[u8]) -> Option<Self> {
        Self::from_link(read_word(mem, self.offset() + WORD))
    }

    pub(crate) fn set_succ(self, mem: &mut [u8], succ: Option<Self>) {
        write_word(mem, self.offset() + WORD, Self::to_link(succ));
    }
}

/// Reads an optional block offset stored in a link word at `offset`.
pub(crate) fn read_link(mem: &[u8], offset: usize) -> Option<HeapPtr> {
    HeapPtr::from_link(read_word(mem, offset))
}

/// Stores an optional block offset in the link word at `offset`.
pub(crate) fn write_link(mem: &mut [u8], offset: usize, ptr: Option<HeapPtr>) {
    write_word(mem, offset, HeapPtr::to_link(ptr));
}
