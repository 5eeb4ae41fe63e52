//! The heap manager and the public allocation interface.

use heap_region::{HeapRegion, VecRegion};
use log::{debug, trace};
use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    block::{ALIGN, DWORD, HeapPtr, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, Tag, WORD},
    coalesce::coalesce,
    config::HeapConfig,
    error::{
        AllocError, ExhaustedSnafu, InitError, InvalidConfigSnafu, OverflowSnafu, PrologueSnafu,
        RegionInUseSnafu, SeedSnafu, TooLargeSnafu,
    },
    free_list::FreeListBank,
    place::{find_fit, place},
};

/// Largest heap whose every offset still fits in a link word.
const MAX_HEAP_LEN: usize = MAX_BLOCK_SIZE;

/// Length of the prologue: the free-list heads, padding to the alignment, a
/// padding word, and the header slot of the first block.
pub(crate) fn prologue_len(bank: &FreeListBank) -> usize {
    bank.heads_len().next_multiple_of(ALIGN) + DWORD
}

/// Block size needed to serve a request of `size` payload bytes.
fn block_size_for(size: usize) -> Option<usize> {
    if size <= MIN_BLOCK_SIZE - WORD {
        return Some(MIN_BLOCK_SIZE);
    }
    let size = size.checked_add(WORD)?.checked_next_multiple_of(ALIGN)?;
    (size <= MAX_BLOCK_SIZE).then_some(size)
}

/// A heap managed with segregated free lists on top of a [`HeapRegion`].
///
/// The heap owns its region for its whole lifetime. Blocks are identified by
/// [`HeapPtr`] handles, and their payloads are reached through
/// [`payload`](Self::payload) and [`payload_mut`](Self::payload_mut).
///
/// ```text
/// ┌───────────────┬─────┬──────────┬──────────┬─────┬──────────┬──────────┐
/// │ list heads    │ pad │ block    │ block    │ ... │ block    │ epilogue │
/// └───────────────┴─────┴──────────┴──────────┴─────┴──────────┴──────────┘
/// 0               prologue ────────────────────────────────────────────► top
/// ```
#[derive(Debug)]
pub struct Heap<R = VecRegion> {
    region: R,
    bank: FreeListBank,
    config: HeapConfig,
}

impl Heap<VecRegion> {
    /// Creates a heap with the default policy on a default [`VecRegion`].
    pub fn new() -> Result<Self, InitError> {
        Self::init(VecRegion::new(), HeapConfig::default())
    }
}

impl<R> Heap<R>
where
    R: HeapRegion,
{
    /// Lays out the prologue and the epilogue in the empty `region` and seeds
    /// the heap with one free block of `config.initial_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `region` violates the [`HeapRegion`] contract by growing from
    /// a base other than its previous top.
    pub fn init(mut region: R, config: HeapConfig) -> Result<Self, InitError> {
        config.validate().context(InvalidConfigSnafu)?;
        ensure!(region.is_empty(), RegionInUseSnafu { len: region.len() });

        let bank = FreeListBank::new(config.size_classes.clone());
        let prologue = prologue_len(&bank);
        let base = region
            .grow(prologue)
            .context(PrologueSnafu { size: prologue })?;
        assert_eq!(base, 0, "region grew from a non-zero base");

        let mem = region.bytes_mut();
        bank.reset(mem);
        // the prologue counts as allocated for the block that follows it
        HeapPtr::at(prologue).set_header(mem, Tag::epilogue(true));

        let mut heap = Self {
            region,
            bank,
            config,
        };
        heap.extend(heap.config.initial_size).context(SeedSnafu)?;
        debug!(
            "heap initialized: {} size classes, prologue {prologue:#x} bytes, top {:#x}",
            heap.bank.class_count(),
            heap.region.len()
        );
        heap.verify();
        Ok(heap)
    }

    /// Returns the policy this heap was created with.
    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Returns the underlying region.
    #[must_use]
    pub fn region(&self) -> &R {
        &self.region
    }

    /// Tears the heap down and hands back its region.
    pub fn into_region(self) -> R {
        self.region
    }

    /// Current size of the heap in bytes, prologue included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.region.len()
    }

    /// A heap always holds at least its prologue, so this is never `true`
    /// after initialization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    pub(crate) fn memory(&self) -> &[u8] {
        self.region.bytes()
    }

    pub(crate) fn bank(&self) -> &FreeListBank {
        &self.bank
    }

    #[cfg(test)]
    pub(crate) fn parts_mut(&mut self) -> (&mut [u8], &FreeListBank) {
        (self.region.bytes_mut(), &self.bank)
    }

    /// Allocates a block with at least `size` usable bytes.
    ///
    /// Returns `Ok(None)` for a zero `size`. When no free block fits, the heap
    /// grows by the larger of the block size and the configured chunk size;
    /// if the region refuses to grow, the error is returned as is and nothing
    /// is retried.
    pub fn allocate(&mut self, size: usize) -> Result<Option<HeapPtr>, AllocError> {
        if size == 0 {
            return Ok(None);
        }
        self.allocate_block(size).map(Some)
    }

    fn allocate_block(&mut self, size: usize) -> Result<HeapPtr, AllocError> {
        let block_size = block_size_for(size).context(TooLargeSnafu { size })?;
        let fit = find_fit(
            self.region.bytes(),
            &self.bank,
            self.config.first_fit_classes,
            block_size,
        );
        let free = match fit {
            Some(block) => block,
            None => self.extend(block_size.max(self.config.chunk_size))?,
        };
        let block = place(self.region.bytes_mut(), &self.bank, free, block_size);
        trace!("allocate({size}) -> {block} ({block_size}-byte block)");
        self.verify();
        Ok(block)
    }

    /// Returns a block to the heap. `None` is ignored.
    ///
    /// `ptr` must come from this heap and must not have been released since.
    /// Releasing a block twice corrupts the heap; the corruption is only
    /// reported by [`check`](Self::check).
    pub fn release(&mut self, ptr: Option<HeapPtr>) {
        let Some(block) = ptr else {
            return;
        };
        let mem = self.region.bytes_mut();
        let tag = block.header(mem);
        block.set_tags(mem, Tag::free(tag.size(), tag.is_prev_allocated()));
        block.next(mem).set_prev_allocated(mem, false);
        let merged = coalesce(mem, &self.bank, block);
        trace!("release({block}): free block {merged}");
        self.verify();
    }

    /// Moves the contents of `ptr` into a new block of at least `size` bytes.
    ///
    /// A zero `size` releases `ptr` and returns `Ok(None)`; a `None` pointer
    /// makes this a plain [`allocate`](Self::allocate). Otherwise the first
    /// `min(old usable size, size)` bytes are copied to a fresh block and the
    /// old block is released. The block is never resized in place.
    ///
    /// On failure the old block is left untouched.
    pub fn reallocate(
        &mut self,
        ptr: Option<HeapPtr>,
        size: usize,
    ) -> Result<Option<HeapPtr>, AllocError> {
        if size == 0 {
            self.release(ptr);
            return Ok(None);
        }
        let Some(old) = ptr else {
            return self.allocate(size);
        };

        let new = self.allocate_block(size)?;
        let len = self.usable_size(old).min(size);
        let start = old.offset();
        self.region
            .bytes_mut()
            .copy_within(start..start + len, new.offset());
        self.release(Some(old));
        trace!("reallocate({old}, {size}) -> {new}, {len} bytes moved");
        Ok(Some(new))
    }

    /// Allocates room for `count` elements of `size` bytes and zero-fills it.
    ///
    /// An overflowing `count * size` is rejected rather than wrapped.
    pub fn zero_allocate(
        &mut self,
        count: usize,
        size: usize,
    ) -> Result<Option<HeapPtr>, AllocError> {
        let len = count
            .checked_mul(size)
            .context(OverflowSnafu { count, size })?;
        let Some(block) = self.allocate(len)? else {
            return Ok(None);
        };
        self.payload_mut(block)[..len].fill(0);
        Ok(Some(block))
    }

    /// Number of bytes the caller may use in the block at `ptr`.
    ///
    /// This can exceed the requested size because of alignment and because
    /// leftovers too small to split are handed out with the block.
    #[must_use]
    pub fn usable_size(&self, ptr: HeapPtr) -> usize {
        ptr.size(self.region.bytes()) - WORD
    }

    /// Returns the usable bytes of an allocated block.
    #[must_use]
    pub fn payload(&self, ptr: HeapPtr) -> &[u8] {
        let len = self.usable_size(ptr);
        &self.region.bytes()[ptr.offset()..][..len]
    }

    /// Returns the usable bytes of an allocated block mutably.
    pub fn payload_mut(&mut self, ptr: HeapPtr) -> &mut [u8] {
        let len = self.usable_size(ptr);
        &mut self.region.bytes_mut()[ptr.offset()..][..len]
    }

    /// Grows the region by `size` bytes and turns the new space into a free
    /// block, merged with a free block that ended the old heap.
    fn extend(&mut self, size: usize) -> Result<HeapPtr, AllocError> {
        let top = self.region.len();
        ensure!(
            top.checked_add(size)
                .is_some_and(|end| end <= MAX_HEAP_LEN),
            TooLargeSnafu { size }
        );
        let base = self
            .region
            .grow(size)
            .context(ExhaustedSnafu { requested: size })?;
        assert_eq!(base, top, "region grew from {base:#x} instead of {top:#x}");

        let mem = self.region.bytes_mut();
        // the old epilogue header becomes the header of the new block
        let block = HeapPtr::at(base);
        let prev_allocated = block.header(mem).is_prev_allocated();
        block.set_tags(mem, Tag::free(size, prev_allocated));
        block.next(mem).set_header(mem, Tag::epilogue(false));
        debug!("heap extended by {size:#x} bytes to {:#x}", mem.len());

        Ok(coalesce(mem, &self.bank, block))
    }

    fn verify(&self) {
        if self.config.verify {
            self.check_or_abort();
        }
    }
}
