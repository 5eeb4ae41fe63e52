//! Segregated free-list heap allocator.
//!
//! This crate manages a contiguous, growable byte region as a heap of
//! variable-sized blocks. Free blocks are kept in per-size-class explicit
//! free lists, merged with their free neighbours as soon as they are
//! released, and split when a request leaves a usable remainder.
//!
//! The heap never hands out raw pointers. Allocations are identified by
//! [`HeapPtr`] handles (offsets of the payload from the heap base), and their
//! bytes are accessed through [`Heap::payload`] and [`Heap::payload_mut`].
//!
//! # Layout
//!
//! ```text
//! ┌──────────────┬─────┬───────┬───────┬───────┬─────┬──────────┐
//! │ list heads   │ pad │ hdr…  │ hdr…  │ hdr…  │ ... │ epilogue │
//! └──────────────┴─────┴───────┴───────┴───────┴─────┴──────────┘
//! ```
//!
//! - The prologue holds one list head per size class.
//! - Every block has a one-word header with its size and two flags. Free
//!   blocks also carry a footer and their list links. See [`block`].
//! - The epilogue is a zero-size allocated header at the heap top. Extending
//!   the heap turns it into the header of the new free block.
//!
//! # Placement policy
//!
//! | Step | Behaviour |
//! |------|-----------|
//! | Size adjustment | request + 4 bytes, rounded up to 8, at least 16 |
//! | Small classes | first fit in address-independent LIFO order |
//! | Large classes | best fit, stopping at the first class with a fit |
//! | No fit | grow the region by `max(block size, chunk size)` |
//! | Split | only if the remainder is at least 16 bytes |
//!
//! Class boundaries and thresholds are configurable through [`HeapConfig`].
//!
//! # Usage
//!
//! ```rust
//! use segalloc::Heap;
//!
//! let mut heap = Heap::new()?;
//!
//! let ptr = heap.allocate(24)?.expect("non-zero request");
//! heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//!
//! let ptr = heap.reallocate(Some(ptr), 100)?.expect("non-zero request");
//! assert_eq!(&heap.payload(ptr)[..5], b"hello");
//!
//! heap.release(Some(ptr));
//! heap.check()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Consistency checking
//!
//! [`Heap::check`] walks the whole heap and every free list and reports the
//! first broken invariant as a [`CheckError`]. With [`HeapConfig::verify`]
//! set, the heap runs [`Heap::check_or_abort`] after every mutating
//! operation.
//!
//! # Thread Safety
//!
//! A [`Heap`] is a plain value with `&mut self` operations. Wrap it in a lock
//! to share it between threads.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub mod block;
pub mod check;
mod coalesce;
pub mod config;
mod error;
mod free_list;
mod heap;
mod place;
pub mod walk;

pub use heap_region::{GrowError, HeapRegion, VecRegion};

pub use self::{
    block::{ALIGN, BlockFlags, HeapPtr, MIN_BLOCK_SIZE, Tag},
    check::CheckError,
    config::{ConfigError, HeapConfig, SizeClasses},
    error::{AllocError, InitError},
    heap::Heap,
    walk::{BlockInfo, Blocks, HeapStats},
};
