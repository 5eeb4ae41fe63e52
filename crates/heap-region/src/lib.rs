//! Growable byte regions that back a heap.
//!
//! A heap allocator sits on top of a single contiguous region that can only
//! grow at its high end, the way a program break moves under `sbrk(2)`. This
//! crate describes that contract with the [`HeapRegion`] trait and provides
//! [`VecRegion`], a bounded region stored in a `Vec<u8>`.
//!
//! Regions are addressed by offset from their base rather than by pointer.
//! Growing a [`VecRegion`] may move its storage, but an offset stays valid for
//! the lifetime of the region.
//!
//! ```text
//! base                                 top (len)          limit
//! │                                     │                   │
//! ▼                                     ▼                   ▼
//! ┌─────────────────────────────────────┬───────────────────┐
//! │          bytes handed out           │  available space  │
//! └─────────────────────────────────────┴───────────────────┘
//!                                       └── grow(n) returns this offset
//! ```
//!
//! # Example
//!
//! ```
//! use heap_region::{HeapRegion, VecRegion};
//!
//! let mut region = VecRegion::with_limit(64);
//! assert_eq!(region.grow(16).unwrap(), 0);
//! assert_eq!(region.grow(32).unwrap(), 16);
//! assert_eq!(region.len(), 48);
//! assert!(region.grow(32).is_err());
//! ```

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

use alloc::vec::Vec;

use snafu::{Snafu, ensure};
use snafu_utils::Location;

/// Default upper bound for a [`VecRegion`] (20 MiB).
pub const DEFAULT_LIMIT: usize = 20 * (1 << 20);

#[derive(Debug, Snafu)]
pub enum GrowError {
    #[snafu(display(
        "cannot grow region by {requested} bytes: only {available} bytes available"
    ))]
    LimitExceeded {
        requested: usize,
        available: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// A contiguous byte region that only grows at its high end.
///
/// Implementations must uphold the following:
///
/// - [`grow`](Self::grow) appends exactly `increment` bytes immediately after
///   the previous top and returns the previous top.
/// - A failed [`grow`](Self::grow) leaves the region unchanged.
/// - The region never shrinks, and bytes below the top keep their contents
///   across growth.
pub trait HeapRegion {
    /// Returns the current size of the region in bytes.
    fn len(&self) -> usize;

    /// Returns `true` if nothing has been handed out yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the bytes of the region.
    fn bytes(&self) -> &[u8];

    /// Returns the bytes of the region mutably.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Extends the region by `increment` bytes.
    ///
    /// Returns the offset of the first new byte. A zero `increment` returns
    /// the current top without changing anything.
    fn grow(&mut self, increment: usize) -> Result<usize, GrowError>;
}

/// A [`HeapRegion`] stored in a `Vec<u8>` and capped at a fixed limit.
///
/// New bytes are zero-filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VecRegion {
    bytes: Vec<u8>,
    limit: usize,
}

impl Default for VecRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl VecRegion {
    /// Creates an empty region capped at [`DEFAULT_LIMIT`].
    #[must_use]
    pub const fn new() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }

    /// Creates an empty region capped at `limit` bytes.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Returns the maximum size this region may grow to.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns how many more bytes [`grow`](HeapRegion::grow) can hand out.
    #[must_use]
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.bytes.len())
    }
}

impl HeapRegion for VecRegion {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn grow(&mut self, increment: usize) -> Result<usize, GrowError> {
        let top = self.bytes.len();
        let available = self.available();
        ensure!(
            increment <= available,
            LimitExceededSnafu {
                requested: increment,
                available,
            }
        );
        self.bytes.resize(top + increment, 0);
        log::trace!(
            "VecRegion::grow({increment:#x}): top moved from {top:#x} to {:#x}",
            self.bytes.len()
        );
        Ok(top)
    }
}
