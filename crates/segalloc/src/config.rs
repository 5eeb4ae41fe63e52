//! Tunable allocation policy.
//!
//! The defaults give 33 size classes, first-fit search in the 11 smallest
//! classes, and 4 KiB heap extensions. Correctness does not depend on any of
//! these numbers.

use arrayvec::ArrayVec;
use snafu::{Snafu, ensure};
use snafu_utils::Location;

use crate::block::{ALIGN, MIN_BLOCK_SIZE};

/// Maximum number of geometric class bounds a [`SizeClasses`] can hold.
pub const MAX_BOUNDS: usize = 48;

/// Maximum number of classes, catch-all included, a [`SizeClasses`] can have.
///
/// Each class costs a list head in the prologue and a step in every fit
/// search and heap check.
pub const MAX_CLASSES: usize = 128;

/// Default extension size when no free block fits a request.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Default size of the free block seeded at initialization.
pub const DEFAULT_INITIAL_SIZE: usize = 1 << 8;

/// Default number of size classes searched first-fit.
pub const DEFAULT_FIRST_FIT_CLASSES: usize = 11;

/// Default largest block size that gets its own linear class.
pub const DEFAULT_LINEAR_MAX: usize = 96;

/// Default inclusive upper bounds of the geometric classes.
pub const DEFAULT_BOUNDS: [usize; 21] = [
    112, 128, 144, 192, 256, 384, 512, 768, 1024, 1536, 2048, 3072, 4096, 5120, 8192, 16384,
    32768, 65536, 131_072, 262_144, 524_288,
];

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display(
        "{what} of {size} bytes must be a multiple of {ALIGN} and at least {MIN_BLOCK_SIZE}"
    ))]
    UnalignedSize {
        what: &'static str,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("class bound #{index} ({bound}) must exceed the previous bound ({previous})"))]
    UnorderedBound {
        index: usize,
        bound: usize,
        previous: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{count} class bounds exceed the supported maximum of {MAX_BOUNDS}"))]
    TooManyBounds {
        count: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{count} size classes exceed the supported maximum of {MAX_CLASSES}"))]
    TooManyClasses {
        count: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

fn ensure_block_size(what: &'static str, size: usize) -> Result<(), ConfigError> {
    ensure!(
        size.is_multiple_of(ALIGN) && size >= MIN_BLOCK_SIZE,
        UnalignedSizeSnafu { what, size }
    );
    Ok(())
}

/// Partition of free block sizes into classes.
///
/// Sizes up to `linear_max` get one class per [`ALIGN`] step. Larger sizes
/// fall into the first geometric class whose inclusive bound holds them, and
/// anything beyond the last bound lands in a final catch-all class.
///
/// ```
/// use segalloc::SizeClasses;
///
/// let classes = SizeClasses::default();
/// assert_eq!(classes.class_of(16), 0);
/// assert_eq!(classes.class_of(96), 10);
/// assert_eq!(classes.class_of(100), 11);
/// assert_eq!(classes.class_of(2048), 21);
/// assert_eq!(classes.class_of(1 << 20), 32);
/// assert_eq!(classes.count(), 33);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClasses {
    linear_max: usize,
    bounds: ArrayVec<usize, MAX_BOUNDS>,
}

impl Default for SizeClasses {
    fn default() -> Self {
        let mut bounds = ArrayVec::new();
        bounds.extend(DEFAULT_BOUNDS);
        Self {
            linear_max: DEFAULT_LINEAR_MAX,
            bounds,
        }
    }
}

impl SizeClasses {
    /// Builds a class table.
    ///
    /// `linear_max` must be a valid block size, and `bounds` must be strictly
    /// increasing and start above `linear_max`. The table may have at most
    /// [`MAX_CLASSES`] classes.
    pub fn new(linear_max: usize, bounds: &[usize]) -> Result<Self, ConfigError> {
        ensure_block_size("linear class limit", linear_max)?;
        let mut previous = linear_max;
        for (index, &bound) in bounds.iter().enumerate() {
            ensure!(
                bound > previous,
                UnorderedBoundSnafu {
                    index,
                    bound,
                    previous,
                }
            );
            previous = bound;
        }
        let mut table = ArrayVec::new();
        ensure!(
            table.try_extend_from_slice(bounds).is_ok(),
            TooManyBoundsSnafu {
                count: bounds.len(),
            }
        );
        let classes = Self {
            linear_max,
            bounds: table,
        };
        let count = classes.count();
        ensure!(count <= MAX_CLASSES, TooManyClassesSnafu { count });
        Ok(classes)
    }

    /// Largest size with its own linear class.
    #[must_use]
    pub fn linear_max(&self) -> usize {
        self.linear_max
    }

    /// Inclusive upper bounds of the geometric classes.
    #[must_use]
    pub fn bounds(&self) -> &[usize] {
        &self.bounds
    }

    fn linear_count(&self) -> usize {
        (self.linear_max - MIN_BLOCK_SIZE) / ALIGN + 1
    }

    /// Total number of classes, including the catch-all class.
    #[must_use]
    pub fn count(&self) -> usize {
        self.linear_count() + self.bounds.len() + 1
    }

    /// Returns the class that holds blocks of `size` bytes.
    ///
    /// The result never decreases as `size` grows.
    #[must_use]
    pub fn class_of(&self, size: usize) -> usize {
        if size <= self.linear_max {
            return (size.max(MIN_BLOCK_SIZE) - MIN_BLOCK_SIZE).div_ceil(ALIGN);
        }
        let geometric = self
            .bounds
            .iter()
            .position(|&bound| size <= bound)
            .unwrap_or(self.bounds.len());
        self.linear_count() + geometric
    }
}

/// Allocation policy of a [`Heap`](crate::Heap).
///
/// ```
/// use segalloc::HeapConfig;
///
/// let config = HeapConfig {
///     chunk_size: 1 << 16,
///     ..HeapConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum number of bytes requested from the region when no free block
    /// fits.
    pub chunk_size: usize,
    /// Size of the free block created by initialization.
    pub initial_size: usize,
    /// Classes with an index below this are searched first-fit; the rest are
    /// searched best-fit.
    pub first_fit_classes: usize,
    /// Size class table of the free-list bank.
    pub size_classes: SizeClasses,
    /// Run the consistency checker after every mutating operation and abort
    /// on the first violation.
    pub verify: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            initial_size: DEFAULT_INITIAL_SIZE,
            first_fit_classes: DEFAULT_FIRST_FIT_CLASSES,
            size_classes: SizeClasses::default(),
            verify: false,
        }
    }
}

impl HeapConfig {
    /// Checks that every size in the configuration is a usable block size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_block_size("extension chunk", self.chunk_size)?;
        ensure_block_size("initial free block", self.initial_size)?;
        Ok(())
    }
}
