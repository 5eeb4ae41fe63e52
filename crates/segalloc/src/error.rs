use heap_region::GrowError;
use snafu::Snafu;
use snafu_utils::Location;

use crate::config::ConfigError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InitError {
    #[snafu(display("invalid heap configuration"))]
    InvalidConfig {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: ConfigError,
    },
    #[snafu(display("region already holds {len} bytes"))]
    RegionInUse {
        len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to reserve the {size}-byte prologue"))]
    Prologue {
        size: usize,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: GrowError,
    },
    #[snafu(display("failed to seed the heap with its first free block"))]
    Seed {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: AllocError,
    },
}

/// Failure of an allocating operation.
///
/// Only [`Exhausted`](Self::Exhausted) can happen to a caller that keeps its
/// request sizes within the heap's address range.
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("heap exhausted while growing by {requested} bytes"))]
    Exhausted {
        requested: usize,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: GrowError,
    },
    #[snafu(display("request of {size} bytes exceeds the addressable heap"))]
    TooLarge {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("zero-initialized allocation of {count} x {size} bytes overflows"))]
    Overflow {
        count: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
}
