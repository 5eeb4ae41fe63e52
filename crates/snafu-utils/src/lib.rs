//! Error plumbing shared by the heap crates.
//!
//! [`Location`] is captured implicitly by every `snafu` error variant in the
//! workspace, and [`Report`] renders an error together with its source chain
//! when a failure is fatal.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::{error::Error, fmt};

use snafu::GenerateImplicitData;

/// Source location where an error was constructed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl Location {
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Human readable rendering of an error and every error in its source chain.
///
/// The messages come first. A `Details:` section follows with the `Debug`
/// form of the error, which carries the [`Location`] of every error in the
/// chain.
pub struct Report<E> {
    error: E,
}

impl<E> fmt::Debug for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {s}")?;
            source = s.source();
            index += 1;
        }
        writeln!(f)?;
        writeln!(f, "Details:")?;
        writeln!(f, "{:#?}", self.error)
    }
}

impl<E> Report<E> {
    /// Wraps `error` for rendering.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

/// Panics with a rendered [`Report`] of `err`.
///
/// Used for failures after which the heap can no longer be trusted.
///
/// # Panics
///
/// Always panics. Under `panic = "abort"` this terminates the process.
#[track_caller]
pub fn report<E>(err: E) -> !
where
    E: Error,
{
    let report = Report::new(err);
    panic!("Critical error occurred\n\n{report}");
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::string::ToString as _;

    use snafu::{ResultExt as _, Snafu};

    use super::*;

    #[derive(Debug, Snafu)]
    #[snafu(display("inner failure"))]
    struct InnerError {
        #[snafu(implicit)]
        location: Location,
    }

    #[derive(Debug, Snafu)]
    #[snafu(display("outer failure"))]
    struct OuterError {
        #[snafu(implicit)]
        location: Location,
        source: InnerError,
    }

    fn fail() -> Result<(), OuterError> {
        InnerSnafu.fail::<()>().context(OuterSnafu)
    }

    #[test]
    fn test_report_lists_source_chain() {
        let err = fail().unwrap_err();
        let rendered = Report::new(err).to_string();
        assert!(rendered.starts_with("Error: outer failure\n"));
        assert!(rendered.contains("Caused by:\n"));
        assert!(rendered.contains("   0: inner failure\n"));
        assert!(rendered.contains("Details:\n"));
        assert_eq!(rendered.matches("location:").count(), 2);
    }

    #[test]
    fn test_report_without_source() {
        let err = InnerSnafu.build();
        let rendered = Report::new(err).to_string();
        assert!(rendered.starts_with("Error: inner failure\n\nDetails:\n"));
        assert!(!rendered.contains("Caused by:"));
        assert!(rendered.contains("lib.rs"));
    }

    #[test]
    fn test_location_points_at_caller() {
        let err = InnerSnafu.build();
        assert!(err.location.file().ends_with("lib.rs"));
        assert!(err.location.line() > 0);
    }

    #[test]
    #[should_panic(expected = "Critical error occurred")]
    fn test_report_panics() {
        report(InnerSnafu.build());
    }
}
