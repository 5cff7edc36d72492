use std::{fmt::Display, panic::Location};

use anyhow::{Context, Result};

/// Public prelude. Re-exports anyhow and thiserror along with the location
/// extension traits, so downstream crates only need `use located_error::*;`
pub mod prelude {
    extern crate anyhow;
    pub use anyhow::{anyhow, bail, Context, Result};

    extern crate thiserror;
    pub use thiserror::Error;

    pub use super::{LocatedError, LocatedOption};
}

macro_rules! caller_loc {
    ($caller:expr) => {
        format!("[{}:{}:{}]", $caller.file(), $caller.line(), $caller.column())
    }
}

/// Extends [`Result<T, E>`] with context carrying the file, line and column
/// of the call site.
///
/// # Example
/// ```no_run
/// use anyhow::Result;
/// use located_error::LocatedError;
///
/// fn open_alignment(path: &str) -> Result<std::fs::File> {
///     std::fs::File::open(path)
///         .with_loc(|| format!("Failed to open binary alignment {path}"))
/// }
/// ```
/// An error bubbling through several `.loc()` layers renders as a chain of
/// `[file:line:col] message` entries, one per layer.
pub trait LocatedError<T, E> {
    /// Wrap the error value with additional context + the location at which it was called.
    fn loc<C>(self, context: C) -> Result<T, anyhow::Error>
    where
        C: Display + Send + Sync + 'static;

    /// Lazily evaluated flavor of [`LocatedError::loc()`]: the context closure
    /// only runs if an error did occur.
    fn with_loc<C, F>(self, f: F) -> Result<T, anyhow::Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> LocatedError<T, E> for Result<T, E>
where
    E: Display + Send + Sync + 'static,
    Result<T, E>: Context<T, E>,
{
    #[track_caller]
    fn loc<C>(self, context: C) -> Result<T, anyhow::Error>
    where
        C: Display + Send + Sync + 'static
    {
        match self {
            Ok(ok) => Ok(ok),
            Err(_) => {
                let loc = caller_loc!(Location::caller());
                self.context(format!("{loc} {context}"))
            }
        }
    }

    #[track_caller]
    fn with_loc<C, F>(self, f: F) -> Result<T, anyhow::Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C
    {
        match self {
            Ok(ok) => Ok(ok),
            Err(_) => {
                let loc = caller_loc!(Location::caller());
                self.with_context(|| format!("{loc} {}", f()))
            }
        }
    }
}

/// [`Option<T>`] counterpart of [`LocatedError`].
///
/// # Example
/// ```no_run
/// use anyhow::Result;
/// use located_error::LocatedOption;
///
/// fn first_partition(widths: &[usize]) -> Result<usize> {
///     widths.first().copied()
///         .loc("Alignment contains no partition")
/// }
/// ```
pub trait LocatedOption<T> {
    /// Wrap the missing value with context + the location at which it was called.
    fn loc<C>(self, context: C) -> Result<T, anyhow::Error>
    where
        C: Display + Send + Sync + 'static;

    /// Lazily evaluated flavor of [`LocatedOption::loc()`].
    fn with_loc<C, F>(self, f: F) -> Result<T, anyhow::Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> LocatedOption<T> for Option<T> {
    #[track_caller]
    fn loc<C>(self, context: C) -> Result<T, anyhow::Error>
    where
        C: Display + Send + Sync + 'static
    {
        match self {
            Some(ok) => Ok(ok),
            None     => {
                let loc = caller_loc!(Location::caller());
                self.context(format!("{loc} {context}"))
            }
        }
    }

    #[track_caller]
    fn with_loc<C, F>(self, f: F) -> Result<T, anyhow::Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C
    {
        match self {
            Some(ok) => Ok(ok),
            None     => {
                let loc = caller_loc!(Location::caller());
                self.with_context(|| format!("{loc} {}", f()))
            }
        }
    }
}
