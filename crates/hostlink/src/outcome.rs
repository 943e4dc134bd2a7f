//! Success/failure container threaded through every hostlink operation
//!
//! `Outcome` carries the same information as `std::result::Result` but exposes
//! a combinator vocabulary built for pipelines of remote steps: `then` chains
//! steps that do not need the previous value, `catch`/`catch_error` recover
//! from selected failures, and `sequence` runs a list of steps lazily.
//!
//! ```
//! use hostlink::{LinkError, Outcome};
//!
//! let steps = Outcome::<u32>::Success(10)
//!     .map(|x| x * 2)
//!     .then(|| Outcome::Failure(LinkError::Configuration("boom".into())))
//!     .map(|x: u32| x * 2)
//!     .recover(|_| 0);
//! assert_eq!(steps, Outcome::Success(0));
//! ```

use crate::error::{ErrorKind, LinkError};
use hostlink_ssh::{TransportError, TransportErrorKind};
use std::fmt;

/// Result of a hostlink operation
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome<T, E = LinkError> {
    /// The operation produced a value
    Success(T),
    /// The operation failed
    Failure(E),
}

/// Errors that can be selected by category in [`Outcome::catch_error`]
pub trait Categorized {
    /// Category type
    type Kind: PartialEq;

    /// Category of this error
    fn category(&self) -> Self::Kind;
}

impl Categorized for LinkError {
    type Kind = ErrorKind;

    fn category(&self) -> ErrorKind {
        self.kind()
    }
}

impl Categorized for TransportError {
    type Kind = TransportErrorKind;

    fn category(&self) -> TransportErrorKind {
        self.kind()
    }
}

impl<T, E> Outcome<T, E> {
    /// Run a fallible closure, converting its error into this outcome's error type
    pub fn attempt<F, E2>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, E2>,
        E: From<E2>,
    {
        match f() {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Failure(E::from(err)),
        }
    }

    /// Whether this is a `Success`
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Whether this is a `Failure`
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// The success value, if any
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// The failure, if any
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err),
        }
    }

    /// Transform the success value
    pub fn map<U, F>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::Failure(err) => Outcome::Failure(err),
        }
    }

    /// Transform the failure
    pub fn map_error<E2, F>(self, f: F) -> Outcome<T, E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Success(value) => Outcome::Success(value),
            Self::Failure(err) => Outcome::Failure(f(err)),
        }
    }

    /// Chain a step that consumes the success value
    pub fn bind<U, F>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> Outcome<U, E>,
    {
        match self {
            Self::Success(value) => f(value),
            Self::Failure(err) => Outcome::Failure(err),
        }
    }

    /// Chain a step that ignores the success value
    pub fn then<U, F>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce() -> Outcome<U, E>,
    {
        self.bind(|_| f())
    }

    /// Handle any failure; the handler's outcome replaces this one
    pub fn catch<F>(self, handler: F) -> Self
    where
        F: FnOnce(E) -> Self,
    {
        match self {
            Self::Success(value) => Self::Success(value),
            Self::Failure(err) => handler(err),
        }
    }

    /// Handle any failure with a plain replacement value
    pub fn recover<F>(self, handler: F) -> Self
    where
        F: FnOnce(E) -> T,
    {
        self.catch(|err| Self::Success(handler(err)))
    }

    /// Handle only failures of category `kind`; other failures pass through
    pub fn catch_error<F>(self, kind: E::Kind, handler: F) -> Self
    where
        E: Categorized,
        F: FnOnce(E) -> Self,
    {
        match self {
            Self::Failure(err) if err.category() == kind => handler(err),
            other => other,
        }
    }

    /// Look at the failure without consuming it
    pub fn inspect_error<F>(self, f: F) -> Self
    where
        F: FnOnce(&E),
    {
        if let Self::Failure(err) = &self {
            f(err);
        }
        self
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(err) => Err(err),
        }
    }
}

impl<T, E> Outcome<Vec<T>, E> {
    /// Run `steps` in order, stopping at the first failure.
    ///
    /// Steps after a failure are never invoked.
    pub fn sequence<I, F>(steps: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Outcome<T, E>,
    {
        let steps = steps.into_iter();
        let mut values = Vec::with_capacity(steps.size_hint().0);
        for step in steps {
            match step() {
                Outcome::Success(value) => values.push(value),
                Outcome::Failure(err) => return Outcome::Failure(err),
            }
        }
        Outcome::Success(values)
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Failure(err),
        }
    }
}

impl<T, E> From<Outcome<T, E>> for Result<T, E> {
    fn from(outcome: Outcome<T, E>) -> Self {
        outcome.into_result()
    }
}

impl<T: fmt::Display, E: fmt::Display> fmt::Display for Outcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(value) => write!(f, "Success({})", value),
            Self::Failure(err) => write!(f, "Failure({})", err),
        }
    }
}
