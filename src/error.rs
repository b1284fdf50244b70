// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types returned by pipelines, nodes and node builders.
//!
//! All these errors are contract violations by the caller (or by a
//! user-supplied close handler): they are reported at the offending call and
//! never retried. Panics raised by user-supplied functions are not converted
//! into errors, they propagate unchanged to the thread that invoked the
//! terminal operation.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Error type of a fallible close handler registered via
/// [`Stream::on_close()`](crate::Stream::on_close).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error returned by pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An argument is outside of its valid range, for example a truncation
    /// range that isn't included in a node.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// A node builder was driven out of its `begin`/`accept`/`end`/`build`
    /// sequence, or was filled beyond (or below) its declared size.
    #[error("invalid builder state: {message}")]
    BuilderState {
        /// Description of the misuse.
        message: String,
    },

    /// A materialized result would exceed the maximum size of a buffer.
    #[error("capacity overflow: {requested} elements requested, at most {max} supported")]
    CapacityOverflow {
        /// Number of elements that were requested.
        requested: usize,
        /// Maximum number of elements supported for this element type.
        max: usize,
    },

    /// The stream was already consumed by a terminal operation, linked to
    /// another stage, or closed.
    #[error("stream has already been operated upon or closed")]
    ReuseViolation,

    /// One or more close handlers failed.
    #[error(transparent)]
    Close(#[from] CloseError),
}

impl PipelineError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        PipelineError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn builder_state(message: impl Into<String>) -> Self {
        PipelineError::BuilderState {
            message: message.into(),
        }
    }
}

/// Failure of the close handlers of a stream.
///
/// All the registered handlers are run even if some of them fail. The failure
/// of the first failing handler is reported as the primary error, and the
/// failures of later handlers are attached as suppressed errors.
#[derive(Debug)]
pub struct CloseError {
    first: BoxError,
    suppressed: Vec<BoxError>,
}

impl CloseError {
    pub(crate) fn new(first: BoxError) -> Self {
        Self {
            first,
            suppressed: Vec::new(),
        }
    }

    pub(crate) fn suppress(&mut self, error: BoxError) {
        self.suppressed.push(error);
    }

    /// Returns the failure of the first failing close handler.
    pub fn first(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.first.as_ref()
    }

    /// Returns the failures of the subsequent failing close handlers, in the
    /// order in which the handlers were registered.
    pub fn suppressed(&self) -> &[BoxError] {
        &self.suppressed
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "close handler failed: {}", self.first)?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} more suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl StdError for CloseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.first.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            PipelineError::invalid_argument("from > to").to_string(),
            "invalid argument: from > to"
        );
        assert_eq!(
            PipelineError::builder_state("accept before begin").to_string(),
            "invalid builder state: accept before begin"
        );
        assert_eq!(
            PipelineError::CapacityOverflow {
                requested: 10,
                max: 5
            }
            .to_string(),
            "capacity overflow: 10 elements requested, at most 5 supported"
        );
        assert_eq!(
            PipelineError::ReuseViolation.to_string(),
            "stream has already been operated upon or closed"
        );
    }

    #[test]
    fn test_close_error() {
        let mut error = CloseError::new("first".into());
        assert_eq!(error.to_string(), "close handler failed: first");

        error.suppress("second".into());
        error.suppress("third".into());
        assert_eq!(
            error.to_string(),
            "close handler failed: first (2 more suppressed)"
        );
        assert_eq!(error.first().to_string(), "first");
        assert_eq!(
            error
                .suppressed()
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>(),
            ["second", "third"]
        );

        let error = PipelineError::from(error);
        assert!(matches!(error, PipelineError::Close(_)));
        assert_eq!(
            error.to_string(),
            "close handler failed: first (2 more suppressed)"
        );
    }
}
