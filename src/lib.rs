// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs, unsafe_code)]

pub mod collector;
mod core;
mod error;
mod flags;
mod macros;
pub mod node;
mod numeric;
mod ops;
mod pipeline;
mod sink;
pub mod source;
mod stream;

pub use crate::core::{CpuPinningPolicy, ForkJoinPool, ForkJoinPoolBuilder, ThreadCount};
pub use error::{BoxError, CloseError, PipelineError, Result};
pub use flags::Characteristics;
pub use numeric::{Numeric, NumericSum, SummaryStatistics};
pub use sink::{FnSink, Sink};
pub use source::Spliterator;
pub use stream::{Stream, StreamIter};

/// A type that can flow through a [`Stream`].
///
/// Elements may be moved across threads during parallel evaluation, and are
/// cloned when a pipeline needs to keep a copy of them (for example to
/// remember which elements were already seen by
/// [`distinct()`](Stream::distinct)).
pub trait Element: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Element for T {}
