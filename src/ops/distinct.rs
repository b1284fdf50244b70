// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `distinct` operation, dropping duplicate elements.

use super::reduce::{reduce, Reducer};
use crate::core::task::leaf_target;
use crate::error::Result;
use crate::flags::{Characteristics, Flags, StreamFlag};
use crate::pipeline::{EvalContext, Segment, StageOps, StatefulOps};
use crate::sink::Sink;
use crate::source::{ArraySpliterator, DistinctSpliterator, Spliterator};
use crate::Element;
use std::collections::HashSet;
use std::hash::Hash;

/// Keeps the first occurrence of each element in encounter order.
pub(crate) struct DistinctOp;

/// Drops elements equal to the previous one, for sorted inputs.
struct AdjacentDistinctSink<'a, T> {
    last: Option<T>,
    downstream: Box<dyn Sink<T> + 'a>,
}

impl<T: Element + Eq> Sink<T> for AdjacentDistinctSink<'_, T> {
    fn begin(&mut self, _size: Option<usize>) {
        self.last = None;
        self.downstream.begin(None)
    }

    fn accept(&mut self, value: T) {
        if self.last.as_ref() != Some(&value) {
            self.last = Some(value.clone());
            self.downstream.accept(value)
        }
    }

    fn end(&mut self) {
        self.last = None;
        self.downstream.end()
    }

    fn cancellation_requested(&self) -> bool {
        self.downstream.cancellation_requested()
    }
}

/// Drops elements already seen.
struct HashDistinctSink<'a, T> {
    seen: HashSet<T>,
    downstream: Box<dyn Sink<T> + 'a>,
}

impl<T: Element + Eq + Hash> Sink<T> for HashDistinctSink<'_, T> {
    fn begin(&mut self, _size: Option<usize>) {
        self.seen.clear();
        self.downstream.begin(None)
    }

    fn accept(&mut self, value: T) {
        if self.seen.insert(value.clone()) {
            self.downstream.accept(value)
        }
    }

    fn end(&mut self) {
        self.seen = HashSet::new();
        self.downstream.end()
    }

    fn cancellation_requested(&self) -> bool {
        self.downstream.cancellation_requested()
    }
}

impl<T: Element + Eq + Hash> StageOps<T, T> for DistinctOp {
    fn op_flags(&self) -> Flags {
        Flags::IS_DISTINCT | Flags::NOT_SIZED
    }

    fn wrap_sink<'a>(&self, flags: Flags, downstream: Box<dyn Sink<T> + 'a>) -> Box<dyn Sink<T> + 'a> {
        if flags.is_known(StreamFlag::Distinct) {
            downstream
        } else if flags.is_known(StreamFlag::Sorted) {
            Box::new(AdjacentDistinctSink {
                last: None,
                downstream,
            })
        } else {
            Box::new(HashDistinctSink {
                seen: HashSet::new(),
                downstream,
            })
        }
    }
}

/// Partial result of an ordered parallel `distinct`: the first occurrences of
/// a range of the input, in encounter order.
struct FirstOccurrences<T> {
    elements: Vec<T>,
    seen: HashSet<T>,
}

impl<T> Default for FirstOccurrences<T> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

impl<T: Element + Eq + Hash> Sink<T> for FirstOccurrences<T> {
    fn accept(&mut self, value: T) {
        if self.seen.insert(value.clone()) {
            self.elements.push(value);
        }
    }
}

impl<T: Element + Eq + Hash> Reducer<T> for FirstOccurrences<T> {
    fn combine(&mut self, other: Self) {
        for x in other.elements {
            self.accept(x);
        }
    }
}

impl<T: Element + Eq + Hash> StatefulOps<T> for DistinctOp {
    fn evaluate_parallel_lazy(
        &self,
        upstream: Box<dyn Segment<T>>,
        ctx: &EvalContext,
    ) -> Result<Box<dyn Spliterator<T>>> {
        let flags = upstream.flags();
        if flags.is_known(StreamFlag::Distinct) {
            Ok(upstream.into_spliterator(true))
        } else if flags.is_known(StreamFlag::Ordered) {
            let first = reduce(upstream, ctx, FirstOccurrences::default)?;
            Ok(Box::new(ArraySpliterator::new(
                first.elements,
                Characteristics::ORDERED | Characteristics::DISTINCT,
            )))
        } else {
            Ok(Box::new(DistinctSpliterator::new(
                upstream.into_spliterator(true),
                leaf_target(ctx),
            )))
        }
    }
}
