// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `find_first` and `find_any` operations.

use crate::core::task::{invoke, TaskNode, TaskSpec};
use crate::error::Result;
use crate::flags::StreamFlag;
use crate::pipeline::{EvalContext, Segment, TerminalOp};
use crate::sink::Sink;
use std::marker::PhantomData;

/// Returns an element of the stream, the first one in encounter order if
/// `first` is set and the stream is ordered.
pub(crate) struct FindOp<T> {
    first: bool,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> FindOp<T> {
    pub(crate) fn new(first: bool) -> Self {
        Self {
            first,
            _phantom: PhantomData,
        }
    }
}

/// Keeps the first element it receives.
struct FindSink<'a, T> {
    value: Option<T>,
    short_circuited: Option<&'a (dyn Fn() -> bool + Sync)>,
}

impl<T: Send> Sink<T> for FindSink<'_, T> {
    fn accept(&mut self, value: T) {
        if self.value.is_none() {
            self.value = Some(value);
        }
    }

    fn cancellation_requested(&self) -> bool {
        self.value.is_some() || self.short_circuited.is_some_and(|f| f())
    }
}

impl<T: Send + 'static> TerminalOp<T, Option<T>> for FindOp<T> {
    fn evaluate_sequential(self, segment: Box<dyn Segment<T>>) -> Result<Option<T>> {
        let mut sink = FindSink {
            value: None,
            short_circuited: None,
        };
        segment.copy_into(Box::new(&mut sink), true);
        Ok(sink.value)
    }

    fn evaluate_parallel(self, segment: Box<dyn Segment<T>>, ctx: &EvalContext) -> Result<Option<T>> {
        let must_find_first = self.first && segment.flags().is_known(StreamFlag::Ordered);
        Ok(invoke(
            FindSpec {
                must_find_first,
                _phantom: PhantomData,
            },
            segment,
            ctx,
        ))
    }
}

struct FindSpec<T> {
    must_find_first: bool,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> FindSpec<T> {
    /// Publishes a result found by the given task, unless a task before it in
    /// encounter order may still find another one.
    fn found(&self, node: &TaskNode<T, Self>, value: Option<T>) -> Option<T> {
        match value {
            None => None,
            Some(value) if !self.must_find_first => {
                node.short_circuit(Some(value));
                None
            }
            Some(value) => {
                if node.is_leftmost() {
                    node.short_circuit(Some(value));
                    None
                } else {
                    node.cancel_later_nodes();
                    Some(value)
                }
            }
        }
    }
}

impl<T: Send + 'static> TaskSpec<T> for FindSpec<T> {
    type Output = Option<T>;
    type NodeState = ();
    const SHORT_CIRCUIT: bool = true;

    fn leaf(&self, node: &TaskNode<T, Self>, segment: Box<dyn Segment<T>>) -> Option<T> {
        let short_circuited = || node.is_short_circuited();
        let mut sink = FindSink {
            value: None,
            short_circuited: Some(&short_circuited),
        };
        segment.copy_into(Box::new(&mut sink), true);
        self.found(node, sink.value)
    }

    fn empty(&self) -> Option<T> {
        None
    }

    fn combine(&self, node: &TaskNode<T, Self>, left: Option<T>, right: Option<T>) -> Option<T> {
        let result = left.or(right);
        if self.must_find_first {
            self.found(node, result)
        } else {
            result
        }
    }
}
