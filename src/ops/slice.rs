// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `skip` and `limit` operations.
//!
//! In parallel, a slice of a source with exact sizes for every split is
//! computed lazily by index. An unordered slice only needs to report the
//! right number of elements, which is done with a shared budget of permits.
//! Otherwise, the upstream is evaluated in a task tree that materializes each
//! leaf, and cancels the leaves that come after enough elements once the
//! leaves before them have completed.

use crate::core::task::{invoke, leaf_target, TaskNode, TaskSpec};
use crate::error::Result;
use crate::flags::{Characteristics, Flags, StreamFlag};
use crate::node::{self, BuilderSink, NodeRef};
use crate::pipeline::{EvalContext, Segment, StageOps, StatefulOps};
use crate::sink::Sink;
use crate::source::{SliceSpliterator, Spliterator, UnorderedSliceSpliterator};
use crate::Element;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Skips the first `skip` elements, then passes at most `limit` elements.
pub(crate) struct SliceOp {
    skip: usize,
    limit: Option<usize>,
}

impl SliceOp {
    pub(crate) fn new(skip: usize, limit: Option<usize>) -> Self {
        Self { skip, limit }
    }
}

struct SliceSink<'a, T> {
    to_skip: usize,
    remaining: Option<usize>,
    downstream: Box<dyn Sink<T> + 'a>,
}

impl<'a, T> SliceSink<'a, T> {
    fn new(skip: usize, limit: Option<usize>, downstream: Box<dyn Sink<T> + 'a>) -> Self {
        Self {
            to_skip: skip,
            remaining: limit,
            downstream,
        }
    }
}

impl<T: Send> Sink<T> for SliceSink<'_, T> {
    fn begin(&mut self, size: Option<usize>) {
        let size = size.map(|size| {
            let size = size.saturating_sub(self.to_skip);
            match self.remaining {
                Some(limit) => size.min(limit),
                None => size,
            }
        });
        self.downstream.begin(size)
    }

    fn accept(&mut self, value: T) {
        if self.to_skip > 0 {
            self.to_skip -= 1;
            return;
        }
        match &mut self.remaining {
            None => self.downstream.accept(value),
            Some(0) => (),
            Some(remaining) => {
                *remaining -= 1;
                self.downstream.accept(value)
            }
        }
    }

    fn end(&mut self) {
        self.downstream.end()
    }

    fn cancellation_requested(&self) -> bool {
        self.remaining == Some(0) || self.downstream.cancellation_requested()
    }
}

impl<T: Element> StageOps<T, T> for SliceOp {
    fn op_flags(&self) -> Flags {
        if self.limit.is_some() {
            Flags::NOT_SIZED | Flags::IS_SHORT_CIRCUIT
        } else {
            Flags::NOT_SIZED
        }
    }

    fn wrap_sink<'a>(&self, _flags: Flags, downstream: Box<dyn Sink<T> + 'a>) -> Box<dyn Sink<T> + 'a> {
        Box::new(SliceSink::new(self.skip, self.limit, downstream))
    }
}

impl<T: Element> StatefulOps<T> for SliceOp {
    fn evaluate_parallel_lazy(
        &self,
        upstream: Box<dyn Segment<T>>,
        ctx: &EvalContext,
    ) -> Result<Box<dyn Spliterator<T>>> {
        let size = upstream.exact_output_size();
        if size.is_some_and(|size| size > 0)
            && upstream
                .source_characteristics()
                .contains(Characteristics::SUBSIZED)
        {
            return Ok(Box::new(SliceSpliterator::new(
                upstream.into_spliterator(true),
                self.skip,
                self.limit,
            )));
        }

        if !upstream.flags().is_known(StreamFlag::Ordered) {
            // Any elements will do, so a slice of a sized stream is just a
            // limit.
            let (skip, limit) = match size {
                Some(size) if self.skip <= size => {
                    let available = size - self.skip;
                    (0, Some(self.limit.map_or(available, |limit| limit.min(available))))
                }
                _ => (self.skip, self.limit),
            };
            return Ok(Box::new(UnorderedSliceSpliterator::new(
                upstream.into_spliterator(true),
                skip,
                limit,
                leaf_target(ctx),
            )));
        }

        let node = invoke(
            SliceSpec {
                skip: self.skip,
                limit: self.limit,
            },
            upstream,
            ctx,
        )?;
        Ok(node.spliterator())
    }
}

/// Ordered parallel slice.
struct SliceSpec {
    skip: usize,
    limit: Option<usize>,
}

#[derive(Default)]
struct SliceState {
    /// Number of elements in the result of this task, once computed.
    size: AtomicUsize,
    completed: AtomicBool,
}

impl SliceState {
    fn complete(&self, size: usize) {
        self.size.store(size, Ordering::Release);
        self.completed.store(true, Ordering::Release);
    }
}

impl SliceSpec {
    /// Number of elements needed before the end of the slice.
    fn target(&self) -> Option<usize> {
        self.limit.map(|limit| self.skip.saturating_add(limit))
    }

    fn truncate<T: Element>(&self, node: NodeRef<T>) -> NodeRef<T> {
        let count = node.count();
        let from = self.skip.min(count);
        let to = match self.target() {
            Some(target) => count.min(target),
            None => count,
        };
        node.truncate(from, to.max(from))
    }
}

impl<T: Element> TaskSpec<T> for SliceSpec {
    type Output = Result<NodeRef<T>>;
    type NodeState = SliceState;
    const SHORT_CIRCUIT: bool = true;

    fn leaf(&self, node: &TaskNode<T, Self>, segment: Box<dyn Segment<T>>) -> Self::Output {
        if node.is_root() {
            let mut builder = BuilderSink::with_exact_size(None)?;
            segment.copy_into(
                Box::new(SliceSink::new(self.skip, self.limit, Box::new(&mut builder))),
                true,
            );
            return builder.into_node();
        }

        let result = if self.skip == 0 {
            let mut builder = BuilderSink::with_exact_size(None)?;
            segment.copy_into(
                Box::new(SliceSink::new(0, self.limit, Box::new(&mut builder))),
                true,
            );
            builder.into_node()
        } else {
            // Which of the elements of this leaf are skipped depends on the
            // leaves before it.
            let mut builder = BuilderSink::with_exact_size(segment.exact_output_size())?;
            segment.copy_into(Box::new(&mut builder), false);
            builder.into_node()
        };
        let size = result.as_ref().map_or(0, |built| built.count());
        node.state().complete(size);
        result
    }

    fn empty(&self) -> Self::Output {
        Ok(node::empty())
    }

    fn combine(
        &self,
        node: &TaskNode<T, Self>,
        left: Self::Output,
        right: Self::Output,
    ) -> Self::Output {
        let (left, right) = (left?, right?);
        let (left_size, right_size) = match node.children() {
            Some((l, r)) => (
                l.state().size.load(Ordering::Acquire),
                r.state().size.load(Ordering::Acquire),
            ),
            None => (left.count(), right.count()),
        };
        let mut size = left_size.saturating_add(right_size);
        let result = if node.is_canceled() {
            size = 0;
            node::empty()
        } else if size == 0 {
            node::empty()
        } else if left_size == 0 {
            right
        } else {
            node::conc(left, right)
        };
        node.state().complete(size);
        if node.is_root() {
            Ok(self.truncate(result))
        } else {
            Ok(result)
        }
    }

    fn on_completed(&self, node: &TaskNode<T, Self>) {
        if let Some(target) = self.target() {
            if !node.is_root() && is_left_completed(node, target) {
                node.cancel_later_nodes();
            }
        }
    }
}

/// Number of elements known to be produced by the completed tasks under the
/// given task, counting from the left until reaching `target`.
fn completed_size<T: Element>(node: &TaskNode<T, SliceSpec>, target: usize) -> usize {
    let state = node.state();
    if state.completed.load(Ordering::Acquire) {
        return state.size.load(Ordering::Acquire);
    }
    match node.children() {
        None => state.size.load(Ordering::Acquire),
        Some((left, right)) => {
            let left_size = completed_size(left, target);
            if left_size >= target {
                left_size
            } else {
                left_size.saturating_add(completed_size(right, target))
            }
        }
    }
}

/// Returns true if the completed tasks up to and including the given task
/// produce at least `target` elements.
fn is_left_completed<T: Element>(node: &TaskNode<T, SliceSpec>, target: usize) -> bool {
    let mut size = completed_size(node, target);
    if size >= target {
        return true;
    }
    let mut child: *const TaskNode<T, SliceSpec> = node;
    let mut parent = node.parent();
    while let Some(p) = parent {
        if let Some((left, right)) = p.children() {
            if std::ptr::eq(Arc::as_ptr(right), child) {
                size = size.saturating_add(completed_size(left, target));
                if size >= target {
                    return true;
                }
            }
        }
        child = Arc::as_ptr(&p);
        parent = p.parent();
    }
    size >= target
}
