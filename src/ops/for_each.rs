// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `for_each` and `for_each_ordered` operations.

use super::collect::collect_node;
use crate::core::task::{invoke, TaskNode, TaskSpec};
use crate::error::Result;
use crate::pipeline::{EvalContext, Segment, TerminalOp};
use crate::sink::FnSink;
use crate::Element;
use std::sync::Arc;

/// Calls an action on every element.
pub(crate) struct ForEachOp<T> {
    action: Arc<dyn Fn(T) + Send + Sync>,
    ordered: bool,
}

impl<T> ForEachOp<T> {
    /// Creates an operation calling the action in any order, possibly
    /// concurrently from several threads.
    pub(crate) fn unordered(action: Arc<dyn Fn(T) + Send + Sync>) -> Self {
        Self {
            action,
            ordered: false,
        }
    }

    /// Creates an operation calling the action in encounter order, one element
    /// at a time.
    pub(crate) fn ordered(action: Arc<dyn Fn(T) + Send + Sync>) -> Self {
        Self {
            action,
            ordered: true,
        }
    }
}

impl<T: Element> TerminalOp<T, ()> for ForEachOp<T> {
    fn evaluate_sequential(self, segment: Box<dyn Segment<T>>) -> Result<()> {
        let action = self.action.as_ref();
        segment.copy_into(Box::new(FnSink(|x| action(x))), false);
        Ok(())
    }

    fn evaluate_parallel(self, segment: Box<dyn Segment<T>>, ctx: &EvalContext) -> Result<()> {
        if self.ordered {
            // Elements are produced out of order by the leaves, so they are
            // buffered first.
            let node = collect_node(segment, ctx, false)?;
            let action = self.action.as_ref();
            node.for_each(&mut |x| action(x));
        } else {
            invoke(self, segment, ctx);
        }
        Ok(())
    }
}

impl<T: Element> TaskSpec<T> for ForEachOp<T> {
    type Output = ();
    type NodeState = ();

    fn leaf(&self, _node: &TaskNode<T, Self>, segment: Box<dyn Segment<T>>) {
        let action = self.action.as_ref();
        segment.copy_into(Box::new(FnSink(|x| action(x))), false);
    }

    fn empty(&self) {}

    fn combine(&self, _node: &TaskNode<T, Self>, _left: (), _right: ()) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::pool::{CpuPinningPolicy, ForkJoinPoolBuilder, ThreadCount};
    use crate::flags::Flags;
    use crate::pipeline::SourceSegment;
    use crate::source::{RangeSpliterator, Spliterator};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    fn segment(upto: u64) -> Box<dyn Segment<u64>> {
        let spliterator = RangeSpliterator::new(0, upto);
        let flags = Flags::from_source(spliterator.characteristics(), false);
        Box::new(SourceSegment::new(Box::new(spliterator), flags))
    }

    fn parallel() -> EvalContext {
        EvalContext::parallel(Arc::new(
            ForkJoinPoolBuilder {
                num_threads: ThreadCount::try_from(4).unwrap(),
                cpu_pinning: CpuPinningPolicy::No,
                leaf_tasks_per_thread: 4,
            }
            .build(),
        ))
    }

    #[test]
    fn test_unordered() {
        let sum = Arc::new(AtomicU64::new(0));
        let action = {
            let sum = sum.clone();
            move |x: u64| {
                sum.fetch_add(x, Ordering::Relaxed);
            }
        };
        ForEachOp::unordered(Arc::new(action.clone()))
            .evaluate_sequential(segment(1000))
            .unwrap();
        ForEachOp::unordered(Arc::new(action))
            .evaluate_parallel(segment(1000), &parallel())
            .unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), 2 * 999 * 1000 / 2);
    }

    #[test]
    fn test_ordered() {
        let output = Arc::new(Mutex::new(Vec::new()));
        let action = {
            let output = output.clone();
            move |x: u64| output.lock().unwrap().push(x)
        };
        ForEachOp::ordered(Arc::new(action))
            .evaluate_parallel(segment(20_000), &parallel())
            .unwrap();
        assert_eq!(*output.lock().unwrap(), (0..20_000).collect::<Vec<_>>());
    }
}
