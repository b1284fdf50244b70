// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Materialization of a segment into a [`Node`](crate::node::Node).

use crate::core::task::{invoke, TaskNode, TaskSpec};
use crate::error::Result;
use crate::node::{self, check_capacity, BuilderSink, NodeRef};
use crate::pipeline::{EvalContext, Segment};
use crate::Element;

/// Pushes all the output elements of a segment into a single node.
pub(crate) fn collect_sequential<T: Element>(segment: Box<dyn Segment<T>>) -> Result<NodeRef<T>> {
    let mut sink = BuilderSink::with_exact_size(segment.exact_output_size())?;
    segment.copy_into(Box::new(&mut sink), false);
    sink.into_node()
}

/// Builds one node per leaf, and concatenates sibling nodes.
struct CollectSpec;

impl<T: Element> TaskSpec<T> for CollectSpec {
    type Output = Result<NodeRef<T>>;
    type NodeState = ();

    fn leaf(&self, _node: &TaskNode<T, Self>, segment: Box<dyn Segment<T>>) -> Self::Output {
        collect_sequential(segment)
    }

    fn empty(&self) -> Self::Output {
        Ok(node::empty())
    }

    fn combine(
        &self,
        _node: &TaskNode<T, Self>,
        left: Self::Output,
        right: Self::Output,
    ) -> Self::Output {
        Ok(node::conc(left?, right?))
    }
}

/// Materializes the output of a segment, in parallel if requested. Parallel
/// evaluation returns a tree of nodes, unless `flatten` is set.
pub(crate) fn collect_node<T: Element>(
    segment: Box<dyn Segment<T>>,
    ctx: &EvalContext,
    flatten: bool,
) -> Result<NodeRef<T>> {
    if !ctx.parallel {
        return collect_sequential(segment);
    }
    if let Some(size) = segment.exact_output_size() {
        check_capacity::<T>(size)?;
    }
    let node = invoke(CollectSpec, segment, ctx)?;
    if flatten {
        node::flatten(node)
    } else {
        Ok(node)
    }
}

/// Collects the output elements of a segment into a vector, in encounter
/// order.
pub(crate) fn to_vec<T: Element>(segment: Box<dyn Segment<T>>, ctx: &EvalContext) -> Result<Vec<T>> {
    if !ctx.parallel {
        let mut output = match segment.exact_output_size() {
            Some(size) => node::allocate(size)?,
            None => Vec::new(),
        };
        segment.copy_into(Box::new(&mut output), false);
        return Ok(output);
    }
    let node = collect_node(segment, ctx, false)?;
    check_capacity::<T>(node.count())?;
    Ok(node.into_vec())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::pool::{CpuPinningPolicy, ForkJoinPoolBuilder, ThreadCount};
    use crate::flags::{Characteristics, Flags};
    use crate::pipeline::{MappedSegment, SourceSegment, StageOps};
    use crate::ops::stateless::FilterOp;
    use crate::source::{IteratorSpliterator, RangeSpliterator, Spliterator};
    use std::sync::Arc;

    fn segment<T: Element>(spliterator: impl Spliterator<T> + 'static) -> Box<dyn Segment<T>> {
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
    fn test_collect_sized() {
        let node = collect_sequential(segment(RangeSpliterator::new(0u32, 100))).unwrap();
        assert_eq!(node.child_count(), 0);
        assert_eq!(node.to_vec(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_collect_parallel_tree() {
        let ctx = parallel();
        let node = collect_node(segment(RangeSpliterator::new(0u32, 10_000)), &ctx, false).unwrap();
        assert_eq!(node.count(), 10_000);
        assert!(node.child_count() > 0);
        assert_eq!(node.to_vec(), (0..10_000).collect::<Vec<_>>());

        let node = collect_node(segment(RangeSpliterator::new(0u32, 10_000)), &ctx, true).unwrap();
        assert_eq!(node.child_count(), 0);
        assert_eq!(node.count(), 10_000);
    }

    #[test]
    fn test_collect_filtered() {
        let filter: Arc<dyn StageOps<u32, u32>> = Arc::new(FilterOp::new(|x: &u32| x % 7 == 0));
        for ctx in [EvalContext::sequential(), parallel()] {
            let filtered = Box::new(MappedSegment::new(
                segment(RangeSpliterator::new(0u32, 5000)),
                filter.clone(),
            ));
            assert_eq!(
                to_vec(filtered, &ctx).unwrap(),
                (0..5000).filter(|x| x % 7 == 0).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn test_to_vec_unsized() {
        for ctx in [EvalContext::sequential(), parallel()] {
            let unsized_segment = segment(IteratorSpliterator::new(
                "hello world".chars(),
                Characteristics::ORDERED,
            ));
            assert_eq!(
                to_vec(unsized_segment, &ctx).unwrap().into_iter().collect::<String>(),
                "hello world"
            );
        }
    }
}
