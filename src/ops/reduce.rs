// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reductions: folds, collections into mutable containers, and counting.
//!
//! A reduction is described by a [`Reducer`], a sink accumulating a partial
//! result. Sequential evaluation pushes all the elements into a single
//! reducer. Parallel evaluation creates one reducer per leaf task, and merges
//! sibling reducers left into right up the task tree.

use crate::collector::Collector;
use crate::core::task::{invoke, TaskNode, TaskSpec};
use crate::error::Result;
use crate::pipeline::{EvalContext, Segment, TerminalOp};
use crate::sink::Sink;
use std::marker::PhantomData;
use std::sync::Arc;

/// A sink accumulating a partial result, which can absorb the partial result
/// of the elements that follow it.
pub(crate) trait Reducer<T>: Sink<T> + 'static {
    /// Merges the partial result of later elements into this one.
    fn combine(&mut self, other: Self)
    where
        Self: Sized;
}

/// Terminal operation evaluating a reduction. The factory creates a fresh
/// reducer for each leaf.
pub(crate) struct ReduceOp<F, R> {
    factory: F,
    _phantom: PhantomData<fn() -> R>,
}

impl<F, R> ReduceOp<F, R> {
    pub(crate) fn new(factory: F) -> Self {
        Self {
            factory,
            _phantom: PhantomData,
        }
    }
}

impl<T, R, F> TerminalOp<T, R> for ReduceOp<F, R>
where
    T: 'static,
    R: Reducer<T>,
    F: Fn() -> R + Send + Sync + 'static,
{
    fn evaluate_sequential(self, segment: Box<dyn Segment<T>>) -> Result<R> {
        let mut reducer = (self.factory)();
        segment.copy_into(Box::new(&mut reducer), false);
        Ok(reducer)
    }

    fn evaluate_parallel(self, segment: Box<dyn Segment<T>>, ctx: &EvalContext) -> Result<R> {
        Ok(invoke(
            ReduceSpec {
                factory: self.factory,
                _phantom: PhantomData,
            },
            segment,
            ctx,
        ))
    }
}

struct ReduceSpec<F, R> {
    factory: F,
    _phantom: PhantomData<fn() -> R>,
}

impl<T, R, F> TaskSpec<T> for ReduceSpec<F, R>
where
    T: 'static,
    R: Reducer<T>,
    F: Fn() -> R + Send + Sync + 'static,
{
    type Output = R;
    type NodeState = ();

    fn leaf(&self, _node: &TaskNode<T, Self>, segment: Box<dyn Segment<T>>) -> R {
        let mut reducer = (self.factory)();
        segment.copy_into(Box::new(&mut reducer), false);
        reducer
    }

    fn empty(&self) -> R {
        (self.factory)()
    }

    fn combine(&self, _node: &TaskNode<T, Self>, mut left: R, right: R) -> R {
        left.combine(right);
        left
    }
}

/// Evaluates a reduction on the given segment.
pub(crate) fn reduce<T, R>(
    segment: Box<dyn Segment<T>>,
    ctx: &EvalContext,
    factory: impl Fn() -> R + Send + Sync + 'static,
) -> Result<R>
where
    T: 'static,
    R: Reducer<T>,
{
    let op = ReduceOp::new(factory);
    if ctx.parallel {
        op.evaluate_parallel(segment, ctx)
    } else {
        op.evaluate_sequential(segment)
    }
}

/// Folds elements into an accumulator, starting from an identity value.
pub(crate) struct FoldReducer<T, U> {
    state: Option<U>,
    accumulator: Arc<dyn Fn(U, T) -> U + Send + Sync>,
    combiner: Arc<dyn Fn(U, U) -> U + Send + Sync>,
}

impl<T, U> FoldReducer<T, U> {
    pub(crate) fn new(
        identity: U,
        accumulator: Arc<dyn Fn(U, T) -> U + Send + Sync>,
        combiner: Arc<dyn Fn(U, U) -> U + Send + Sync>,
    ) -> Self {
        Self {
            state: Some(identity),
            accumulator,
            combiner,
        }
    }

    pub(crate) fn get(self) -> U {
        match self.state {
            Some(state) => state,
            None => unreachable!("fold state taken by a panicking function"),
        }
    }
}

impl<T, U: Send> Sink<T> for FoldReducer<T, U> {
    fn accept(&mut self, value: T) {
        if let Some(state) = self.state.take() {
            self.state = Some((self.accumulator)(state, value));
        }
    }
}

impl<T: 'static, U: Send + 'static> Reducer<T> for FoldReducer<T, U> {
    fn combine(&mut self, other: Self) {
        if let (Some(left), Some(right)) = (self.state.take(), other.state) {
            self.state = Some((self.combiner)(left, right));
        }
    }
}

/// Reduces elements with an associative operation, without identity.
pub(crate) struct ReduceOptReducer<T> {
    state: Option<T>,
    op: Arc<dyn Fn(T, T) -> T + Send + Sync>,
}

impl<T> ReduceOptReducer<T> {
    pub(crate) fn new(op: Arc<dyn Fn(T, T) -> T + Send + Sync>) -> Self {
        Self { state: None, op }
    }

    pub(crate) fn get(self) -> Option<T> {
        self.state
    }
}

impl<T: Send> Sink<T> for ReduceOptReducer<T> {
    fn begin(&mut self, _size: Option<usize>) {
        self.state = None;
    }

    fn accept(&mut self, value: T) {
        self.state = Some(match self.state.take() {
            None => value,
            Some(state) => (self.op)(state, value),
        });
    }
}

impl<T: Send + 'static> Reducer<T> for ReduceOptReducer<T> {
    fn combine(&mut self, other: Self) {
        if let Some(right) = other.state {
            self.accept(right);
        }
    }
}

/// Accumulates elements into a mutable container.
pub(crate) struct ContainerReducer<T, R> {
    container: R,
    accumulator: Arc<dyn Fn(&mut R, T) + Send + Sync>,
    combiner: Arc<dyn Fn(&mut R, R) + Send + Sync>,
}

impl<T, R> ContainerReducer<T, R> {
    pub(crate) fn new(
        container: R,
        accumulator: Arc<dyn Fn(&mut R, T) + Send + Sync>,
        combiner: Arc<dyn Fn(&mut R, R) + Send + Sync>,
    ) -> Self {
        Self {
            container,
            accumulator,
            combiner,
        }
    }

    pub(crate) fn get(self) -> R {
        self.container
    }
}

impl<T, R: Send> Sink<T> for ContainerReducer<T, R> {
    fn accept(&mut self, value: T) {
        (self.accumulator)(&mut self.container, value)
    }
}

impl<T: 'static, R: Send + 'static> Reducer<T> for ContainerReducer<T, R> {
    fn combine(&mut self, other: Self) {
        (self.combiner)(&mut self.container, other.container)
    }
}

/// Accumulates elements with a [`Collector`].
pub(crate) struct CollectorReducer<C: Collector<T>, T> {
    acc: C::Acc,
    collector: Arc<C>,
    _phantom: PhantomData<fn(T)>,
}

impl<C: Collector<T>, T> CollectorReducer<C, T> {
    pub(crate) fn new(collector: Arc<C>) -> Self {
        Self {
            acc: collector.supply(),
            collector,
            _phantom: PhantomData,
        }
    }

    pub(crate) fn finish(self) -> C::Output {
        self.collector.finish(self.acc)
    }
}

impl<C: Collector<T>, T> Sink<T> for CollectorReducer<C, T> {
    fn accept(&mut self, value: T) {
        self.collector.accumulate(&mut self.acc, value)
    }
}

impl<C: Collector<T>, T: 'static> Reducer<T> for CollectorReducer<C, T> {
    fn combine(&mut self, other: Self) {
        self.collector.combine(&mut self.acc, other.acc)
    }
}

/// Counts elements.
#[derive(Default)]
pub(crate) struct CountReducer(pub(crate) usize);

impl<T> Sink<T> for CountReducer {
    fn accept(&mut self, _value: T) {
        self.0 += 1;
    }
}

impl<T: 'static> Reducer<T> for CountReducer {
    fn combine(&mut self, other: Self) {
        self.0 += other.0;
    }
}

/// Counts the elements of a segment, without traversing it if the size is
/// known.
pub(crate) fn count<T: 'static>(segment: Box<dyn Segment<T>>, ctx: &EvalContext) -> Result<usize> {
    if let Some(size) = segment.exact_output_size() {
        return Ok(size);
    }
    Ok(reduce(segment, ctx, CountReducer::default)?.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::pool::{CpuPinningPolicy, ForkJoinPoolBuilder, ThreadCount};
    use crate::flags::{Characteristics, Flags};
    use crate::pipeline::SourceSegment;
    use crate::source::{ArraySpliterator, RangeSpliterator, Spliterator};

    fn segment<T: crate::Element>(spliterator: impl Spliterator<T> + 'static) -> Box<dyn Segment<T>> {
        let flags = Flags::from_source(spliterator.characteristics(), false);
        Box::new(SourceSegment::new(Box::new(spliterator), flags))
    }

    fn contexts() -> [EvalContext; 2] {
        let pool = ForkJoinPoolBuilder {
            num_threads: ThreadCount::try_from(3).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
            leaf_tasks_per_thread: 4,
        }
        .build();
        [
            EvalContext::sequential(),
            EvalContext::parallel(Arc::new(pool)),
        ]
    }

    #[test]
    fn test_fold() {
        for ctx in contexts() {
            let sum = reduce(segment(RangeSpliterator::new(0u64, 10_000)), &ctx, || {
                FoldReducer::new(
                    0u64,
                    Arc::new(|acc: u64, x: u64| acc + x),
                    Arc::new(|a: u64, b: u64| a + b),
                )
            })
            .unwrap()
            .get();
            assert_eq!(sum, 10_000 * 9_999 / 2);
        }
    }

    #[test]
    fn test_fold_preserves_order() {
        for ctx in contexts() {
            let concatenated = reduce(segment(RangeSpliterator::new(0u32, 1000)), &ctx, || {
                FoldReducer::new(
                    String::new(),
                    Arc::new(|acc: String, x: u32| acc + &x.to_string()),
                    Arc::new(|a: String, b: String| a + &b),
                )
            })
            .unwrap()
            .get();
            assert_eq!(
                concatenated,
                (0..1000).map(|x| x.to_string()).collect::<String>()
            );
        }
    }

    #[test]
    fn test_reduce_opt() {
        for ctx in contexts() {
            let max = reduce(segment(RangeSpliterator::new(0i32, 1000)), &ctx, || {
                ReduceOptReducer::new(Arc::new(|a: i32, b: i32| a.max(b)))
            })
            .unwrap()
            .get();
            assert_eq!(max, Some(999));

            let empty = reduce(segment(RangeSpliterator::new(0i32, 0)), &ctx, || {
                ReduceOptReducer::new(Arc::new(|a: i32, b: i32| a.max(b)))
            })
            .unwrap()
            .get();
            assert_eq!(empty, None);
        }
    }

    #[test]
    fn test_container() {
        for ctx in contexts() {
            let output = reduce(
                segment(ArraySpliterator::new((0..5000).collect(), Characteristics::ORDERED)),
                &ctx,
                || {
                    ContainerReducer::new(
                        Vec::new(),
                        Arc::new(|v: &mut Vec<i32>, x: i32| v.push(x)),
                        Arc::new(|v: &mut Vec<i32>, w: Vec<i32>| v.extend(w)),
                    )
                },
            )
            .unwrap()
            .get();
            assert_eq!(output, (0..5000).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_count() {
        for ctx in contexts() {
            assert_eq!(
                count(segment(RangeSpliterator::new(0u8, 200)), &ctx).unwrap(),
                200
            );
            let unsized_segment = segment(crate::source::IteratorSpliterator::new(
                (0..3000).filter(|x| x % 3 == 0),
                Characteristics::ORDERED,
            ));
            assert_eq!(count(unsized_segment, &ctx).unwrap(), 1000);
        }
    }
}
