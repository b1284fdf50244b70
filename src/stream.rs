// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The [`Stream`] type, entry point of the pipeline API.

use crate::collector::Collector;
use crate::core::pool::ForkJoinPool;
use crate::error::{BoxError, CloseError, PipelineError, Result};
use crate::flags::Characteristics;
use crate::macros::{log_debug, log_warn};
use crate::numeric::{Numeric, SummaryStatistics};
use crate::ops::collect;
use crate::ops::distinct::DistinctOp;
use crate::ops::find::FindOp;
use crate::ops::for_each::ForEachOp;
use crate::ops::matching::{MatchKind, MatchOp};
use crate::ops::reduce::{self, CollectorReducer, ContainerReducer, FoldReducer, ReduceOptReducer};
use crate::ops::slice::SliceOp;
use crate::ops::sorted::SortedOp;
use crate::ops::stateless::{FilterOp, FlatMapOp, MapOp, PeekOp, UnorderedOp};
use crate::pipeline::{
    evaluate, evaluate_spliterator, evaluate_with, HeadStage, SourceState, Stage, StatefulStage,
    StatelessStage,
};
use crate::source::{
    ArraySpliterator, ConcatSpliterator, GenerateSpliterator, IteratorSpliterator, RangeElement,
    RangeSpliterator, Spliterator,
};
use crate::Element;
use std::cmp::Ordering;
use std::hash::Hash;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A lazily evaluated sequence of elements of type `T`.
///
/// A stream is built from a source, then transformed by intermediate
/// operations (such as [`map()`](Self::map) or [`sorted()`](Self::sorted))
/// which don't do any work, and finally evaluated by a single terminal
/// operation (such as [`to_vec()`](Self::to_vec) or
/// [`count()`](Self::count)).
///
/// A stream evaluates either sequentially on the calling thread, or in
/// parallel on a [`ForkJoinPool`], depending on the last call to
/// [`sequential()`](Self::sequential) or [`parallel()`](Self::parallel).
///
/// ```
/// use lazyflow::Stream;
///
/// let squares = Stream::range(0i32, 10)
///     .parallel()
///     .filter(|x| x % 2 == 1)
///     .map(|x| x * x)
///     .to_vec()
///     .unwrap();
/// assert_eq!(squares, [1, 9, 25, 49, 81]);
/// ```
///
/// A stream can only be evaluated once. Cloning a stream shares its pipeline,
/// so at most one of the clones can be extended or evaluated; the others
/// report a [`PipelineError::ReuseViolation`].
pub struct Stream<T> {
    stage: Arc<dyn Stage<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
        }
    }
}

impl<T: Element> Stream<T> {
    fn from_spliterator_impl(spliterator: Box<dyn Spliterator<T>>) -> Self {
        Self {
            stage: Arc::new(HeadStage::new(spliterator, false)),
        }
    }

    fn source(&self) -> &Arc<SourceState> {
        self.stage.header().source()
    }

    fn chain<U: Element>(stage: impl Stage<U> + 'static) -> Stream<U> {
        Stream {
            stage: Arc::new(stage),
        }
    }

    /// Creates an ordered stream over the given values.
    pub fn of(values: Vec<T>) -> Self {
        Self::with_characteristics(
            values,
            Characteristics::ORDERED | Characteristics::IMMUTABLE,
        )
    }

    /// Creates a stream over the given values, with the given
    /// characteristics. The stream is always sized.
    pub fn with_characteristics(values: Vec<T>, characteristics: Characteristics) -> Self {
        Self::from_spliterator_impl(Box::new(ArraySpliterator::new(values, characteristics)))
    }

    /// Creates an empty stream.
    pub fn empty() -> Self {
        Self::of(Vec::new())
    }

    /// Creates an ordered stream over the items of an iterator. The iterator
    /// is only consumed when the stream is evaluated.
    pub fn from_iterator<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_spliterator_impl(Box::new(IteratorSpliterator::new(
            iter.into_iter(),
            Characteristics::ORDERED,
        )))
    }

    /// Creates an infinite ordered stream `seed, f(seed), f(f(seed)), ...`.
    pub fn iterate(seed: T, f: impl Fn(&T) -> T + Send + 'static) -> Self {
        Self::from_iterator(std::iter::successors(Some(seed), move |x| Some(f(x))))
    }

    /// Creates an infinite unordered stream, each element of which is
    /// returned by the supplier.
    pub fn generate(supplier: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::from_spliterator_impl(Box::new(GenerateSpliterator::new(supplier)))
    }

    /// Creates a stream over the elements of a spliterator.
    pub fn from_spliterator(spliterator: impl Spliterator<T> + 'static) -> Self {
        Self::from_spliterator_impl(Box::new(spliterator))
    }

    /// Creates a stream over the elements of `first` followed by the elements
    /// of `second`.
    ///
    /// Both inputs are consumed. The result is parallel if either input is,
    /// and closing it runs the close handlers of both inputs.
    pub fn concat(first: Stream<T>, second: Stream<T>) -> Result<Self> {
        let parallel = first.is_parallel() || second.is_parallel();
        let left = evaluate_spliterator(&*first.stage)?;
        let right = evaluate_spliterator(&*second.stage)?;
        let stream = Self {
            stage: Arc::new(HeadStage::new(
                Box::new(ConcatSpliterator::new(left, right)),
                parallel,
            )),
        };
        stream.source().absorb_close_handlers(first.source());
        stream.source().absorb_close_handlers(second.source());
        Ok(stream)
    }

    /// Returns true if this stream would be evaluated in parallel.
    pub fn is_parallel(&self) -> bool {
        self.source().is_parallel()
    }

    /// Switches the whole pipeline to sequential evaluation.
    pub fn sequential(self) -> Self {
        self.source().set_parallel(false);
        self
    }

    /// Switches the whole pipeline to parallel evaluation.
    pub fn parallel(self) -> Self {
        self.source().set_parallel(true);
        self
    }

    /// Evaluates the pipeline on the given pool when parallel, rather than on
    /// the common pool.
    pub fn with_pool(self, pool: Arc<ForkJoinPool>) -> Self {
        self.source().set_pool(pool);
        self
    }

    /// Registers a handler to run when the stream is [closed](Self::close).
    pub fn on_close<E>(self, handler: impl FnOnce() -> std::result::Result<(), E> + Send + 'static) -> Self
    where
        E: Into<BoxError> + 'static,
    {
        self.source()
            .push_close_handler(Box::new(move || handler().map_err(Into::into)));
        self
    }

    /// Applies a function to each element.
    pub fn map<U: Element>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Stream<U> {
        Self::chain(StatelessStage::<T, U>::new(self.stage, Arc::new(MapOp::new(f))))
    }

    /// Keeps the elements matching the predicate.
    pub fn filter(self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self::chain(StatelessStage::new(
            self.stage,
            Arc::new(FilterOp::new(predicate)),
        ))
    }

    /// Replaces each element by the items of the iterable returned by `f`.
    pub fn flat_map<U, I>(self, f: impl Fn(T) -> I + Send + Sync + 'static) -> Stream<U>
    where
        U: Element,
        I: IntoIterator<Item = U> + 'static,
    {
        Self::chain(StatelessStage::<T, U>::new(
            self.stage,
            Arc::new(FlatMapOp::new(f)),
        ))
    }

    /// Calls a function on each element as it is consumed.
    pub fn peek(self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self::chain(StatelessStage::new(self.stage, Arc::new(PeekOp::new(f))))
    }

    /// Removes the encounter order constraint, which can speed up parallel
    /// evaluation of [`distinct()`](Self::distinct), [`limit()`](Self::limit)
    /// and [`skip()`](Self::skip).
    pub fn unordered(self) -> Self {
        if !self.stage.header().is_ordered() {
            return self;
        }
        Self::chain(StatelessStage::new(self.stage, Arc::new(UnorderedOp)))
    }

    /// Keeps only the first `n` elements.
    pub fn limit(self, n: usize) -> Self {
        Self::chain(StatefulStage::new(self.stage, SliceOp::new(0, Some(n))))
    }

    /// Discards the first `n` elements.
    pub fn skip(self, n: usize) -> Self {
        if n == 0 {
            return self;
        }
        Self::chain(StatefulStage::new(self.stage, SliceOp::new(n, None)))
    }

    /// Sorts the elements with a stable sort by the given comparator.
    pub fn sorted_by(
        self,
        comparator: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        Self::chain(StatefulStage::new(
            self.stage,
            SortedOp::by(Arc::new(comparator)),
        ))
    }

    /// Calls an action on each element, in any order and possibly concurrently.
    pub fn for_each(&self, action: impl Fn(T) + Send + Sync + 'static) -> Result<()> {
        evaluate(&*self.stage, ForEachOp::unordered(Arc::new(action)))
    }

    /// Calls an action on each element, in encounter order.
    pub fn for_each_ordered(&self, action: impl Fn(T) + Send + Sync + 'static) -> Result<()> {
        evaluate(&*self.stage, ForEachOp::ordered(Arc::new(action)))
    }

    /// Collects the elements into a vector, in encounter order.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        evaluate_with(&*self.stage, collect::to_vec)
    }

    /// Reduces the elements with an associative operation, of which
    /// `identity` is the identity element.
    pub fn reduce(&self, identity: T, op: impl Fn(T, T) -> T + Send + Sync + 'static) -> Result<T> {
        let op = Arc::new(op);
        let combiner = op.clone();
        self.fold(identity, move |a, b| op(a, b), move |a, b| combiner(a, b))
    }

    /// Reduces the elements with an associative operation, returning [`None`]
    /// if there are no elements.
    pub fn reduce_opt(&self, op: impl Fn(T, T) -> T + Send + Sync + 'static) -> Result<Option<T>> {
        let op: Arc<dyn Fn(T, T) -> T + Send + Sync> = Arc::new(op);
        evaluate_with(&*self.stage, |segment, ctx| {
            reduce::reduce(segment, ctx, move || ReduceOptReducer::new(op.clone()))
        })
        .map(ReduceOptReducer::get)
    }

    /// Folds the elements into a value of another type. Partial results of
    /// parallel evaluation are merged with the combiner, in encounter order.
    pub fn fold<U: Element>(
        &self,
        identity: U,
        accumulator: impl Fn(U, T) -> U + Send + Sync + 'static,
        combiner: impl Fn(U, U) -> U + Send + Sync + 'static,
    ) -> Result<U> {
        let accumulator: Arc<dyn Fn(U, T) -> U + Send + Sync> = Arc::new(accumulator);
        let combiner: Arc<dyn Fn(U, U) -> U + Send + Sync> = Arc::new(combiner);
        evaluate_with(&*self.stage, |segment, ctx| {
            reduce::reduce(segment, ctx, move || {
                FoldReducer::new(identity.clone(), accumulator.clone(), combiner.clone())
            })
        })
        .map(FoldReducer::get)
    }

    /// Accumulates the elements into mutable containers created by the
    /// supplier. Partial containers of parallel evaluation are merged with the
    /// combiner, the later container into the earlier one.
    pub fn collect_with<R: Send + 'static>(
        &self,
        supplier: impl Fn() -> R + Send + Sync + 'static,
        accumulator: impl Fn(&mut R, T) + Send + Sync + 'static,
        combiner: impl Fn(&mut R, R) + Send + Sync + 'static,
    ) -> Result<R> {
        let accumulator: Arc<dyn Fn(&mut R, T) + Send + Sync> = Arc::new(accumulator);
        let combiner: Arc<dyn Fn(&mut R, R) + Send + Sync> = Arc::new(combiner);
        evaluate_with(&*self.stage, |segment, ctx| {
            reduce::reduce(segment, ctx, move || {
                ContainerReducer::new(supplier(), accumulator.clone(), combiner.clone())
            })
        })
        .map(ContainerReducer::get)
    }

    /// Accumulates the elements with a [`Collector`].
    pub fn collect<C: Collector<T>>(&self, collector: C) -> Result<C::Output> {
        let collector = Arc::new(collector);
        evaluate_with(&*self.stage, |segment, ctx| {
            reduce::reduce(segment, ctx, move || CollectorReducer::new(collector.clone()))
        })
        .map(CollectorReducer::finish)
    }

    /// Returns the smallest element by the given comparator, the first one in
    /// encounter order in case of ties.
    pub fn min_by(
        &self,
        comparator: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> Result<Option<T>> {
        self.reduce_opt(move |a, b| {
            if comparator(&a, &b) != Ordering::Greater {
                a
            } else {
                b
            }
        })
    }

    /// Returns the largest element by the given comparator, the first one in
    /// encounter order in case of ties.
    pub fn max_by(
        &self,
        comparator: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> Result<Option<T>> {
        self.reduce_opt(move |a, b| {
            if comparator(&a, &b) != Ordering::Less {
                a
            } else {
                b
            }
        })
    }

    /// Counts the elements. The pipeline isn't traversed if the count is
    /// known upfront.
    pub fn count(&self) -> Result<usize> {
        evaluate_with(&*self.stage, reduce::count)
    }

    /// Returns true if any element matches the predicate.
    pub fn any_match(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Result<bool> {
        evaluate(&*self.stage, MatchOp::new(MatchKind::Any, Arc::new(predicate)))
    }

    /// Returns true if all the elements match the predicate, in particular if
    /// there are no elements.
    pub fn all_match(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Result<bool> {
        evaluate(&*self.stage, MatchOp::new(MatchKind::All, Arc::new(predicate)))
    }

    /// Returns true if no element matches the predicate.
    pub fn none_match(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Result<bool> {
        evaluate(&*self.stage, MatchOp::new(MatchKind::None, Arc::new(predicate)))
    }

    /// Returns the first element in encounter order, or any element if the
    /// stream is unordered.
    pub fn find_first(&self) -> Result<Option<T>> {
        evaluate(&*self.stage, FindOp::new(true))
    }

    /// Returns any element.
    pub fn find_any(&self) -> Result<Option<T>> {
        evaluate(&*self.stage, FindOp::new(false))
    }

    /// Returns a spliterator over the elements. The stateless operations of
    /// the pipeline are applied lazily as the spliterator is traversed.
    pub fn spliterator(&self) -> Result<Box<dyn Spliterator<T>>> {
        evaluate_spliterator(&*self.stage)
    }

    /// Returns an iterator over the elements, in encounter order.
    pub fn iter(&self) -> Result<StreamIter<T>> {
        Ok(StreamIter {
            spliterator: self.spliterator()?,
        })
    }

    /// Closes the stream, running all the registered close handlers in
    /// registration order. Further evaluations of the stream fail.
    ///
    /// All the handlers run even if some fail. The first failure is returned,
    /// with the later ones attached as
    /// [suppressed](crate::CloseError::suppressed). If a handler panics, the
    /// remaining handlers still run and the panic is then resumed. Closing an
    /// already closed stream does nothing.
    pub fn close(&self) -> Result<()> {
        let handlers = self.source().close();
        log_debug!("Closing stream with {} handlers", handlers.len());

        let mut error: Option<CloseError> = None;
        let mut panic = None;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(handler)) {
                Ok(Ok(())) => (),
                Ok(Err(e)) => {
                    log_warn!("Close handler failed: {e}");
                    match &mut error {
                        None => error = Some(CloseError::new(e)),
                        Some(error) => error.suppress(e),
                    }
                }
                Err(payload) => {
                    log_warn!("Close handler panicked");
                    if panic.is_none() {
                        panic = Some(payload);
                    }
                }
            }
        }

        if let Some(payload) = panic {
            resume_unwind(payload);
        }
        match error {
            None => Ok(()),
            Some(error) => Err(PipelineError::Close(error)),
        }
    }
}

impl<T: Element + Eq + Hash> Stream<T> {
    /// Removes duplicate elements, keeping the first occurrence of each one
    /// in encounter order.
    pub fn distinct(self) -> Self {
        Self::chain(StatefulStage::new(self.stage, DistinctOp))
    }
}

impl<T: Element + Ord> Stream<T> {
    /// Sorts the elements in their natural order, with a stable sort.
    pub fn sorted(self) -> Self {
        Self::chain(StatefulStage::new(self.stage, SortedOp::natural()))
    }

    /// Returns the smallest element, the first one in encounter order in case
    /// of ties.
    pub fn min(&self) -> Result<Option<T>> {
        self.min_by(T::cmp)
    }

    /// Returns the largest element, the first one in encounter order in case
    /// of ties.
    pub fn max(&self) -> Result<Option<T>> {
        self.max_by(T::cmp)
    }
}

impl<T: RangeElement> Stream<T> {
    /// Creates a stream over the integers in `from..upto`.
    pub fn range(from: T, upto: T) -> Self {
        Self::from_spliterator_impl(Box::new(RangeSpliterator::new(from, upto)))
    }
}

impl<T: Numeric> Stream<T> {
    /// Converts the elements to floating-point numbers.
    pub fn as_f64(self) -> Stream<f64> {
        self.map(T::to_f64)
    }

    /// Returns the sum of the elements. Integer sums wrap around on overflow,
    /// and floating-point sums are compensated.
    pub fn sum(&self) -> Result<T> {
        self.summary_statistics().map(|stats| stats.sum())
    }

    /// Returns the arithmetic mean of the elements, or [`None`] if there are
    /// none.
    pub fn average(&self) -> Result<Option<f64>> {
        self.summary_statistics().map(|stats| stats.average())
    }

    /// Returns the count, sum, minimum, maximum and average of the elements.
    pub fn summary_statistics(&self) -> Result<SummaryStatistics<T>> {
        evaluate_with(&*self.stage, |segment, ctx| {
            reduce::reduce(segment, ctx, SummaryStatistics::new)
        })
    }
}

/// Iterator returned by [`Stream::iter()`].
pub struct StreamIter<T> {
    spliterator: Box<dyn Spliterator<T>>,
}

impl<T> Iterator for StreamIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let mut next = None;
        while next.is_none() {
            if !self.spliterator.try_advance(&mut |x| next = Some(x)) {
                break;
            }
        }
        next
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.spliterator.exact_size_if_known() {
            Some(size) => (size, Some(size)),
            None => (0, None),
        }
    }
}
