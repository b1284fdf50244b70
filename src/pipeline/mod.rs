// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Linked chains of pipeline stages, and their evaluation into segments.

mod segment;

pub(crate) use segment::{Driver, MappedSegment, Segment, SourceSegment};

use crate::core::pool::ForkJoinPool;
use crate::error::{BoxError, PipelineError, Result};
use crate::flags::{Flags, StreamFlag};
use crate::macros::log_debug;
use crate::sink::Sink;
use crate::source::Spliterator;
use crate::Element;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A fallible function run when a stream is closed.
pub(crate) type CloseHandler = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send>;

/// State shared by all the stages of a pipeline.
pub(crate) struct SourceState {
    parallel: AtomicBool,
    pool: Mutex<Option<Arc<ForkJoinPool>>>,
    close_handlers: Mutex<Vec<CloseHandler>>,
    closed: AtomicBool,
}

impl SourceState {
    pub(crate) fn new(parallel: bool) -> Self {
        Self {
            parallel: AtomicBool::new(parallel),
            pool: Mutex::new(None),
            close_handlers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_parallel(&self) -> bool {
        self.parallel.load(Ordering::Relaxed)
    }

    pub(crate) fn set_parallel(&self, parallel: bool) {
        self.parallel.store(parallel, Ordering::Relaxed)
    }

    pub(crate) fn set_pool(&self, pool: Arc<ForkJoinPool>) {
        *self.pool.lock().unwrap() = Some(pool);
    }

    pub(crate) fn push_close_handler(&self, handler: CloseHandler) {
        self.close_handlers.lock().unwrap().push(handler);
    }

    /// Appends the close handlers of another pipeline after the handlers of
    /// this one.
    pub(crate) fn absorb_close_handlers(&self, other: &SourceState) {
        let handlers = std::mem::take(&mut *other.close_handlers.lock().unwrap());
        self.close_handlers.lock().unwrap().extend(handlers);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the pipeline as closed and takes the close handlers, which must
    /// be run exactly once.
    pub(crate) fn close(&self) -> Vec<CloseHandler> {
        self.closed.store(true, Ordering::Release);
        std::mem::take(&mut *self.close_handlers.lock().unwrap())
    }

    /// Returns the evaluation context for a terminal operation.
    pub(crate) fn eval_context(&self) -> EvalContext {
        EvalContext {
            parallel: self.is_parallel(),
            pool: self.pool.lock().unwrap().clone(),
        }
    }
}

/// Parameters of one evaluation.
pub(crate) struct EvalContext {
    pub(crate) parallel: bool,
    pool: Option<Arc<ForkJoinPool>>,
}

impl EvalContext {
    #[cfg(test)]
    pub(crate) fn sequential() -> Self {
        Self {
            parallel: false,
            pool: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn parallel(pool: Arc<ForkJoinPool>) -> Self {
        Self {
            parallel: true,
            pool: Some(pool),
        }
    }

    /// Returns the pool to evaluate on: the pool attached to the pipeline if
    /// any, or the common pool.
    pub(crate) fn pool(&self) -> Arc<ForkJoinPool> {
        match &self.pool {
            Some(pool) => pool.clone(),
            None => ForkJoinPool::common(),
        }
    }
}

/// Fields common to all pipeline stages.
pub(crate) struct StageHeader {
    /// Flags combined from the source up to this stage.
    combined_flags: Flags,
    /// Number of intermediate stages between the source and this stage.
    depth: usize,
    /// Whether another stage was linked to this one, or a terminal operation
    /// consumed it.
    linked: AtomicBool,
    /// Whether this stage was linked to an already linked stage.
    poisoned: bool,
    source: Arc<SourceState>,
}

impl StageHeader {
    pub(crate) fn head(flags: Flags, source: Arc<SourceState>) -> Self {
        Self {
            combined_flags: flags,
            depth: 0,
            linked: AtomicBool::new(false),
            poisoned: false,
            source,
        }
    }

    /// Creates the header of a stage linked after `upstream`, marking the
    /// latter as linked.
    pub(crate) fn link(upstream: &StageHeader, op_flags: Flags) -> Self {
        let poisoned = upstream.poisoned || !upstream.try_consume();
        if poisoned {
            log_debug!("Linking a stage to an already linked stage");
        }
        Self {
            combined_flags: op_flags.combine(upstream.combined_flags),
            depth: upstream.depth + 1,
            linked: AtomicBool::new(false),
            poisoned,
            source: upstream.source.clone(),
        }
    }

    pub(crate) fn combined_flags(&self) -> Flags {
        self.combined_flags
    }

    pub(crate) fn is_ordered(&self) -> bool {
        self.combined_flags.is_known(StreamFlag::Ordered)
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn source(&self) -> &Arc<SourceState> {
        &self.source
    }

    /// Marks this stage as consumed, returning false if it was already linked
    /// or consumed.
    fn try_consume(&self) -> bool {
        !self.linked.swap(true, Ordering::AcqRel)
    }

    /// Marks this stage as consumed by a terminal operation, failing if the
    /// pipeline cannot be traversed anymore.
    pub(crate) fn consume(&self) -> Result<()> {
        if self.poisoned || self.source.is_closed() || !self.try_consume() {
            return Err(PipelineError::ReuseViolation);
        }
        Ok(())
    }
}

/// One link of a pipeline, producing elements of type `T`.
pub(crate) trait Stage<T>: Send + Sync {
    fn header(&self) -> &StageHeader;

    /// Evaluates the pipeline up to this stage into a segment. In parallel
    /// mode, stateful stages are evaluated eagerly (or into a lazy
    /// spliterator) here.
    fn segment(&self, ctx: &EvalContext) -> Result<Box<dyn Segment<T>>>;
}

/// Behavior of an intermediate operation, transforming elements of type `In`
/// into elements of type `Out`.
pub(crate) trait StageOps<In, Out>: Send + Sync {
    /// Flags set or cleared by this operation.
    fn op_flags(&self) -> Flags;

    /// Wraps the downstream sink. The `flags` are the combined flags of the
    /// upstream stage.
    fn wrap_sink<'a>(&self, flags: Flags, downstream: Box<dyn Sink<Out> + 'a>)
        -> Box<dyn Sink<In> + 'a>;
}

/// Behavior of a stateful intermediate operation, which acts as a barrier in
/// parallel evaluation.
pub(crate) trait StatefulOps<T>: StageOps<T, T> {
    /// Evaluates the upstream segment in parallel into a spliterator over the
    /// output of this operation. The evaluation may be deferred until the
    /// returned spliterator is traversed.
    fn evaluate_parallel_lazy(
        &self,
        upstream: Box<dyn Segment<T>>,
        ctx: &EvalContext,
    ) -> Result<Box<dyn Spliterator<T>>>;
}

/// The head stage of a pipeline, owning the source.
pub(crate) struct HeadStage<T> {
    header: StageHeader,
    source: Mutex<Option<Box<dyn Spliterator<T>>>>,
}

impl<T> HeadStage<T> {
    pub(crate) fn new(spliterator: Box<dyn Spliterator<T>>, parallel: bool) -> Self {
        let flags = Flags::from_source(
            spliterator.characteristics(),
            spliterator.has_custom_comparator(),
        );
        Self {
            header: StageHeader::head(flags, Arc::new(SourceState::new(parallel))),
            source: Mutex::new(Some(spliterator)),
        }
    }
}

impl<T: Element> Stage<T> for HeadStage<T> {
    fn header(&self) -> &StageHeader {
        &self.header
    }

    fn segment(&self, _ctx: &EvalContext) -> Result<Box<dyn Segment<T>>> {
        let spliterator = self
            .source
            .lock()
            .unwrap()
            .take()
            .ok_or(PipelineError::ReuseViolation)?;
        Ok(Box::new(SourceSegment::new(
            spliterator,
            self.header.combined_flags,
        )))
    }
}

/// A stage applying a stateless operation.
pub(crate) struct StatelessStage<In, Out> {
    header: StageHeader,
    upstream: Arc<dyn Stage<In>>,
    ops: Arc<dyn StageOps<In, Out>>,
}

impl<In, Out> StatelessStage<In, Out> {
    pub(crate) fn new(upstream: Arc<dyn Stage<In>>, ops: Arc<dyn StageOps<In, Out>>) -> Self {
        Self {
            header: StageHeader::link(upstream.header(), ops.op_flags()),
            upstream,
            ops,
        }
    }
}

impl<In: Element, Out: Element> Stage<Out> for StatelessStage<In, Out> {
    fn header(&self) -> &StageHeader {
        &self.header
    }

    fn segment(&self, ctx: &EvalContext) -> Result<Box<dyn Segment<Out>>> {
        let upstream = self.upstream.segment(ctx)?;
        Ok(Box::new(MappedSegment::new(upstream, self.ops.clone())))
    }
}

/// A stage applying a stateful operation.
pub(crate) struct StatefulStage<T, O> {
    header: StageHeader,
    upstream: Arc<dyn Stage<T>>,
    ops: Arc<O>,
}

impl<T, O: StatefulOps<T>> StatefulStage<T, O> {
    pub(crate) fn new(upstream: Arc<dyn Stage<T>>, ops: O) -> Self {
        Self {
            header: StageHeader::link(upstream.header(), ops.op_flags()),
            upstream,
            ops: Arc::new(ops),
        }
    }
}

impl<T: Element, O: StatefulOps<T> + 'static> Stage<T> for StatefulStage<T, O> {
    fn header(&self) -> &StageHeader {
        &self.header
    }

    fn segment(&self, ctx: &EvalContext) -> Result<Box<dyn Segment<T>>> {
        let upstream = self.upstream.segment(ctx)?;
        if !ctx.parallel {
            return Ok(Box::new(MappedSegment::new(upstream, self.ops.clone())));
        }

        let upstream_flags = upstream.flags();
        let spliterator = self.ops.evaluate_parallel_lazy(upstream, ctx)?;
        // The barrier consumed the short-circuit, and the size is now given by
        // the materialized spliterator.
        let op_flags = self.ops.op_flags().without(Flags::IS_SHORT_CIRCUIT);
        let op_flags = if spliterator.exact_size_if_known().is_some() {
            op_flags.without(Flags::NOT_SIZED) | Flags::IS_SIZED
        } else {
            op_flags.without(Flags::IS_SIZED) | Flags::NOT_SIZED
        };
        Ok(Box::new(SourceSegment::new(
            spliterator,
            op_flags.combine(upstream_flags),
        )))
    }
}

/// A terminal operation, producing a result of type `R`.
pub(crate) trait TerminalOp<T, R> {
    fn evaluate_sequential(self, segment: Box<dyn Segment<T>>) -> Result<R>;

    fn evaluate_parallel(self, segment: Box<dyn Segment<T>>, ctx: &EvalContext) -> Result<R>;
}

/// Evaluates a terminal operation on the pipeline ending at the given stage.
pub(crate) fn evaluate<T: Element, R>(
    stage: &dyn Stage<T>,
    op: impl TerminalOp<T, R>,
) -> Result<R> {
    evaluate_with(stage, |segment, ctx| {
        if ctx.parallel {
            op.evaluate_parallel(segment, ctx)
        } else {
            op.evaluate_sequential(segment)
        }
    })
}

/// Consumes the pipeline ending at the given stage, and passes its segment
/// and evaluation context to the given function.
pub(crate) fn evaluate_with<T: Element, R>(
    stage: &dyn Stage<T>,
    f: impl FnOnce(Box<dyn Segment<T>>, &EvalContext) -> Result<R>,
) -> Result<R> {
    let header = stage.header();
    header.consume()?;
    let ctx = header.source().eval_context();
    log_debug!(
        "Evaluating a pipeline of depth {} ({})",
        header.depth(),
        if ctx.parallel { "parallel" } else { "sequential" }
    );
    let segment = stage.segment(&ctx)?;
    f(segment, &ctx)
}

/// Evaluates the pipeline ending at the given stage into a spliterator over
/// its output. Stateless stages are applied lazily as the spliterator is
/// traversed.
pub(crate) fn evaluate_spliterator<T: Element>(stage: &dyn Stage<T>) -> Result<Box<dyn Spliterator<T>>> {
    evaluate_with(stage, |segment, ctx| Ok(segment.into_spliterator(ctx.parallel)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flags::Characteristics;
    use crate::source::ArraySpliterator;

    struct Identity;

    impl StageOps<i32, i32> for Identity {
        fn op_flags(&self) -> Flags {
            Flags::NOT_SIZED
        }

        fn wrap_sink<'a>(
            &self,
            _flags: Flags,
            downstream: Box<dyn Sink<i32> + 'a>,
        ) -> Box<dyn Sink<i32> + 'a> {
            downstream
        }
    }

    fn head(input: Vec<i32>) -> Arc<dyn Stage<i32>> {
        Arc::new(HeadStage::new(
            Box::new(ArraySpliterator::new(input, Characteristics::ORDERED)),
            false,
        ))
    }

    #[test]
    fn test_head_flags() {
        let head = head(vec![1, 2, 3]);
        let flags = head.header().combined_flags();
        assert!(flags.is_known(StreamFlag::Ordered));
        assert!(flags.is_known(StreamFlag::Sized));
        assert!(head.header().is_ordered());
        assert_eq!(head.header().depth(), 0);
    }

    #[test]
    fn test_link_combines_flags() {
        let head = head(vec![1, 2, 3]);
        let stage = StatelessStage::new(head, Arc::new(Identity));
        assert!(!stage.header().combined_flags().is_known(StreamFlag::Sized));
        assert!(stage.header().is_ordered());
        assert_eq!(stage.header().depth(), 1);

        let segment = stage.segment(&EvalContext::sequential()).unwrap();
        assert_eq!(segment.exact_source_size(), Some(3));
        assert_eq!(segment.exact_output_size(), None);
    }

    #[test]
    fn test_source_taken_once() {
        let head = head(vec![1, 2, 3]);
        assert!(head.segment(&EvalContext::sequential()).is_ok());
        assert!(matches!(
            head.segment(&EvalContext::sequential()),
            Err(PipelineError::ReuseViolation)
        ));
    }

    #[test]
    fn test_link_twice_poisons() {
        let head = head(vec![1, 2, 3]);
        let first = StatelessStage::new(head.clone(), Arc::new(Identity));
        let second = StatelessStage::new(head, Arc::new(Identity));
        assert!(first.header().consume().is_ok());
        assert!(matches!(
            second.header().consume(),
            Err(PipelineError::ReuseViolation)
        ));
    }

    #[test]
    fn test_consume_twice() {
        let head = head(vec![1, 2, 3]);
        assert!(head.header().consume().is_ok());
        assert!(matches!(
            head.header().consume(),
            Err(PipelineError::ReuseViolation)
        ));
    }

    #[test]
    fn test_closed() {
        let head = head(vec![1, 2, 3]);
        let handlers = head.header().source().close();
        assert!(handlers.is_empty());
        assert!(matches!(
            head.header().consume(),
            Err(PipelineError::ReuseViolation)
        ));
    }
}
