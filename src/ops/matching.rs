// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `any_match`, `all_match` and `none_match` operations.

use crate::core::task::{invoke, TaskNode, TaskSpec};
use crate::error::Result;
use crate::pipeline::{EvalContext, Segment, TerminalOp};
use crate::sink::Sink;
use std::sync::Arc;

/// Kind of quantifier evaluated by a [`MatchOp`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatchKind {
    /// Some element matches.
    Any,
    /// Every element matches.
    All,
    /// No element matches.
    None,
}

impl MatchKind {
    /// Value of the predicate on which the evaluation stops.
    fn stop_on(self) -> bool {
        match self {
            MatchKind::Any => true,
            MatchKind::All => false,
            MatchKind::None => true,
        }
    }

    /// Result when stopping early.
    fn short_circuit_result(self) -> bool {
        match self {
            MatchKind::Any => true,
            MatchKind::All | MatchKind::None => false,
        }
    }
}

/// Evaluates a quantifier over the elements, stopping at the first element
/// that decides the result.
pub(crate) struct MatchOp<T> {
    kind: MatchKind,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> MatchOp<T> {
    pub(crate) fn new(kind: MatchKind, predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>) -> Self {
        Self { kind, predicate }
    }
}

struct MatchSink<'a, T> {
    kind: MatchKind,
    predicate: &'a (dyn Fn(&T) -> bool + Send + Sync),
    stopped: bool,
    value: bool,
    /// Stops early once another task decided the result.
    short_circuited: Option<&'a (dyn Fn() -> bool + Sync)>,
}

impl<'a, T> MatchSink<'a, T> {
    fn new(kind: MatchKind, predicate: &'a (dyn Fn(&T) -> bool + Send + Sync)) -> Self {
        Self {
            kind,
            predicate,
            stopped: false,
            value: !kind.short_circuit_result(),
            short_circuited: None,
        }
    }
}

impl<T> Sink<T> for MatchSink<'_, T> {
    fn accept(&mut self, value: T) {
        if !self.stopped && (self.predicate)(&value) == self.kind.stop_on() {
            self.stopped = true;
            self.value = self.kind.short_circuit_result();
        }
    }

    fn cancellation_requested(&self) -> bool {
        self.stopped || self.short_circuited.is_some_and(|f| f())
    }
}

impl<T: 'static> TerminalOp<T, bool> for MatchOp<T> {
    fn evaluate_sequential(self, segment: Box<dyn Segment<T>>) -> Result<bool> {
        let mut sink = MatchSink::new(self.kind, self.predicate.as_ref());
        segment.copy_into(Box::new(&mut sink), true);
        Ok(sink.value)
    }

    fn evaluate_parallel(self, segment: Box<dyn Segment<T>>, ctx: &EvalContext) -> Result<bool> {
        Ok(invoke(self, segment, ctx))
    }
}

impl<T: 'static> TaskSpec<T> for MatchOp<T> {
    type Output = bool;
    type NodeState = ();
    const SHORT_CIRCUIT: bool = true;

    fn leaf(&self, node: &TaskNode<T, Self>, segment: Box<dyn Segment<T>>) -> bool {
        let short_circuited = || node.is_short_circuited();
        let mut sink = MatchSink::new(self.kind, self.predicate.as_ref());
        sink.short_circuited = Some(&short_circuited);
        segment.copy_into(Box::new(&mut sink), true);
        if sink.stopped {
            node.short_circuit(sink.value);
        }
        sink.value
    }

    fn empty(&self) -> bool {
        !self.kind.short_circuit_result()
    }

    fn combine(&self, _node: &TaskNode<T, Self>, left: bool, right: bool) -> bool {
        let stop = self.kind.short_circuit_result();
        if left == stop || right == stop {
            stop
        } else {
            !stop
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::pool::{CpuPinningPolicy, ForkJoinPoolBuilder, ThreadCount};
    use crate::flags::Flags;
    use crate::pipeline::SourceSegment;
    use crate::source::{GenerateSpliterator, RangeSpliterator, Spliterator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn segment<T: crate::Element>(spliterator: impl Spliterator<T> + 'static) -> Box<dyn Segment<T>> {
        let flags = Flags::from_source(spliterator.characteristics(), false);
        Box::new(SourceSegment::new(Box::new(spliterator), flags))
    }

    fn evaluate(kind: MatchKind, upto: u32, predicate: fn(&u32) -> bool) -> [bool; 2] {
        let ctx = EvalContext::parallel(Arc::new(
            ForkJoinPoolBuilder {
                num_threads: ThreadCount::try_from(4).unwrap(),
                cpu_pinning: CpuPinningPolicy::No,
                leaf_tasks_per_thread: 4,
            }
            .build(),
        ));
        let sequential = MatchOp::new(kind, Arc::new(predicate))
            .evaluate_sequential(segment(RangeSpliterator::new(0, upto)))
            .unwrap();
        let parallel = MatchOp::new(kind, Arc::new(predicate))
            .evaluate_parallel(segment(RangeSpliterator::new(0, upto)), &ctx)
            .unwrap();
        [sequential, parallel]
    }

    #[test]
    fn test_any() {
        assert_eq!(evaluate(MatchKind::Any, 10_000, |x| *x == 7777), [true; 2]);
        assert_eq!(evaluate(MatchKind::Any, 10_000, |x| *x > 10_000), [false; 2]);
    }

    #[test]
    fn test_all() {
        assert_eq!(evaluate(MatchKind::All, 10_000, |x| *x < 10_000), [true; 2]);
        assert_eq!(evaluate(MatchKind::All, 10_000, |x| *x != 4321), [false; 2]);
    }

    #[test]
    fn test_none() {
        assert_eq!(evaluate(MatchKind::None, 10_000, |x| *x > 10_000), [true; 2]);
        assert_eq!(evaluate(MatchKind::None, 10_000, |x| *x == 0), [false; 2]);
    }

    #[test]
    fn test_empty() {
        assert_eq!(evaluate(MatchKind::Any, 0, |_| true), [false; 2]);
        assert_eq!(evaluate(MatchKind::All, 0, |_| false), [true; 2]);
        assert_eq!(evaluate(MatchKind::None, 0, |_| true), [true; 2]);
    }

    #[test]
    fn test_sequential_stops_early() {
        let seen = Arc::new(AtomicUsize::new(0));
        let predicate = {
            let seen = seen.clone();
            move |x: &u32| {
                seen.fetch_add(1, Ordering::Relaxed);
                *x == 5
            }
        };
        let found = MatchOp::new(MatchKind::Any, Arc::new(predicate))
            .evaluate_sequential(segment(RangeSpliterator::new(0, 1000)))
            .unwrap();
        assert!(found);
        assert_eq!(seen.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_parallel_infinite() {
        let ctx = EvalContext::parallel(Arc::new(ForkJoinPoolBuilder::default().build()));
        let counter = Arc::new(AtomicUsize::new(0));
        let source = GenerateSpliterator::new({
            let counter = counter.clone();
            move || counter.fetch_add(1, Ordering::Relaxed)
        });
        let found = MatchOp::new(MatchKind::Any, Arc::new(|x: &usize| *x >= 100_000))
            .evaluate_parallel(segment(source), &ctx)
            .unwrap();
        assert!(found);
    }
}
