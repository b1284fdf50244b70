// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `sorted` operation.

use super::collect::collect_node;
use crate::error::Result;
use crate::flags::{Characteristics, Flags, StreamFlag};
use crate::pipeline::{EvalContext, Segment, StageOps, StatefulOps};
use crate::sink::Sink;
use crate::source::{ArraySpliterator, Spliterator};
use crate::Element;
use std::cell::Cell;
use std::cmp::Ordering;
use std::sync::Arc;

/// Shared comparison function.
pub(crate) type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Upper bound on the capacity reserved upfront from a size hint.
const MAX_RESERVE: usize = 1 << 20;

/// Sorts elements with a stable sort, either by their natural order or by a
/// custom comparator.
pub(crate) struct SortedOp<T> {
    comparator: Comparator<T>,
    natural: bool,
}

impl<T: Ord + 'static> SortedOp<T> {
    pub(crate) fn natural() -> Self {
        Self {
            comparator: Arc::new(T::cmp),
            natural: true,
        }
    }
}

impl<T> SortedOp<T> {
    pub(crate) fn by(comparator: Comparator<T>) -> Self {
        Self {
            comparator,
            natural: false,
        }
    }
}

/// Buffers all the elements, and pushes them sorted downstream on `end()`.
struct SortSink<'a, T> {
    buffer: Vec<T>,
    comparator: Comparator<T>,
    /// Set once an upstream producer polled for cancellation, after which
    /// emission honors downstream cancellation.
    polled: Cell<bool>,
    downstream: Box<dyn Sink<T> + 'a>,
}

impl<T: Send> Sink<T> for SortSink<'_, T> {
    fn begin(&mut self, size: Option<usize>) {
        self.buffer.clear();
        if let Some(size) = size {
            self.buffer.reserve(size.min(MAX_RESERVE));
        }
    }

    fn accept(&mut self, value: T) {
        self.buffer.push(value)
    }

    fn end(&mut self) {
        let comparator = &self.comparator;
        self.buffer.sort_by(|a, b| comparator(a, b));
        self.downstream.begin(Some(self.buffer.len()));
        let short_circuit = self.polled.get();
        for x in self.buffer.drain(..) {
            if short_circuit && self.downstream.cancellation_requested() {
                break;
            }
            self.downstream.accept(x);
        }
        self.downstream.end();
        self.buffer = Vec::new();
    }

    fn cancellation_requested(&self) -> bool {
        self.polled.set(true);
        false
    }
}

impl<T: Element> StageOps<T, T> for SortedOp<T> {
    fn op_flags(&self) -> Flags {
        if self.natural {
            Flags::IS_ORDERED | Flags::IS_SORTED
        } else {
            Flags::IS_ORDERED | Flags::NOT_SORTED
        }
    }

    fn wrap_sink<'a>(&self, flags: Flags, downstream: Box<dyn Sink<T> + 'a>) -> Box<dyn Sink<T> + 'a> {
        if self.natural && flags.is_known(StreamFlag::Sorted) {
            return downstream;
        }
        Box::new(SortSink {
            buffer: Vec::new(),
            comparator: self.comparator.clone(),
            polled: Cell::new(false),
            downstream,
        })
    }
}

impl<T: Element> StatefulOps<T> for SortedOp<T> {
    fn evaluate_parallel_lazy(
        &self,
        upstream: Box<dyn Segment<T>>,
        ctx: &EvalContext,
    ) -> Result<Box<dyn Spliterator<T>>> {
        if self.natural && upstream.flags().is_known(StreamFlag::Sorted) {
            return Ok(upstream.into_spliterator(true));
        }
        let mut array = collect_node(upstream, ctx, true)?.into_vec();
        let comparator = &self.comparator;
        array.sort_by(|a, b| comparator(a, b));
        let characteristics = if self.natural {
            Characteristics::ORDERED | Characteristics::SORTED
        } else {
            Characteristics::ORDERED
        };
        Ok(Box::new(ArraySpliterator::new(array, characteristics)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::pool::{CpuPinningPolicy, ForkJoinPoolBuilder, ThreadCount};
    use crate::pipeline::SourceSegment;
    use crate::source::test_util::drain;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn run(op: &SortedOp<(u32, u32)>, flags: Flags, input: Vec<(u32, u32)>) -> Vec<(u32, u32)> {
        let mut output = Vec::new();
        {
            let mut sink = op.wrap_sink(flags, Box::new(&mut output));
            sink.begin(None);
            for x in input {
                sink.accept(x);
            }
            sink.end();
        }
        output
    }

    #[test]
    fn test_natural() {
        let output = run(
            &SortedOp::natural(),
            Flags::NONE,
            vec![(3, 0), (1, 0), (2, 0), (1, 1)],
        );
        assert_eq!(output, [(1, 0), (1, 1), (2, 0), (3, 0)]);
    }

    #[test]
    fn test_comparator_is_stable() {
        let op = SortedOp::by(Arc::new(|a: &(u32, u32), b: &(u32, u32)| b.0.cmp(&a.0)));
        assert!(StreamFlag::Sorted.is_cleared(op.op_flags()));
        let output = run(&op, Flags::NONE, vec![(1, 0), (2, 0), (1, 1), (2, 1), (1, 2)]);
        assert_eq!(output, [(2, 0), (2, 1), (1, 0), (1, 1), (1, 2)]);
    }

    #[test]
    fn test_already_sorted_passthrough() {
        let output = run(&SortedOp::natural(), Flags::IS_SORTED, vec![(2, 0), (1, 0)]);
        assert_eq!(output, [(2, 0), (1, 0)]);
    }

    #[test]
    fn test_cancellation_after_poll() {
        struct Limit(Vec<u32>);
        impl Sink<u32> for Limit {
            fn accept(&mut self, value: u32) {
                self.0.push(value)
            }
            fn cancellation_requested(&self) -> bool {
                self.0.len() >= 2
            }
        }

        let mut limit = Limit(Vec::new());
        {
            let op = SortedOp::<u32>::natural();
            let mut sink = op.wrap_sink(Flags::NONE, Box::new(&mut limit));
            sink.begin(None);
            for x in [5, 3, 4, 1, 2] {
                assert!(!sink.cancellation_requested());
                sink.accept(x);
            }
            sink.end();
        }
        assert_eq!(limit.0, [1, 2]);
    }

    #[test]
    fn test_parallel() {
        let mut input: Vec<u32> = (0..50_000).collect();
        input.shuffle(&mut ChaCha8Rng::seed_from_u64(42));
        let spliterator = ArraySpliterator::new(input, Characteristics::ORDERED);
        let flags = Flags::from_source(spliterator.characteristics(), false);
        let upstream = Box::new(SourceSegment::new(Box::new(spliterator), flags));
        let ctx = EvalContext::parallel(Arc::new(
            ForkJoinPoolBuilder {
                num_threads: ThreadCount::try_from(4).unwrap(),
                cpu_pinning: CpuPinningPolicy::No,
                leaf_tasks_per_thread: 4,
            }
            .build(),
        ));
        let mut sorted = SortedOp::natural()
            .evaluate_parallel_lazy(upstream, &ctx)
            .unwrap();
        assert!(sorted.has_characteristics(Characteristics::SORTED | Characteristics::SIZED));
        assert_eq!(drain(sorted.as_mut()), (0..50_000).collect::<Vec<_>>());
    }
}
