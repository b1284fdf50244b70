// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Evaluable pipeline prefixes: a source spliterator followed by a chain of
//! sink transformations.

use super::StageOps;
use crate::flags::{Characteristics, Flags, StreamFlag};
use crate::sink::Sink;
use crate::source::{Spliterator, WrappingSpliterator};
use crate::Element;
use std::sync::Arc;

/// A source spliterator together with the chain of stages applied to it, up to
/// elements of type `T`.
///
/// Splitting a segment splits its source, and each part carries the same
/// chain of stages.
pub(crate) trait Segment<T>: Send {
    /// Combined flags at the end of this segment.
    fn flags(&self) -> Flags;

    /// Estimated number of source elements.
    fn estimate_size(&self) -> usize;

    /// Characteristics of the source.
    fn source_characteristics(&self) -> Characteristics;

    /// Exact number of source elements, if known.
    fn exact_source_size(&self) -> Option<usize>;

    /// Exact number of output elements, if known.
    fn exact_output_size(&self) -> Option<usize> {
        if self.flags().is_known(StreamFlag::Sized) {
            self.exact_source_size()
        } else {
            None
        }
    }

    /// Splits off a prefix of the source into a new segment with the same
    /// chain of stages.
    fn try_split(&mut self) -> Option<Box<dyn Segment<T>>>;

    /// Wraps the given sink with the chain of stages, and returns a driver
    /// pushing source elements through the whole chain.
    fn wrap<'a>(self: Box<Self>, sink: Box<dyn Sink<T> + 'a>) -> Box<dyn Driver + 'a>;

    /// Converts this segment into a spliterator over its output elements.
    fn into_spliterator(self: Box<Self>, parallel: bool) -> Box<dyn Spliterator<T>>;

    /// Pushes all the output elements of this segment into the given sink,
    /// polling for cancellation if `short_circuit` is true.
    fn copy_into<'a>(self: Box<Self>, sink: Box<dyn Sink<T> + 'a>, short_circuit: bool) {
        let short_circuit = short_circuit || self.flags().is_known(StreamFlag::ShortCircuit);
        self.wrap(sink).run(short_circuit);
    }
}

/// A source spliterator whose elements are pushed into a wrapped sink chain.
pub(crate) trait Driver: Send {
    /// Exact number of source elements, if known.
    fn exact_size(&self) -> Option<usize>;

    /// Estimated number of remaining source elements.
    fn estimate_size(&self) -> usize;

    fn begin(&mut self, size: Option<usize>);

    /// Pushes one source element through the sink chain. Returns false once
    /// the source is exhausted.
    fn try_advance(&mut self) -> bool;

    /// Pushes all the remaining source elements through the sink chain.
    fn drain(&mut self);

    fn end(&mut self);

    fn cancellation_requested(&self) -> bool;

    /// Runs a whole `begin`/`accept`/`end` cycle.
    fn run(&mut self, short_circuit: bool) {
        self.begin(self.exact_size());
        if short_circuit {
            while !self.cancellation_requested() && self.try_advance() {}
        } else {
            self.drain();
        }
        self.end();
    }
}

/// A segment without any stage.
pub(crate) struct SourceSegment<T> {
    spliterator: Box<dyn Spliterator<T>>,
    flags: Flags,
}

impl<T> SourceSegment<T> {
    pub(crate) fn new(spliterator: Box<dyn Spliterator<T>>, flags: Flags) -> Self {
        Self { spliterator, flags }
    }
}

impl<T: Element> Segment<T> for SourceSegment<T> {
    fn flags(&self) -> Flags {
        self.flags
    }

    fn estimate_size(&self) -> usize {
        self.spliterator.estimate_size()
    }

    fn source_characteristics(&self) -> Characteristics {
        self.spliterator.characteristics()
    }

    fn exact_source_size(&self) -> Option<usize> {
        self.spliterator.exact_size_if_known()
    }

    fn try_split(&mut self) -> Option<Box<dyn Segment<T>>> {
        let spliterator = self.spliterator.try_split()?;
        Some(Box::new(SourceSegment {
            spliterator,
            flags: self.flags,
        }))
    }

    fn wrap<'a>(self: Box<Self>, sink: Box<dyn Sink<T> + 'a>) -> Box<dyn Driver + 'a> {
        Box::new(SourceDriver {
            spliterator: self.spliterator,
            sink,
        })
    }

    fn into_spliterator(self: Box<Self>, _parallel: bool) -> Box<dyn Spliterator<T>> {
        self.spliterator
    }
}

/// A segment followed by one more stage.
pub(crate) struct MappedSegment<In, Out> {
    upstream: Box<dyn Segment<In>>,
    ops: Arc<dyn StageOps<In, Out>>,
    flags: Flags,
}

impl<In: Element, Out: Element> MappedSegment<In, Out> {
    pub(crate) fn new(upstream: Box<dyn Segment<In>>, ops: Arc<dyn StageOps<In, Out>>) -> Self {
        let flags = ops.op_flags().combine(upstream.flags());
        Self {
            upstream,
            ops,
            flags,
        }
    }
}

impl<In: Element, Out: Element> Segment<Out> for MappedSegment<In, Out> {
    fn flags(&self) -> Flags {
        self.flags
    }

    fn estimate_size(&self) -> usize {
        self.upstream.estimate_size()
    }

    fn source_characteristics(&self) -> Characteristics {
        self.upstream.source_characteristics()
    }

    fn exact_source_size(&self) -> Option<usize> {
        self.upstream.exact_source_size()
    }

    fn try_split(&mut self) -> Option<Box<dyn Segment<Out>>> {
        let upstream = self.upstream.try_split()?;
        Some(Box::new(MappedSegment {
            upstream,
            ops: self.ops.clone(),
            flags: self.flags,
        }))
    }

    fn wrap<'a>(self: Box<Self>, sink: Box<dyn Sink<Out> + 'a>) -> Box<dyn Driver + 'a> {
        let sink = self.ops.wrap_sink(self.upstream.flags(), sink);
        self.upstream.wrap(sink)
    }

    fn into_spliterator(self: Box<Self>, parallel: bool) -> Box<dyn Spliterator<Out>> {
        Box::new(WrappingSpliterator::new(self, parallel))
    }
}

struct SourceDriver<'a, T> {
    spliterator: Box<dyn Spliterator<T>>,
    sink: Box<dyn Sink<T> + 'a>,
}

impl<T> Driver for SourceDriver<'_, T> {
    fn exact_size(&self) -> Option<usize> {
        self.spliterator.exact_size_if_known()
    }

    fn estimate_size(&self) -> usize {
        self.spliterator.estimate_size()
    }

    fn begin(&mut self, size: Option<usize>) {
        self.sink.begin(size)
    }

    fn try_advance(&mut self) -> bool {
        let sink = &mut self.sink;
        self.spliterator.try_advance(&mut |x| sink.accept(x))
    }

    fn drain(&mut self) {
        let sink = &mut self.sink;
        self.spliterator.for_each_remaining(&mut |x| sink.accept(x))
    }

    fn end(&mut self) {
        self.sink.end()
    }

    fn cancellation_requested(&self) -> bool {
        self.sink.cancellation_requested()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flags::Characteristics;
    use crate::source::ArraySpliterator;

    struct Double;

    impl StageOps<i32, i32> for Double {
        fn op_flags(&self) -> Flags {
            Flags::NOT_SORTED
        }

        fn wrap_sink<'a>(
            &self,
            _flags: Flags,
            downstream: Box<dyn Sink<i32> + 'a>,
        ) -> Box<dyn Sink<i32> + 'a> {
            struct DoubleSink<'a>(Box<dyn Sink<i32> + 'a>);
            impl Sink<i32> for DoubleSink<'_> {
                fn begin(&mut self, size: Option<usize>) {
                    self.0.begin(size)
                }
                fn accept(&mut self, value: i32) {
                    self.0.accept(2 * value)
                }
                fn end(&mut self) {
                    self.0.end()
                }
            }
            Box::new(DoubleSink(downstream))
        }
    }

    fn segment(input: Vec<i32>) -> Box<dyn Segment<i32>> {
        let spliterator = ArraySpliterator::new(input, Characteristics::ORDERED);
        let flags = Flags::from_source(spliterator.characteristics(), false);
        let source = Box::new(SourceSegment::new(Box::new(spliterator), flags));
        Box::new(MappedSegment::new(source, Arc::new(Double)))
    }

    #[test]
    fn test_copy_into() {
        let segment = segment(vec![1, 2, 3]);
        assert_eq!(segment.exact_output_size(), Some(3));
        assert!(StreamFlag::Sorted.is_cleared(segment.flags()));
        let mut output = Vec::new();
        segment.copy_into(Box::new(&mut output), false);
        assert_eq!(output, [2, 4, 6]);
    }

    #[test]
    fn test_split() {
        let mut segment = segment((0..10).collect());
        let prefix = segment.try_split().unwrap();
        let mut output = Vec::new();
        prefix.copy_into(Box::new(&mut output), false);
        segment.copy_into(Box::new(&mut output), false);
        assert_eq!(output, (0..10).map(|x| 2 * x).collect::<Vec<_>>());
    }

    #[test]
    fn test_into_spliterator() {
        let mut spliterator = segment(vec![5, 6]).into_spliterator(false);
        let mut output = Vec::new();
        spliterator.for_each_remaining(&mut |x| output.push(x));
        assert_eq!(output, [10, 12]);
    }
}
