// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Operations that transform each element independently.

use crate::flags::Flags;
use crate::pipeline::StageOps;
use crate::sink::Sink;
use std::sync::Arc;

/// Applies a function to each element.
pub(crate) struct MapOp<F>(Arc<F>);

impl<F> MapOp<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

struct MapSink<'a, F, Out> {
    f: Arc<F>,
    downstream: Box<dyn Sink<Out> + 'a>,
}

impl<In, Out, F> Sink<In> for MapSink<'_, F, Out>
where
    F: Fn(In) -> Out + Send + Sync,
{
    fn begin(&mut self, size: Option<usize>) {
        self.downstream.begin(size)
    }

    fn accept(&mut self, value: In) {
        self.downstream.accept((self.f)(value))
    }

    fn end(&mut self) {
        self.downstream.end()
    }

    fn cancellation_requested(&self) -> bool {
        self.downstream.cancellation_requested()
    }
}

impl<In, Out, F> StageOps<In, Out> for MapOp<F>
where
    F: Fn(In) -> Out + Send + Sync + 'static,
    Out: 'static,
{
    fn op_flags(&self) -> Flags {
        Flags::NOT_SORTED | Flags::NOT_DISTINCT
    }

    fn wrap_sink<'a>(
        &self,
        _flags: Flags,
        downstream: Box<dyn Sink<Out> + 'a>,
    ) -> Box<dyn Sink<In> + 'a> {
        Box::new(MapSink {
            f: self.0.clone(),
            downstream,
        })
    }
}

/// Keeps the elements matching a predicate.
pub(crate) struct FilterOp<F>(Arc<F>);

impl<F> FilterOp<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

struct FilterSink<'a, F, T> {
    predicate: Arc<F>,
    downstream: Box<dyn Sink<T> + 'a>,
}

impl<T, F> Sink<T> for FilterSink<'_, F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn begin(&mut self, _size: Option<usize>) {
        self.downstream.begin(None)
    }

    fn accept(&mut self, value: T) {
        if (self.predicate)(&value) {
            self.downstream.accept(value)
        }
    }

    fn end(&mut self) {
        self.downstream.end()
    }

    fn cancellation_requested(&self) -> bool {
        self.downstream.cancellation_requested()
    }
}

impl<T, F> StageOps<T, T> for FilterOp<F>
where
    F: Fn(&T) -> bool + Send + Sync + 'static,
    T: 'static,
{
    fn op_flags(&self) -> Flags {
        Flags::NOT_SIZED
    }

    fn wrap_sink<'a>(&self, _flags: Flags, downstream: Box<dyn Sink<T> + 'a>) -> Box<dyn Sink<T> + 'a> {
        Box::new(FilterSink {
            predicate: self.0.clone(),
            downstream,
        })
    }
}

/// Replaces each element by the elements of an iterable.
pub(crate) struct FlatMapOp<F>(Arc<F>);

impl<F> FlatMapOp<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

struct FlatMapSink<'a, F, Out> {
    f: Arc<F>,
    downstream: Box<dyn Sink<Out> + 'a>,
}

impl<In, Out, I, F> Sink<In> for FlatMapSink<'_, F, Out>
where
    F: Fn(In) -> I + Send + Sync,
    I: IntoIterator<Item = Out>,
{
    fn begin(&mut self, _size: Option<usize>) {
        self.downstream.begin(None)
    }

    fn accept(&mut self, value: In) {
        for x in (self.f)(value) {
            if self.downstream.cancellation_requested() {
                break;
            }
            self.downstream.accept(x);
        }
    }

    fn end(&mut self) {
        self.downstream.end()
    }

    fn cancellation_requested(&self) -> bool {
        self.downstream.cancellation_requested()
    }
}

impl<In, Out, I, F> StageOps<In, Out> for FlatMapOp<F>
where
    F: Fn(In) -> I + Send + Sync + 'static,
    Out: 'static,
    I: IntoIterator<Item = Out>,
{
    fn op_flags(&self) -> Flags {
        Flags::NOT_SORTED | Flags::NOT_DISTINCT | Flags::NOT_SIZED
    }

    fn wrap_sink<'a>(
        &self,
        _flags: Flags,
        downstream: Box<dyn Sink<Out> + 'a>,
    ) -> Box<dyn Sink<In> + 'a> {
        Box::new(FlatMapSink {
            f: self.0.clone(),
            downstream,
        })
    }
}

/// Calls a function on each element as it passes through.
pub(crate) struct PeekOp<F>(Arc<F>);

impl<F> PeekOp<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

struct PeekSink<'a, F, T> {
    f: Arc<F>,
    downstream: Box<dyn Sink<T> + 'a>,
}

impl<T, F> Sink<T> for PeekSink<'_, F, T>
where
    F: Fn(&T) + Send + Sync,
{
    fn begin(&mut self, size: Option<usize>) {
        self.downstream.begin(size)
    }

    fn accept(&mut self, value: T) {
        (self.f)(&value);
        self.downstream.accept(value)
    }

    fn end(&mut self) {
        self.downstream.end()
    }

    fn cancellation_requested(&self) -> bool {
        self.downstream.cancellation_requested()
    }
}

impl<T, F> StageOps<T, T> for PeekOp<F>
where
    F: Fn(&T) + Send + Sync + 'static,
    T: 'static,
{
    fn op_flags(&self) -> Flags {
        Flags::NONE
    }

    fn wrap_sink<'a>(&self, _flags: Flags, downstream: Box<dyn Sink<T> + 'a>) -> Box<dyn Sink<T> + 'a> {
        Box::new(PeekSink {
            f: self.0.clone(),
            downstream,
        })
    }
}

/// Drops the encounter order constraint.
pub(crate) struct UnorderedOp;

impl<T> StageOps<T, T> for UnorderedOp {
    fn op_flags(&self) -> Flags {
        Flags::NOT_ORDERED
    }

    fn wrap_sink<'a>(&self, _flags: Flags, downstream: Box<dyn Sink<T> + 'a>) -> Box<dyn Sink<T> + 'a> {
        downstream
    }
}
