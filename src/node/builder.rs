// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::{allocate, ArrayNode, NodeRef, SpinedBuffer};
use crate::error::{PipelineError, Result};
use crate::sink::Sink;
use crate::Element;
use std::sync::Arc;

/// Phase of a [`NodeBuilder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuilderState {
    /// Created, [`begin()`](NodeBuilder::begin) not called yet.
    Idle,
    /// Between [`begin()`](NodeBuilder::begin) and
    /// [`end()`](NodeBuilder::end).
    Building,
    /// [`end()`](NodeBuilder::end) was called, the node can be built.
    Built,
}

/// Accumulates elements into a [`Node`](super::Node).
///
/// A builder goes through exactly one `begin`, `accept`..., `end` cycle
/// before [`build()`](Self::build). Calls out of this sequence return a
/// [`BuilderState`](PipelineError::BuilderState) error.
pub trait NodeBuilder<T>: Send {
    /// Returns the current phase of this builder.
    fn state(&self) -> BuilderState;

    /// Starts building, with the exact number of elements to expect if known.
    fn begin(&mut self, size: Option<usize>) -> Result<()>;

    /// Adds an element.
    fn accept(&mut self, value: T) -> Result<()>;

    /// Finishes building.
    fn end(&mut self) -> Result<()>;

    /// Returns the built node.
    fn build(self: Box<Self>) -> Result<NodeRef<T>>;
}

/// A builder of a fixed number of elements, declared upfront.
pub struct FixedNodeBuilder<T> {
    array: Vec<T>,
    capacity: usize,
    state: BuilderState,
}

impl<T> FixedNodeBuilder<T> {
    /// Creates a builder for exactly `capacity` elements, allocating them
    /// upfront.
    ///
    /// Returns a [`CapacityOverflow`](PipelineError::CapacityOverflow) error
    /// if the allocation fails.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            array: allocate(capacity)?,
            capacity,
            state: BuilderState::Idle,
        })
    }

    fn check_state(&self, expected: BuilderState, call: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PipelineError::builder_state(format!(
                "{call} called in the {:?} state",
                self.state
            )))
        }
    }

    fn check_filled(&self, call: &str) -> Result<()> {
        if self.array.len() < self.capacity {
            Err(PipelineError::builder_state(format!(
                "{call} called after {} elements, fewer than the declared size {}",
                self.array.len(),
                self.capacity
            )))
        } else {
            Ok(())
        }
    }
}

impl<T: Element> NodeBuilder<T> for FixedNodeBuilder<T> {
    fn state(&self) -> BuilderState {
        self.state
    }

    fn begin(&mut self, size: Option<usize>) -> Result<()> {
        self.check_state(BuilderState::Idle, "begin()")?;
        if size != Some(self.capacity) {
            return Err(PipelineError::builder_state(format!(
                "begin() called with size {size:?} on a builder of size {}",
                self.capacity
            )));
        }
        self.state = BuilderState::Building;
        Ok(())
    }

    fn accept(&mut self, value: T) -> Result<()> {
        self.check_state(BuilderState::Building, "accept()")?;
        if self.array.len() >= self.capacity {
            return Err(PipelineError::builder_state(format!(
                "accept() called beyond the declared size {}",
                self.capacity
            )));
        }
        self.array.push(value);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.check_state(BuilderState::Building, "end()")?;
        self.check_filled("end()")?;
        self.state = BuilderState::Built;
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NodeRef<T>> {
        self.check_filled("build()")?;
        self.check_state(BuilderState::Built, "build()")?;
        Ok(Arc::new(ArrayNode::new(self.array)))
    }
}

/// Returns a builder suited to the given exact size: a fixed-size builder if
/// the size is known, a [`SpinedBuffer`] otherwise.
///
/// Fails with a [`CapacityOverflow`](PipelineError::CapacityOverflow) error if
/// the known size can't be allocated.
pub fn make_node_builder<T: Element>(
    exact_size: Option<usize>,
) -> Result<Box<dyn NodeBuilder<T>>> {
    Ok(match exact_size {
        Some(size) => Box::new(FixedNodeBuilder::new(size)?),
        None => Box::new(SpinedBuffer::new()),
    })
}

/// Adapts a [`NodeBuilder`] into a [`Sink`]. The first builder error is
/// latched and returned by [`into_node()`](Self::into_node).
pub(crate) struct BuilderSink<T> {
    builder: Box<dyn NodeBuilder<T>>,
    error: Option<PipelineError>,
}

impl<T: Element> BuilderSink<T> {
    pub(crate) fn new(builder: Box<dyn NodeBuilder<T>>) -> Self {
        Self {
            builder,
            error: None,
        }
    }

    pub(crate) fn with_exact_size(exact_size: Option<usize>) -> Result<Self> {
        Ok(Self::new(make_node_builder(exact_size)?))
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }

    pub(crate) fn into_node(self) -> Result<NodeRef<T>> {
        match self.error {
            Some(e) => Err(e),
            None => self.builder.build(),
        }
    }
}

impl<T: Element> Sink<T> for BuilderSink<T> {
    fn begin(&mut self, size: Option<usize>) {
        let result = self.builder.begin(size);
        self.record(result);
    }

    fn accept(&mut self, value: T) {
        if self.error.is_none() {
            let result = self.builder.accept(value);
            self.record(result);
        }
    }

    fn end(&mut self) {
        if self.error.is_none() {
            let result = self.builder.end();
            self.record(result);
        }
    }

    fn cancellation_requested(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fixed_builder() {
        let mut builder = Box::new(FixedNodeBuilder::new(3).unwrap());
        assert_eq!(builder.state(), BuilderState::Idle);
        builder.begin(Some(3)).unwrap();
        for i in 0..3 {
            builder.accept(i).unwrap();
        }
        builder.end().unwrap();
        assert_eq!(builder.build().unwrap().to_vec(), [0, 1, 2]);
    }

    #[test]
    fn test_fixed_builder_overflow() {
        let mut builder = Box::new(FixedNodeBuilder::new(3).unwrap());
        builder.begin(Some(3)).unwrap();
        for i in 0..3 {
            builder.accept(i).unwrap();
        }
        assert!(matches!(
            builder.accept(3),
            Err(PipelineError::BuilderState { .. })
        ));
    }

    #[test]
    fn test_fixed_builder_underfill() {
        let mut builder = Box::new(FixedNodeBuilder::new(3).unwrap());
        builder.begin(Some(3)).unwrap();
        builder.accept(0).unwrap();
        builder.accept(1).unwrap();
        assert!(matches!(
            builder.end(),
            Err(PipelineError::BuilderState { .. })
        ));
        assert!(matches!(
            builder.build(),
            Err(PipelineError::BuilderState { .. })
        ));
    }

    #[test]
    fn test_fixed_builder_sequence() {
        let mut builder = Box::new(FixedNodeBuilder::<i32>::new(2).unwrap());
        assert!(matches!(
            builder.accept(0),
            Err(PipelineError::BuilderState { .. })
        ));
        assert!(matches!(
            builder.begin(Some(3)),
            Err(PipelineError::BuilderState { .. })
        ));
        builder.begin(Some(2)).unwrap();
        assert!(matches!(
            builder.begin(Some(2)),
            Err(PipelineError::BuilderState { .. })
        ));
    }

    #[test]
    fn test_fixed_builder_capacity_overflow() {
        assert!(matches!(
            FixedNodeBuilder::<u64>::new(usize::MAX),
            Err(PipelineError::CapacityOverflow { .. })
        ));
    }

    #[test]
    fn test_fixed_builder_allocation_failure() {
        // Below the addressable limit, but far beyond what can be allocated.
        assert!(matches!(
            FixedNodeBuilder::<u64>::new(1 << 55),
            Err(PipelineError::CapacityOverflow { .. })
        ));
        assert!(matches!(
            make_node_builder::<u64>(Some(1 << 55)),
            Err(PipelineError::CapacityOverflow { .. })
        ));
        assert!(matches!(
            make_node_builder::<u64>(Some(usize::MAX)),
            Err(PipelineError::CapacityOverflow { .. })
        ));
    }

    #[test]
    fn test_make_node_builder() {
        let mut builder = make_node_builder::<i32>(Some(2)).unwrap();
        builder.begin(Some(2)).unwrap();
        builder.accept(1).unwrap();
        builder.accept(2).unwrap();
        assert!(builder.accept(3).is_err());

        let mut builder = make_node_builder::<i32>(None).unwrap();
        builder.begin(None).unwrap();
        for i in 0..100 {
            builder.accept(i).unwrap();
        }
        builder.end().unwrap();
        assert_eq!(builder.build().unwrap().count(), 100);
    }

    #[test]
    fn test_builder_sink_latches_error() {
        let mut sink = BuilderSink::with_exact_size(Some(1)).unwrap();
        sink.begin(Some(1));
        sink.accept(1);
        assert!(!sink.cancellation_requested());
        sink.accept(2);
        assert!(sink.cancellation_requested());
        sink.end();
        assert!(matches!(
            sink.into_node(),
            Err(PipelineError::BuilderState { .. })
        ));
    }
}
