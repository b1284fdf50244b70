// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::{ArrayNode, BuilderState, Node, NodeBuilder, NodeRef};
use crate::error::{PipelineError, Result};
use crate::flags::Characteristics;
use crate::source::Spliterator;
use crate::Element;
use std::sync::Arc;

/// Log2 of the capacity of the first chunk.
const MIN_CHUNK_POWER: usize = 4;
/// Log2 of the maximum capacity of a chunk.
const MAX_CHUNK_POWER: usize = 30;

/// Capacity of the chunk at the given index: 16, 16, 32, 64, etc.
fn chunk_capacity(index: usize) -> usize {
    let power = if index == 0 {
        MIN_CHUNK_POWER
    } else {
        (MIN_CHUNK_POWER + index - 1).min(MAX_CHUNK_POWER)
    };
    1 << power
}

/// A growable buffer made of chunks of increasing sizes, so that appending
/// never moves the elements already pushed.
///
/// A spined buffer is both a [`NodeBuilder`] of unknown size and the [`Node`]
/// it builds.
pub struct SpinedBuffer<T> {
    chunks: Vec<Vec<T>>,
    /// Number of elements in all the chunks before each chunk.
    prior_counts: Vec<usize>,
    count: usize,
    state: BuilderState,
}

impl<T> Default for SpinedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SpinedBuffer<T> {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            prior_counts: Vec::new(),
            count: 0,
            state: BuilderState::Idle,
        }
    }

    /// Returns the number of elements in the buffer.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the buffer contains no elements.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends an element.
    pub fn push(&mut self, value: T) {
        let full = match self.chunks.last() {
            None => true,
            Some(chunk) => chunk.len() == chunk_capacity(self.chunks.len() - 1),
        };
        if full {
            self.prior_counts.push(self.count);
            self.chunks
                .push(Vec::with_capacity(chunk_capacity(self.chunks.len())));
        }
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.push(value);
        }
        self.count += 1;
    }

    /// Returns the chunk index and offset of the element at the given index,
    /// which must be in bounds.
    fn locate(&self, index: usize) -> (usize, usize) {
        let chunk = self.prior_counts.partition_point(|&prior| prior <= index) - 1;
        (chunk, index - self.prior_counts[chunk])
    }

    /// Returns the element at the given index, if any.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.count {
            return None;
        }
        let (chunk, offset) = self.locate(index);
        self.chunks[chunk].get(offset)
    }

    /// Iterates over the elements in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.chunks.iter().flatten()
    }

    /// Removes all the elements.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.prior_counts.clear();
        self.count = 0;
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl<T: Element> Node<T> for SpinedBuffer<T> {
    fn count(&self) -> usize {
        self.count
    }

    fn spliterator(self: Arc<Self>) -> Box<dyn Spliterator<T>> {
        let fence = self.count;
        Box::new(SpinedSpliterator {
            buffer: self,
            index: 0,
            fence,
        })
    }

    fn for_each(&self, action: &mut dyn FnMut(T)) {
        for x in self.iter() {
            action(x.clone());
        }
    }

    fn copy_into(&self, output: &mut Vec<T>) {
        output.reserve(self.count);
        for chunk in &self.chunks {
            output.extend_from_slice(chunk);
        }
    }

    fn truncate(self: Arc<Self>, from: usize, to: usize) -> NodeRef<T> {
        debug_assert!(from <= to && to <= self.count);
        if from == 0 && to == self.count {
            return self;
        }
        let array = self.iter().skip(from).take(to - from).cloned().collect();
        Arc::new(ArrayNode::new(array))
    }
}

impl<T: Element> NodeBuilder<T> for SpinedBuffer<T> {
    fn state(&self) -> BuilderState {
        self.state
    }

    fn begin(&mut self, _size: Option<usize>) -> Result<()> {
        if self.state != BuilderState::Idle {
            return Err(PipelineError::builder_state(format!(
                "begin() called in the {:?} state",
                self.state
            )));
        }
        self.clear();
        self.state = BuilderState::Building;
        Ok(())
    }

    fn accept(&mut self, value: T) -> Result<()> {
        if self.state != BuilderState::Building {
            return Err(PipelineError::builder_state(format!(
                "accept() called in the {:?} state",
                self.state
            )));
        }
        self.push(value);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if self.state != BuilderState::Building {
            return Err(PipelineError::builder_state(format!(
                "end() called in the {:?} state",
                self.state
            )));
        }
        self.state = BuilderState::Built;
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NodeRef<T>> {
        if self.state != BuilderState::Built {
            return Err(PipelineError::builder_state(format!(
                "build() called in the {:?} state",
                self.state
            )));
        }
        Ok(Arc::new(*self))
    }
}

/// A spliterator over a shared spined buffer, restricted to the index range
/// `[index, fence)`.
struct SpinedSpliterator<T> {
    buffer: Arc<SpinedBuffer<T>>,
    index: usize,
    fence: usize,
}

impl<T: Element> Spliterator<T> for SpinedSpliterator<T> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        if self.index >= self.fence {
            return false;
        }
        match self.buffer.get(self.index) {
            Some(x) => {
                action(x.clone());
                self.index += 1;
                true
            }
            None => false,
        }
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        if self.index >= self.fence {
            return;
        }
        let (mut chunk, mut offset) = self.buffer.locate(self.index);
        while self.index < self.fence {
            let elements = &self.buffer.chunks[chunk];
            let take = (elements.len() - offset).min(self.fence - self.index);
            for x in &elements[offset..offset + take] {
                action(x.clone());
            }
            self.index += take;
            chunk += 1;
            offset = 0;
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        let lo = self.index;
        let mid = lo + (self.fence - lo) / 2;
        if lo >= mid {
            return None;
        }
        self.index = mid;
        Some(Box::new(SpinedSpliterator {
            buffer: self.buffer.clone(),
            index: lo,
            fence: mid,
        }))
    }

    fn estimate_size(&self) -> usize {
        self.fence - self.index
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::ORDERED | Characteristics::SIZED | Characteristics::SUBSIZED
    }
}
