// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::{Node, NodeRef};
use crate::flags::Characteristics;
use crate::source::{ArraySpliterator, Spliterator};
use crate::Element;
use std::sync::Arc;

/// A node backed by a window of a shared vector. Truncating an array node
/// shares the vector rather than copying it.
pub struct ArrayNode<T> {
    array: Arc<Vec<T>>,
    from: usize,
    to: usize,
}

impl<T> ArrayNode<T> {
    /// Creates a node over all the elements of the given vector.
    pub fn new(array: Vec<T>) -> Self {
        let to = array.len();
        Self {
            array: Arc::new(array),
            from: 0,
            to,
        }
    }

    /// Returns the elements of this node as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.array[self.from..self.to]
    }
}

impl<T: Element> Node<T> for ArrayNode<T> {
    fn count(&self) -> usize {
        self.to - self.from
    }

    fn spliterator(self: Arc<Self>) -> Box<dyn Spliterator<T>> {
        Box::new(ArraySpliterator::with_range(
            self.array.clone(),
            self.from,
            self.to,
            Characteristics::ORDERED | Characteristics::IMMUTABLE,
        ))
    }

    fn for_each(&self, action: &mut dyn FnMut(T)) {
        for x in self.as_slice() {
            action(x.clone());
        }
    }

    fn copy_into(&self, output: &mut Vec<T>) {
        output.extend_from_slice(self.as_slice());
    }

    fn truncate(self: Arc<Self>, from: usize, to: usize) -> NodeRef<T> {
        debug_assert!(from <= to && to <= self.count());
        if from == 0 && to == self.count() {
            return self;
        }
        Arc::new(ArrayNode {
            array: self.array.clone(),
            from: self.from + from,
            to: self.from + to,
        })
    }

    fn into_vec(self: Arc<Self>) -> Vec<T> {
        match Arc::try_unwrap(self) {
            Ok(node) if node.from == 0 && node.to == node.array.len() => {
                Arc::try_unwrap(node.array).unwrap_or_else(|array| array.as_ref().clone())
            }
            Ok(node) => node.as_slice().to_vec(),
            Err(node) => node.as_slice().to_vec(),
        }
    }
}
