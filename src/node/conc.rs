// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::{conc, Node, NodeRef};
use crate::source::{ConcatSpliterator, Spliterator};
use crate::Element;
use std::sync::Arc;

/// The concatenation of two nodes.
pub struct ConcNode<T> {
    left: NodeRef<T>,
    right: NodeRef<T>,
    count: usize,
}

impl<T> ConcNode<T> {
    /// Creates the concatenation of `left` then `right`. Prefer
    /// [`conc()`](super::conc) which omits empty sides.
    pub fn new(left: NodeRef<T>, right: NodeRef<T>) -> Self {
        let count = left.count() + right.count();
        Self { left, right, count }
    }
}

impl<T: Element> Node<T> for ConcNode<T> {
    fn count(&self) -> usize {
        self.count
    }

    fn spliterator(self: Arc<Self>) -> Box<dyn Spliterator<T>> {
        Box::new(ConcatSpliterator::new(
            self.left.clone().spliterator(),
            self.right.clone().spliterator(),
        ))
    }

    fn for_each(&self, action: &mut dyn FnMut(T)) {
        self.left.for_each(action);
        self.right.for_each(action);
    }

    fn copy_into(&self, output: &mut Vec<T>) {
        self.left.copy_into(output);
        self.right.copy_into(output);
    }

    fn child_count(&self) -> usize {
        2
    }

    fn child(&self, index: usize) -> Option<NodeRef<T>> {
        match index {
            0 => Some(self.left.clone()),
            1 => Some(self.right.clone()),
            _ => None,
        }
    }

    fn truncate(self: Arc<Self>, from: usize, to: usize) -> NodeRef<T> {
        debug_assert!(from <= to && to <= self.count);
        if from == 0 && to == self.count {
            return self;
        }
        let left_count = self.left.count();
        // On a cut exactly at the boundary, the right child wins.
        if from >= left_count {
            self.right.clone().truncate(from - left_count, to - left_count)
        } else if to <= left_count {
            self.left.clone().truncate(from, to)
        } else {
            conc(
                self.left.clone().truncate(from, left_count),
                self.right.clone().truncate(0, to - left_count),
            )
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::ArrayNode;

    #[test]
    fn test_truncate_spanning() {
        let left: NodeRef<i32> = Arc::new(ArrayNode::new(vec![0, 1, 2]));
        let right: NodeRef<i32> = Arc::new(ArrayNode::new(vec![3, 4, 5]));
        let node: NodeRef<i32> = Arc::new(ConcNode::new(left.clone(), right.clone()));
        assert_eq!(node.count(), 6);

        let spanning = node.clone().truncate(1, 5);
        assert_eq!(spanning.child_count(), 2);
        assert_eq!(spanning.to_vec(), [1, 2, 3, 4]);

        let left_only = node.clone().truncate(0, 3);
        assert!(Arc::ptr_eq(&left_only, &left));
        let right_only = node.truncate(3, 6);
        assert!(Arc::ptr_eq(&right_only, &right));
    }
}
