// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Materialized results of (parts of) a pipeline.
//!
//! A [`Node`] is an immutable snapshot of elements. Parallel evaluations build
//! one node per leaf task and concatenate them up the task tree into a binary
//! tree of [`ConcNode`]s, which is flattened only when a contiguous array is
//! needed.

mod array;
mod builder;
mod conc;
mod spined;

pub use array::ArrayNode;
pub use builder::{make_node_builder, BuilderState, FixedNodeBuilder, NodeBuilder};
pub(crate) use builder::BuilderSink;
pub use conc::ConcNode;
pub use spined::SpinedBuffer;

use crate::error::{PipelineError, Result};
use crate::source::Spliterator;
use crate::Element;
use std::sync::Arc;

/// Shared reference to a node.
pub type NodeRef<T> = Arc<dyn Node<T>>;

/// An immutable sequence of elements, possibly a tree of sub-nodes.
pub trait Node<T>: Send + Sync {
    /// Returns the number of elements in this node.
    fn count(&self) -> usize;

    /// Returns a spliterator over the elements of this node. The spliterator
    /// is [`ORDERED`](crate::Characteristics::ORDERED),
    /// [`SIZED`](crate::Characteristics::SIZED) and
    /// [`SUBSIZED`](crate::Characteristics::SUBSIZED).
    fn spliterator(self: Arc<Self>) -> Box<dyn Spliterator<T>>;

    /// Calls the given action on each element, in order.
    fn for_each(&self, action: &mut dyn FnMut(T));

    /// Appends all the elements to the given vector, in order.
    fn copy_into(&self, output: &mut Vec<T>) {
        self.for_each(&mut |x| output.push(x))
    }

    /// Returns the number of children of this node, 0 for a leaf node.
    fn child_count(&self) -> usize {
        0
    }

    /// Returns the child at the given index, if any.
    fn child(&self, _index: usize) -> Option<NodeRef<T>> {
        None
    }

    /// Returns a node restricted to the `[from, to)` range of this node.
    ///
    /// Callers must ensure that `from <= to <= self.count()`; see [`truncate`]
    /// for a checked version.
    fn truncate(self: Arc<Self>, from: usize, to: usize) -> NodeRef<T>;

    /// Copies the elements into a new vector.
    fn to_vec(&self) -> Vec<T> {
        let mut output = Vec::with_capacity(self.count());
        self.copy_into(&mut output);
        output
    }

    /// Converts this node into a vector, avoiding a copy when possible.
    fn into_vec(self: Arc<Self>) -> Vec<T> {
        self.to_vec()
    }
}

/// Returns a node restricted to the `[from, to)` range of the given node,
/// sharing as much of the underlying storage as possible.
pub fn truncate<T>(node: NodeRef<T>, from: usize, to: usize) -> Result<NodeRef<T>> {
    let count = node.count();
    if from > to || to > count {
        return Err(PipelineError::invalid_argument(format!(
            "range {from}..{to} is out of bounds for a node of {count} elements"
        )));
    }
    Ok(node.truncate(from, to))
}

/// Returns an empty node.
pub fn empty<T: Element>() -> NodeRef<T> {
    Arc::new(ArrayNode::new(Vec::new()))
}

/// Returns the concatenation of two nodes, omitting empty sides.
pub fn conc<T: Element>(left: NodeRef<T>, right: NodeRef<T>) -> NodeRef<T> {
    if left.count() == 0 {
        right
    } else if right.count() == 0 {
        left
    } else {
        Arc::new(ConcNode::new(left, right))
    }
}

/// Copies a tree of nodes into a single array node. Leaf nodes are returned
/// as is.
pub fn flatten<T: Element>(node: NodeRef<T>) -> Result<NodeRef<T>> {
    if node.child_count() == 0 {
        return Ok(node);
    }
    let count = node.count();
    let mut array = allocate(count)?;
    node.copy_into(&mut array);
    Ok(Arc::new(ArrayNode::new(array)))
}

/// Maximum number of elements of type `T` that a node can hold.
pub(crate) const fn max_capacity<T>() -> usize {
    let size = std::mem::size_of::<T>();
    isize::MAX as usize / if size == 0 { 1 } else { size }
}

/// Allocates an empty vector able to hold `requested` elements. Fails instead
/// of aborting if the allocator can't provide that much memory.
pub(crate) fn allocate<T>(requested: usize) -> Result<Vec<T>> {
    check_capacity::<T>(requested)?;
    let mut array = Vec::new();
    array
        .try_reserve_exact(requested)
        .map_err(|_| PipelineError::CapacityOverflow {
            requested,
            max: max_capacity::<T>(),
        })?;
    Ok(array)
}

/// Checks that the given number of elements can be materialized.
pub(crate) fn check_capacity<T>(requested: usize) -> Result<()> {
    let max = max_capacity::<T>();
    if requested >= max {
        Err(PipelineError::CapacityOverflow { requested, max })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::test_util::split_all;

    fn array(range: std::ops::Range<i32>) -> NodeRef<i32> {
        Arc::new(ArrayNode::new(range.collect()))
    }

    fn tree() -> NodeRef<i32> {
        conc(conc(array(0..3), array(3..7)), conc(array(7..8), array(8..12)))
    }

    #[test]
    fn test_conc_count() {
        let node = tree();
        assert_eq!(node.count(), 12);
        assert_eq!(node.child_count(), 2);
        assert_eq!(node.child(0).unwrap().count(), 7);
        assert_eq!(node.child(1).unwrap().count(), 5);
        assert!(node.child(2).is_none());
        assert_eq!(node.to_vec(), (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_conc_elides_empty() {
        let node = conc(array(0..0), array(0..3));
        assert_eq!(node.child_count(), 0);
        let node = conc(array(0..3), empty());
        assert_eq!(node.child_count(), 0);
        assert_eq!(node.to_vec(), [0, 1, 2]);
    }

    #[test]
    fn test_truncate_all_ranges() {
        let node = tree();
        for from in 0..=12 {
            for to in from..=12 {
                let truncated = truncate(node.clone(), from, to).unwrap();
                assert_eq!(truncated.count(), to - from);
                assert_eq!(
                    truncated.to_vec(),
                    (from as i32..to as i32).collect::<Vec<_>>()
                );
            }
        }
    }

    #[test]
    fn test_truncate_reuses_subtrees() {
        let node = tree();
        let whole = truncate(node.clone(), 0, 12).unwrap();
        assert!(Arc::ptr_eq(&whole, &node));

        let right = node.child(1).unwrap();
        let truncated = truncate(node.clone(), 7, 12).unwrap();
        assert!(Arc::ptr_eq(&truncated, &right));

        // A cut on the boundary between the children picks the right child.
        let empty_right = truncate(node.clone(), 7, 7).unwrap();
        assert_eq!(empty_right.count(), 0);
    }

    #[test]
    fn test_truncate_out_of_bounds() {
        let node = tree();
        assert!(matches!(
            truncate(node.clone(), 5, 13),
            Err(PipelineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            truncate(node, 6, 5),
            Err(PipelineError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_flatten() {
        let flat = flatten(tree()).unwrap();
        assert_eq!(flat.child_count(), 0);
        assert_eq!(flat.into_vec(), (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_spliterator() {
        let node = tree();
        assert_eq!(
            split_all(node.spliterator(), 8),
            (0..12).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_capacity() {
        assert!(check_capacity::<u64>(1000).is_ok());
        assert!(matches!(
            check_capacity::<u64>(usize::MAX / 2),
            Err(PipelineError::CapacityOverflow { .. })
        ));
        assert_eq!(max_capacity::<()>(), isize::MAX as usize);
    }
}
