// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Splittable sources of elements.

mod array;
mod concat;
mod distinct;
mod generate;
mod iter;
mod range;
mod slice;
mod wrapping;

pub use array::ArraySpliterator;
pub use concat::ConcatSpliterator;
pub(crate) use distinct::DistinctSpliterator;
pub use generate::GenerateSpliterator;
pub use iter::IteratorSpliterator;
pub use range::{RangeElement, RangeSpliterator};
pub(crate) use slice::{SliceSpliterator, UnorderedSliceSpliterator};
pub(crate) use wrapping::WrappingSpliterator;

use crate::flags::Characteristics;

/// Sentinel returned by [`Spliterator::estimate_size()`] when the size is
/// unknown or unbounded.
pub const UNKNOWN_SIZE: usize = usize::MAX;

/// A single-pass traversal over a sequence of elements, which can be split into
/// two independently traversable parts.
///
/// A spliterator isn't meant to be traversed by two threads at the same time,
/// but the two parts of a split can be sent to different threads.
pub trait Spliterator<T>: Send {
    /// Pushes the next element to the given action, if any. Returns whether an
    /// element was pushed.
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool;

    /// Pushes all the remaining elements to the given action.
    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        while self.try_advance(action) {}
    }

    /// Attempts to carve off a prefix of the remaining elements into a new
    /// spliterator. On success, the returned spliterator covers the elements
    /// before those that remain in `self`.
    ///
    /// Returns [`None`] if the remaining elements cannot (or should not) be
    /// split further.
    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>>;

    /// Returns an estimate of the number of remaining elements, or
    /// [`UNKNOWN_SIZE`] if the size is unknown or unbounded.
    fn estimate_size(&self) -> usize;

    /// Returns the characteristics of this spliterator.
    fn characteristics(&self) -> Characteristics;

    /// Returns the number of remaining elements if this spliterator is
    /// [`SIZED`](Characteristics::SIZED).
    fn exact_size_if_known(&self) -> Option<usize> {
        if self.has_characteristics(Characteristics::SIZED) {
            Some(self.estimate_size())
        } else {
            None
        }
    }

    /// Returns true if all the given characteristics are set.
    fn has_characteristics(&self, characteristics: Characteristics) -> bool {
        self.characteristics().contains(characteristics)
    }

    /// Returns true if the [`SORTED`](Characteristics::SORTED) characteristic
    /// refers to a custom comparator rather than to the natural order.
    fn has_custom_comparator(&self) -> bool {
        false
    }
}

impl<T> Spliterator<T> for Box<dyn Spliterator<T>> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        (**self).try_advance(action)
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        (**self).for_each_remaining(action)
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        (**self).try_split()
    }

    fn estimate_size(&self) -> usize {
        (**self).estimate_size()
    }

    fn characteristics(&self) -> Characteristics {
        (**self).characteristics()
    }

    fn exact_size_if_known(&self) -> Option<usize> {
        (**self).exact_size_if_known()
    }

    fn has_custom_comparator(&self) -> bool {
        (**self).has_custom_comparator()
    }
}
