// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::Spliterator;
use crate::flags::Characteristics;
use std::sync::Arc;

/// A spliterator over a shared vector, restricted to the index range
/// `[origin, fence)`.
///
/// Splits at the index midpoint, and is always
/// [`SIZED`](Characteristics::SIZED) and
/// [`SUBSIZED`](Characteristics::SUBSIZED). Elements are cloned out of the
/// shared vector.
pub struct ArraySpliterator<T> {
    array: Arc<Vec<T>>,
    index: usize,
    fence: usize,
    characteristics: Characteristics,
}

impl<T> ArraySpliterator<T> {
    /// Creates a spliterator over all the elements of the given vector, with
    /// the given additional characteristics.
    pub fn new(array: Vec<T>, characteristics: Characteristics) -> Self {
        let fence = array.len();
        Self::with_range(Arc::new(array), 0, fence, characteristics)
    }

    /// Creates a spliterator over the `[origin, fence)` range of the given
    /// shared vector.
    ///
    /// # Panics
    ///
    /// Panics if the range isn't included in the vector.
    pub fn with_range(
        array: Arc<Vec<T>>,
        origin: usize,
        fence: usize,
        characteristics: Characteristics,
    ) -> Self {
        assert!(
            origin <= fence && fence <= array.len(),
            "Invalid range {origin}..{fence} for an array of length {}",
            array.len()
        );
        Self {
            array,
            index: origin,
            fence,
            characteristics: characteristics | Characteristics::SIZED | Characteristics::SUBSIZED,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Spliterator<T> for ArraySpliterator<T> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        if self.index < self.fence {
            action(self.array[self.index].clone());
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        let range = self.index..self.fence;
        self.index = self.fence;
        for x in &self.array[range] {
            action(x.clone());
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        let lo = self.index;
        let mid = lo + (self.fence - lo) / 2;
        if lo >= mid {
            return None;
        }
        self.index = mid;
        Some(Box::new(ArraySpliterator {
            array: self.array.clone(),
            index: lo,
            fence: mid,
            characteristics: self.characteristics,
        }))
    }

    fn estimate_size(&self) -> usize {
        self.fence - self.index
    }

    fn characteristics(&self) -> Characteristics {
        self.characteristics
    }
}
