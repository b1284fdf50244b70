// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::{Spliterator, UNKNOWN_SIZE};
use crate::flags::Characteristics;

/// A spliterator over the elements of a first spliterator followed by the
/// elements of a second one.
///
/// The first split hands out the first spliterator as a whole, subsequent
/// splits are delegated to the second spliterator.
pub struct ConcatSpliterator<T> {
    first: Option<Box<dyn Spliterator<T>>>,
    second: Box<dyn Spliterator<T>>,
    r#unsized: bool,
}

impl<T> ConcatSpliterator<T> {
    /// Creates a spliterator over `first` then `second`.
    pub fn new(first: Box<dyn Spliterator<T>>, second: Box<dyn Spliterator<T>>) -> Self {
        let r#unsized = first
            .estimate_size()
            .checked_add(second.estimate_size())
            .map_or(true, |size| size == UNKNOWN_SIZE);
        Self {
            first: Some(first),
            second,
            r#unsized,
        }
    }
}

impl<T> Spliterator<T> for ConcatSpliterator<T> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        if let Some(first) = &mut self.first {
            if first.try_advance(action) {
                return true;
            }
            self.first = None;
        }
        self.second.try_advance(action)
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        if let Some(mut first) = self.first.take() {
            first.for_each_remaining(action);
        }
        self.second.for_each_remaining(action);
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        match self.first.take() {
            Some(first) => Some(first),
            None => self.second.try_split(),
        }
    }

    fn estimate_size(&self) -> usize {
        match &self.first {
            Some(first) => first
                .estimate_size()
                .checked_add(self.second.estimate_size())
                .unwrap_or(UNKNOWN_SIZE),
            None => self.second.estimate_size(),
        }
    }

    fn characteristics(&self) -> Characteristics {
        match &self.first {
            Some(first) => {
                let mut dropped = Characteristics::DISTINCT | Characteristics::SORTED;
                if self.r#unsized {
                    dropped |= Characteristics::SIZED | Characteristics::SUBSIZED;
                }
                (first.characteristics() & self.second.characteristics()).without(dropped)
            }
            None => self.second.characteristics(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::test_util::{drain, split_all};
    use crate::source::{ArraySpliterator, GenerateSpliterator, RangeSpliterator};

    #[test]
    fn test_traversal() {
        let mut spliterator = ConcatSpliterator::new(
            Box::new(RangeSpliterator::new(0, 3)),
            Box::new(RangeSpliterator::new(10, 12)),
        );
        assert_eq!(spliterator.exact_size_if_known(), Some(5));
        let mut output = Vec::new();
        for _ in 0..4 {
            assert!(spliterator.try_advance(&mut |x| output.push(x)));
        }
        assert_eq!(output, [0, 1, 2, 10]);
        assert_eq!(drain(&mut spliterator), [11]);
    }

    #[test]
    fn test_characteristics() {
        let spliterator = ConcatSpliterator::new(
            Box::new(RangeSpliterator::new(0, 3)),
            Box::new(ArraySpliterator::new(vec![5, 5], Characteristics::ORDERED)),
        );
        assert_eq!(
            spliterator.characteristics(),
            Characteristics::ORDERED | Characteristics::SIZED | Characteristics::SUBSIZED
        );

        let spliterator = ConcatSpliterator::new(
            Box::new(RangeSpliterator::new(0, 3)),
            Box::new(GenerateSpliterator::new(|| 1)),
        );
        assert!(!spliterator.has_characteristics(Characteristics::SIZED));
        assert_eq!(spliterator.estimate_size(), UNKNOWN_SIZE);
    }

    #[test]
    fn test_split() {
        let mut spliterator = ConcatSpliterator::new(
            Box::new(RangeSpliterator::new(0, 100)),
            Box::new(RangeSpliterator::new(100, 200)),
        );
        let mut first = spliterator.try_split().unwrap();
        assert_eq!(drain(first.as_mut()), (0..100).collect::<Vec<_>>());
        assert_eq!(spliterator.estimate_size(), 100);

        let spliterator = Box::new(ConcatSpliterator::new(
            Box::new(RangeSpliterator::new(0, 100)),
            Box::new(RangeSpliterator::new(100, 200)),
        ));
        assert_eq!(split_all(spliterator, 20), (0..200).collect::<Vec<_>>());
    }
}
