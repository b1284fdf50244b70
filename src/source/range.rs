// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::Spliterator;
use crate::flags::Characteristics;

/// An integer type that can be used as the element type of a
/// [`RangeSpliterator`].
pub trait RangeElement: Copy + Ord + Send + Sync + 'static {
    /// Returns the number of elements in `start..end`, saturated to
    /// [`usize::MAX`].
    fn distance(start: Self, end: Self) -> usize;

    /// Returns `start + n`. The result is assumed to be in range.
    fn add_usize(start: Self, n: usize) -> Self;
}

macro_rules! range_element_impls {
    ( $($t:ty),* ) => {
        $(
        impl RangeElement for $t {
            fn distance(start: Self, end: Self) -> usize {
                if start >= end {
                    0
                } else {
                    usize::try_from(end as i128 - start as i128).unwrap_or(usize::MAX)
                }
            }

            fn add_usize(start: Self, n: usize) -> Self {
                (start as i128 + n as i128) as $t
            }
        }
        )*
    };
}

range_element_impls!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

/// A spliterator over a half-open range of integers.
pub struct RangeSpliterator<T> {
    from: T,
    upto: T,
}

impl<T: RangeElement> RangeSpliterator<T> {
    /// Creates a spliterator over `from..upto`.
    pub fn new(from: T, upto: T) -> Self {
        Self {
            from,
            upto: upto.max(from),
        }
    }
}

impl<T: RangeElement> Spliterator<T> for RangeSpliterator<T> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        if self.from < self.upto {
            let value = self.from;
            self.from = T::add_usize(value, 1);
            action(value);
            true
        } else {
            false
        }
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        let mut value = self.from;
        self.from = self.upto;
        while value < self.upto {
            action(value);
            value = T::add_usize(value, 1);
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        let size = T::distance(self.from, self.upto);
        if size < 2 {
            return None;
        }
        let lo = self.from;
        let mid = T::add_usize(lo, size / 2);
        self.from = mid;
        Some(Box::new(RangeSpliterator { from: lo, upto: mid }))
    }

    fn estimate_size(&self) -> usize {
        T::distance(self.from, self.upto)
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::ORDERED
            | Characteristics::SIZED
            | Characteristics::SUBSIZED
            | Characteristics::IMMUTABLE
            | Characteristics::DISTINCT
            | Characteristics::SORTED
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::test_util::{drain, split_all};

    #[test]
    fn test_distance() {
        assert_eq!(i32::distance(-5, 5), 10);
        assert_eq!(i32::distance(5, -5), 0);
        assert_eq!(u8::distance(0, 255), 255);
        assert_eq!(i64::distance(i64::MIN, i64::MAX), usize::MAX);
        assert_eq!(u64::add_usize(10, 5), 15);
    }

    #[test]
    fn test_traversal() {
        let mut spliterator = RangeSpliterator::new(3u32, 7);
        assert_eq!(spliterator.exact_size_if_known(), Some(4));
        let mut first = None;
        assert!(spliterator.try_advance(&mut |x| first = Some(x)));
        assert_eq!(first, Some(3));
        assert_eq!(drain(&mut spliterator), [4, 5, 6]);
        assert!(!spliterator.try_advance(&mut |_| unreachable!()));
    }

    #[test]
    fn test_empty_range() {
        let mut spliterator = RangeSpliterator::new(7i64, 3);
        assert_eq!(spliterator.estimate_size(), 0);
        assert!(spliterator.try_split().is_none());
        assert!(drain(&mut spliterator).is_empty());
    }

    #[test]
    fn test_split() {
        let mut spliterator = RangeSpliterator::new(0usize, 10);
        let mut prefix = spliterator.try_split().unwrap();
        assert_eq!(drain(prefix.as_mut()), [0, 1, 2, 3, 4]);
        assert_eq!(drain(&mut spliterator), [5, 6, 7, 8, 9]);

        let spliterator = Box::new(RangeSpliterator::new(-500i32, 500));
        assert_eq!(split_all(spliterator, 30), (-500..500).collect::<Vec<_>>());
    }
}
