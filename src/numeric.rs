// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Numeric element types, and their sums and statistics.

use crate::ops::reduce::Reducer;
use crate::sink::Sink;
use crate::Element;
use std::fmt;

/// Running sum of numeric elements.
///
/// Integers are summed exactly in 128 bits and wrapped to the element type at
/// the end. Floating-point numbers are summed with Kahan compensation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NumericSum {
    integer: i128,
    float: f64,
    compensation: f64,
    /// Naive sum, returned when the compensated sum is NaN because of
    /// infinite inputs.
    simple: f64,
}

impl NumericSum {
    fn add_integer(&mut self, value: i128) {
        self.integer = self.integer.wrapping_add(value);
    }

    fn add_float(&mut self, value: f64) {
        self.simple += value;
        self.add_compensated(value);
    }

    fn add_compensated(&mut self, value: f64) {
        let corrected = value - self.compensation;
        let sum = self.float + corrected;
        self.compensation = (sum - self.float) - corrected;
        self.float = sum;
    }

    fn merge(&mut self, other: &NumericSum) {
        self.integer = self.integer.wrapping_add(other.integer);
        self.simple += other.simple;
        self.add_compensated(other.float);
        self.add_compensated(-other.compensation);
    }

    fn integer(&self) -> i128 {
        self.integer
    }

    fn float(&self) -> f64 {
        let sum = self.float - self.compensation;
        if sum.is_nan() && self.simple.is_infinite() {
            self.simple
        } else {
            sum
        }
    }
}

/// A primitive numeric type, supporting [`Stream::sum()`](crate::Stream::sum),
/// [`Stream::average()`](crate::Stream::average) and
/// [`Stream::summary_statistics()`](crate::Stream::summary_statistics).
pub trait Numeric: Element + PartialOrd + Copy + fmt::Debug {
    /// Adds this value to a running sum.
    fn add_to(self, sum: &mut NumericSum);

    /// Converts a running sum back to this type.
    fn from_sum(sum: &NumericSum) -> Self;

    /// Converts a running sum to a floating-point value.
    fn sum_to_f64(sum: &NumericSum) -> f64;

    /// Converts this value to a floating-point value.
    fn to_f64(self) -> f64;

    /// Returns true if this value is not a number.
    fn is_nan(self) -> bool {
        false
    }
}

macro_rules! numeric_integer {
    ( $( $t:ty ),* ) => {
        $(
            impl Numeric for $t {
                fn add_to(self, sum: &mut NumericSum) {
                    sum.add_integer(self as i128)
                }

                fn from_sum(sum: &NumericSum) -> Self {
                    sum.integer() as $t
                }

                fn sum_to_f64(sum: &NumericSum) -> f64 {
                    sum.integer() as f64
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

macro_rules! numeric_float {
    ( $( $t:ty ),* ) => {
        $(
            impl Numeric for $t {
                fn add_to(self, sum: &mut NumericSum) {
                    sum.add_float(self as f64)
                }

                fn from_sum(sum: &NumericSum) -> Self {
                    sum.float() as $t
                }

                fn sum_to_f64(sum: &NumericSum) -> f64 {
                    sum.float()
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn is_nan(self) -> bool {
                    <$t>::is_nan(self)
                }
            }
        )*
    };
}

numeric_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
numeric_float!(f32, f64);

/// Count, sum, minimum, maximum and average of numeric elements.
#[derive(Clone, Copy)]
pub struct SummaryStatistics<T> {
    count: usize,
    sum: NumericSum,
    min: Option<T>,
    max: Option<T>,
}

impl<T: Numeric> Default for SummaryStatistics<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Numeric> SummaryStatistics<T> {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: NumericSum::default(),
            min: None,
            max: None,
        }
    }

    /// Records a value.
    pub fn accept(&mut self, value: T) {
        self.count += 1;
        value.add_to(&mut self.sum);
        self.min = Some(match self.min {
            Some(min) if min.is_nan() || !(value < min || value.is_nan()) => min,
            _ => value,
        });
        self.max = Some(match self.max {
            Some(max) if max.is_nan() || !(value > max || value.is_nan()) => max,
            _ => value,
        });
    }

    /// Merges the statistics of other values into these ones.
    pub fn combine(&mut self, other: &SummaryStatistics<T>) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        self.count += other.count;
        self.sum.merge(&other.sum);
        if let (Some(min), Some(other_min)) = (self.min, other.min) {
            if !min.is_nan() && (other_min < min || other_min.is_nan()) {
                self.min = Some(other_min);
            }
        }
        if let (Some(max), Some(other_max)) = (self.max, other.max) {
            if !max.is_nan() && (other_max > max || other_max.is_nan()) {
                self.max = Some(other_max);
            }
        }
    }

    /// Returns the number of values.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the sum of the values, zero if there are none.
    pub fn sum(&self) -> T {
        T::from_sum(&self.sum)
    }

    /// Returns the smallest value, if any. A NaN value is the minimum.
    pub fn min(&self) -> Option<T> {
        self.min
    }

    /// Returns the largest value, if any. A NaN value is the maximum.
    pub fn max(&self) -> Option<T> {
        self.max
    }

    /// Returns the arithmetic mean of the values, if any.
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(T::sum_to_f64(&self.sum) / self.count as f64)
        }
    }
}

impl<T: Numeric> fmt::Debug for SummaryStatistics<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryStatistics")
            .field("count", &self.count)
            .field("sum", &self.sum())
            .field("min", &self.min)
            .field("max", &self.max)
            .field("average", &self.average())
            .finish()
    }
}

impl<T: Numeric> Sink<T> for SummaryStatistics<T> {
    fn accept(&mut self, value: T) {
        SummaryStatistics::accept(self, value)
    }
}

impl<T: Numeric> Reducer<T> for SummaryStatistics<T> {
    fn combine(&mut self, other: Self) {
        SummaryStatistics::combine(self, &other)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn stats<T: Numeric>(values: &[T]) -> SummaryStatistics<T> {
        let mut stats = SummaryStatistics::new();
        for &x in values {
            stats.accept(x);
        }
        stats
    }

    #[test]
    fn test_integer_statistics() {
        let stats = stats(&[3i32, -1, 4, 1, 5]);
        assert_eq!(stats.count(), 5);
        assert_eq!(stats.sum(), 12);
        assert_eq!(stats.min(), Some(-1));
        assert_eq!(stats.max(), Some(5));
        assert_eq!(stats.average(), Some(2.4));
    }

    #[test]
    fn test_empty_statistics() {
        let stats = SummaryStatistics::<u8>::new();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.sum(), 0);
        assert_eq!(stats.min(), None);
        assert_eq!(stats.max(), None);
        assert_eq!(stats.average(), None);
    }

    #[test]
    fn test_integer_sum_wraps() {
        assert_eq!(stats(&[i32::MAX, 1]).sum(), i32::MIN);
        assert_eq!(stats(&[u8::MAX, 2]).sum(), 1);
        // The average is computed on the exact sum.
        assert_eq!(stats(&[u8::MAX, u8::MAX]).average(), Some(255.0));
    }

    #[test]
    fn test_compensated_sum() {
        let values = vec![0.1f64; 10];
        assert_eq!(stats(&values).sum(), 1.0);
    }

    #[test]
    fn test_infinite_sum() {
        assert_eq!(stats(&[f64::INFINITY, 1.0]).sum(), f64::INFINITY);
        assert!(stats(&[f64::INFINITY, f64::NEG_INFINITY]).sum().is_nan());
    }

    #[test]
    fn test_nan_min_max() {
        let stats = stats(&[1.0, f64::NAN, 2.0]);
        assert!(stats.min().unwrap().is_nan());
        assert!(stats.max().unwrap().is_nan());
    }

    #[test]
    fn test_combine() {
        let mut left = stats(&[5u64, 7]);
        let right = stats(&[1u64, 9, 3]);
        left.combine(&right);
        assert_eq!(left.count(), 5);
        assert_eq!(left.sum(), 25);
        assert_eq!(left.min(), Some(1));
        assert_eq!(left.max(), Some(9));

        let mut empty = SummaryStatistics::new();
        empty.combine(&left);
        assert_eq!(empty.sum(), 25);
        left.combine(&SummaryStatistics::new());
        assert_eq!(left.count(), 5);
    }
}
