// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reusable mutable reductions, to pass to
//! [`Stream::collect()`](crate::Stream::collect).

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// A mutable reduction: elements are accumulated into a container, partial
/// containers are combined, and the final container is converted into the
/// output.
///
/// In parallel, each leaf task supplies its own container, and the container
/// of the later elements is always combined into the container of the
/// earlier elements, so that an ordered collector sees elements in encounter
/// order.
pub trait Collector<T>: Send + Sync + 'static {
    /// Intermediate mutable container.
    type Acc: Send + 'static;
    /// Result of the reduction.
    type Output;

    /// Creates a new empty container.
    fn supply(&self) -> Self::Acc;

    /// Adds an element to a container.
    fn accumulate(&self, acc: &mut Self::Acc, value: T);

    /// Merges the container of later elements into the container of earlier
    /// elements.
    fn combine(&self, acc: &mut Self::Acc, other: Self::Acc);

    /// Converts the final container into the output.
    fn finish(&self, acc: Self::Acc) -> Self::Output;
}

/// Collector returned by [`to_vec()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ToVec;

/// Collects the elements into a [`Vec`], in encounter order.
pub fn to_vec() -> ToVec {
    ToVec
}

impl<T: Send + 'static> Collector<T> for ToVec {
    type Acc = Vec<T>;
    type Output = Vec<T>;

    fn supply(&self) -> Vec<T> {
        Vec::new()
    }

    fn accumulate(&self, acc: &mut Vec<T>, value: T) {
        acc.push(value)
    }

    fn combine(&self, acc: &mut Vec<T>, other: Vec<T>) {
        acc.extend(other)
    }

    fn finish(&self, acc: Vec<T>) -> Vec<T> {
        acc
    }
}

/// Collector returned by [`to_hash_set()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ToHashSet;

/// Collects the elements into a [`HashSet`].
pub fn to_hash_set() -> ToHashSet {
    ToHashSet
}

impl<T: Eq + Hash + Send + 'static> Collector<T> for ToHashSet {
    type Acc = HashSet<T>;
    type Output = HashSet<T>;

    fn supply(&self) -> HashSet<T> {
        HashSet::new()
    }

    fn accumulate(&self, acc: &mut HashSet<T>, value: T) {
        acc.insert(value);
    }

    fn combine(&self, acc: &mut HashSet<T>, other: HashSet<T>) {
        if acc.len() < other.len() {
            let smaller = std::mem::replace(acc, other);
            acc.extend(smaller);
        } else {
            acc.extend(other);
        }
    }

    fn finish(&self, acc: HashSet<T>) -> HashSet<T> {
        acc
    }
}

/// Collector returned by [`counting()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Counting;

/// Counts the elements.
pub fn counting() -> Counting {
    Counting
}

impl<T> Collector<T> for Counting {
    type Acc = usize;
    type Output = usize;

    fn supply(&self) -> usize {
        0
    }

    fn accumulate(&self, acc: &mut usize, _value: T) {
        *acc += 1;
    }

    fn combine(&self, acc: &mut usize, other: usize) {
        *acc += other;
    }

    fn finish(&self, acc: usize) -> usize {
        acc
    }
}

/// Collector returned by [`joining()`].
#[derive(Clone, Debug)]
pub struct Joining {
    separator: String,
}

/// Concatenates string elements in encounter order, with the given separator
/// between consecutive elements.
pub fn joining(separator: impl Into<String>) -> Joining {
    Joining {
        separator: separator.into(),
    }
}

impl<T: AsRef<str>> Collector<T> for Joining {
    /// Joined string so far, or [`None`] if no element was accumulated.
    type Acc = Option<String>;
    type Output = String;

    fn supply(&self) -> Option<String> {
        None
    }

    fn accumulate(&self, acc: &mut Option<String>, value: T) {
        match acc {
            None => *acc = Some(value.as_ref().to_owned()),
            Some(joined) => {
                joined.push_str(&self.separator);
                joined.push_str(value.as_ref());
            }
        }
    }

    fn combine(&self, acc: &mut Option<String>, other: Option<String>) {
        let Some(other) = other else {
            return;
        };
        match acc {
            None => *acc = Some(other),
            Some(joined) => {
                joined.push_str(&self.separator);
                joined.push_str(&other);
            }
        }
    }

    fn finish(&self, acc: Option<String>) -> String {
        acc.unwrap_or_default()
    }
}

/// Collector returned by [`grouping_by()`].
#[derive(Clone, Debug)]
pub struct GroupingBy<F, C> {
    key: F,
    downstream: C,
}

/// Groups the elements by key, and collects each group with the downstream
/// collector.
///
/// ```
/// use lazyflow::collector::{counting, grouping_by};
/// use lazyflow::Stream;
///
/// let groups = Stream::range(0, 10)
///     .collect(grouping_by(|x: &i32| x % 3, counting()))
///     .unwrap();
/// assert_eq!(groups[&0], 4);
/// assert_eq!(groups[&1], 3);
/// assert_eq!(groups[&2], 3);
/// ```
pub fn grouping_by<F, C>(key: F, downstream: C) -> GroupingBy<F, C> {
    GroupingBy { key, downstream }
}

impl<T, K, F, C> Collector<T> for GroupingBy<F, C>
where
    F: Fn(&T) -> K + Send + Sync + 'static,
    K: Eq + Hash + Send + 'static,
    C: Collector<T>,
{
    type Acc = HashMap<K, C::Acc>;
    type Output = HashMap<K, C::Output>;

    fn supply(&self) -> Self::Acc {
        HashMap::new()
    }

    fn accumulate(&self, acc: &mut Self::Acc, value: T) {
        let group = acc
            .entry((self.key)(&value))
            .or_insert_with(|| self.downstream.supply());
        self.downstream.accumulate(group, value);
    }

    fn combine(&self, acc: &mut Self::Acc, other: Self::Acc) {
        for (key, later) in other {
            match acc.get_mut(&key) {
                Some(group) => self.downstream.combine(group, later),
                None => {
                    acc.insert(key, later);
                }
            }
        }
    }

    fn finish(&self, acc: Self::Acc) -> Self::Output {
        acc.into_iter()
            .map(|(key, group)| (key, self.downstream.finish(group)))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Runs a collector over two halves of the input and combines them.
    fn split_collect<T, C: Collector<T>>(collector: &C, input: Vec<T>, mid: usize) -> C::Output {
        let mut left = collector.supply();
        let mut right = collector.supply();
        for (i, x) in input.into_iter().enumerate() {
            if i < mid {
                collector.accumulate(&mut left, x);
            } else {
                collector.accumulate(&mut right, x);
            }
        }
        collector.combine(&mut left, right);
        collector.finish(left)
    }

    #[test]
    fn test_to_vec() {
        assert_eq!(split_collect(&to_vec(), vec![1, 2, 3, 4], 1), [1, 2, 3, 4]);
    }

    #[test]
    fn test_to_hash_set() {
        let set = split_collect(&to_hash_set(), vec![1, 2, 2, 3, 1, 3], 4);
        assert_eq!(set, HashSet::from([1, 2, 3]));
    }

    #[test]
    fn test_counting() {
        assert_eq!(split_collect(&counting(), vec!['a'; 17], 5), 17);
    }

    #[test]
    fn test_joining() {
        let words = vec!["lazy", "flow", "is", "lazy"];
        assert_eq!(split_collect(&joining(", "), words.clone(), 2), "lazy, flow, is, lazy");
        assert_eq!(split_collect(&joining("-"), words, 0), "lazy-flow-is-lazy");
        assert_eq!(split_collect(&joining("-"), Vec::<String>::new(), 0), "");
    }

    #[test]
    fn test_grouping_by() {
        let collector = grouping_by(|s: &&str| s.len(), to_vec());
        let groups = split_collect(&collector, vec!["a", "bb", "c", "dd", "eee", "f"], 3);
        assert_eq!(groups[&1], ["a", "c", "f"]);
        assert_eq!(groups[&2], ["bb", "dd"]);
        assert_eq!(groups[&3], ["eee"]);
    }
}
