// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::Spliterator;
use crate::core::util::ShardedSet;
use crate::flags::Characteristics;
use std::hash::Hash;
use std::sync::Arc;

/// A spliterator dropping the elements already seen by itself or by any of its
/// splits. Which occurrence of a duplicate is kept is unspecified.
pub(crate) struct DistinctSpliterator<T> {
    inner: Box<dyn Spliterator<T>>,
    seen: Arc<ShardedSet<T>>,
}

impl<T: Eq + Hash> DistinctSpliterator<T> {
    pub(crate) fn new(inner: Box<dyn Spliterator<T>>, num_shards: usize) -> Self {
        Self {
            inner,
            seen: Arc::new(ShardedSet::new(num_shards)),
        }
    }
}

impl<T: Clone + Eq + Hash + Send + Sync + 'static> Spliterator<T> for DistinctSpliterator<T> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        let seen = &self.seen;
        loop {
            let mut slot = None;
            if !self.inner.try_advance(&mut |x| slot = Some(x)) {
                return false;
            }
            if let Some(x) = slot {
                if seen.insert(x.clone()) {
                    action(x);
                    return true;
                }
            }
        }
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        let seen = &self.seen;
        self.inner.for_each_remaining(&mut |x| {
            if seen.insert(x.clone()) {
                action(x)
            }
        });
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        let inner = self.inner.try_split()?;
        Some(Box::new(DistinctSpliterator {
            inner,
            seen: self.seen.clone(),
        }))
    }

    fn estimate_size(&self) -> usize {
        self.inner.estimate_size()
    }

    fn characteristics(&self) -> Characteristics {
        self.inner
            .characteristics()
            .without(
                Characteristics::SIZED
                    | Characteristics::SUBSIZED
                    | Characteristics::SORTED
                    | Characteristics::ORDERED,
            )
            | Characteristics::DISTINCT
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::test_util::split_all;
    use crate::source::ArraySpliterator;

    #[test]
    fn test_distinct() {
        let input = (0..1000).map(|i| i % 37).collect::<Vec<i32>>();
        let spliterator = DistinctSpliterator::new(
            Box::new(ArraySpliterator::new(input, Characteristics::ORDERED)),
            4,
        );
        assert!(spliterator.has_characteristics(Characteristics::DISTINCT));
        assert!(!spliterator.has_characteristics(Characteristics::ORDERED));
        let mut output = split_all(Box::new(spliterator), 10);
        output.sort();
        assert_eq!(output, (0..37).collect::<Vec<_>>());
    }

    #[test]
    fn test_try_advance() {
        let mut spliterator = DistinctSpliterator::new(
            Box::new(ArraySpliterator::new(vec![1, 1, 2, 1, 3, 2], Characteristics::NONE)),
            1,
        );
        let mut output = Vec::new();
        while spliterator.try_advance(&mut |x| output.push(x)) {}
        assert_eq!(output, [1, 2, 3]);
    }
}
