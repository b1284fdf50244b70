// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::{ArraySpliterator, Spliterator, UNKNOWN_SIZE};
use crate::flags::Characteristics;
use std::iter::Peekable;

/// Growth of the batches copied out of the iterator at each split.
const BATCH_UNIT: usize = 1 << 10;
/// Maximum size of a batch.
const MAX_BATCH: usize = 1 << 25;

/// A spliterator over an arbitrary [`Iterator`].
///
/// The iterator itself cannot be split, so each split copies a batch of
/// elements into an [`ArraySpliterator`]. Batches grow arithmetically, so that
/// sources of unknown size still yield a balanced amount of parallel work.
pub struct IteratorSpliterator<I: Iterator> {
    iter: Peekable<I>,
    estimate: usize,
    batch: usize,
    characteristics: Characteristics,
}

impl<I: Iterator> IteratorSpliterator<I> {
    /// Creates a spliterator over the given iterator, with the given
    /// characteristics. The iterator is considered
    /// [`SIZED`](Characteristics::SIZED) if its size hint is exact.
    pub fn new(iter: I, characteristics: Characteristics) -> Self {
        let (lower, upper) = iter.size_hint();
        let (estimate, characteristics) = if upper == Some(lower) {
            (
                lower,
                characteristics | Characteristics::SIZED | Characteristics::SUBSIZED,
            )
        } else {
            (
                UNKNOWN_SIZE,
                characteristics.without(Characteristics::SIZED | Characteristics::SUBSIZED),
            )
        };
        Self {
            iter: iter.peekable(),
            estimate,
            batch: 0,
            characteristics,
        }
    }
}

impl<I> Spliterator<I::Item> for IteratorSpliterator<I>
where
    I: Iterator + Send,
    I::Item: Clone + Send + Sync + 'static,
{
    fn try_advance(&mut self, action: &mut dyn FnMut(I::Item)) -> bool {
        match self.iter.next() {
            Some(x) => {
                if self.estimate != UNKNOWN_SIZE {
                    self.estimate -= 1;
                }
                action(x);
                true
            }
            None => false,
        }
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(I::Item)) {
        if self.estimate != UNKNOWN_SIZE {
            self.estimate = 0;
        }
        self.iter.by_ref().for_each(action);
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<I::Item>>> {
        let size = self.estimate;
        if size <= 1 || self.iter.peek().is_none() {
            return None;
        }
        let n = (self.batch + BATCH_UNIT).min(size).min(MAX_BATCH);
        let batch = self.iter.by_ref().take(n).collect::<Vec<_>>();
        self.batch = batch.len();
        if self.estimate != UNKNOWN_SIZE {
            self.estimate -= batch.len();
        }
        Some(Box::new(ArraySpliterator::new(
            batch,
            self.characteristics,
        )))
    }

    fn estimate_size(&self) -> usize {
        self.estimate
    }

    fn characteristics(&self) -> Characteristics {
        self.characteristics
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::test_util::{drain, split_all};

    #[test]
    fn test_sized_iterator() {
        let spliterator = IteratorSpliterator::new(0..10, Characteristics::ORDERED);
        assert_eq!(spliterator.exact_size_if_known(), Some(10));
        let spliterator = IteratorSpliterator::new((0..10).filter(|x| x % 2 == 0), Characteristics::ORDERED);
        assert_eq!(spliterator.exact_size_if_known(), None);
        assert_eq!(spliterator.estimate_size(), UNKNOWN_SIZE);
    }

    #[test]
    fn test_split_batches() {
        let mut spliterator = IteratorSpliterator::new(
            (0..5000).filter(|_| true),
            Characteristics::ORDERED,
        );
        let mut first = spliterator.try_split().unwrap();
        assert_eq!(first.exact_size_if_known(), Some(BATCH_UNIT));
        let mut second = spliterator.try_split().unwrap();
        assert_eq!(second.exact_size_if_known(), Some(2 * BATCH_UNIT));
        assert_eq!(drain(first.as_mut()), (0..1024).collect::<Vec<_>>());
        assert_eq!(drain(second.as_mut()), (1024..3072).collect::<Vec<_>>());
        assert_eq!(drain(&mut spliterator), (3072..5000).collect::<Vec<_>>());
        assert!(spliterator.try_split().is_none());
    }

    #[test]
    fn test_split_sized() {
        let mut spliterator = IteratorSpliterator::new(0..1500, Characteristics::ORDERED);
        let first = spliterator.try_split().unwrap();
        assert_eq!(first.estimate_size(), 1024);
        assert_eq!(spliterator.estimate_size(), 476);
        let second = spliterator.try_split().unwrap();
        assert_eq!(second.estimate_size(), 476);
        assert_eq!(spliterator.estimate_size(), 0);
        assert!(spliterator.try_split().is_none());
    }

    #[test]
    fn test_split_all_preserves_order() {
        let spliterator = Box::new(IteratorSpliterator::new(
            (0..10_000).filter(|x| x % 3 != 0),
            Characteristics::ORDERED,
        ));
        assert_eq!(
            split_all(spliterator, 40),
            (0..10_000).filter(|x| x % 3 != 0).collect::<Vec<_>>()
        );
    }
}
