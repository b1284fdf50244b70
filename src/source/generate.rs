// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::{Spliterator, UNKNOWN_SIZE};
use crate::flags::Characteristics;
use std::sync::Arc;

/// An unbounded, unordered spliterator calling a supplier function for each
/// element.
///
/// Splits share the supplier and halve a nominal size estimate, until the
/// estimate reaches zero.
pub struct GenerateSpliterator<T> {
    supplier: Arc<dyn Fn() -> T + Send + Sync>,
    estimate: usize,
}

impl<T> GenerateSpliterator<T> {
    /// Creates an unbounded spliterator over the given supplier.
    pub fn new(supplier: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            supplier: Arc::new(supplier),
            estimate: UNKNOWN_SIZE,
        }
    }
}

impl<T: 'static> Spliterator<T> for GenerateSpliterator<T> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        action((self.supplier)());
        true
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        if self.estimate == 0 {
            return None;
        }
        self.estimate >>= 1;
        Some(Box::new(GenerateSpliterator {
            supplier: self.supplier.clone(),
            estimate: self.estimate,
        }))
    }

    fn estimate_size(&self) -> usize {
        self.estimate
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::IMMUTABLE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_generate() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut spliterator = GenerateSpliterator::new({
            let counter = counter.clone();
            move || counter.fetch_add(1, Ordering::Relaxed)
        });
        assert_eq!(spliterator.exact_size_if_known(), None);

        let mut output = Vec::new();
        for _ in 0..5 {
            assert!(spliterator.try_advance(&mut |x| output.push(x)));
        }
        assert_eq!(output, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_split_halves_estimate() {
        let mut spliterator = GenerateSpliterator::new(|| 42);
        let split = spliterator.try_split().unwrap();
        assert_eq!(split.estimate_size(), usize::MAX >> 1);
        assert_eq!(spliterator.estimate_size(), usize::MAX >> 1);

        let mut splits = 1;
        while spliterator.try_split().is_some() {
            splits += 1;
        }
        assert_eq!(splits, usize::BITS);
        assert_eq!(spliterator.estimate_size(), 0);
    }
}
