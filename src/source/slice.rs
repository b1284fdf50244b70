// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::Spliterator;
use crate::flags::Characteristics;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A spliterator restricted to the absolute index window
/// `[slice_origin, slice_fence)` of a [`SUBSIZED`](Characteristics::SUBSIZED)
/// spliterator.
///
/// Elements before the window are discarded lazily. Splits falling entirely
/// outside of the window are dropped without being traversed.
pub(crate) struct SliceSpliterator<T> {
    inner: Box<dyn Spliterator<T>>,
    slice_origin: usize,
    slice_fence: usize,
    /// Absolute index of the next element of `inner`.
    index: usize,
    /// Absolute index one past the last element of `inner` that can be
    /// reported.
    fence: usize,
}

impl<T> SliceSpliterator<T> {
    pub(crate) fn new(inner: Box<dyn Spliterator<T>>, skip: usize, limit: Option<usize>) -> Self {
        let slice_fence = match limit {
            Some(limit) => skip.saturating_add(limit),
            None => usize::MAX,
        };
        let fence = inner.estimate_size().min(slice_fence);
        Self {
            inner,
            slice_origin: skip,
            slice_fence,
            index: 0,
            fence,
        }
    }

    fn skip_to_origin(&mut self) {
        while self.slice_origin > self.index {
            self.inner.try_advance(&mut |_| ());
            self.index += 1;
        }
    }
}

impl<T: 'static> Spliterator<T> for SliceSpliterator<T> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        if self.slice_origin >= self.fence {
            return false;
        }
        self.skip_to_origin();
        if self.index >= self.fence {
            return false;
        }
        self.index += 1;
        self.inner.try_advance(action)
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        if self.slice_origin >= self.fence || self.index >= self.fence {
            return;
        }
        if self.index >= self.slice_origin
            && self.index.saturating_add(self.inner.estimate_size()) <= self.slice_fence
        {
            // The remaining elements are all in the window.
            self.inner.for_each_remaining(action);
            self.index = self.fence;
        } else {
            self.skip_to_origin();
            while self.index < self.fence {
                self.inner.try_advance(action);
                self.index += 1;
            }
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        if self.slice_origin >= self.fence || self.index >= self.fence {
            return None;
        }
        loop {
            let left = self.inner.try_split()?;
            let left_fence_unbounded = self.index.saturating_add(left.estimate_size());
            let left_fence = left_fence_unbounded.min(self.slice_fence);
            if self.slice_origin >= left_fence {
                // The left part is entirely before the window.
                self.index = left_fence;
            } else if left_fence >= self.slice_fence {
                // The right part is entirely after the window.
                self.inner = left;
                self.fence = left_fence;
            } else if self.index >= self.slice_origin && left_fence_unbounded <= self.slice_fence {
                // The left part is entirely inside the window.
                self.index = left_fence;
                return Some(left);
            } else {
                let origin = self.index;
                self.index = left_fence;
                return Some(Box::new(SliceSpliterator {
                    inner: left,
                    slice_origin: self.slice_origin,
                    slice_fence: self.slice_fence,
                    index: origin,
                    fence: left_fence,
                }));
            }
        }
    }

    fn estimate_size(&self) -> usize {
        if self.slice_origin < self.fence {
            self.fence.saturating_sub(self.slice_origin.max(self.index))
        } else {
            0
        }
    }

    fn characteristics(&self) -> Characteristics {
        self.inner.characteristics()
    }
}

/// Upper bound of the number of elements buffered before acquiring permits.
const CHUNK_SIZE: usize = 1 << 7;

/// Status of the shared permits of an [`UnorderedSliceSpliterator`].
#[derive(Debug, PartialEq, Eq)]
enum PermitStatus {
    NoMore,
    MaybeMore,
    Unlimited,
}

/// A spliterator skipping and limiting elements in no particular order.
///
/// All the splits share a bucket of permits: the first `skip` permits acquired
/// discard their element, the next `limit` permits report their element, and
/// once the bucket is empty the remaining elements are either all discarded
/// (with a limit) or all reported (without a limit).
pub(crate) struct UnorderedSliceSpliterator<T> {
    inner: Box<dyn Spliterator<T>>,
    unlimited: bool,
    chunk_size: usize,
    skip_threshold: usize,
    permits: Arc<CachePadded<AtomicUsize>>,
}

impl<T> UnorderedSliceSpliterator<T> {
    /// Creates an unordered slice. The `leaf_target` is the expected number of
    /// leaves of a parallel evaluation, used to size the permit chunks.
    pub(crate) fn new(
        inner: Box<dyn Spliterator<T>>,
        skip: usize,
        limit: Option<usize>,
        leaf_target: usize,
    ) -> Self {
        let (unlimited, skip_threshold, chunk_size, permits) = match limit {
            Some(limit) => {
                let total = skip.saturating_add(limit);
                (
                    false,
                    limit,
                    CHUNK_SIZE.min(total / leaf_target.max(1) + 1),
                    total,
                )
            }
            None => (true, 0, CHUNK_SIZE, skip),
        };
        Self {
            inner,
            unlimited,
            chunk_size,
            skip_threshold,
            permits: Arc::new(CachePadded::new(AtomicUsize::new(permits))),
        }
    }

    /// Acquires permits for the given number of elements, and returns how many
    /// of these elements should be reported.
    fn acquire_permits(&self, num_elements: usize) -> usize {
        debug_assert!(num_elements > 0);
        let mut remaining = self.permits.load(Ordering::Relaxed);
        let grabbing = loop {
            if remaining == 0 {
                return if self.unlimited { num_elements } else { 0 };
            }
            let grabbing = remaining.min(num_elements);
            match self.permits.compare_exchange_weak(
                remaining,
                remaining - grabbing,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break grabbing,
                Err(current) => remaining = current,
            }
        };
        if self.unlimited {
            num_elements - grabbing
        } else if remaining > self.skip_threshold {
            grabbing.saturating_sub(remaining - self.skip_threshold)
        } else {
            grabbing
        }
    }

    fn permit_status(&self) -> PermitStatus {
        if self.permits.load(Ordering::Relaxed) > 0 {
            PermitStatus::MaybeMore
        } else if self.unlimited {
            PermitStatus::Unlimited
        } else {
            PermitStatus::NoMore
        }
    }
}

impl<T: 'static> Spliterator<T> for UnorderedSliceSpliterator<T> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        while self.permit_status() != PermitStatus::NoMore {
            let mut slot = None;
            if !self.inner.try_advance(&mut |x| slot = Some(x)) {
                return false;
            }
            if self.acquire_permits(1) == 1 {
                if let Some(x) = slot {
                    action(x);
                }
                return true;
            }
        }
        false
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        let mut buffer = Vec::with_capacity(self.chunk_size);
        loop {
            match self.permit_status() {
                PermitStatus::NoMore => return,
                PermitStatus::Unlimited => {
                    self.inner.for_each_remaining(action);
                    return;
                }
                PermitStatus::MaybeMore => {
                    buffer.clear();
                    while buffer.len() < self.chunk_size
                        && self.inner.try_advance(&mut |x| buffer.push(x))
                    {}
                    if buffer.is_empty() {
                        return;
                    }
                    let permitted = self.acquire_permits(buffer.len());
                    for x in buffer.drain(..).take(permitted) {
                        action(x);
                    }
                }
            }
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        if self.permits.load(Ordering::Relaxed) == 0 {
            return None;
        }
        let inner = self.inner.try_split()?;
        Some(Box::new(UnorderedSliceSpliterator {
            inner,
            unlimited: self.unlimited,
            chunk_size: self.chunk_size,
            skip_threshold: self.skip_threshold,
            permits: self.permits.clone(),
        }))
    }

    fn estimate_size(&self) -> usize {
        self.inner.estimate_size()
    }

    fn characteristics(&self) -> Characteristics {
        self.inner.characteristics().without(
            Characteristics::SIZED | Characteristics::SUBSIZED | Characteristics::ORDERED,
        )
    }
}
