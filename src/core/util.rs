// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crossbeam_utils::CachePadded;
use std::collections::hash_map::RandomState;
use std::collections::HashSet;
use std::hash::{BuildHasher, Hash};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Runs the given function on the status, without notifying waiting
    /// threads.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.mutex.lock().unwrap())
    }

    /// Updates the status with the given function and notifies all waiting
    /// threads.
    pub fn update_and_notify_all<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.mutex.lock().unwrap());
        self.condvar.notify_all();
        result
    }

    /// Waits until the predicate is false on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<T> {
        self.condvar
            .wait_while(self.mutex.lock().unwrap(), predicate)
            .unwrap()
    }

    /// Waits until the predicate is false on this status, or until the given
    /// timeout elapses.
    pub fn wait_timeout_while(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<T> {
        self.condvar
            .wait_timeout_while(self.mutex.lock().unwrap(), timeout, predicate)
            .unwrap()
            .0
    }
}

/// A hash set that can be shared between threads, split into independently
/// locked shards to reduce contention.
pub struct ShardedSet<T> {
    hasher: RandomState,
    shards: Box<[CachePadded<Mutex<HashSet<T>>>]>,
}

impl<T: Eq + Hash> ShardedSet<T> {
    /// Creates a set with the given number of shards.
    pub fn new(num_shards: usize) -> Self {
        Self {
            hasher: RandomState::new(),
            shards: (0..num_shards.max(1))
                .map(|_| CachePadded::new(Mutex::new(HashSet::new())))
                .collect(),
        }
    }

    /// Inserts a value, returning true if it wasn't present yet.
    pub fn insert(&self, value: T) -> bool {
        let index = (self.hasher.hash_one(&value) % self.shards.len() as u64) as usize;
        self.shards[index].lock().unwrap().insert(value)
    }

    /// Returns the number of values in the set.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().unwrap().len()).sum()
    }
}
