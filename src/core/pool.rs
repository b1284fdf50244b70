// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A work-stealing thread pool running the tasks of parallel evaluations.

use super::util::Status;
use crate::macros::{log_debug, log_error, log_warn};
use crossbeam_utils::CachePadded;
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::cell::Cell;
use std::collections::VecDeque;
use std::convert::TryFrom;
use std::num::NonZeroUsize;
#[cfg(feature = "log_parallelism")]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

/// Number of threads to spawn in a thread pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), building a thread pool will panic.
    Always,
}

/// A builder for [`ForkJoinPool`].
#[derive(Clone, Copy, Debug)]
pub struct ForkJoinPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
    /// Target number of leaf tasks per worker thread. Parallel evaluations
    /// stop splitting their source once the estimated size of a part falls
    /// below `size / (num_threads * leaf_tasks_per_thread)`.
    pub leaf_tasks_per_thread: usize,
}

impl Default for ForkJoinPoolBuilder {
    fn default() -> Self {
        Self {
            num_threads: ThreadCount::AvailableParallelism,
            cpu_pinning: CpuPinningPolicy::No,
            leaf_tasks_per_thread: 4,
        }
    }
}

impl ForkJoinPoolBuilder {
    /// Spawns a thread pool.
    ///
    /// ```
    /// # use lazyflow::{CpuPinningPolicy, ForkJoinPoolBuilder, Stream, ThreadCount};
    /// # use std::sync::Arc;
    /// let pool = ForkJoinPoolBuilder {
    ///     num_threads: ThreadCount::try_from(2).unwrap(),
    ///     cpu_pinning: CpuPinningPolicy::No,
    ///     leaf_tasks_per_thread: 4,
    /// }
    /// .build();
    ///
    /// let sum = Stream::range(1, 11)
    ///     .parallel()
    ///     .with_pool(Arc::new(pool))
    ///     .sum()
    ///     .unwrap();
    /// assert_eq!(sum, 5 * 11);
    /// ```
    pub fn build(&self) -> ForkJoinPool {
        ForkJoinPool::new(self)
    }
}

type Job = Box<dyn FnOnce() + Send>;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Pool identifier and worker index of the current thread, if it's a worker
    /// thread.
    static CURRENT_WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// Sleep state of the idle workers.
struct SleepState {
    /// Incremented each time a job is pushed.
    epoch: u64,
    terminating: bool,
}

/// State shared between a pool, its workers and the tasks running on it.
pub(crate) struct PoolShared {
    id: usize,
    /// Per-worker deques: the owner pushes and pops at the back, thieves steal
    /// at the front.
    queues: Box<[CachePadded<Mutex<VecDeque<Job>>>]>,
    /// Jobs pushed from outside of the pool.
    injector: CachePadded<Mutex<VecDeque<Job>>>,
    sleep: Status<SleepState>,
    leaf_tasks_per_thread: usize,
    #[cfg(feature = "log_parallelism")]
    stats: PoolStats,
}

#[cfg(feature = "log_parallelism")]
#[derive(Default)]
struct PoolStats {
    local: AtomicU64,
    injected: AtomicU64,
    stolen: AtomicU64,
}

/// Handle used by tasks to push jobs to a pool.
pub(crate) type PoolHandle = Arc<PoolShared>;

impl PoolShared {
    pub(crate) fn num_threads(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn leaf_tasks_per_thread(&self) -> usize {
        self.leaf_tasks_per_thread
    }

    /// Returns the index of the current thread if it's a worker of this pool.
    pub(crate) fn current_worker(&self) -> Option<usize> {
        CURRENT_WORKER.with(|current| match current.get() {
            Some((id, index)) if id == self.id => Some(index),
            _ => None,
        })
    }

    /// Pushes a job to the local deque of the current worker, or to the
    /// injector queue when called from outside of the pool.
    pub(crate) fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        match self.current_worker() {
            Some(index) => self.queues[index].lock().unwrap().push_back(job),
            None => self.injector.lock().unwrap().push_back(job),
        }
        self.sleep
            .update_and_notify_all(|state| state.epoch = state.epoch.wrapping_add(1));
    }

    /// Finds a job to run: first from the worker's own deque, then from the
    /// injector, then stolen from another worker.
    fn find_job(&self, index: Option<usize>) -> Option<Job> {
        if let Some(index) = index {
            if let Some(job) = self.queues[index].lock().unwrap().pop_back() {
                #[cfg(feature = "log_parallelism")]
                self.stats.local.fetch_add(1, Ordering::Relaxed);
                return Some(job);
            }
        }
        if let Some(job) = self.injector.lock().unwrap().pop_front() {
            #[cfg(feature = "log_parallelism")]
            self.stats.injected.fetch_add(1, Ordering::Relaxed);
            return Some(job);
        }
        let num_threads = self.queues.len();
        let start = index.map_or(0, |i| i + 1);
        for i in 0..num_threads {
            let victim = (start + i) % num_threads;
            if Some(victim) == index {
                continue;
            }
            if let Some(job) = self.queues[victim].lock().unwrap().pop_front() {
                #[cfg(feature = "log_parallelism")]
                self.stats.stolen.fetch_add(1, Ordering::Relaxed);
                return Some(job);
            }
        }
        None
    }

    /// Runs one pending job if the current thread is a worker of this pool and
    /// a job is available. Returns whether a job was run.
    pub(crate) fn help_once(&self) -> bool {
        let Some(index) = self.current_worker() else {
            return false;
        };
        match self.find_job(Some(index)) {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    fn run_worker(&self, index: usize) {
        CURRENT_WORKER.with(|current| current.set(Some((self.id, index))));
        loop {
            if let Some(job) = self.find_job(Some(index)) {
                job();
                continue;
            }
            let epoch = self.sleep.with(|state| (!state.terminating).then_some(state.epoch));
            let Some(epoch) = epoch else {
                break;
            };
            // A job pushed after reading the epoch bumps it, so the wait below
            // cannot miss it.
            if let Some(job) = self.find_job(Some(index)) {
                job();
                continue;
            }
            let _guard = self
                .sleep
                .wait_while(|state| state.epoch == epoch && !state.terminating);
        }
        log_debug!("[thread {index}] Exiting worker loop");
    }
}

/// A pool of worker threads running the tasks of parallel evaluations.
///
/// Each worker owns a deque of jobs. Tasks forked from a worker are pushed to
/// its own deque, and idle workers steal jobs from the other deques. A thread
/// waiting for an evaluation to complete on one of the pool's own workers
/// runs pending jobs in the meantime, so that nested parallel evaluations
/// don't deadlock.
pub struct ForkJoinPool {
    shared: Arc<PoolShared>,
    threads: Vec<JoinHandle<()>>,
}

impl ForkJoinPool {
    fn new(builder: &ForkJoinPoolBuilder) -> Self {
        let num_threads: NonZeroUsize = match builder.num_threads {
            ThreadCount::AvailableParallelism => match std::thread::available_parallelism() {
                Ok(count) => count,
                Err(_e) => {
                    log_warn!("Getting the available parallelism failed, using one thread: {_e}");
                    NonZeroUsize::MIN
                }
            },
            ThreadCount::Count(count) => count,
        };
        let num_threads: usize = num_threads.into();
        let cpu_pinning = builder.cpu_pinning;

        #[cfg(any(
            miri,
            not(any(
                target_os = "android",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "linux"
            ))
        ))]
        match cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                panic!("Pinning threads to CPUs is not implemented on this platform.")
            }
        }

        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            queues: (0..num_threads)
                .map(|_| CachePadded::new(Mutex::new(VecDeque::new())))
                .collect(),
            injector: CachePadded::new(Mutex::new(VecDeque::new())),
            sleep: Status::new(SleepState {
                epoch: 0,
                terminating: false,
            }),
            leaf_tasks_per_thread: builder.leaf_tasks_per_thread.max(1),
            #[cfg(feature = "log_parallelism")]
            stats: PoolStats::default(),
        });

        let threads = (0..num_threads)
            .map(|id| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("lazyflow-worker-{}-{id}", shared.id))
                    .spawn(move || {
                        #[cfg(all(
                            not(miri),
                            any(
                                target_os = "android",
                                target_os = "dragonfly",
                                target_os = "freebsd",
                                target_os = "linux"
                            )
                        ))]
                        match cpu_pinning {
                            CpuPinningPolicy::No => (),
                            CpuPinningPolicy::IfSupported => {
                                let mut cpu_set = CpuSet::new();
                                if let Err(_e) = cpu_set.set(id) {
                                    log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
                                } else if let Err(_e) =
                                    sched_setaffinity(Pid::from_raw(0), &cpu_set)
                                {
                                    log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
                                } else {
                                    log_debug!("Pinned thread #{id} to CPU #{id}");
                                }
                            }
                            CpuPinningPolicy::Always => {
                                let mut cpu_set = CpuSet::new();
                                if let Err(e) = cpu_set.set(id) {
                                    panic!("Failed to set CPU affinity for thread #{id}: {e}");
                                } else if let Err(e) = sched_setaffinity(Pid::from_raw(0), &cpu_set)
                                {
                                    panic!("Failed to set CPU affinity for thread #{id}: {e}");
                                } else {
                                    log_debug!("Pinned thread #{id} to CPU #{id}");
                                }
                            }
                        }
                        shared.run_worker(id)
                    })
                    .unwrap_or_else(|e| panic!("Failed to spawn worker thread #{id}: {e}"))
            })
            .collect();
        log_debug!("[main thread] Spawned {num_threads} threads");

        Self { shared, threads }
    }

    /// Returns the process-wide pool, sized by the available parallelism, used
    /// by parallel streams that have no pool attached.
    pub fn common() -> Arc<ForkJoinPool> {
        static COMMON: OnceLock<Arc<ForkJoinPool>> = OnceLock::new();
        COMMON
            .get_or_init(|| Arc::new(ForkJoinPoolBuilder::default().build()))
            .clone()
    }

    /// Returns the number of worker threads that have been spawned in this
    /// pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.threads.len()).unwrap_or(NonZeroUsize::MIN)
    }

    pub(crate) fn handle(&self) -> PoolHandle {
        self.shared.clone()
    }
}

impl Drop for ForkJoinPool {
    /// Joins all the threads in the pool.
    #[allow(clippy::single_match, clippy::unused_enumerate_index)]
    fn drop(&mut self) {
        self.shared
            .sleep
            .update_and_notify_all(|state| state.terminating = true);

        log_debug!("[main thread] Joining threads in the pool...");
        let current = std::thread::current().id();
        for (_i, t) in self.threads.drain(..).enumerate() {
            if t.thread().id() == current {
                // Dropped from one of its own jobs: the worker exits on its own.
                continue;
            }
            let result = t.join();
            match result {
                Ok(_) => log_debug!("[main thread] Thread {_i} joined with result: {result:?}"),
                Err(_) => log_error!("[main thread] Thread {_i} joined with result: {result:?}"),
            }
        }
        log_debug!("[main thread] Joined threads.");

        #[cfg(feature = "log_parallelism")]
        crate::macros::log_tasks!(
            "Pool #{} ran {} local jobs, {} injected jobs and {} stolen jobs",
            self.shared.id,
            self.shared.stats.local.load(Ordering::Relaxed),
            self.shared.stats.injected.load(Ordering::Relaxed),
            self.shared.stats.stolen.load(Ordering::Relaxed),
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    fn pool(num_threads: usize) -> ForkJoinPool {
        ForkJoinPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
            leaf_tasks_per_thread: 4,
        }
        .build()
    }

    #[test]
    fn test_thread_count_try_from() {
        assert!(ThreadCount::try_from(0).is_err());
        assert_eq!(
            ThreadCount::try_from(3),
            Ok(ThreadCount::Count(NonZeroUsize::new(3).unwrap()))
        );
    }

    #[test]
    fn test_num_threads() {
        let pool = pool(3);
        assert_eq!(pool.num_threads().get(), 3);
        assert_eq!(pool.handle().num_threads(), 3);
    }

    #[test]
    fn test_spawn_from_outside() {
        let pool = pool(2);
        let handle = pool.handle();
        assert_eq!(handle.current_worker(), None);
        assert!(!handle.help_once());

        let (tx, rx) = mpsc::channel();
        for i in 0..100 {
            let tx = tx.clone();
            handle.spawn(move || tx.send(i).unwrap());
        }
        drop(tx);
        let mut received = rx.iter().collect::<Vec<_>>();
        received.sort();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_spawn_from_worker() {
        let pool = pool(2);
        let handle = pool.handle();
        let (tx, rx) = mpsc::channel();
        handle.spawn({
            let handle = handle.clone();
            move || {
                assert!(handle.current_worker().is_some());
                for i in 0..10 {
                    let tx = tx.clone();
                    handle.spawn(move || tx.send(i).unwrap());
                }
            }
        });
        let mut received = rx.iter().collect::<Vec<_>>();
        received.sort();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_common_pool_is_shared() {
        let a = ForkJoinPool::common();
        let b = ForkJoinPool::common();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    #[test]
    fn test_cpu_pinning_if_supported() {
        let pool = ForkJoinPoolBuilder {
            num_threads: ThreadCount::try_from(1).unwrap(),
            cpu_pinning: CpuPinningPolicy::IfSupported,
            leaf_tasks_per_thread: 1,
        }
        .build();
        let (tx, rx) = mpsc::channel();
        pool.handle().spawn(move || tx.send(()).unwrap());
        rx.recv().unwrap();
    }
}
