// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Divide-and-conquer evaluation of a segment over a [`ForkJoinPool`].
//!
//! The source is split recursively into a binary tree of tasks. Leaves push
//! their part of the source through the segment, and the results of sibling
//! tasks are combined bottom-up by whichever sibling completes last.
//!
//! [`ForkJoinPool`]: super::pool::ForkJoinPool

use super::pool::PoolHandle;
use super::util::Status;
#[cfg(feature = "log_parallelism")]
use crate::macros::log_tasks;
use crate::pipeline::{EvalContext, Segment};
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

/// Behavior of a parallel evaluation: what each leaf computes, and how the
/// results of two sibling tasks are combined.
pub(crate) trait TaskSpec<T>: Send + Sync + Sized + 'static {
    type Output: Send + 'static;
    /// Additional per-task state.
    type NodeState: Default + Send + Sync + 'static;

    /// Whether tasks share a first-wins result and can be canceled.
    const SHORT_CIRCUIT: bool = false;

    /// Computes the result of a leaf task.
    fn leaf(&self, node: &TaskNode<T, Self>, segment: Box<dyn Segment<T>>) -> Self::Output;

    /// Result of a task that was canceled before computing anything.
    fn empty(&self) -> Self::Output;

    /// Combines the results of the two children of the given task.
    fn combine(
        &self,
        node: &TaskNode<T, Self>,
        left: Self::Output,
        right: Self::Output,
    ) -> Self::Output;

    /// Called once the result of the given task is set, before its parent is
    /// notified.
    fn on_completed(&self, _node: &TaskNode<T, Self>) {}
}

type Panic = Box<dyn Any + Send + 'static>;

/// State shared by all the tasks of one evaluation.
struct TaskContext<T, S: TaskSpec<T>> {
    spec: S,
    pool: PoolHandle,
    /// Parts with an estimated size at or below this threshold aren't split.
    threshold: usize,
    /// First-wins result of short-circuiting evaluations.
    shared: Mutex<Option<S::Output>>,
    has_shared: AtomicBool,
    /// Set once a task panicked.
    aborted: AtomicBool,
    latch: Status<Option<std::thread::Result<S::Output>>>,
    #[cfg(feature = "log_parallelism")]
    leaves: AtomicUsize,
    _phantom: PhantomData<fn(T)>,
}

/// A node in the tree of tasks of one evaluation.
///
/// Parents own their children, and children refer to their parent weakly. The
/// root is owned by the invoking thread until the evaluation completes.
pub(crate) struct TaskNode<T, S: TaskSpec<T>> {
    ctx: Arc<TaskContext<T, S>>,
    parent: Option<Weak<TaskNode<T, S>>>,
    children: OnceLock<(Arc<TaskNode<T, S>>, Arc<TaskNode<T, S>>)>,
    /// Number of children that haven't completed yet.
    pending: AtomicUsize,
    canceled: AtomicBool,
    result: Mutex<Option<S::Output>>,
    state: S::NodeState,
}

impl<T: 'static, S: TaskSpec<T>> TaskNode<T, S> {
    fn new(ctx: Arc<TaskContext<T, S>>, parent: Option<Weak<TaskNode<T, S>>>) -> Self {
        Self {
            ctx,
            parent,
            children: OnceLock::new(),
            pending: AtomicUsize::new(0),
            canceled: AtomicBool::new(false),
            result: Mutex::new(None),
            state: S::NodeState::default(),
        }
    }

    pub(crate) fn state(&self) -> &S::NodeState {
        &self.state
    }

    pub(crate) fn parent(&self) -> Option<Arc<TaskNode<T, S>>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn children(&self) -> Option<(&Arc<TaskNode<T, S>>, &Arc<TaskNode<T, S>>)> {
        self.children.get().map(|(left, right)| (left, right))
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.get().is_none()
    }

    /// Returns true if this task is the leftmost task of the tree, i.e. the
    /// first one in encounter order.
    pub(crate) fn is_leftmost(&self) -> bool {
        let mut parent = self.parent();
        let mut node_ptr: *const TaskNode<T, S> = self;
        while let Some(p) = parent {
            match p.children() {
                Some((left, _)) if std::ptr::eq(Arc::as_ptr(left), node_ptr) => (),
                _ => return false,
            }
            node_ptr = Arc::as_ptr(&p);
            parent = p.parent();
        }
        true
    }

    pub(crate) fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Returns true if this task or one of its ancestors was canceled.
    pub(crate) fn is_canceled_or_ancestor(&self) -> bool {
        if self.is_canceled() {
            return true;
        }
        let mut parent = self.parent();
        while let Some(p) = parent {
            if p.is_canceled() {
                return true;
            }
            parent = p.parent();
        }
        false
    }

    /// Cancels all the tasks that come after this one in encounter order.
    pub(crate) fn cancel_later_nodes(&self) {
        let mut node_ptr: *const TaskNode<T, S> = self;
        let mut parent = self.parent();
        while let Some(p) = parent {
            if let Some((left, right)) = p.children() {
                if std::ptr::eq(Arc::as_ptr(left), node_ptr) {
                    right.cancel();
                }
            }
            node_ptr = Arc::as_ptr(&p);
            parent = p.parent();
        }
    }

    /// Publishes a first-wins result of the evaluation, after which all tasks
    /// stop as soon as possible.
    pub(crate) fn short_circuit(&self, result: S::Output) {
        if S::SHORT_CIRCUIT {
            let mut shared = self.ctx.shared.lock().unwrap();
            if shared.is_none() {
                *shared = Some(result);
                self.ctx.has_shared.store(true, Ordering::Release);
            }
        }
    }

    /// Returns true once a first-wins result was published.
    pub(crate) fn is_short_circuited(&self) -> bool {
        self.ctx.has_shared.load(Ordering::Acquire)
    }

    fn is_aborted(&self) -> bool {
        self.ctx.aborted.load(Ordering::Acquire)
    }

    pub(crate) fn spec(&self) -> &S {
        &self.ctx.spec
    }

    /// Takes the result of this task, once it has completed.
    pub(crate) fn take_result(&self) -> Option<S::Output> {
        self.result.lock().unwrap().take()
    }

    /// Runs this task: splits the segment as long as it's large enough,
    /// forking one half and looping on the other, then computes the leaf.
    fn compute(self: Arc<Self>, segment: Box<dyn Segment<T>>) {
        let ctx = self.ctx.clone();
        if ctx.aborted.load(Ordering::Acquire) {
            return;
        }
        let outcome = catch_unwind(AssertUnwindSafe(move || {
            Self::compute_inner(self, segment);
        }));
        if let Err(payload) = outcome {
            ctx.abort(payload);
        }
    }

    fn compute_inner(mut task: Arc<Self>, mut segment: Box<dyn Segment<T>>) {
        let ctx = task.ctx.clone();
        let mut fork_right = false;
        let result = loop {
            if task.is_aborted() {
                return;
            }
            if S::SHORT_CIRCUIT && (task.is_short_circuited() || task.is_canceled_or_ancestor()) {
                break ctx.spec.empty();
            }
            if segment.estimate_size() <= ctx.threshold {
                break ctx.spec.leaf(&task, segment);
            }
            let Some(prefix) = segment.try_split() else {
                break ctx.spec.leaf(&task, segment);
            };

            let left = Arc::new(TaskNode::new(ctx.clone(), Some(Arc::downgrade(&task))));
            let right = Arc::new(TaskNode::new(ctx.clone(), Some(Arc::downgrade(&task))));
            task.pending.store(2, Ordering::Release);
            if task.children.set((left.clone(), right.clone())).is_err() {
                panic!("Task was split twice");
            }

            let (next, next_segment, forked, forked_segment) = if fork_right {
                (left, prefix, right, segment)
            } else {
                (right, segment, left, prefix)
            };
            fork_right = !fork_right;
            ctx.pool
                .spawn(move || TaskNode::compute(forked, forked_segment));
            task = next;
            segment = next_segment;
        };

        #[cfg(feature = "log_parallelism")]
        ctx.leaves.fetch_add(1, Ordering::Relaxed);

        *task.result.lock().unwrap() = Some(result);
        Self::try_complete(task);
    }

    /// Notifies the completion of the given task, and completes its ancestors
    /// for which it was the last pending child.
    fn try_complete(mut task: Arc<Self>) {
        loop {
            let ctx = &task.ctx;
            ctx.spec.on_completed(&task);
            let Some(parent) = task.parent() else {
                let result = task.take_result();
                let result = if S::SHORT_CIRCUIT {
                    ctx.shared.lock().unwrap().take().or(result)
                } else {
                    result
                };
                match result {
                    Some(result) => ctx.complete(Ok(result)),
                    None => panic!("Root task completed without a result"),
                }
                return;
            };
            if parent.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            let Some((left, right)) = parent.children() else {
                panic!("Completed task has no children");
            };
            let (left, right) = (left.take_result(), right.take_result());
            let result = match (left, right) {
                (Some(left), Some(right)) => ctx.spec.combine(&parent, left, right),
                _ => panic!("Child task completed without a result"),
            };
            *parent.result.lock().unwrap() = Some(result);
            task = parent;
        }
    }
}

impl<T, S: TaskSpec<T>> TaskContext<T, S> {
    fn complete(&self, result: std::thread::Result<S::Output>) {
        self.latch.update_and_notify_all(|latch| {
            if latch.is_none() {
                *latch = Some(result);
            }
        });
    }

    fn abort(&self, payload: Panic) {
        self.aborted.store(true, Ordering::Release);
        self.complete(Err(payload));
    }

    /// Waits until the evaluation completes, running other jobs of the pool in
    /// the meantime if called from a worker thread.
    fn wait(&self) -> std::thread::Result<S::Output> {
        if self.pool.current_worker().is_some() {
            loop {
                if let Some(result) = self.latch.with(Option::take) {
                    return result;
                }
                if !self.pool.help_once() {
                    let mut latch = self
                        .latch
                        .wait_timeout_while(Duration::from_millis(1), |latch| latch.is_none());
                    if let Some(result) = latch.take() {
                        return result;
                    }
                }
            }
        } else {
            let mut latch = self.latch.wait_while(|latch| latch.is_none());
            match latch.take() {
                Some(result) => result,
                None => unreachable!("Latch released without a result"),
            }
        }
    }
}

/// Evaluates the given segment in parallel according to the given spec, and
/// returns the result of the root task.
///
/// The root task runs on the calling thread. If a task panics, the evaluation
/// is aborted and the panic is resumed on the calling thread.
pub(crate) fn invoke<T: 'static, S: TaskSpec<T>>(
    spec: S,
    segment: Box<dyn Segment<T>>,
    eval: &EvalContext,
) -> S::Output {
    let pool = eval.pool();
    let handle = pool.handle();
    let estimate = segment.estimate_size();
    let leaf_target = handle.num_threads() * handle.leaf_tasks_per_thread();
    let threshold = (estimate / leaf_target.max(1)).max(1);

    let ctx = Arc::new(TaskContext {
        spec,
        pool: handle,
        threshold,
        shared: Mutex::new(None),
        has_shared: AtomicBool::new(false),
        aborted: AtomicBool::new(false),
        latch: Status::new(None),
        #[cfg(feature = "log_parallelism")]
        leaves: AtomicUsize::new(0),
        _phantom: PhantomData,
    });
    let root = Arc::new(TaskNode::new(ctx.clone(), None));
    TaskNode::compute(root.clone(), segment);
    let result = ctx.wait();

    #[cfg(feature = "log_parallelism")]
    log_tasks!(
        "Evaluated {estimate} estimated elements in {} leaves (threshold {threshold})",
        ctx.leaves.load(Ordering::Relaxed)
    );

    drop(root);
    match result {
        Ok(result) => result,
        Err(payload) => resume_unwind(payload),
    }
}

/// Number of leaves a parallel evaluation on the given context aims for.
pub(crate) fn leaf_target(eval: &EvalContext) -> usize {
    let pool = eval.pool();
    let handle = pool.handle();
    handle.num_threads() * handle.leaf_tasks_per_thread()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::pool::{CpuPinningPolicy, ForkJoinPool, ForkJoinPoolBuilder, ThreadCount};
    use crate::flags::{Characteristics, Flags};
    use crate::pipeline::SourceSegment;
    use crate::sink::FnSink;
    use crate::source::{ArraySpliterator, GenerateSpliterator, RangeSpliterator, Spliterator};

    fn pool() -> Arc<ForkJoinPool> {
        Arc::new(
            ForkJoinPoolBuilder {
                num_threads: ThreadCount::try_from(4).unwrap(),
                cpu_pinning: CpuPinningPolicy::No,
                leaf_tasks_per_thread: 4,
            }
            .build(),
        )
    }

    fn segment<T: crate::Element>(spliterator: impl Spliterator<T> + 'static) -> Box<dyn Segment<T>> {
        let flags = Flags::from_source(spliterator.characteristics(), false);
        Box::new(SourceSegment::new(Box::new(spliterator), flags))
    }

    /// Collects the elements in encounter order.
    struct Gather;

    impl TaskSpec<u64> for Gather {
        type Output = Vec<u64>;
        type NodeState = ();

        fn leaf(&self, _node: &TaskNode<u64, Self>, segment: Box<dyn Segment<u64>>) -> Vec<u64> {
            let mut output = Vec::new();
            segment.copy_into(Box::new(&mut output), false);
            output
        }

        fn empty(&self) -> Vec<u64> {
            Vec::new()
        }

        fn combine(&self, _node: &TaskNode<u64, Self>, mut left: Vec<u64>, right: Vec<u64>) -> Vec<u64> {
            left.extend(right);
            left
        }
    }

    #[test]
    fn test_invoke_preserves_order() {
        let ctx = EvalContext::parallel(pool());
        let output = invoke(Gather, segment(RangeSpliterator::new(0u64, 100_000)), &ctx);
        assert_eq!(output, (0..100_000).collect::<Vec<_>>());
    }

    #[test]
    fn test_invoke_empty() {
        let ctx = EvalContext::parallel(pool());
        let output = invoke(Gather, segment(RangeSpliterator::new(0u64, 0)), &ctx);
        assert!(output.is_empty());
    }

    #[test]
    fn test_nested_invoke() {
        struct Nested(Arc<ForkJoinPool>);

        impl TaskSpec<u64> for Nested {
            type Output = u64;
            type NodeState = ();

            fn leaf(&self, _node: &TaskNode<u64, Self>, segment: Box<dyn Segment<u64>>) -> u64 {
                let ctx = EvalContext::parallel(self.0.clone());
                let mut sum = 0;
                segment.copy_into(
                    Box::new(FnSink(|x: u64| {
                        sum += invoke(Gather, super::test::segment(RangeSpliterator::new(0, x % 100)), &ctx)
                            .len() as u64
                    })),
                    false,
                );
                sum
            }

            fn empty(&self) -> u64 {
                0
            }

            fn combine(&self, _node: &TaskNode<u64, Self>, left: u64, right: u64) -> u64 {
                left + right
            }
        }

        let pool = pool();
        let ctx = EvalContext::parallel(pool.clone());
        let output = invoke(Nested(pool), segment(RangeSpliterator::new(0u64, 1000)), &ctx);
        assert_eq!(output, (0..1000).map(|x| x % 100).sum::<u64>());
    }

    /// Finds any element above the threshold, short-circuiting.
    struct FindAbove(u64);

    impl TaskSpec<u64> for FindAbove {
        type Output = Option<u64>;
        type NodeState = ();
        const SHORT_CIRCUIT: bool = true;

        fn leaf(&self, node: &TaskNode<u64, Self>, segment: Box<dyn Segment<u64>>) -> Option<u64> {
            let mut found = None;
            let mut spliterator = segment.into_spliterator(false);
            while found.is_none() && !node.is_short_circuited() {
                if !spliterator.try_advance(&mut |x| {
                    if x > self.0 {
                        found = Some(x)
                    }
                }) {
                    break;
                }
            }
            if let Some(x) = found {
                node.short_circuit(Some(x));
            }
            found
        }

        fn empty(&self) -> Option<u64> {
            None
        }

        fn combine(&self, _node: &TaskNode<u64, Self>, left: Option<u64>, right: Option<u64>) -> Option<u64> {
            left.or(right)
        }
    }

    #[test]
    fn test_short_circuit_unbounded() {
        let ctx = EvalContext::parallel(pool());
        let counter = Arc::new(AtomicUsize::new(0));
        let spliterator = GenerateSpliterator::new({
            let counter = counter.clone();
            move || counter.fetch_add(1, Ordering::Relaxed) as u64
        });
        let found = invoke(FindAbove(10_000), segment(spliterator), &ctx);
        assert!(found.is_some_and(|x| x > 10_000));
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_panic_propagates() {
        struct Boom;

        impl TaskSpec<u64> for Boom {
            type Output = ();
            type NodeState = ();

            fn leaf(&self, _node: &TaskNode<u64, Self>, segment: Box<dyn Segment<u64>>) {
                segment.copy_into(
                    Box::new(FnSink(|x: u64| {
                        if x == 777 {
                            panic!("boom")
                        }
                    })),
                    false,
                );
            }

            fn empty(&self) {}

            fn combine(&self, _node: &TaskNode<u64, Self>, _left: (), _right: ()) {}
        }

        let ctx = EvalContext::parallel(pool());
        invoke(Boom, segment(RangeSpliterator::new(0u64, 10_000)), &ctx);
    }

    #[test]
    fn test_leftmost_and_cancel() {
        /// Records for each leaf whether it's leftmost, and cancels later
        /// nodes from the leftmost leaf.
        struct Leftmost;

        impl TaskSpec<u64> for Leftmost {
            type Output = usize;
            type NodeState = ();
            const SHORT_CIRCUIT: bool = true;

            fn leaf(&self, node: &TaskNode<u64, Self>, _segment: Box<dyn Segment<u64>>) -> usize {
                if node.is_leftmost() {
                    node.cancel_later_nodes();
                    1
                } else {
                    0
                }
            }

            fn empty(&self) -> usize {
                0
            }

            fn combine(&self, _node: &TaskNode<u64, Self>, left: usize, right: usize) -> usize {
                left + right
            }
        }

        let ctx = EvalContext::parallel(pool());
        let array = ArraySpliterator::new((0..10_000u64).collect(), Characteristics::ORDERED);
        let output = invoke(Leftmost, segment(array), &ctx);
        assert_eq!(output, 1);
    }
}
