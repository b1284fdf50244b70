// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Push-style consumers, chained from the terminal operation back to the
//! source.

/// A consumer of values, driven by a `begin`, zero or more `accept` and an
/// `end` call.
///
/// Each intermediate stage wraps the sink of the next stage. A stage must
/// propagate `begin` before its first `accept` downstream, and propagate `end`
/// exactly once. A producer should stop pushing values once
/// [`cancellation_requested()`](Self::cancellation_requested) returns true.
pub trait Sink<T>: Send {
    /// Resets the sink before receiving values. The size is the exact number
    /// of values that will be pushed, if known.
    fn begin(&mut self, _size: Option<usize>) {}

    /// Receives a value.
    fn accept(&mut self, value: T);

    /// Signals that all values have been pushed.
    fn end(&mut self) {}

    /// Returns true if this sink doesn't want to receive more values.
    fn cancellation_requested(&self) -> bool {
        false
    }
}

impl<T, S: Sink<T> + ?Sized> Sink<T> for &mut S {
    fn begin(&mut self, size: Option<usize>) {
        (**self).begin(size)
    }

    fn accept(&mut self, value: T) {
        (**self).accept(value)
    }

    fn end(&mut self) {
        (**self).end()
    }

    fn cancellation_requested(&self) -> bool {
        (**self).cancellation_requested()
    }
}

impl<T, S: Sink<T> + ?Sized> Sink<T> for Box<S> {
    fn begin(&mut self, size: Option<usize>) {
        (**self).begin(size)
    }

    fn accept(&mut self, value: T) {
        (**self).accept(value)
    }

    fn end(&mut self) {
        (**self).end()
    }

    fn cancellation_requested(&self) -> bool {
        (**self).cancellation_requested()
    }
}

/// A sink calling a function on each value.
pub struct FnSink<F>(pub F);

impl<T, F: FnMut(T) + Send> Sink<T> for FnSink<F> {
    fn accept(&mut self, value: T) {
        (self.0)(value)
    }
}

/// A sink appending values to a vector.
impl<T: Send> Sink<T> for Vec<T> {
    fn begin(&mut self, size: Option<usize>) {
        // The size is only a hint here: fall back to growing on demand.
        if let Some(size) = size {
            let _ = self.try_reserve(size);
        }
    }

    fn accept(&mut self, value: T) {
        self.push(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Limit<'a> {
        remaining: usize,
        downstream: Box<dyn Sink<i32> + 'a>,
    }

    impl Sink<i32> for Limit<'_> {
        fn begin(&mut self, size: Option<usize>) {
            self.downstream
                .begin(size.map(|size| size.min(self.remaining)))
        }

        fn accept(&mut self, value: i32) {
            if self.remaining > 0 {
                self.remaining -= 1;
                self.downstream.accept(value);
            }
        }

        fn end(&mut self) {
            self.downstream.end()
        }

        fn cancellation_requested(&self) -> bool {
            self.remaining == 0 || self.downstream.cancellation_requested()
        }
    }

    #[test]
    fn test_chain() {
        let mut output = Vec::new();
        {
            let mut sink = Limit {
                remaining: 3,
                downstream: Box::new(&mut output),
            };
            sink.begin(Some(10));
            for i in 0..10 {
                if sink.cancellation_requested() {
                    break;
                }
                sink.accept(i);
            }
            sink.end();
        }
        assert_eq!(output, [0, 1, 2]);
        assert!(output.capacity() >= 3);
    }

    #[test]
    fn test_fn_sink() {
        let mut sum = 0;
        let mut sink = FnSink(|x: i32| sum += x);
        sink.begin(None);
        sink.accept(1);
        sink.accept(2);
        sink.end();
        assert!(!sink.cancellation_requested());
        drop(sink);
        assert_eq!(sum, 3);
    }
}
