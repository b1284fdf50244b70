// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::Spliterator;
use crate::flags::{Characteristics, Flags, StreamFlag};
use crate::pipeline::{Driver, Segment};
use crate::sink::Sink;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A spliterator over the output of a pipeline segment.
///
/// Elements are pulled lazily: each advance pushes source elements through the
/// segment's sink chain until at least one output element is buffered. The
/// segment can be split as long as traversal hasn't started.
pub(crate) struct WrappingSpliterator<T> {
    state: State<T>,
    flags: Flags,
    source_characteristics: Characteristics,
    parallel: bool,
}

enum State<T> {
    Fresh(Box<dyn Segment<T>>),
    Started {
        driver: Box<dyn Driver>,
        buffer: Arc<Mutex<VecDeque<T>>>,
        finished: bool,
    },
    Done,
}

struct BufferSink<T> {
    buffer: Arc<Mutex<VecDeque<T>>>,
}

impl<T: Send> Sink<T> for BufferSink<T> {
    fn accept(&mut self, value: T) {
        self.buffer.lock().unwrap().push_back(value);
    }
}

impl<T: Send + 'static> WrappingSpliterator<T> {
    pub(crate) fn new(segment: Box<dyn Segment<T>>, parallel: bool) -> Self {
        Self {
            flags: segment.flags(),
            source_characteristics: segment.source_characteristics(),
            state: State::Fresh(segment),
            parallel,
        }
    }

    fn start(&mut self) {
        if let State::Fresh(_) = self.state {
            if let State::Fresh(segment) = std::mem::replace(&mut self.state, State::Done) {
                let buffer = Arc::new(Mutex::new(VecDeque::new()));
                let mut driver = segment.wrap(Box::new(BufferSink {
                    buffer: buffer.clone(),
                }));
                driver.begin(driver.exact_size());
                self.state = State::Started {
                    driver,
                    buffer,
                    finished: false,
                };
            }
        }
    }

    /// Returns the next buffered element, pushing source elements through the
    /// sink chain as needed.
    fn pull(&mut self) -> Option<T> {
        self.start();
        let State::Started {
            driver,
            buffer,
            finished,
        } = &mut self.state
        else {
            return None;
        };
        loop {
            if let Some(x) = buffer.lock().unwrap().pop_front() {
                return Some(x);
            }
            if *finished {
                return None;
            }
            if driver.cancellation_requested() || !driver.try_advance() {
                driver.end();
                *finished = true;
            }
        }
    }
}

impl<T: Send + 'static> Spliterator<T> for WrappingSpliterator<T> {
    fn try_advance(&mut self, action: &mut dyn FnMut(T)) -> bool {
        match self.pull() {
            Some(x) => {
                action(x);
                true
            }
            None => false,
        }
    }

    fn for_each_remaining(&mut self, action: &mut dyn FnMut(T)) {
        while let Some(x) = self.pull() {
            action(x);
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn Spliterator<T>>> {
        if !self.parallel {
            return None;
        }
        match &mut self.state {
            State::Fresh(segment) => {
                let prefix = segment.try_split()?;
                Some(Box::new(WrappingSpliterator::new(prefix, self.parallel)))
            }
            _ => None,
        }
    }

    fn estimate_size(&self) -> usize {
        match &self.state {
            State::Fresh(segment) => segment.estimate_size(),
            State::Started {
                driver,
                buffer,
                finished,
            } => {
                let buffered = buffer.lock().unwrap().len();
                if *finished {
                    buffered
                } else {
                    driver.estimate_size().saturating_add(buffered)
                }
            }
            State::Done => 0,
        }
    }

    fn characteristics(&self) -> Characteristics {
        let characteristics = self.flags.to_characteristics();
        if characteristics.contains(Characteristics::SIZED) {
            characteristics.without(Characteristics::SIZED | Characteristics::SUBSIZED)
                | (self.source_characteristics
                    & (Characteristics::SIZED | Characteristics::SUBSIZED))
        } else {
            characteristics
        }
    }

    fn exact_size_if_known(&self) -> Option<usize> {
        if self.flags.is_known(StreamFlag::Sized) {
            match &self.state {
                State::Fresh(segment) => segment.exact_source_size(),
                State::Started {
                    driver,
                    buffer,
                    finished,
                } => {
                    let buffered = buffer.lock().unwrap().len();
                    if *finished {
                        Some(buffered)
                    } else {
                        driver.exact_size().map(|n| n + buffered)
                    }
                }
                State::Done => Some(0),
            }
        } else {
            None
        }
    }
}
