// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core engine: fork/join thread pool, task trees and synchronization
//! primitives.

pub(crate) mod pool;
pub(crate) mod task;
pub(crate) mod util;

pub use pool::{CpuPinningPolicy, ForkJoinPool, ForkJoinPoolBuilder, ThreadCount};
