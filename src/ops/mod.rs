// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Intermediate and terminal operations.
//!
//! Stateless intermediate operations only wrap sinks. Stateful ones
//! ([`distinct`], [`sorted`] and [`slice`]) additionally know how to
//! evaluate their upstream in parallel, since they need to see more than one
//! element at a time. Terminal operations evaluate a whole segment, either
//! by pushing it into a single sink or through a tree of tasks.

pub(crate) mod collect;
pub(crate) mod distinct;
pub(crate) mod find;
pub(crate) mod for_each;
pub(crate) mod matching;
pub(crate) mod reduce;
pub(crate) mod slice;
pub(crate) mod sorted;
pub(crate) mod stateless;
