// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Internal logging macros. They forward to the `log` crate when the `log`
//! feature is enabled, and expand to an empty block otherwise (the arguments
//! are then not evaluated).

macro_rules! log_debug {
    ( $($args:tt)* ) => {{
        #[cfg(feature = "log")]
        log::debug!( $($args)* );
    }};
}

macro_rules! log_warn {
    ( $($args:tt)* ) => {{
        #[cfg(feature = "log")]
        log::warn!( $($args)* );
    }};
}

macro_rules! log_error {
    ( $($args:tt)* ) => {{
        #[cfg(feature = "log")]
        log::error!( $($args)* );
    }};
}

/// Reports how a parallel evaluation was split into tasks, and how the pool
/// distributed its jobs. Only available with the `log_parallelism` feature.
#[cfg(feature = "log_parallelism")]
macro_rules! log_tasks {
    ( $($args:tt)* ) => {
        log::info!(target: "lazyflow::tasks", $($args)* )
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
#[cfg(feature = "log_parallelism")]
pub(crate) use log_tasks;
pub(crate) use log_warn;
