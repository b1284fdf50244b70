// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to run example pipelines, sequentially or in parallel.
//!
//! Run with `--features log` and `RUST_LOG=debug` to see how pipelines are
//! evaluated, and with `--features log_parallelism` to see how parallel
//! evaluations were split into tasks.

use clap::{Parser, ValueEnum};
use lazyflow::collector::{counting, grouping_by};
use lazyflow::{CpuPinningPolicy, Element, ForkJoinPool, ForkJoinPoolBuilder, Stream, ThreadCount};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::Arc;

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let pool = Arc::new(
        ForkJoinPoolBuilder {
            num_threads: match cli.num_threads {
                Some(num_threads) => ThreadCount::Count(num_threads),
                None => ThreadCount::AvailableParallelism,
            },
            cpu_pinning: CpuPinningPolicy::IfSupported,
            leaf_tasks_per_thread: cli.leaf_tasks_per_thread,
        }
        .build(),
    );

    let result = match cli.scenario {
        Scenario::Sum => cli.mode.apply(Stream::range(0, cli.input_size), &pool)
            .sum()
            .map(|sum| format!("sum = {sum}")),
        Scenario::Sort => {
            let input = random_input(cli.input_size as usize);
            cli.mode.apply(Stream::of(black_box(input)), &pool)
                .sorted()
                .to_vec()
                .map(|output| format!("sorted {} elements", output.len()))
        }
        Scenario::Distinct => {
            let input = random_input(cli.input_size as usize);
            cli.mode.apply(Stream::of(black_box(input)), &pool)
                .map(|x| x % 1000)
                .distinct()
                .count()
                .map(|count| format!("{count} distinct elements"))
        }
        Scenario::Slice => cli.mode.apply(Stream::range(0, cli.input_size), &pool)
            .filter(|x| x % 3 == 0)
            .skip(cli.input_size as usize / 10)
            .limit(10)
            .to_vec()
            .map(|window| format!("window = {window:?}")),
        Scenario::Group => cli.mode.apply(Stream::range(0, cli.input_size), &pool)
            .collect(grouping_by(|x: &u64| x.trailing_zeros(), counting()))
            .map(|groups| {
                let mut groups = groups.into_iter().collect::<Vec<_>>();
                groups.sort();
                format!("trailing zeros: {groups:?}")
            }),
        Scenario::FindAny => {
            let input = fill_needles(cli.input_size as usize, cli.density);
            cli.mode.apply(Stream::of(black_box(input)), &pool)
                .filter(|&(_, needle)| needle)
                .find_any()
                .map(|found| format!("found = {:?}", found.map(|(i, _)| i)))
        }
        Scenario::FindFirst => {
            let input = fill_needles(cli.input_size as usize, cli.density);
            cli.mode.apply(Stream::of(black_box(input)), &pool)
                .filter(|&(_, needle)| needle)
                .find_first()
                .map(|found| format!("found = {:?}", found.map(|(i, _)| i)))
        }
    };

    match result {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Pipeline failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Creates a vector of `input_size` random numbers, fixed by a constant seed
/// for reproducibility.
fn random_input(input_size: usize) -> Vec<u64> {
    let mut rng = ChaCha12Rng::seed_from_u64(42);
    (0..input_size).map(|_| rng.random()).collect()
}

/// Creates a vector of `input_size` indexed booleans, `density` of which are
/// set to [`true`] (the needles). The set of needles follows a uniform
/// distribution, but is fixed by a constant seed for reproducibility.
fn fill_needles(input_size: usize, density: usize) -> Vec<(usize, bool)> {
    let mut input = (0..input_size).map(|i| (i, false)).collect::<Vec<_>>();

    let mut rng = ChaCha12Rng::seed_from_u64(42);
    let needles = index::sample(&mut rng, input_size, density.min(input_size));
    for needle in needles {
        input[needle].1 = true;
    }

    input
}

/// CLI tool to run example pipelines.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Target number of leaf tasks per worker thread.
    #[arg(long, default_value_t = 4)]
    leaf_tasks_per_thread: usize,

    /// Whether to evaluate the pipeline sequentially or in parallel.
    #[arg(long, value_enum, default_value_t = Mode::Parallel)]
    mode: Mode,

    /// Pipeline to run.
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Number of items in the input.
    #[arg(long, default_value_t = 1_000_000)]
    input_size: u64,

    /// Density of items that match the search. Used only for the find-any and
    /// find-first scenarios.
    #[arg(long, default_value_t = 1)]
    density: usize,
}

/// Evaluation mode.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Evaluate on the calling thread.
    Sequential,
    /// Evaluate on the thread pool.
    Parallel,
}

impl Mode {
    fn apply<T: Element>(self, stream: Stream<T>, pool: &Arc<ForkJoinPool>) -> Stream<T> {
        match self {
            Mode::Sequential => stream.sequential(),
            Mode::Parallel => stream.parallel().with_pool(pool.clone()),
        }
    }
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
enum Scenario {
    /// Sum a range of numbers.
    Sum,
    /// Sort random numbers.
    Sort,
    /// Count distinct values among random numbers.
    Distinct,
    /// Take a window of a filtered range.
    Slice,
    /// Count numbers by their number of trailing zeros.
    Group,
    /// Find any needle.
    FindAny,
    /// Find the first needle.
    FindFirst,
}
