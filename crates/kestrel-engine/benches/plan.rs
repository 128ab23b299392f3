//! Benchmarks for wave leveling in the plan builder.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    missing_docs,
    reason = "Benchmark code is allowed to unwrap"
)]

use criterion::{Criterion, criterion_group, criterion_main};
use kestrel_core::{GoalId, StepId, StepSpec};
use kestrel_engine::build_plan;
use std::hint::black_box;

/// `count` independent steps: one wide wave.
fn wide_steps(count: u32) -> Vec<StepSpec> {
    (1..=count)
        .map(|id| StepSpec::new(id, "noop".to_owned()))
        .collect()
}

/// A chain of `count` steps: one step per wave.
fn deep_steps(count: u32) -> Vec<StepSpec> {
    (1..=count)
        .map(|id| {
            let spec = StepSpec::new(id, "noop".to_owned());
            if id > 1 {
                spec.with_dependencies(vec![StepId::new(id - 1)])
            } else {
                spec
            }
        })
        .collect()
}

/// `layers` waves of `width` steps, each step depending on the whole
/// previous layer.
fn layered_steps(layers: u32, width: u32) -> Vec<StepSpec> {
    let mut steps = Vec::new();
    for layer in 0..layers {
        for slot in 0..width {
            let id = layer * width + slot + 1;
            let mut spec = StepSpec::new(id, "noop".to_owned());
            if layer > 0 {
                let previous = ((layer - 1) * width + 1..=layer * width)
                    .map(StepId::new)
                    .collect();
                spec = spec.with_dependencies(previous);
            }
            steps.push(spec);
        }
    }
    steps
}

fn bench_build_plan(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("build_plan");

    let wide = wide_steps(200);
    group.bench_function("wide_200", |bencher| {
        bencher.iter(|| build_plan(GoalId::new(), black_box(&wide)).unwrap());
    });

    let deep = deep_steps(200);
    group.bench_function("deep_200", |bencher| {
        bencher.iter(|| build_plan(GoalId::new(), black_box(&deep)).unwrap());
    });

    let layered = layered_steps(20, 10);
    group.bench_function("layered_20x10", |bencher| {
        bencher.iter(|| build_plan(GoalId::new(), black_box(&layered)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_build_plan);
criterion_main!(benches);
