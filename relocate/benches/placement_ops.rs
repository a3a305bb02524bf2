//! Benchmarks for placement merging and the lifecycle state machine.
//!
//! - Merge of small and wide placement maps
//! - Parsing of raw `key=value` entries
//! - A full happy-path walk of the state machine

#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relocate::{
    merge, parse_added_placement, MigrationRequest, MigrationSpec, NodeName, PhaseEvent,
    PlacementMap, WorkloadId,
};

fn wide_map(prefix: &str, size: usize) -> PlacementMap {
    (0..size)
        .map(|i| (format!("{prefix}-{i}"), format!("value-{i}")))
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [4usize, 32, 256] {
        let base = wide_map("key", size);
        // Half the addition overlaps the base and is dropped.
        let mut addition = wide_map("key", size / 2);
        addition.extend(wide_map("extra", size / 2));

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| merge(&base, &addition));
        });
    }

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let entries: Vec<String> = (0..32).map(|i| format!("key-{i}=value-{i}")).collect();

    c.bench_function("parse_added_placement_32", |b| {
        b.iter(|| parse_added_placement(&entries).expect("entries are well formed"));
    });
}

fn bench_lifecycle(c: &mut Criterion) {
    let workload = WorkloadId::new("bench", "vm");

    c.bench_function("happy_path_transitions", |b| {
        b.iter(|| {
            let mut request = MigrationRequest::new(
                workload.clone(),
                MigrationSpec::default(),
                Some(NodeName::new("node-a")),
            );
            for event in [
                PhaseEvent::Admitted,
                PhaseEvent::TargetPlaced {
                    node: NodeName::new("node-b"),
                },
                PhaseEvent::PreparingTarget,
                PhaseEvent::TargetReady,
                PhaseEvent::TransferStarted,
                PhaseEvent::TransferCompleted,
            ] {
                request.apply(event).expect("valid transition");
            }
            request
        });
    });
}

criterion_group!(benches, bench_merge, bench_parse, bench_lifecycle);
criterion_main!(benches);
