//! Benchmarks for rule decomposition and grouping.
//!
//! Run with: cargo bench
//!
//! This benchmark suite measures:
//! - Range-to-prefix decomposition of single ranges
//! - Whole rule set conversion to prefix form
//! - Category grouping and sharding at different rule set sizes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rulesplit::rule::prefix::to_prefix_rules;
use rulesplit::rule::{AddrRange, PortRange, Protocol};
use rulesplit::{decompose, IdAssignment, Rule, RuleGrouper, RuleSet};

/// Generate a ClassBench-like rule set: mostly narrow addresses, some
/// wildcards, a mix of exact and ranged ports.
fn generate_rules(count: usize, seed: u64) -> RuleSet {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..count)
        .map(|i| {
            let src_len = [0u8, 8, 16, 24, 32][rng.gen_range(0..5)];
            let dst_len = [0u8, 16, 24, 32][rng.gen_range(0..4)];
            let dst_port = if i % 3 == 0 {
                PortRange::new(1024, rng.gen_range(1024..=u16::MAX))
            } else {
                let port = rng.gen_range(1..1024);
                PortRange::new(port, port)
            };

            Rule {
                id: None,
                src: prefix_range(rng.gen(), src_len),
                dst: prefix_range(rng.gen(), dst_len),
                src_port: PortRange::any(),
                dst_port,
                protocol: Protocol::exact(6),
            }
        })
        .collect()
}

fn prefix_range(addr: u32, len: u8) -> AddrRange {
    if len == 0 {
        return AddrRange::any();
    }
    let mask = u32::MAX << (32 - u32::from(len));
    AddrRange::new(addr & mask, (addr & mask) | !mask)
}

fn bench_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompose");

    group.bench_function("port_worst_case", |b| {
        b.iter(|| decompose(black_box(1), black_box(65534), 16))
    });

    group.bench_function("addr_unaligned", |b| {
        b.iter(|| decompose(black_box(0x0A00_0001), black_box(0x0AFF_FFFE), 32))
    });

    group.bench_function("aligned", |b| {
        b.iter(|| decompose(black_box(1024), black_box(2047), 16))
    });

    group.finish();
}

fn bench_to_prefix(c: &mut Criterion) {
    let rules = generate_rules(10_000, 1);
    let mut group = c.benchmark_group("to_prefix_rules");
    group.throughput(Throughput::Elements(rules.len() as u64));

    for ids in [IdAssignment::Fresh, IdAssignment::Inherit] {
        group.bench_with_input(BenchmarkId::new("ids", format!("{:?}", ids)), &ids, |b, &ids| {
            b.iter(|| to_prefix_rules(black_box(&rules), ids))
        });
    }

    group.finish();
}

fn bench_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouping");

    for size in [1_000usize, 10_000, 100_000].iter() {
        let rules = generate_rules(*size, 2).tagged(1);
        let grouper = RuleGrouper::new(0.1).with_rebalance(3000, 2);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("rules", size), size, |b, _| {
            let mut rng = StdRng::seed_from_u64(3);
            b.iter(|| grouper.partition(black_box(&rules), &mut rng))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decompose, bench_to_prefix, bench_grouping);
criterion_main!(benches);
