#[macro_use]
extern crate criterion;

use criterion::black_box;
use criterion::Criterion;

use rand::prelude::*;

use packed_bitsets::batch::{device, host};
use packed_bitsets::{Bitset, BitsetPack, CountOptions, SetOp};

const SEED0: u64 = 0x0304_0106_0308_0600;
const SEED1: u64 = 0x0905_0407_0608_0102;

fn generate_seeded_bitset(length: usize, count: usize, seed: u64) -> Bitset {
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut set = Bitset::new(length);
    for _ in 0..count {
        set.set_bit(rng.gen_range(0..length));
    }

    set
}

fn setup_pair() -> (Bitset, Bitset) {
    let a = generate_seeded_bitset(1 << 20, 1 << 18, SEED0);
    let b = generate_seeded_bitset(1 << 20, 1 << 18, SEED1);

    (a, b)
}

fn setup_packs(length: usize, probes: usize, references: usize) -> (BitsetPack, BitsetPack) {
    let mut a = BitsetPack::new(length, probes);
    for i in 0..probes {
        a.put(i, &generate_seeded_bitset(length, length / 4, SEED0 + i as u64));
    }

    let mut b = BitsetPack::new(length, references);
    for i in 0..references {
        b.put(i, &generate_seeded_bitset(length, length / 4, SEED1 + i as u64));
    }

    (a, b)
}

fn pairwise_intersection_count(c: &mut Criterion) {
    let (a, b) = setup_pair();

    c.bench_function("pairwise intersection count - 1M bits", move |bencher| {
        bencher.iter(|| packed_bitsets::intersection_count(black_box(Some(&a)), black_box(Some(&b))))
    });
}

fn pairwise_intersection(c: &mut Criterion) {
    let (a, b) = setup_pair();

    c.bench_function("pairwise intersection - 1M bits", move |bencher| {
        bencher.iter_with_large_drop(|| packed_bitsets::intersection(black_box(Some(&a)), black_box(Some(&b))))
    });
}

fn batched_host_single_worker(c: &mut Criterion) {
    let (a, b) = setup_packs(1024, 8, 4096);
    let opts = CountOptions { worker_count: 1, ..Default::default() };

    c.bench_function("batched intersection counts - host, 1 worker", move |bencher| {
        bencher.iter_with_large_drop(|| host::setop_counts(SetOp::And, black_box(&a), black_box(&b), &opts))
    });
}

fn batched_host_all_workers(c: &mut Criterion) {
    let (a, b) = setup_packs(1024, 8, 4096);
    let opts = CountOptions::default();

    c.bench_function("batched intersection counts - host, all workers", move |bencher| {
        bencher.iter_with_large_drop(|| host::setop_counts(SetOp::And, black_box(&a), black_box(&b), &opts))
    });
}

fn batched_device_pinned_reference(c: &mut Criterion) {
    let (a, b) = setup_packs(1024, 8, 4096);

    // The reference pack stays pinned on the device across iterations; only
    // the final iteration's buffers are released by the harness drop
    let opts = CountOptions { release_counts: true, ..Default::default() };

    c.bench_function("batched intersection counts - device, pinned reference", move |bencher| {
        bencher.iter_with_large_drop(|| device::setop_counts(SetOp::And, black_box(&a), black_box(&b), &opts))
    });
}

fn probe_scan_max(c: &mut Criterion) {
    let (probe, references) = setup_packs(1024, 1, 100_000);
    let opts = CountOptions::default();

    c.bench_function("probe scan max - 100k references", move |bencher| {
        bencher.iter(|| {
            let counts = host::setop_counts(SetOp::And, black_box(&probe), black_box(&references), &opts);
            counts.into_iter().max()
        })
    });
}

criterion_group!(
    pairwise,
    pairwise_intersection_count,
    pairwise_intersection
);
criterion_group!(
    batched,
    batched_host_single_worker,
    batched_host_all_workers,
    batched_device_pinned_reference,
    probe_scan_max
);

criterion_main!(pairwise, batched);
