//! Bitmap and block-descriptor benchmarks using criterion.
//!
//! Run with: cargo bench --bench bitmap_bench

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use sable_runtime::bitmap::Bitmap;
use sable_runtime::block::BlockDescriptor;

type PageMap = Bitmap<512, 8>;

fn sparse_map() -> PageMap {
    let mut map = PageMap::new();
    for i in (7..512).step_by(61) {
        map.set_bit(i);
    }
    map
}

fn bench_scans(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitmap_scan");
    group.throughput(Throughput::Elements(1));

    let map = sparse_map();
    group.bench_function("find_set", |b| {
        b.iter(|| black_box(map.find_set(black_box(100))))
    });
    group.bench_function("find_set_backward", |b| {
        b.iter(|| black_box(map.find_set_backward(black_box(500))))
    });
    group.bench_function("count_bits", |b| {
        b.iter(|| black_box(map.count_bits(black_box(3), black_box(500))))
    });
    group.bench_function("next_free_range", |b| {
        b.iter(|| {
            let mut index = 0;
            let mut length = 0;
            black_box(map.next_free_range(black_box(0), &mut index, &mut length))
        })
    });
    group.finish();
}

fn bench_ranges(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitmap_range");

    group.bench_function("set_clear_64", |b| {
        let mut map = PageMap::new();
        b.iter(|| {
            map.set_range(black_box(60), black_box(64));
            map.clear_range(black_box(60), black_box(64));
        })
    });
    group.bench_function("set_clear_rolling_64", |b| {
        let mut map = PageMap::new();
        b.iter(|| {
            map.set_rolling_range(black_box(480), black_box(64));
            map.clear_rolling_range(black_box(480), black_box(64));
        })
    });
    group.finish();
}

fn bench_block_descriptor(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_descriptor");
    group.throughput(Throughput::Elements(1));

    group.bench_function("reserve_release_4", |b| {
        let mut block = BlockDescriptor::new(0, 0);
        b.iter(|| {
            let index = block.reserve(black_box(4));
            block.release(index, 4);
        })
    });

    group.bench_function("reserve_release_fragmented", |b| {
        // A checkerboard of allocations so reserve has to scan.
        let mut block = BlockDescriptor::new(0, 0);
        for _ in 0..64 {
            block.reserve(4);
        }
        for i in (0..64).step_by(2) {
            block.release(i * 4, 4);
        }
        b.iter(|| {
            let index = block.reserve(black_box(4));
            block.release(index, 4);
        })
    });
    group.finish();
}

criterion_group!(benches, bench_scans, bench_ranges, bench_block_descriptor);
criterion_main!(benches);
