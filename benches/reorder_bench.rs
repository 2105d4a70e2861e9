//! Throughput of the reorder buffer under in-order and shuffled arrival.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dtls_session_core::reorder::ReorderBuffer;

fn in_order(n: u64) {
    let buffer = ReorderBuffer::new();
    for seq in 0..n {
        black_box(buffer.insert_and_flush(seq, vec![0u8; 64]));
    }
}

fn interleaved_pairs(n: u64) {
    // Swap each adjacent pair: 1, 0, 3, 2, 5, 4, ... — a bounded, constant
    // amount of reordering per record rather than an unbounded shuffle.
    let buffer = ReorderBuffer::new();
    let mut seq = 0u64;
    while seq < n {
        if seq + 1 < n {
            black_box(buffer.insert_and_flush(seq + 1, vec![0u8; 64]));
            black_box(buffer.insert_and_flush(seq, vec![0u8; 64]));
        } else {
            black_box(buffer.insert_and_flush(seq, vec![0u8; 64]));
        }
        seq += 2;
    }
}

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("reorder_buffer");
    for &n in &[100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("in_order", n), &n, |b, &n| {
            b.iter(|| in_order(n));
        });
        group.bench_with_input(BenchmarkId::new("interleaved_pairs", n), &n, |b, &n| {
            b.iter(|| interleaved_pairs(n));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reorder);
criterion_main!(benches);
