//! Benchmarks for the capture hot path.
//!
//! Covers the full policy chain plus the cluster search that dominates it
//! on large territories.

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use neon_grid::game::cluster::largest_cluster;
use neon_grid::{CaptureCoordinator, GameConfig, ParticipantId, TileCoord};

fn pid(n: u8) -> ParticipantId {
    ParticipantId::from_bytes([n; 16])
}

fn running() -> CaptureCoordinator {
    let config = GameConfig {
        rate_limit_max_requests: usize::MAX,
        capture_cost: 0,
        ..GameConfig::default()
    };
    let mut coord = CaptureCoordinator::new(config, 42).unwrap();
    coord.join(pid(1), 0);
    coord.start_round(0).unwrap();
    coord
}

fn bench_capture_sweep(c: &mut Criterion) {
    c.bench_function("capture_sweep_100x100", |b| {
        b.iter(|| {
            let mut coord = running();
            for y in 0..100 {
                for x in 0..100 {
                    black_box(coord.handle_capture(&pid(1), TileCoord::new(x, y), 1));
                }
            }
        });
    });
}

fn bench_cluster_full_board(c: &mut Criterion) {
    let mut coord = running();
    for y in 0..100 {
        for x in 0..100 {
            let _ = coord.try_capture(&pid(1), TileCoord::new(x, y), 1);
        }
    }

    c.bench_function("largest_cluster_10k", |b| {
        b.iter(|| black_box(largest_cluster(black_box(coord.grid()), &pid(1))));
    });
}

criterion_group!(benches, bench_capture_sweep, bench_cluster_full_board);
criterion_main!(benches);
