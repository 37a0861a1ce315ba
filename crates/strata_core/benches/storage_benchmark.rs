//! # Chunk Storage Benchmark
//!
//! Parallel prewarm vs one-by-one chunk allocation from a fresh arena.
//!
//! Run with: `cargo bench --package strata_core --bench storage_benchmark`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use strata_core::{ArchetypeRegistry, ChunkStorage, EcsConfig, TypeRegistry};

fn bench_prewarm(c: &mut Criterion) {
    let mut types = TypeRegistry::new();
    let a = types.register::<[f32; 4]>();
    let b = types.register::<u64>();
    let mut archetypes = ArchetypeRegistry::new();
    let archetype = *archetypes.archetype_of_types(&types, &[a, b]);

    let mut group = c.benchmark_group("prewarm");
    for count in [64, 512, 2048] {
        let config = EcsConfig::default().with_arena_size(count * 64 * 1024);

        group.bench_with_input(BenchmarkId::new("reserve", count), &count, |bench, &count| {
            bench.iter(|| {
                let storage = ChunkStorage::new(&config).unwrap();
                storage.reserve(&types, &archetype, count);
                black_box(storage.carved_chunks())
            });
        });

        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |bench, &count| {
            bench.iter(|| {
                let storage = ChunkStorage::new(&config).unwrap();
                let chunks: Vec<_> = (0..count)
                    .map(|_| storage.allocate_chunk(&types, &archetype))
                    .collect();
                black_box(chunks.len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_prewarm);
criterion_main!(benches);
