use std::hint::black_box;
use std::path::Path;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rangebench::datasets::text::parse_range_pairs;
use rangebench::datasets::vecs::{decode_vecs, encode_vecs};
use rangebench_index::{BuildParams, RangeIndexEngine, RangeTreeEngine, SearchParams};

const VECTORS: usize = 10_000;
const DIMENSION: usize = 128;

fn random_vectors(rng: &mut StdRng, n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| (0..DIMENSION).map(|_| rng.gen::<f32>()).collect())
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut encoded = Vec::new();
    encode_vecs(&mut encoded, &random_vectors(&mut rng, VECTORS)).expect("encode in memory");

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("fvecs", |b| {
        b.iter(|| decode_vecs::<f32, _>(black_box(encoded.as_slice())))
    });

    let ranges: String = (0..VECTORS).map(|i| format!("{}-{}\n", i, i + 100)).collect();
    group.throughput(Throughput::Elements(VECTORS as u64));
    group.bench_function("range_pairs", |b| {
        b.iter(|| {
            parse_range_pairs(black_box(ranges.as_bytes()), Path::new("ranges.txt"))
                .expect("ranges should parse")
        })
    });
    group.finish();
}

fn bench_range_search(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let engine = RangeTreeEngine::new();
    let params = BuildParams {
        m: 16,
        ef_construction: 64,
        threads: 1,
    };
    let index = engine
        .build(random_vectors(&mut rng, VECTORS), &params)
        .expect("build should succeed");
    let queries = random_vectors(&mut rng, 64);

    let mut group = c.benchmark_group("range_search");
    group.throughput(Throughput::Elements(1));
    for (name, low, high) in [("narrow", 4_000, 4_999), ("full", 0, VECTORS as i32 - 1)] {
        let search = SearchParams {
            ef_search: 64,
            k: 10,
            low,
            high,
            edge_limit: 16,
        };
        group.bench_function(name, |b| {
            let mut next = 0;
            b.iter_batched(
                || {
                    next = (next + 1) % queries.len();
                    &queries[next]
                },
                |query| {
                    let nodes = engine.range_filter(&index, low, high);
                    engine
                        .search_topk(&index, &nodes, black_box(query), &search)
                        .expect("search should succeed")
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode, bench_range_search);
criterion_main!(benches);
