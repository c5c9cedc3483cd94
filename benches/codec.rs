//! Benchmarks for string encode planning and decode

use cardstore_rs::{decode, encode, Block, MediaProfile, MemoryCard, Result, SessionBuilder};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashMap;

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_encode");
    let profile = MediaProfile::CLASSIC_4K;

    for size in [16usize, 256, 3000].iter() {
        let text = "e".repeat(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &text, |b, text| {
            b.iter(|| encode(black_box(text), 4, &profile).unwrap());
        });
    }

    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_decode");
    let profile = MediaProfile::CLASSIC_4K;

    for size in [16usize, 256, 3000].iter() {
        let plan = encode(&"d".repeat(*size), 4, &profile).unwrap();
        let medium: HashMap<u32, Block> = plan.blocks.iter().copied().collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &medium, |b, medium| {
            b.iter(|| {
                let mut reader = |index: u32| -> Result<Block> {
                    Ok(medium.get(&index).copied().unwrap_or([0u8; 16]))
                };
                decode(&mut reader, black_box(4), &profile).unwrap()
            });
        });
    }

    group.finish();
}

fn benchmark_cached_session_read(c: &mut Criterion) {
    let mut session = SessionBuilder::new(MemoryCard::new(MediaProfile::CLASSIC_4K))
        .build()
        .unwrap();
    session.write_string(4, &"s".repeat(1000)).unwrap();
    session.read_string(4).unwrap();

    c.bench_function("session_read_cached_1000", |b| {
        b.iter(|| session.read_string(black_box(4)).unwrap());
    });
}

criterion_group!(
    benches,
    benchmark_encode,
    benchmark_decode,
    benchmark_cached_session_read
);
criterion_main!(benches);
