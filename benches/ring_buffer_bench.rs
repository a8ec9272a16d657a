//! Ring buffer and conversion hot paths
//!
//! The realtime drain must stay far below one period's budget.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pcm_stream_receiver::audio::pcm::encode_i16_le;
use pcm_stream_receiver::audio::{RingBuffer, Resampler};

fn bench_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");

    group.bench_function("push_slice_1152", |b| {
        let ring = RingBuffer::new(8192).unwrap();
        let data = vec![0.5f32; 1152];
        let mut sink = vec![0.0f32; 1152];

        b.iter(|| {
            let pushed = ring.push_slice(black_box(&data));
            ring.drain_into(&mut sink, pushed);
            black_box(pushed);
        });
    });

    group.bench_function("drain_period_512x2", |b| {
        let ring = RingBuffer::new(8192).unwrap();
        let data = vec![0.25f32; 1024];
        let mut period = vec![0.0f32; 1024];

        b.iter(|| {
            ring.push_slice(&data);
            let drained = ring.drain_into(black_box(&mut period), 1024);
            black_box(drained);
        });
    });

    group.bench_function("drain_underrun", |b| {
        let ring = RingBuffer::new(8192).unwrap();
        let mut period = vec![0.0f32; 1024];

        b.iter(|| {
            let drained = ring.drain_into(black_box(&mut period), 1024);
            black_box(drained);
        });
    });

    group.finish();
}

fn bench_chunk_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_conversion");
    let chunk = encode_i16_le(&vec![0.1f32; 576]);

    group.bench_function("decode_only_48k", |b| {
        let mut resampler = Resampler::new();
        resampler.reconfigure(48_000, 48_000, 2, 16).unwrap();
        b.iter(|| {
            let out = resampler.process(black_box(&chunk)).unwrap();
            black_box(out.len());
        });
    });

    group.bench_function("resample_44k1_to_48k", |b| {
        let mut resampler = Resampler::new();
        resampler.reconfigure(44_100, 48_000, 2, 16).unwrap();
        b.iter(|| {
            let out = resampler.process(black_box(&chunk)).unwrap();
            black_box(out.len());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ring_buffer, bench_chunk_conversion);
criterion_main!(benches);
