use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use omnivoice::audio::pcm::{decode_frame, encode_frame};
use omnivoice::defaults::{CAPTURE_SAMPLE_RATE, FRAME_WINDOW, PLAYBACK_SAMPLE_RATE};
use std::hint::black_box;

/// A 440Hz tone at half scale, `len` samples long.
fn tone(len: usize, sample_rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.5 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pcm_codec");

    for &window in &[1024usize, FRAME_WINDOW, FRAME_WINDOW * 4] {
        let samples = tone(window, CAPTURE_SAMPLE_RATE);
        group.throughput(Throughput::Elements(window as u64));
        group.bench_with_input(BenchmarkId::new("encode", window), &samples, |b, samples| {
            b.iter(|| encode_frame(black_box(samples), CAPTURE_SAMPLE_RATE))
        });

        let payload = encode_frame(&tone(window, PLAYBACK_SAMPLE_RATE), PLAYBACK_SAMPLE_RATE).data;
        group.bench_with_input(BenchmarkId::new("decode", window), &payload, |b, payload| {
            b.iter(|| decode_frame(black_box(payload), 1))
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
