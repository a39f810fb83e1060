use criterion::{Criterion, criterion_group, criterion_main};
use telemetry_audiolevel::calculate_level;

fn benchmark_calculate_level(c: &mut Criterion) {
    // 20 ms of audio at 48 kHz, the block size a typical pipeline feeds.
    let block: Vec<i16> = (0..960)
        .map(|i| ((i as f64 / 48.0 * std::f64::consts::TAU).sin() * 20000.0) as i16)
        .collect();

    c.bench_function("calculate_level_960", |b| {
        b.iter(|| calculate_level(std::hint::black_box(&block)))
    });

    let silence = vec![0i16; 960];
    c.bench_function("calculate_level_silence", |b| {
        b.iter(|| calculate_level(std::hint::black_box(&silence)))
    });
}

criterion_group!(benches, benchmark_calculate_level);
criterion_main!(benches);
