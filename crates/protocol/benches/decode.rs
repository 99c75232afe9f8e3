//! Benchmarks for report decoding
//!
//! The poll worker decodes every report inline before the next read is
//! issued, so decoding must stay far below the device's report interval.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{MAX_SAMPLES_PER_REPORT, RawReport, decode_report};

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_report");

    for count in [0usize, 4, MAX_SAMPLES_PER_REPORT] {
        let samples: Vec<i32> = (0..count as i32).map(|i| i * 37 - 300).collect();
        let report = RawReport::from_samples(&samples, 4096).unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &report, |b, report| {
            b.iter(|| decode_report(black_box(report)))
        });
    }

    group.finish();
}

fn benchmark_from_bytes(c: &mut Criterion) {
    let bytes = RawReport::from_samples(&[1, 2, 3], 10)
        .unwrap()
        .as_bytes()
        .to_vec();

    c.bench_function("raw_report_from_bytes", |b| {
        b.iter(|| RawReport::from_bytes(black_box(&bytes)))
    });
}

criterion_group!(benches, benchmark_decode, benchmark_from_bytes);
criterion_main!(benches);
