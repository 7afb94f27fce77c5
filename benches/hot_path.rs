use std::time::Duration;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use voltage_loadtest::{FrameEncoder, Histogram, ModbusFunction, ResponsePdu};

fn bench_frame_encode(c: &mut Criterion) {
    let mut encoder = FrameEncoder::new();
    c.bench_function("build_read_frame", |b| {
        b.iter(|| {
            encoder.build_read_frame(
                black_box(1),
                ModbusFunction::ReadHoldingRegisters,
                black_box(0),
                black_box(10),
            )
        })
    });
}

fn bench_histogram(c: &mut Criterion) {
    let mut histogram = Histogram::new();
    let mut ns = 1u64;
    c.bench_function("histogram_record", |b| {
        b.iter(|| {
            ns = ns.wrapping_mul(6364136223846793005).wrapping_add(1) % 50_000_000;
            histogram.record(black_box(Duration::from_nanos(ns)));
        })
    });

    let snapshot = histogram.snapshot();
    c.bench_function("histogram_p99", |b| b.iter(|| snapshot.quantile_ns(black_box(0.99))));
}

fn bench_decode(c: &mut Criterion) {
    let mut raw = vec![0x01, 0x03, 250];
    raw.extend((0..125u16).flat_map(|v| v.to_be_bytes()));
    let pdu = ResponsePdu::new(Bytes::from(raw), 1);

    c.bench_function("decode_125_registers", |b| {
        b.iter(|| pdu.decode_registers(black_box(125)))
    });
}

criterion_group!(benches, bench_frame_encode, bench_histogram, bench_decode);
criterion_main!(benches);
