//! Tuple codec and body framer benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use smartwire_protocol::{
    decode_tuple, deserialise_offsets, encode_body, encode_tuple, serialise_offsets,
    LengthPrefixedBodyDecoder, ReadvRange,
};

fn create_test_args(arg_size: usize) -> Vec<Bytes> {
    vec![
        Bytes::from_static(b"put_non_atomic"),
        Bytes::from(format!("branch/{}", "x".repeat(arg_size))),
        Bytes::from_static(b"420"),
        Bytes::from_static(b"T"),
        Bytes::from_static(b""),
    ]
}

fn bench_tuple_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("tuple_encode");

    for size in [10, 100, 1000] {
        let args = create_test_args(size);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &args, |b, args| {
            b.iter(|| black_box(encode_tuple(args).unwrap()));
        });
    }

    group.finish();
}

fn bench_tuple_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("tuple_decode");

    for size in [10, 100, 1000] {
        let encoded = encode_tuple(&create_test_args(size)).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(decode_tuple(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_body_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_encode");

    for size in [100, 10_000, 1_000_000] {
        let payload = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| black_box(encode_body(payload)));
        });
    }

    group.finish();
}

fn bench_body_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_decode");

    for size in [100, 10_000, 1_000_000] {
        let encoded = encode_body(&vec![0x42u8; size]);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = LengthPrefixedBodyDecoder::new();
                decoder.accept_bytes(encoded).unwrap();
                black_box(decoder.read_pending_data())
            });
        });
    }

    group.finish();
}

/// Feeds the decoder exactly what it asks for, as a blocking reader would.
fn bench_body_decode_by_hint(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_decode_by_hint");

    for size in [100, 10_000] {
        let encoded = encode_body(&vec![0x42u8; size]);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = LengthPrefixedBodyDecoder::new();
                let mut pos = 0;
                while !decoder.finished_reading() {
                    let end = (pos + decoder.next_read_size()).min(encoded.len());
                    decoder.accept_bytes(&encoded[pos..end]).unwrap();
                    pos = end;
                }
                black_box(decoder.read_pending_data())
            });
        });
    }

    group.finish();
}

fn bench_readv_offsets(c: &mut Criterion) {
    let mut group = c.benchmark_group("readv_offsets");

    for count in [10, 100, 1000] {
        let ranges: Vec<ReadvRange> = (0..count)
            .map(|i| ReadvRange::new(i * 4096, 512))
            .collect();
        let body = serialise_offsets(&ranges);

        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &body, |b, body| {
            b.iter(|| black_box(deserialise_offsets(body).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_tuple_encode,
    bench_tuple_decode,
    bench_body_encode,
    bench_body_decode,
    bench_body_decode_by_hint,
    bench_readv_offsets,
);

criterion_main!(benches);
