//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dubbo_invoke_protocol::hessian::{HessianReader, HessianWriter};
use dubbo_invoke_protocol::{
    decode_response, sanitize, Decoder, Encoder, Frame, InvocationRequest, Response, Value,
};
use std::collections::BTreeMap;

fn create_test_request(payload_size: usize) -> InvocationRequest {
    InvocationRequest::generic(
        "com.acme.OrderService",
        "1.0.0",
        "submit",
        &["java.lang.String".to_string(), "java.lang.Long".to_string()],
        vec![Value::string("x".repeat(payload_size)), Value::Long(42)],
    )
}

fn create_test_response(payload_size: usize) -> Response {
    let mut order = BTreeMap::new();
    order.insert("class".to_string(), Value::string("com.acme.Order"));
    order.insert("id".to_string(), Value::Long(12345678));
    order.insert("state".to_string(), Value::string("completed"));
    order.insert("note".to_string(), Value::string("x".repeat(payload_size)));
    order.insert(
        "lines".to_string(),
        Value::List((0..16).map(Value::Int).collect()),
    );
    Response::value(1, Value::Map(order))
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 1000, 10000] {
        let frame = Frame::request(Bytes::from("x".repeat(size)));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let encoded = Frame::request(Bytes::from("x".repeat(size)))
            .encode()
            .unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Frame::decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_request_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encode");

    for size in [100, 1000, 10000] {
        let request = create_test_request(size);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &request, |b, request| {
            b.iter(|| black_box(Encoder::encode_request(request).unwrap()));
        });
    }

    group.finish();
}

fn bench_response_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_decode");

    for size in [100, 1000, 10000] {
        let encoded = Encoder::encode_response(&create_test_response(size)).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(encoded);
                black_box(decoder.decode_response().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_string_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_decode");

    // multi-byte characters exercise the character-counted chunk reads
    for (name, text) in [
        ("ascii", "a".repeat(40_000)),
        ("cjk", "数".repeat(40_000)),
        ("emoji", "🙂".repeat(20_000)),
    ] {
        let mut writer = HessianWriter::new();
        writer.write_string(&text);
        let encoded = writer.into_bytes();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &encoded, |b, encoded| {
            b.iter(|| black_box(HessianReader::new(encoded).read_value().unwrap()));
        });
    }

    group.finish();
}

fn bench_sanitize(c: &mut Criterion) {
    let frame = create_test_response(1000).to_frame().unwrap();
    let value = decode_response(&frame).value;

    c.bench_function("sanitize", |b| {
        b.iter(|| black_box(sanitize(&value)));
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_request_encode,
    bench_response_decode,
    bench_string_decode,
    bench_sanitize,
);

criterion_main!(benches);
