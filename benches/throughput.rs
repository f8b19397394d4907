//! Codec and dispatch throughput
//!
//! Run with: cargo bench --bench throughput

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use modbus_regmap::dispatcher::dispatch_request;
use modbus_regmap::frame::{self, MbapHeader};
use modbus_regmap::{RegisterStore, Request, StoreConfig, TableConfig};

fn read_frame(quantity: u16) -> Vec<u8> {
    let request = Request::ReadHoldingRegisters {
        address: 0,
        quantity,
    };
    frame::encode_request(1, 1, &request).unwrap().to_vec()
}

/// Decode a request frame, execute it and encode the response
fn bench_request_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_cycle");
    let store = RegisterStore::from_config(
        &StoreConfig::new().with_holding_registers(TableConfig::from_values((0..1000).collect())),
    )
    .unwrap();

    for quantity in [1u16, 10, 125] {
        let raw = read_frame(quantity);
        group.throughput(Throughput::Elements(quantity as u64));
        group.bench_with_input(BenchmarkId::from_parameter(quantity), &raw, |b, raw| {
            b.iter(|| {
                let (header, request) = frame::decode_request(black_box(raw)).unwrap();
                let response = dispatch_request(&store, &request);
                frame::encode_response(&header, &response).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_write_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_multiple_decode");

    for count in [1usize, 60, 123] {
        let request = Request::WriteMultipleRegisters {
            address: 10,
            values: (0..count as u16).collect(),
        };
        let raw = frame::encode_request(7, 1, &request).unwrap();
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &raw, |b, raw| {
            b.iter(|| frame::decode_request(black_box(raw)).unwrap());
        });
    }

    group.finish();
}

fn bench_response_decode(c: &mut Criterion) {
    let request = Request::ReadCoils {
        address: 0,
        quantity: 2000,
    };
    let store = RegisterStore::with_size(2000).unwrap();
    let response = dispatch_request(&store, &request);
    let raw = frame::encode_response(&MbapHeader::new(3, 1), &response).unwrap();

    c.bench_function("decode_response_2000_coils", |b| {
        b.iter(|| frame::decode_response(&request, black_box(&raw)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_request_cycle,
    bench_write_decode,
    bench_response_decode
);
criterion_main!(benches);
