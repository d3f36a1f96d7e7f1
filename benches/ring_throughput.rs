// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Request-wire round-trip throughput (§4.A/§4.B): write a framed message,
// peek its header, read its payload, and dispose it, at a few message
// sizes chosen to exercise both the common small-request path and a
// payload large enough to force a couple of wrap-arounds within one
// benchmark iteration.
//
// Run with:
//   cargo bench --bench ring_throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tateyama_ipc::RequestWire;

const CAPACITY: usize = 64 * 1024;

const SIZES: &[(&str, usize)] = &[
    ("small_48", 48),
    ("medium_256", 256),
    ("large_4096", 4096),
];

fn new_wire(name: &str) -> (RequestWire, Vec<u8>) {
    let mut buf = vec![0u8; CAPACITY];
    let wire = unsafe { RequestWire::attach(buf.as_mut_ptr(), CAPACITY, name, true).unwrap() };
    (wire, buf)
}

fn bench_write_peek_dispose(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_wire_round_trip");

    for &(label, size) in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        let (wire, _buf) = new_wire(&format!("bench_rw_{label}"));
        let payload = vec![0xABu8; size];
        let mut index: u16 = 0;

        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, _| {
            b.iter(|| {
                wire.write(index, black_box(&payload)).unwrap();
                index = index.wrapping_add(1);
                let header = wire.peek(1000).unwrap();
                let body = wire.payload(&header);
                let read_point = wire.read_point();
                wire.dispose(read_point, &header).unwrap();
                black_box(body)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_write_peek_dispose);
criterion_main!(benches);
