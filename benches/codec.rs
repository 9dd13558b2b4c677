//! Frame codec benchmarks
//!
//! Measures frame encoding and streaming decode without network I/O.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use msglink::protocol::{decode_frame, Frame, Message};

fn transfer(size: usize) -> Frame {
    let message = Message::new(vec![0xA5u8; size]).with_subject("bench");
    Frame::Transfer {
        handle: 0,
        delivery_id: 42,
        payload: message.encode().unwrap(),
    }
}

fn bench_transfer_encode(c: &mut Criterion) {
    let frame = transfer(1024);
    c.bench_function("transfer_1k_encode", |b| {
        b.iter(|| black_box(frame.encode().unwrap()));
    });
}

fn bench_stream_decode(c: &mut Criterion) {
    let mut stream = BytesMut::new();
    for _ in 0..10 {
        stream.extend_from_slice(&transfer(256).encode().unwrap());
    }
    let stream = stream.freeze();

    c.bench_function("batch_10_transfers_decode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&stream[..]);
            let mut count = 0;
            while let Some(frame) = decode_frame(&mut buf).unwrap() {
                black_box(&frame);
                count += 1;
            }
            black_box(count)
        });
    });
}

criterion_group!(benches, bench_transfer_encode, bench_stream_decode);

criterion_main!(benches);
