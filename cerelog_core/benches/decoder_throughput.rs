use cerelog_core::protocol::PACKET_TOTAL_SIZE;
use cerelog_core::{FrameDecoder, RawFrame};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

fn build_stream(frames: u32, garbage_every: u32) -> Vec<u8> {
    let mut stream = Vec::with_capacity(frames as usize * (PACKET_TOTAL_SIZE + 3));
    for i in 0..frames {
        if garbage_every > 0 && i % garbage_every == 0 {
            stream.extend_from_slice(&[0x13, 0x37, 0x42]);
        }
        let codes = [i as i32 % 1000, -(i as i32 % 1000), 0, 1, -1, 4096, -4096, 8_388_607];
        if let Ok(frame) = RawFrame::new(i, [0xC0, 0, 0], codes) {
            stream.extend_from_slice(&frame.to_bytes());
        }
    }
    stream
}

fn bench_decoder(c: &mut Criterion) {
    let clean = build_stream(10_000, 0);
    let noisy = build_stream(10_000, 10);

    let mut group = c.benchmark_group("decoder");

    group.throughput(Throughput::Bytes(clean.len() as u64));
    group.bench_function("clean_single_chunk", |b| {
        b.iter_batched(
            FrameDecoder::default,
            |mut decoder| black_box(decoder.feed(&clean)),
            BatchSize::SmallInput,
        )
    });

    group.bench_function("clean_64_byte_chunks", |b| {
        b.iter_batched(
            FrameDecoder::default,
            |mut decoder| {
                let mut n = 0;
                for chunk in clean.chunks(64) {
                    decoder.feed_with(chunk, |_| n += 1);
                }
                black_box(n)
            },
            BatchSize::SmallInput,
        )
    });

    group.throughput(Throughput::Bytes(noisy.len() as u64));
    group.bench_function("noisy_single_chunk", |b| {
        b.iter_batched(
            FrameDecoder::default,
            |mut decoder| black_box(decoder.feed(&noisy)),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_decoder);
criterion_main!(benches);
