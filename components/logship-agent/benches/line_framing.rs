use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use logship_agent::tailer::framing::LineFramer;
use std::hint::black_box;

fn sample_chunk(lines: usize, width: usize) -> Vec<u8> {
    let line = "x".repeat(width);
    let mut chunk = Vec::with_capacity(lines * (width + 1));
    for _ in 0..lines {
        chunk.extend_from_slice(line.as_bytes());
        chunk.push(b'\n');
    }
    chunk
}

fn framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_framing");

    for (name, width) in [("short_lines", 120), ("long_lines", 8_000)] {
        let chunk = sample_chunk(512, width);
        group.throughput(Throughput::Bytes(chunk.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut framer = LineFramer::new();
                black_box(framer.push(black_box(&chunk)))
            })
        });
    }

    let oversized = sample_chunk(4, 40_000);
    group.throughput(Throughput::Bytes(oversized.len() as u64));
    group.bench_function("truncated_lines", |b| {
        b.iter(|| {
            let mut framer = LineFramer::new();
            black_box(framer.push(black_box(&oversized)))
        })
    });

    // same chunk delivered in small reads, as a slow writer would produce it
    let split = sample_chunk(512, 120);
    group.throughput(Throughput::Bytes(split.len() as u64));
    group.bench_function("split_reads", |b| {
        b.iter(|| {
            let mut framer = LineFramer::new();
            let mut total = 0;
            for piece in split.chunks(97) {
                total += framer.push(black_box(piece)).len();
            }
            black_box(total)
        })
    });

    group.finish();
}

criterion_group!(benches, framing);
criterion_main!(benches);
