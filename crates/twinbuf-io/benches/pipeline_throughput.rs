//! Throughput benchmarks for the double-buffered pipelines against the
//! single-buffer baselines

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::fs::File;
use tempfile::TempDir;
use twinbuf_io::data::fill_random;
use twinbuf_io::{
    count_needles, open_read, open_write, plain, tally, AsyncCopy, AsyncWrite, OpenHints,
    PipelineOptions,
};
use twinbuf_types::{BufferSize, NEEDLE};

const FILE_SIZE: usize = 8 * 1024 * 1024;

fn source_file(dir: &TempDir) -> File {
    let path = dir.path().join("source.bin");
    let mut data = vec![0u8; FILE_SIZE];
    fill_random(&mut data);
    std::fs::write(&path, &data).unwrap();
    open_read(&path, OpenHints::cached()).unwrap()
}

fn bench_read(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let file = source_file(&dir);

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Bytes(FILE_SIZE as u64));

    for kib in [4usize, 64, 1024] {
        let options = PipelineOptions::new(BufferSize::from_kib(kib).unwrap());

        group.bench_with_input(BenchmarkId::new("async", kib), &options, |b, &options| {
            b.iter(|| black_box(count_needles(&file, options, NEEDLE).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("plain", kib), &options, |b, &options| {
            b.iter(|| {
                let mut count = 0;
                plain::read(&file, options, |chunk| {
                    count += tally(chunk, NEEDLE);
                    Ok(())
                })
                .unwrap();
                black_box(count)
            });
        });
    }

    group.finish();
}

fn bench_write(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("written.bin");

    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Bytes(FILE_SIZE as u64));

    for kib in [64usize, 1024] {
        let options = PipelineOptions::new(BufferSize::from_kib(kib).unwrap());

        group.bench_with_input(BenchmarkId::new("async", kib), &options, |b, &options| {
            b.iter(|| {
                let file = open_write(&path, OpenHints::cached()).unwrap();
                black_box(
                    AsyncWrite::new(options)
                        .run(&file, FILE_SIZE as u64, |buf| {
                            buf.fill(0x5A);
                            Ok(())
                        })
                        .unwrap(),
                )
            });
        });

        group.bench_with_input(BenchmarkId::new("plain", kib), &options, |b, &options| {
            b.iter(|| {
                let file = open_write(&path, OpenHints::cached()).unwrap();
                black_box(
                    plain::write(&file, options, FILE_SIZE as u64, |buf| {
                        buf.fill(0x5A);
                        Ok(())
                    })
                    .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_copy(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let src = source_file(&dir);
    let dst_path = dir.path().join("copy.bin");
    let options = PipelineOptions::new(BufferSize::from_kib(256).unwrap());

    let mut group = c.benchmark_group("copy");
    group.throughput(Throughput::Bytes(FILE_SIZE as u64));

    group.bench_function("async_256", |b| {
        b.iter(|| {
            let dst = open_write(&dst_path, OpenHints::cached()).unwrap();
            black_box(AsyncCopy::new(options).run(&src, &dst).unwrap())
        });
    });

    group.bench_function("plain_256", |b| {
        b.iter(|| {
            let dst = open_write(&dst_path, OpenHints::cached()).unwrap();
            black_box(plain::copy(&src, &dst, options).unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_read, bench_write, bench_copy);
criterion_main!(benches);
