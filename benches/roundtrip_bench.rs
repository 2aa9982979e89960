use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pkzip_core::{ZipArchive, ZipWriter};
use std::io::Cursor;
use tempfile::NamedTempFile;

fn generate_compressible_data(size: usize) -> Vec<u8> {
    let pattern = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

fn create_test_archive(data: &[u8]) -> NamedTempFile {
    let temp = NamedTempFile::new().unwrap();
    let mut writer = ZipWriter::create(temp.path()).unwrap();
    writer.add_bytes("test.bin", data).unwrap();
    writer.close().unwrap();
    temp
}

fn bench_write(c: &mut Criterion) {
    let sizes = vec![100 * 1024, 1024 * 1024, 10 * 1024 * 1024];
    let mut group = c.benchmark_group("write");

    for size in sizes {
        let data = generate_compressible_data(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("add_bytes", size), &data, |b, data| {
            b.iter(|| {
                let mut buf = Vec::new();
                let mut writer = ZipWriter::with_writer(Cursor::new(&mut buf)).unwrap();
                writer.add_bytes("test.bin", black_box(data)).unwrap();
                writer.close().unwrap();
                black_box(buf);
            });
        });
    }

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let sizes = vec![100 * 1024, 1024 * 1024, 10 * 1024 * 1024];
    let mut group = c.benchmark_group("read");

    for size in sizes {
        let data = generate_compressible_data(size);
        let archive = create_test_archive(&data);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("open_entry", size), &archive, |b, archive| {
            b.iter(|| {
                let mut reader = ZipArchive::open(archive.path()).unwrap();
                black_box(reader.open_entry("test.bin").unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_write, bench_read);
criterion_main!(benches);
