extern crate peforge;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use peforge::{ImageKind, PeImage, Section, SectionCharacteristics};
use std::hint::black_box;

/// Builds a PE32+ image with a handful of sections and an overlay.
fn sample_image() -> Vec<u8> {
    let mut image = PeImage::new(ImageKind::Pe32Plus);
    let sections = [
        (".text", SectionCharacteristics::CNT_CODE | SectionCharacteristics::MEM_EXECUTE, 0x4_0000),
        (".rdata", SectionCharacteristics::CNT_INITIALIZED_DATA, 0x1_2345),
        (".data", SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_WRITE, 0x8000),
        (".pdata", SectionCharacteristics::CNT_INITIALIZED_DATA, 0x1800),
        (".reloc", SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_DISCARDABLE, 0x400),
    ];

    for (name, characteristics, size) in sections {
        let contents = (0..size).map(|i: u32| i as u8).collect();
        let section = Section::new(name, characteristics | SectionCharacteristics::MEM_READ, contents)
            .expect("valid section");
        image.add_section(section).expect("room for sections");
    }

    image.set_trailing_data(vec![0xA5; 0x2000]);
    image.recalculate().expect("layout");
    image.to_bytes().expect("serialize")
}

/// Benchmark the individual stages and the full read-modify-write cycle
fn bench_roundtrip(c: &mut Criterion) {
    let data = sample_image();
    let file_size = data.len();

    println!(
        "Benchmarking image: {} bytes ({:.2} KB)",
        file_size,
        file_size as f64 / 1024.0
    );

    let mut group = c.benchmark_group("pe_roundtrip");
    group.throughput(Throughput::Bytes(file_size as u64));

    group.bench_function("parse", |b| {
        b.iter(|| {
            let image = PeImage::from_slice(black_box(&data)).unwrap();
            black_box(image)
        });
    });

    let parsed = PeImage::from_slice(&data).unwrap();
    group.bench_function("recalculate", |b| {
        b.iter(|| {
            let mut image = parsed.clone();
            image.move_section(4, 0).unwrap();
            image.recalculate().unwrap();
            black_box(image)
        });
    });

    group.bench_function("serialize", |b| {
        b.iter(|| black_box(parsed.to_bytes().unwrap()));
    });

    group.bench_function("full_cycle", |b| {
        b.iter(|| {
            let mut image = PeImage::from_slice(black_box(&data)).unwrap();
            image.recalculate().unwrap();
            black_box(image.to_bytes().unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_roundtrip);
criterion_main!(benches);
