// SPDX-License-Identifier: MIT
//! Packing and reading benchmarks, deflate vs LZ4, sequential vs parallel

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use respack::{
    CompressionConfig, ContainerReader, ContainerWriter, FileTimes, PackerConfig,
    PendingResource, ReaderConfig, ResolvedGroup, ResourceGroup,
};
use tempfile::NamedTempFile;

fn create_test_data() -> Vec<PendingResource> {
    (0..200)
        .map(|i| {
            let body = format!("<entry id=\"{}\">resource payload line</entry>\n", i).repeat(64 + i % 32);
            PendingResource::new(format!("res/{}/item{}.xml", i % 10, i), body.into_bytes(), FileTimes::default())
        })
        .collect()
}

fn pack(resources: Vec<PendingResource>, config: PackerConfig) -> Vec<u8> {
    let mut writer = ContainerWriter::new(Vec::new(), config).unwrap();
    let group: ResourceGroup = writer.add_resources(resources).unwrap().into_iter().collect();
    writer.add_group(None, group);
    writer.seal().unwrap().0
}

fn benchmark_pack(c: &mut Criterion) {
    let resources = create_test_data();
    let mut group = c.benchmark_group("pack");

    let configs = [
        ("deflate_sequential", CompressionConfig::smart(), false),
        ("deflate_parallel", CompressionConfig::smart(), true),
        ("lz4_parallel", CompressionConfig::fast(), true),
    ];
    for (name, compression, parallel) in configs {
        let config = PackerConfig {
            compression,
            parallel,
            ..PackerConfig::default()
        };
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| pack(black_box(resources.clone()), config.clone()))
        });
    }
    group.finish();
}

fn benchmark_read(c: &mut Criterion) {
    for (name, compression) in [("deflate", CompressionConfig::smart()), ("lz4", CompressionConfig::fast())] {
        let config = PackerConfig {
            compression,
            ..PackerConfig::default()
        };
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &pack(create_test_data(), config)).unwrap();

        let reader = ContainerReader::open_path(file.path(), ReaderConfig::default()).unwrap();
        let ResolvedGroup::Packed(resolved) = reader.resolve_groups("0").unwrap() else {
            panic!("expected a packed group");
        };

        c.bench_function(&format!("read_all_{}", name), |b| {
            b.iter(|| {
                for entry in resolved.iter() {
                    black_box(reader.read(entry).unwrap());
                }
            })
        });
    }
}

fn benchmark_open(c: &mut Criterion) {
    let mut file = NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &pack(create_test_data(), PackerConfig::default())).unwrap();

    c.bench_function("open", |b| {
        b.iter(|| ContainerReader::open_path(black_box(file.path()), ReaderConfig::default()).unwrap())
    });
}

criterion_group!(benches, benchmark_pack, benchmark_read, benchmark_open);
criterion_main!(benches);
