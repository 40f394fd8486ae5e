/*!
Performance benchmarks for slot and streaming snapshot operations.
*/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use savestate_core::{
    compression::NoCompression, LocalFileStorage, RawState, SlotKey, SnapshotConfig,
    SnapshotEngine, StreamingPipeline, ZstdCompressor,
};
use tempfile::TempDir;

const PROGRAM: u64 = 0x0004_0000_0005_5D00;
const ONE_MIB: usize = 1024 * 1024;

// Emulated memory is mostly repetitive with some noisy regions; mix both
fn generate_state(size_mib: usize) -> RawState {
    let mut rng = StdRng::seed_from_u64(size_mib as u64);
    let mut bytes = RawState::pattern(size_mib * ONE_MIB).bytes;
    for chunk in bytes.chunks_mut(64 * 1024).step_by(4) {
        rng.fill(chunk);
    }
    RawState::new(bytes)
}

fn benchmark_stream_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_save");
    group.sample_size(20);

    let pipeline = StreamingPipeline::new(SnapshotConfig::default_local()).unwrap();

    for size_mib in [1, 8, 32].iter() {
        let state = generate_state(*size_mib);
        let mut buffer = vec![0u8; size_mib * ONE_MIB * 2];
        group.throughput(Throughput::Bytes((size_mib * ONE_MIB) as u64));

        group.bench_with_input(
            BenchmarkId::new("save_to_buffer", format!("{size_mib}MiB")),
            &state,
            |b, state| {
                b.iter(|| {
                    black_box(
                        pipeline
                            .save_to_buffer(black_box(state), &mut buffer)
                            .unwrap(),
                    );
                });
            },
        );
    }

    group.finish();
}

fn benchmark_stream_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_load");
    group.sample_size(20);

    let pipeline = StreamingPipeline::new(SnapshotConfig::default_local()).unwrap();

    for size_mib in [1, 8, 32].iter() {
        let state = generate_state(*size_mib);
        let frame = pipeline.save_to_vec(&state).unwrap();
        group.throughput(Throughput::Bytes((size_mib * ONE_MIB) as u64));

        group.bench_with_input(
            BenchmarkId::new("load_from_buffer", format!("{size_mib}MiB")),
            &frame,
            |b, frame| {
                let mut restored = RawState::default();
                b.iter(|| {
                    pipeline
                        .load_from_buffer(&mut restored, black_box(frame))
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

fn benchmark_compression_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_workers");
    group.sample_size(10);

    let state = generate_state(32);
    group.throughput(Throughput::Bytes((32 * ONE_MIB) as u64));

    for workers in [0u32, 2, 4].iter() {
        let config = SnapshotConfig {
            compression_workers: *workers,
            ..SnapshotConfig::default_local()
        };
        let pipeline = StreamingPipeline::new(config).unwrap();

        group.bench_with_input(
            BenchmarkId::new("save", format!("{workers}_workers")),
            workers,
            |b, _| {
                b.iter(|| black_box(pipeline.save_to_vec(black_box(&state)).unwrap()));
            },
        );
    }

    group.finish();
}

fn benchmark_slot_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot");
    group.sample_size(20);

    let temp_dir = TempDir::new().unwrap();
    let zstd_engine = SnapshotEngine::new(
        LocalFileStorage::with_base_dir(temp_dir.path().join("zstd")),
        ZstdCompressor::new(),
    );
    let raw_engine = SnapshotEngine::new(
        LocalFileStorage::with_base_dir(temp_dir.path().join("raw")),
        NoCompression::new(),
    );

    let state = generate_state(8);
    let key = SlotKey::new(PROGRAM, 1);
    group.throughput(Throughput::Bytes((8 * ONE_MIB) as u64));

    group.bench_function("save_zstd", |b| {
        b.iter(|| black_box(zstd_engine.save_slot(black_box(&state), &key).unwrap()));
    });

    group.bench_function("save_uncompressed", |b| {
        b.iter(|| black_box(raw_engine.save_slot(black_box(&state), &key).unwrap()));
    });

    zstd_engine.save_slot(&state, &key).unwrap();
    group.bench_function("load_zstd", |b| {
        let mut restored = RawState::default();
        b.iter(|| black_box(zstd_engine.load_slot(&mut restored, &key).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_stream_save,
    benchmark_stream_load,
    benchmark_compression_workers,
    benchmark_slot_operations
);
criterion_main!(benches);
