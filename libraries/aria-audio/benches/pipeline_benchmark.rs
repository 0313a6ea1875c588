//! Performance benchmarks for the filter pipeline
//!
//! Run with: cargo bench -p aria-audio --bench pipeline_benchmark

use aria_audio::{OutputStatus, Pipeline};
use aria_core::{AudioFormat, Frame, SampleRate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::f32::consts::PI;

const RATE: u32 = 48_000;
const BLOCK_FRAMES: usize = 1024;

fn stereo() -> AudioFormat {
    AudioFormat::new(SampleRate::new(RATE), 2, 32)
}

/// Generate a 1 kHz stereo sine block
fn test_block() -> Vec<f32> {
    let mut samples = Vec::with_capacity(BLOCK_FRAMES * 2);
    for i in 0..BLOCK_FRAMES {
        let t = i as f32 / RATE as f32;
        let value = (2.0 * PI * 1000.0 * t).sin();
        samples.push(value);
        samples.push(value);
    }
    samples
}

fn run_block(pipeline: &mut Pipeline, block: &[f32]) -> usize {
    pipeline
        .filter_frame(Some(Frame::new(block.to_vec(), stereo())))
        .unwrap();
    let mut drained = 0;
    while pipeline.output_frame(false).unwrap() == OutputStatus::Ready {
        drained += pipeline.read_output_frame().unwrap().unwrap().len();
    }
    drained
}

fn bench_chains(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_throughput");
    group.throughput(Throughput::Elements(BLOCK_FRAMES as u64));
    let block = test_block();

    let chains: [(&str, &[(&str, &[(&str, &str)])]); 3] = [
        ("passthrough", &[]),
        ("volume", &[("volume", &[("gain", "0.9")])]),
        (
            "volume+pan",
            &[("volume", &[("gain", "0.9")]), ("pan", &[("channels", "2")])],
        ),
    ];

    for (name, stages) in chains {
        group.bench_with_input(
            BenchmarkId::new("push_drain", name),
            &block,
            |b, block| {
                let mut pipeline = Pipeline::new(stereo());
                for (stage, args) in stages {
                    pipeline.add_stage(stage, None, args).unwrap();
                }
                pipeline.initialize().unwrap();

                b.iter(|| black_box(run_block(&mut pipeline, black_box(block))));
            },
        );
    }
    group.finish();
}

fn bench_resampling_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_resample");
    group.throughput(Throughput::Elements(BLOCK_FRAMES as u64));
    let block = test_block();
    let input = AudioFormat::new(SampleRate::new(44_100), 2, 32);

    group.bench_function("44.1k->48k_fast", |b| {
        let mut pipeline = Pipeline::new(input);
        pipeline
            .add_stage("resample", None, &[("rate", "48000"), ("quality", "fast")])
            .unwrap();
        pipeline.initialize().unwrap();

        b.iter(|| {
            pipeline
                .filter_frame(Some(Frame::new(block.clone(), input)))
                .unwrap();
            let mut drained = 0;
            while pipeline.output_frame(false).unwrap() == OutputStatus::Ready {
                drained += pipeline.read_output_frame().unwrap().unwrap().len();
            }
            black_box(drained)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_chains, bench_resampling_chain);
criterion_main!(benches);
