//! End-to-end tests for the filter pipeline
//!
//! Builds real chains through the public API and verifies the core flow
//! contracts: format agreement between neighbors, automatic converter
//! insertion, conservation of audio through the chain, gradual production
//! through a buffering resampler, delay accounting, and the read/unread
//! round trip.

use aria_audio::{OutputStatus, Pipeline, PipelineState};
use aria_core::{AudioFormat, Frame, SampleRate};
use std::f32::consts::PI;

const RATE: u32 = 48_000;

fn stereo() -> AudioFormat {
    AudioFormat::new(SampleRate::new(RATE), 2, 32)
}

fn mono() -> AudioFormat {
    AudioFormat::new(SampleRate::new(RATE), 1, 32)
}

/// Generate an interleaved stereo sine wave
fn stereo_sine(frequency: f32, frames: usize, amplitude: f32) -> Vec<f32> {
    let mut buffer = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f32 / RATE as f32;
        let sample = amplitude * (2.0 * PI * frequency * t).sin();
        buffer.push(sample);
        buffer.push(sample);
    }
    buffer
}

/// Drain every available frame into one sample vector
fn drain_all(pipeline: &mut Pipeline, eof: bool) -> Vec<f32> {
    let mut samples = Vec::new();
    while pipeline.output_frame(eof).unwrap() == OutputStatus::Ready {
        let frame = pipeline.read_output_frame().unwrap().unwrap();
        samples.extend_from_slice(frame.samples());
    }
    samples
}

#[test]
fn volume_chain_scales_amplitude() {
    let mut pipeline = Pipeline::new(stereo());
    pipeline
        .add_stage("volume", Some("vol"), &[("gain", "0.5")])
        .unwrap();
    pipeline.initialize().unwrap();

    pipeline
        .filter_frame(Some(Frame::new(vec![0.8; 256], stereo())))
        .unwrap();
    pipeline.filter_frame(None).unwrap();
    let output = drain_all(&mut pipeline, true);

    assert_eq!(output.len(), 256);
    assert!(output.iter().all(|&s| (s - 0.4).abs() < 1e-6));
}

#[test]
fn send_command_setvolume_scales_output() {
    let mut pipeline = Pipeline::new(stereo());
    pipeline.add_stage("volume", Some("vol1"), &[]).unwrap();
    pipeline.initialize().unwrap();

    pipeline.send_command("vol1", "setvolume", "0.5").unwrap();
    pipeline
        .filter_frame(Some(Frame::new(vec![1.0; 64], stereo())))
        .unwrap();
    let output = drain_all(&mut pipeline, false);
    assert_eq!(output.len(), 64);
    assert!(output.iter().all(|&s| (s - 0.5).abs() < 1e-6));
}

#[test]
fn sink_channel_mismatch_inserts_converter_and_keeps_labels() {
    let mut pipeline = Pipeline::new(stereo());
    pipeline.add_stage("volume", Some("vol1"), &[]).unwrap();
    pipeline.set_output_format(Some(mono()));
    pipeline.initialize().unwrap();

    assert_eq!(pipeline.state(), PipelineState::Initialized);
    assert_eq!(pipeline.len(), 2);
    let inserted = pipeline.stages().last().unwrap();
    assert!(inserted.auto_inserted());
    assert_eq!(inserted.label(), None);
    assert!(pipeline.find_by_label("vol1").is_some());

    // neighbors agree on formats all the way through
    let stages: Vec<_> = pipeline.stages().collect();
    for pair in stages.windows(2) {
        assert_eq!(pair[0].output_format(), pair[1].input_format());
    }

    pipeline
        .filter_frame(Some(Frame::new(stereo_sine(440.0, 512, 0.5), stereo())))
        .unwrap();
    pipeline.filter_frame(None).unwrap();
    let output = drain_all(&mut pipeline, true);
    assert_eq!(output.len(), 512); // stereo downmixed to mono, frame count kept
}

#[test]
fn sample_count_conserved_through_one_to_one_chain() {
    let mut pipeline = Pipeline::new(stereo());
    pipeline
        .add_stage("volume", Some("v"), &[("gain", "0.9")])
        .unwrap();
    pipeline
        .add_stage("pan", Some("p"), &[("channels", "2")])
        .unwrap();
    pipeline.initialize().unwrap();

    let mut pushed = 0;
    for frames in [100, 333, 1, 57, 1024] {
        let buffer = stereo_sine(1000.0, frames, 0.4);
        pushed += buffer.len();
        pipeline
            .filter_frame(Some(Frame::new(buffer, stereo())))
            .unwrap();
    }
    pipeline.filter_frame(None).unwrap();
    let output = drain_all(&mut pipeline, true);
    assert_eq!(output.len(), pushed);
}

#[test]
fn resampler_produces_gradually_and_holds_ratio() {
    let input_format = AudioFormat::new(SampleRate::new(44_100), 2, 32);
    let mut pipeline = Pipeline::new(input_format);
    pipeline
        .add_stage("resample", Some("rs"), &[("rate", "48000"), ("quality", "fast")])
        .unwrap();
    pipeline.initialize().unwrap();
    assert_eq!(pipeline.filter_output().sample_rate.as_hz(), 48_000);

    let mut produced = Vec::new();
    let total_in_frames = 44_100;
    for _ in 0..(total_in_frames / 441) {
        pipeline
            .filter_frame(Some(Frame::new(vec![0.1; 441 * 2], input_format)))
            .unwrap();
        produced.extend(drain_all(&mut pipeline, false));
    }
    pipeline.filter_frame(None).unwrap();
    produced.extend(drain_all(&mut pipeline, true));

    let produced_frames = produced.len() / 2;
    let expected = f64::from(total_in_frames) * 48_000.0 / 44_100.0;
    let error = (produced_frames as f64 - expected).abs() / expected;
    assert!(error < 0.02, "conversion ratio off by {error}");
}

#[test]
fn delay_reflects_buffered_audio() {
    let input_format = AudioFormat::new(SampleRate::new(44_100), 2, 32);
    let mut pipeline = Pipeline::new(input_format);
    pipeline
        .add_stage("resample", Some("rs"), &[("rate", "48000"), ("quality", "fast")])
        .unwrap();
    pipeline.initialize().unwrap();
    assert_eq!(pipeline.calc_delay(), 0.0);

    // half a second of input, nothing drained yet
    pipeline
        .filter_frame(Some(Frame::new(vec![0.2; 22_050 * 2], input_format)))
        .unwrap();
    let delay = pipeline.calc_delay();
    assert!(delay > 0.3, "expected buffering latency, got {delay}");

    pipeline.filter_frame(None).unwrap();
    let _ = drain_all(&mut pipeline, true);
    assert!(pipeline.calc_delay() < 0.05);
}

#[test]
fn empty_pipeline_has_zero_delay() {
    let mut pipeline = Pipeline::new(stereo());
    pipeline.initialize().unwrap();
    assert_eq!(pipeline.calc_delay(), 0.0);
}

#[test]
fn unread_restores_read_frame() {
    let mut pipeline = Pipeline::new(stereo());
    pipeline.add_stage("volume", Some("vol"), &[]).unwrap();
    pipeline.initialize().unwrap();

    pipeline
        .filter_frame(Some(Frame::new(vec![0.1; 8], stereo())))
        .unwrap();
    pipeline
        .filter_frame(Some(Frame::new(vec![0.2; 8], stereo())))
        .unwrap();

    // peek the first frame and put it back
    let peeked = pipeline.read_output_frame().unwrap().unwrap();
    let peeked_samples = peeked.samples().to_vec();
    pipeline.unread_output_frame(peeked);

    // order is unchanged: first the unread frame, then the second one
    let first = pipeline.read_output_frame().unwrap().unwrap();
    assert_eq!(first.samples(), peeked_samples.as_slice());
    let second = pipeline.read_output_frame().unwrap().unwrap();
    assert!(second.samples().iter().all(|&s| (s - 0.2).abs() < 1e-6));
}

#[test]
fn frames_rejected_after_eof_until_reset() {
    let mut pipeline = Pipeline::new(stereo());
    pipeline.add_stage("volume", Some("vol"), &[]).unwrap();
    pipeline.initialize().unwrap();

    pipeline.filter_frame(None).unwrap();
    assert!(pipeline
        .filter_frame(Some(Frame::new(vec![0.1; 8], stereo())))
        .is_err());

    pipeline.seek_reset().unwrap();
    pipeline
        .filter_frame(Some(Frame::new(vec![0.1; 8], stereo())))
        .unwrap();
}

#[test]
fn reinitialize_after_stage_removal() {
    let mut pipeline = Pipeline::new(stereo());
    pipeline
        .add_stage("volume", Some("quiet"), &[("gain", "0.0")])
        .unwrap();
    pipeline.initialize().unwrap();
    pipeline.remove_by_label("quiet").unwrap();
    pipeline.reinitialize().unwrap();

    pipeline
        .filter_frame(Some(Frame::new(vec![0.7; 16], stereo())))
        .unwrap();
    let output = drain_all(&mut pipeline, false);
    assert!(output.iter().all(|&s| (s - 0.7).abs() < 1e-6));
}
