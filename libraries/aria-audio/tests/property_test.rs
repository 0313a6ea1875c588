//! Property-based tests for the pipeline flow contracts
//!
//! Frames must exit the chain in the order they were pushed, whatever the
//! batch shapes, and one-to-one chains must conserve every sample.

use aria_audio::{OutputStatus, Pipeline};
use aria_core::{AudioFormat, Frame, SampleRate};
use proptest::prelude::*;

fn mono() -> AudioFormat {
    AudioFormat::new(SampleRate::new(48_000), 1, 32)
}

fn stereo() -> AudioFormat {
    AudioFormat::new(SampleRate::new(48_000), 2, 32)
}

fn drain_all(pipeline: &mut Pipeline, eof: bool) -> Vec<f32> {
    let mut samples = Vec::new();
    while pipeline.output_frame(eof).unwrap() == OutputStatus::Ready {
        let frame = pipeline.read_output_frame().unwrap().unwrap();
        samples.extend_from_slice(frame.samples());
    }
    samples
}

proptest! {
    #[test]
    fn frames_exit_in_push_order(sizes in proptest::collection::vec(1usize..64, 1..20)) {
        let mut pipeline = Pipeline::new(mono());
        pipeline.add_stage("volume", Some("v"), &[]).unwrap();
        pipeline.initialize().unwrap();

        // a strictly increasing ramp across all pushed frames
        let mut expected = Vec::new();
        let mut counter = 0u32;
        for frames in &sizes {
            let samples: Vec<f32> = (0..*frames)
                .map(|_| {
                    counter += 1;
                    counter as f32 / 10_000.0
                })
                .collect();
            expected.extend_from_slice(&samples);
            pipeline.filter_frame(Some(Frame::new(samples, mono()))).unwrap();
        }
        pipeline.filter_frame(None).unwrap();
        let output = drain_all(&mut pipeline, true);

        prop_assert_eq!(output, expected);
    }

    #[test]
    fn one_to_one_chain_conserves_samples(sizes in proptest::collection::vec(1usize..64, 1..20)) {
        let mut pipeline = Pipeline::new(stereo());
        pipeline.add_stage("volume", Some("v"), &[("gain", "0.5")]).unwrap();
        pipeline.add_stage("pan", Some("p"), &[("channels", "2")]).unwrap();
        pipeline.initialize().unwrap();

        let mut pushed = 0;
        for frames in &sizes {
            pushed += frames * 2;
            pipeline
                .filter_frame(Some(Frame::new(vec![0.4; frames * 2], stereo())))
                .unwrap();
        }
        pipeline.filter_frame(None).unwrap();
        let output = drain_all(&mut pipeline, true);

        prop_assert_eq!(output.len(), pushed);
    }

    #[test]
    fn unread_round_trip_holds_for_any_frame(frames in 1usize..128, value in -1.0f32..1.0) {
        let mut pipeline = Pipeline::new(mono());
        pipeline.add_stage("volume", Some("v"), &[]).unwrap();
        pipeline.initialize().unwrap();

        pipeline
            .filter_frame(Some(Frame::new(vec![value; frames], mono())))
            .unwrap();
        let read = pipeline.read_output_frame().unwrap().unwrap();
        let samples = read.samples().to_vec();
        pipeline.unread_output_frame(read);
        let again = pipeline.read_output_frame().unwrap().unwrap();

        prop_assert_eq!(again.samples(), samples.as_slice());
    }
}
