//! Resampling stage
//!
//! Sample-rate conversion backed by rubato. Input samples accumulate in a
//! buffer and are processed in whole chunks of the size the resampler asks
//! for; output is therefore decoupled from input, which is exactly what the
//! pipeline's gradual-production pull path exists for. The buffered input
//! plus the resampler's inherent latency is reported as delay.
//!
//! The same stage implements rate-preserving playback speed change: the
//! resample ratio is divided by the speed factor, so output carries the same
//! nominal rate but more or fewer samples.

use crate::pipeline::control::{ControlCommand, ControlResponse};
use crate::pipeline::registry::{OptionKind, OptionSpec, OptionValues, StageDescriptor};
use crate::pipeline::{FilterStatus, Negotiation, OpenContext, Stage, StageError, StageOutput};
use crate::{PipelineError, Result};
use aria_core::{AudioFormat, Frame, SampleRate};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use std::collections::VecDeque;

const NAME: &str = "resample";
const MAX_RATIO_RELATIVE: f64 = 8.0;

pub(crate) static DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: NAME,
    description: "Sample-rate conversion and resampling speed change",
    options: &[
        OptionSpec {
            key: "rate",
            kind: OptionKind::Int,
            help: "target sample rate in Hz (default: keep the input rate)",
        },
        OptionSpec {
            key: "quality",
            kind: OptionKind::Text,
            help: "resampling quality: fast, balanced or high",
        },
    ],
    create,
};

fn create(options: &OptionValues) -> Result<Box<dyn Stage>> {
    let target = match options.int("rate") {
        Some(rate) if rate > 0 && rate < 1_000_000 => Some(SampleRate::new(rate as u32)),
        Some(rate) => {
            return Err(PipelineError::BadOption {
                stage: NAME.to_string(),
                option: "rate".to_string(),
                message: format!("invalid sample rate {rate} Hz"),
            });
        }
        None => None,
    };
    let quality = match options.text("quality") {
        Some("fast") => Quality::Fast,
        Some("balanced") | None => Quality::Balanced,
        Some("high") => Quality::High,
        Some(other) => {
            return Err(PipelineError::BadOption {
                stage: NAME.to_string(),
                option: "quality".to_string(),
                message: format!("expected fast, balanced or high, got '{other}'"),
            });
        }
    };
    Ok(Box::new(ResampleStage::new(target, quality)))
}

/// Resampling quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quality {
    /// Linear polynomial, lowest CPU
    Fast,
    /// Sinc interpolation, moderate CPU
    Balanced,
    /// Longer sinc, highest CPU
    High,
}

impl Quality {
    fn chunk_size(self) -> usize {
        match self {
            Self::Fast | Self::Balanced => 1024,
            Self::High => 2048,
        }
    }

    fn sinc_params(self) -> SincInterpolationParameters {
        match self {
            Self::Fast | Self::Balanced => SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris,
            },
            Self::High => SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.99,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 512,
                window: WindowFunction::BlackmanHarris,
            },
        }
    }
}

enum Inner {
    Fast(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

impl Inner {
    fn input_frames_next(&self) -> usize {
        match self {
            Self::Fast(r) => r.input_frames_next(),
            Self::Sinc(r) => r.input_frames_next(),
        }
    }

    fn output_delay(&self) -> usize {
        match self {
            Self::Fast(r) => r.output_delay(),
            Self::Sinc(r) => r.output_delay(),
        }
    }

    fn process(
        &mut self,
        input: &[Vec<f32>],
    ) -> std::result::Result<Vec<Vec<f32>>, rubato::ResampleError> {
        match self {
            Self::Fast(r) => r.process(input, None),
            Self::Sinc(r) => r.process(input, None),
        }
    }

    fn process_partial(
        &mut self,
        input: Option<&[Vec<f32>]>,
    ) -> std::result::Result<Vec<Vec<f32>>, rubato::ResampleError> {
        match self {
            Self::Fast(r) => r.process_partial(input, None),
            Self::Sinc(r) => r.process_partial(input, None),
        }
    }

    fn set_ratio(&mut self, ratio: f64) -> std::result::Result<(), rubato::ResampleError> {
        match self {
            Self::Fast(r) => r.set_resample_ratio(ratio, true),
            Self::Sinc(r) => r.set_resample_ratio(ratio, true),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Fast(r) => r.reset(),
            Self::Sinc(r) => r.reset(),
        }
    }
}

fn deinterleave(interleaved: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = interleaved.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in 0..frames {
        for (ch, plane) in planes.iter_mut().enumerate() {
            plane.push(interleaved[frame * channels + ch]);
        }
    }
    planes
}

fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    if planes.is_empty() {
        return Vec::new();
    }
    let frames = planes[0].len();
    let mut interleaved = Vec::with_capacity(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            interleaved.push(plane[frame]);
        }
    }
    interleaved
}

pub(crate) struct ResampleStage {
    target: Option<SampleRate>,
    quality: Quality,
    speed: f64,
    inner: Option<Inner>,
    input_buffer: VecDeque<f32>,
    channels: usize,
    in_rate: f64,
    out_format: AudioFormat,
}

impl ResampleStage {
    fn new(target: Option<SampleRate>, quality: Quality) -> Self {
        Self {
            target,
            quality,
            speed: 1.0,
            inner: None,
            input_buffer: VecDeque::new(),
            channels: 0,
            in_rate: 0.0,
            out_format: AudioFormat::cd_quality(),
        }
    }

    /// Converter targeting a fixed output rate, used for automatic insertion
    pub(crate) fn with_target(rate: SampleRate) -> Self {
        Self::new(Some(rate), Quality::Balanced)
    }

    fn ratio(&self, in_rate: u32, out_rate: u32) -> f64 {
        f64::from(out_rate) / f64::from(in_rate) / self.speed
    }

    fn update_delay(&self, out: &mut StageOutput) {
        let buffered = (self.input_buffer.len() / self.channels.max(1)) as f64 / self.in_rate;
        let inherent = match &self.inner {
            Some(inner) => {
                inner.output_delay() as f64
                    / f64::from(self.out_format.sample_rate.as_hz())
            }
            None => 0.0,
        };
        out.set_delay(buffered + inherent);
    }

    /// Process one whole chunk from the input buffer, if enough is buffered
    fn process_ready_chunk(
        &mut self,
        out: &mut StageOutput,
    ) -> std::result::Result<bool, StageError> {
        let Some(inner) = &mut self.inner else {
            return Ok(false);
        };
        let needed = inner.input_frames_next() * self.channels;
        if self.input_buffer.len() < needed {
            return Ok(false);
        }
        let chunk: Vec<f32> = self.input_buffer.drain(..needed).collect();
        let planes = deinterleave(&chunk, self.channels);
        let output = inner
            .process(&planes)
            .map_err(|e| StageError::Failed(format!("resampling failed: {e}")))?;
        let samples = interleave(&output);
        if !samples.is_empty() {
            out.push(Frame::new(samples, self.out_format));
        }
        Ok(true)
    }
}

impl Stage for ResampleStage {
    fn open(&mut self, ctx: &OpenContext) -> std::result::Result<Negotiation, StageError> {
        if ctx.input.channels == 0 {
            return Err(StageError::Unsupported(ctx.input));
        }
        let in_rate = ctx.input.sample_rate;
        let out_rate = self.target.unwrap_or(in_rate);
        if in_rate == out_rate && (self.speed - 1.0).abs() < f64::EPSILON {
            self.inner = None;
            self.input_buffer.clear();
            return Ok(Negotiation::Detach);
        }

        let channels = ctx.input.channels as usize;
        let ratio = self.ratio(in_rate.as_hz(), out_rate.as_hz());
        let chunk_size = self.quality.chunk_size();
        let inner = match self.quality {
            Quality::Fast => FastFixedIn::new(
                ratio,
                MAX_RATIO_RELATIVE,
                PolynomialDegree::Linear,
                chunk_size,
                channels,
            )
            .map(Inner::Fast),
            Quality::Balanced | Quality::High => SincFixedIn::<f32>::new(
                ratio,
                MAX_RATIO_RELATIVE,
                self.quality.sinc_params(),
                chunk_size,
                channels,
            )
            .map(Inner::Sinc),
        }
        .map_err(|e| StageError::Failed(format!("resampler init: {e}")))?;

        self.inner = Some(inner);
        self.input_buffer.clear();
        self.channels = channels;
        self.in_rate = f64::from(in_rate.as_hz());
        self.out_format = AudioFormat {
            sample_rate: out_rate,
            ..ctx.input
        };
        Ok(Negotiation::Accept(self.out_format))
    }

    fn filter(
        &mut self,
        out: &mut StageOutput,
        frame: Option<Frame>,
    ) -> std::result::Result<FilterStatus, StageError> {
        match frame {
            Some(frame) => {
                if self.inner.is_none() {
                    // opened as a pass-through no-op
                    out.push(frame);
                    return Ok(FilterStatus::Ok);
                }
                self.input_buffer.extend(frame.samples().iter().copied());
                self.update_delay(out);
                Ok(FilterStatus::Ok)
            }
            None => {
                // end of stream: drain whole chunks, then the remainder
                while self.process_ready_chunk(out)? {}
                let remaining: Vec<f32> = self.input_buffer.drain(..).collect();
                if let Some(inner) = &mut self.inner {
                    let frames = remaining.len() / self.channels.max(1);
                    let output = if frames > 0 {
                        let planes = deinterleave(&remaining, self.channels);
                        inner.process_partial(Some(&planes))
                    } else {
                        inner.process_partial(None)
                    }
                    .map_err(|e| StageError::Failed(format!("flush failed: {e}")))?;
                    let samples = interleave(&output);
                    if !samples.is_empty() {
                        out.push(Frame::new(samples, self.out_format));
                    }
                }
                out.set_delay(0.0);
                Ok(FilterStatus::Ok)
            }
        }
    }

    fn produce(&mut self, out: &mut StageOutput) -> std::result::Result<(), StageError> {
        if self.process_ready_chunk(out)? {
            self.update_delay(out);
        }
        Ok(())
    }

    fn control(
        &mut self,
        cmd: &ControlCommand,
    ) -> std::result::Result<ControlResponse, StageError> {
        match cmd {
            ControlCommand::SetPlaybackSpeedResample(speed) => {
                if *speed <= 0.0 {
                    return Err(StageError::Failed(format!("invalid speed {speed}")));
                }
                self.speed = *speed;
                if let Some(inner) = &mut self.inner {
                    let ratio =
                        f64::from(self.out_format.sample_rate.as_hz()) / self.in_rate / self.speed;
                    inner
                        .set_ratio(ratio)
                        .map_err(|e| StageError::Failed(format!("ratio change: {e}")))?;
                }
                // with no live resampler the new speed applies on reinitialize
                Ok(ControlResponse::Ok)
            }
            ControlCommand::Reset => {
                self.input_buffer.clear();
                if let Some(inner) = &mut self.inner {
                    inner.reset();
                }
                Ok(ControlResponse::Ok)
            }
            _ => Ok(ControlResponse::NotImplemented),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo(rate: u32) -> AudioFormat {
        AudioFormat::new(SampleRate::new(rate), 2, 32)
    }

    fn opened(target: u32, input: AudioFormat) -> (ResampleStage, StageOutput) {
        let mut stage = ResampleStage::new(Some(SampleRate::new(target)), Quality::Fast);
        let ctx = OpenContext {
            input,
            replaygain: None,
        };
        match stage.open(&ctx) {
            Ok(Negotiation::Accept(out)) => {
                assert_eq!(out.sample_rate.as_hz(), target);
                (stage, StageOutput::new(out))
            }
            _ => panic!("expected accept"),
        }
    }

    fn drain_sample_count(out: &mut StageOutput) -> usize {
        let mut total = 0;
        while let Some(frame) = out.pop() {
            total += frame.len();
        }
        total
    }

    #[test]
    fn detaches_when_rates_match() {
        let mut stage = ResampleStage::new(Some(SampleRate::new(48_000)), Quality::Fast);
        let ctx = OpenContext {
            input: stereo(48_000),
            replaygain: None,
        };
        assert!(matches!(stage.open(&ctx), Ok(Negotiation::Detach)));
    }

    #[test]
    fn bad_rate_option_rejected() {
        let desc = crate::pipeline::registry::find("resample").unwrap();
        let err = desc.instantiate(&[("rate", "-1")]).unwrap_err();
        assert!(matches!(err, PipelineError::BadOption { option, .. } if option == "rate"));
    }

    #[test]
    fn buffers_until_a_chunk_is_ready() {
        let (mut stage, mut out) = opened(48_000, stereo(44_100));
        stage
            .filter(&mut out, Some(Frame::new(vec![0.1; 2 * 100], stereo(44_100))))
            .unwrap();
        assert_eq!(out.queued(), 0); // 100 frames < one chunk
        assert!(out.delay() > 0.0);

        // enough input for at least one whole chunk
        for _ in 0..20 {
            stage
                .filter(&mut out, Some(Frame::new(vec![0.1; 2 * 100], stereo(44_100))))
                .unwrap();
        }
        stage.produce(&mut out).unwrap();
        assert!(out.queued() > 0);
        let frame = out.pop().unwrap();
        assert_eq!(frame.format.sample_rate.as_hz(), 48_000);
    }

    #[test]
    fn conversion_ratio_holds_over_a_stream() {
        let (mut stage, mut out) = opened(48_000, stereo(44_100));
        let total_in_frames = 44_100; // one second
        for _ in 0..(total_in_frames / 1050) {
            stage
                .filter(
                    &mut out,
                    Some(Frame::new(vec![0.05; 2 * 1050], stereo(44_100))),
                )
                .unwrap();
            while stage.process_ready_chunk(&mut out).unwrap() {}
        }
        stage.filter(&mut out, None).unwrap();
        let produced_frames = drain_sample_count(&mut out) / 2;
        let fed_frames = (total_in_frames / 1050) * 1050;
        let expected = fed_frames as f64 * 48_000.0 / 44_100.0;
        let error = (produced_frames as f64 - expected).abs() / expected;
        assert!(error < 0.02, "ratio off by {error}");
    }

    #[test]
    fn reset_discards_buffered_input() {
        let (mut stage, mut out) = opened(48_000, stereo(44_100));
        stage
            .filter(&mut out, Some(Frame::new(vec![0.1; 2 * 100], stereo(44_100))))
            .unwrap();
        assert!(!stage.input_buffer.is_empty());
        stage.control(&ControlCommand::Reset).unwrap();
        assert!(stage.input_buffer.is_empty());
    }

    #[test]
    fn speed_change_adjusts_ratio_live() {
        let (mut stage, _out) = opened(48_000, stereo(44_100));
        let resp = stage
            .control(&ControlCommand::SetPlaybackSpeedResample(1.25))
            .unwrap();
        assert_eq!(resp, ControlResponse::Ok);
        assert_eq!(stage.speed, 1.25);
    }
}
