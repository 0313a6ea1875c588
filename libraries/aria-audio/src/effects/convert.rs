//! Format conversion stage
//!
//! Bridges channel-count and declared-depth mismatches between neighbors.
//! This is the stage the pipeline inserts automatically when two adjacent
//! stages disagree on channels or bit depth; it can also be added by hand.
//! Samples stay f32 in memory, so a depth change only rewrites the format
//! declaration; channel changes remix with duplicate/average rules.

use crate::pipeline::registry::{OptionKind, OptionSpec, OptionValues, StageDescriptor};
use crate::pipeline::{FilterStatus, Negotiation, OpenContext, Stage, StageError, StageOutput};
use crate::{PipelineError, Result};
use aria_core::{AudioFormat, Frame};

const NAME: &str = "convert";
const VALID_BITS: [i64; 4] = [8, 16, 24, 32];

pub(crate) static DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: NAME,
    description: "Channel-count and bit-depth conversion",
    options: &[
        OptionSpec {
            key: "channels",
            kind: OptionKind::Int,
            help: "target channel count",
        },
        OptionSpec {
            key: "bits",
            kind: OptionKind::Int,
            help: "target declared bit depth (8, 16, 24 or 32)",
        },
    ],
    create,
};

fn create(options: &OptionValues) -> Result<Box<dyn Stage>> {
    let channels = match options.int("channels") {
        Some(n) if (1..=8).contains(&n) => Some(n as u16),
        Some(n) => {
            return Err(PipelineError::BadOption {
                stage: NAME.to_string(),
                option: "channels".to_string(),
                message: format!("channel count {n} out of range 1-8"),
            });
        }
        None => None,
    };
    let bits = match options.int("bits") {
        Some(n) if VALID_BITS.contains(&n) => Some(n as u16),
        Some(n) => {
            return Err(PipelineError::BadOption {
                stage: NAME.to_string(),
                option: "bits".to_string(),
                message: format!("unsupported bit depth {n}"),
            });
        }
        None => None,
    };
    Ok(Box::new(ConvertStage {
        target_channels: channels,
        target_bits: bits,
        in_channels: 0,
        out_format: AudioFormat::cd_quality(),
    }))
}

pub(crate) struct ConvertStage {
    target_channels: Option<u16>,
    target_bits: Option<u16>,
    in_channels: u16,
    out_format: AudioFormat,
}

impl ConvertStage {
    /// Converter targeting the given channel count and depth; fields equal
    /// to the eventual input pass through unchanged.
    pub(crate) fn with_target(channels: u16, bits: u16) -> Self {
        Self {
            target_channels: Some(channels),
            target_bits: Some(bits),
            in_channels: 0,
            out_format: AudioFormat::cd_quality(),
        }
    }
}

/// Duplicate/average channel remix: on downmix each output averages the
/// inputs that fold onto it, on upmix inputs are duplicated cyclically.
fn remix(src: &[f32], in_channels: usize, out_channels: usize) -> Vec<f32> {
    let frames = src.len() / in_channels;
    let mut mixed = Vec::with_capacity(frames * out_channels);
    for f in 0..frames {
        let frame = &src[f * in_channels..(f + 1) * in_channels];
        if out_channels <= in_channels {
            for o in 0..out_channels {
                let mut acc = 0.0f32;
                let mut count = 0u32;
                for (i, &sample) in frame.iter().enumerate() {
                    if i % out_channels == o {
                        acc += sample;
                        count += 1;
                    }
                }
                mixed.push(acc / count as f32);
            }
        } else {
            for o in 0..out_channels {
                mixed.push(frame[o % in_channels]);
            }
        }
    }
    mixed
}

impl Stage for ConvertStage {
    fn open(&mut self, ctx: &OpenContext) -> std::result::Result<Negotiation, StageError> {
        let mut out = ctx.input;
        if let Some(channels) = self.target_channels {
            out.channels = channels;
        }
        if let Some(bits) = self.target_bits {
            out.bits_per_sample = bits;
        }
        if out == ctx.input {
            return Ok(Negotiation::Detach); // nothing to convert
        }
        self.in_channels = ctx.input.channels;
        self.out_format = out;
        Ok(Negotiation::Accept(out))
    }

    fn filter(
        &mut self,
        out: &mut StageOutput,
        frame: Option<Frame>,
    ) -> std::result::Result<FilterStatus, StageError> {
        let Some(frame) = frame else {
            return Ok(FilterStatus::Ok);
        };
        if self.out_format.channels == self.in_channels {
            // depth-only change: keep sharing the sample buffer
            out.push(frame.with_format(self.out_format));
        } else {
            let mixed = remix(
                frame.samples(),
                self.in_channels as usize,
                self.out_format.channels as usize,
            );
            out.push(Frame::new(mixed, self.out_format));
        }
        Ok(FilterStatus::Ok)
    }
}
