//! Pan stage
//!
//! Mixes input channels into output channels through a gain matrix. The
//! matrix is either given explicitly (row-major, one row per output
//! channel) or defaulted to an average/duplicate remix for the negotiated
//! channel counts. Stereo balance and per-output-channel levels are applied
//! on top of the matrix at mix time.

use crate::pipeline::control::{ControlCommand, ControlResponse};
use crate::pipeline::registry::{OptionKind, OptionSpec, OptionValues, StageDescriptor};
use crate::pipeline::{FilterStatus, Negotiation, OpenContext, Stage, StageError, StageOutput};
use crate::{PipelineError, Result};
use aria_core::{AudioFormat, Frame};

const NAME: &str = "pan";
const MAX_CHANNELS: i64 = 8;

pub(crate) static DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: NAME,
    description: "Channel mixing with a gain matrix, balance and per-channel levels",
    options: &[
        OptionSpec {
            key: "channels",
            kind: OptionKind::Int,
            help: "output channel count (default 2)",
        },
        OptionSpec {
            key: "matrix",
            kind: OptionKind::Text,
            help: "mixing matrix as a flat comma list, one row per output channel",
        },
    ],
    create,
};

fn create(options: &OptionValues) -> Result<Box<dyn Stage>> {
    let out_channels = match options.int("channels") {
        Some(n) if (1..=MAX_CHANNELS).contains(&n) => n as u16,
        Some(n) => {
            return Err(PipelineError::BadOption {
                stage: NAME.to_string(),
                option: "channels".to_string(),
                message: format!("channel count {n} out of range 1-{MAX_CHANNELS}"),
            });
        }
        None => 2,
    };
    let explicit = match options.text("matrix") {
        Some(text) => {
            let values: std::result::Result<Vec<f32>, _> =
                text.split(',').map(|v| v.trim().parse::<f32>()).collect();
            let values = values.map_err(|_| PipelineError::BadOption {
                stage: NAME.to_string(),
                option: "matrix".to_string(),
                message: format!("expected comma-separated numbers, got '{text}'"),
            })?;
            if values.is_empty() || values.len() % out_channels as usize != 0 {
                return Err(PipelineError::BadOption {
                    stage: NAME.to_string(),
                    option: "matrix".to_string(),
                    message: format!(
                        "matrix size {} is not a multiple of {out_channels} output channels",
                        values.len()
                    ),
                });
            }
            if values.len() / out_channels as usize > MAX_CHANNELS as usize {
                return Err(PipelineError::BadOption {
                    stage: NAME.to_string(),
                    option: "matrix".to_string(),
                    message: format!("matrix implies more than {MAX_CHANNELS} input channels"),
                });
            }
            Some(values)
        }
        None => None,
    };
    Ok(Box::new(PanStage::new(out_channels, explicit)))
}

/// Default remix matrix: identity when counts match, averaging groups of
/// inputs on downmix, duplicating inputs cyclically on upmix.
fn default_matrix(in_channels: usize, out_channels: usize) -> Vec<f32> {
    let mut matrix = vec![0.0; in_channels * out_channels];
    if out_channels <= in_channels {
        for o in 0..out_channels {
            let sources: Vec<usize> = (0..in_channels).filter(|i| i % out_channels == o).collect();
            let weight = 1.0 / sources.len() as f32;
            for i in sources {
                matrix[o * in_channels + i] = weight;
            }
        }
    } else {
        for o in 0..out_channels {
            matrix[o * in_channels + o % in_channels] = 1.0;
        }
    }
    matrix
}

pub(crate) struct PanStage {
    out_channels: u16,
    pending_out: Option<u16>,
    explicit: Option<Vec<f32>>,
    matrix: Vec<f32>,
    in_channels: u16,
    gains: Vec<f32>,
    balance: f32,
    out_format: AudioFormat,
}

impl PanStage {
    fn new(out_channels: u16, explicit: Option<Vec<f32>>) -> Self {
        Self {
            out_channels,
            pending_out: None,
            explicit,
            matrix: Vec::new(),
            in_channels: 0,
            gains: Vec::new(),
            balance: 0.0,
            out_format: AudioFormat::cd_quality(),
        }
    }

    fn balance_factor(&self, channel: usize) -> f32 {
        if self.out_channels != 2 {
            return 1.0;
        }
        if channel == 0 {
            (1.0 - self.balance).min(1.0)
        } else {
            (1.0 + self.balance).min(1.0)
        }
    }
}

impl Stage for PanStage {
    fn open(&mut self, ctx: &OpenContext) -> std::result::Result<Negotiation, StageError> {
        if let Some(channels) = self.pending_out.take() {
            self.out_channels = channels;
        }
        let in_channels = ctx.input.channels;
        match &self.explicit {
            Some(matrix) => {
                let required = (matrix.len() / self.out_channels as usize) as u16;
                if in_channels != required {
                    return Ok(Negotiation::Adjust(AudioFormat {
                        channels: required,
                        ..ctx.input
                    }));
                }
                self.matrix = matrix.clone();
            }
            None => {
                self.matrix =
                    default_matrix(in_channels as usize, self.out_channels as usize);
            }
        }
        self.in_channels = in_channels;
        if self.gains.len() != self.out_channels as usize {
            self.gains = vec![1.0; self.out_channels as usize];
        }
        self.out_format = AudioFormat {
            channels: self.out_channels,
            ..ctx.input
        };
        Ok(Negotiation::Accept(self.out_format))
    }

    fn filter(
        &mut self,
        out: &mut StageOutput,
        frame: Option<Frame>,
    ) -> std::result::Result<FilterStatus, StageError> {
        let Some(frame) = frame else {
            return Ok(FilterStatus::Ok); // stateless, nothing to flush
        };
        let in_channels = self.in_channels as usize;
        let out_channels = self.out_channels as usize;
        let src = frame.samples();
        let frames = frame.frames();
        let mut mixed = Vec::with_capacity(frames * out_channels);
        for f in 0..frames {
            for o in 0..out_channels {
                let mut acc = 0.0f32;
                for i in 0..in_channels {
                    acc += self.matrix[o * in_channels + i] * src[f * in_channels + i];
                }
                mixed.push(acc * self.gains[o] * self.balance_factor(o));
            }
        }
        out.push(Frame::new(mixed, self.out_format));
        Ok(FilterStatus::Ok)
    }

    fn control(
        &mut self,
        cmd: &ControlCommand,
    ) -> std::result::Result<ControlResponse, StageError> {
        match cmd {
            ControlCommand::SetPanLevel { channel, level } => {
                if *channel >= self.gains.len() {
                    return Err(StageError::Failed(format!(
                        "output channel {channel} out of range"
                    )));
                }
                self.gains[*channel] = *level;
                Ok(ControlResponse::Ok)
            }
            ControlCommand::SetPanChannelCount(channels) => {
                if !(1..=MAX_CHANNELS as usize).contains(channels) {
                    return Err(StageError::Failed(format!(
                        "channel count {channels} out of range 1-{MAX_CHANNELS}"
                    )));
                }
                self.pending_out = Some(*channels as u16);
                Ok(ControlResponse::Ok)
            }
            ControlCommand::SetPanBalance(balance) => {
                self.balance = balance.clamp(-1.0, 1.0);
                Ok(ControlResponse::Ok)
            }
            ControlCommand::GetPanBalance => Ok(ControlResponse::Value(self.balance)),
            _ => Ok(ControlResponse::NotImplemented),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aria_core::SampleRate;

    fn format(channels: u16) -> AudioFormat {
        AudioFormat::new(SampleRate::DVD_QUALITY, channels, 32)
    }

    fn opened(out_channels: u16, explicit: Option<Vec<f32>>, in_channels: u16) -> (PanStage, StageOutput) {
        let mut stage = PanStage::new(out_channels, explicit);
        let ctx = OpenContext {
            input: format(in_channels),
            replaygain: None,
        };
        match stage.open(&ctx) {
            Ok(Negotiation::Accept(out)) => {
                assert_eq!(out.channels, out_channels);
                (stage, StageOutput::new(out))
            }
            other => panic!("unexpected negotiation: {:?}", other.is_ok()),
        }
    }

    #[test]
    fn stereo_to_mono_averages() {
        let (mut stage, mut out) = opened(1, None, 2);
        stage
            .filter(&mut out, Some(Frame::new(vec![0.2, 0.6, 0.4, 0.8], format(2))))
            .unwrap();
        let frame = out.pop().unwrap();
        assert_eq!(frame.format.channels, 1);
        let samples = frame.samples();
        assert!((samples[0] - 0.4).abs() < 1e-6);
        assert!((samples[1] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let (mut stage, mut out) = opened(2, None, 1);
        stage
            .filter(&mut out, Some(Frame::new(vec![0.3, 0.7], format(1))))
            .unwrap();
        let frame = out.pop().unwrap();
        assert_eq!(frame.samples(), &[0.3, 0.3, 0.7, 0.7][..]);
    }

    #[test]
    fn explicit_matrix_requires_matching_input() {
        let mut stage = PanStage::new(2, Some(vec![1.0, 0.0, 0.0, 1.0])); // 2x2 identity
        let ctx = OpenContext {
            input: format(6),
            replaygain: None,
        };
        match stage.open(&ctx) {
            Ok(Negotiation::Adjust(wanted)) => assert_eq!(wanted.channels, 2),
            _ => panic!("expected adjust"),
        }
    }

    #[test]
    fn balance_attenuates_one_side() {
        let (mut stage, mut out) = opened(2, None, 2);
        stage
            .control(&ControlCommand::SetPanBalance(0.5))
            .unwrap();
        stage
            .filter(&mut out, Some(Frame::new(vec![1.0, 1.0], format(2))))
            .unwrap();
        let frame = out.pop().unwrap();
        assert!((frame.samples()[0] - 0.5).abs() < 1e-6); // left attenuated
        assert!((frame.samples()[1] - 1.0).abs() < 1e-6); // right untouched

        let resp = stage.control(&ControlCommand::GetPanBalance).unwrap();
        assert_eq!(resp, ControlResponse::Value(0.5));
    }

    #[test]
    fn pan_level_scales_output_channel() {
        let (mut stage, mut out) = opened(2, None, 2);
        stage
            .control(&ControlCommand::SetPanLevel {
                channel: 1,
                level: 0.25,
            })
            .unwrap();
        stage
            .filter(&mut out, Some(Frame::new(vec![0.8, 0.8], format(2))))
            .unwrap();
        let frame = out.pop().unwrap();
        assert!((frame.samples()[0] - 0.8).abs() < 1e-6);
        assert!((frame.samples()[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn channel_count_change_waits_for_reinit() {
        let (mut stage, _out) = opened(2, None, 2);
        stage
            .control(&ControlCommand::SetPanChannelCount(1))
            .unwrap();
        let ctx = OpenContext {
            input: format(2),
            replaygain: None,
        };
        match stage.open(&ctx) {
            Ok(Negotiation::Accept(out)) => assert_eq!(out.channels, 1),
            _ => panic!("expected accept"),
        }
    }
}
