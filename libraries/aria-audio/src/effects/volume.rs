//! Volume stage
//!
//! Scales samples by a linear gain, optionally soft-clipping the result and
//! applying the stream's ReplayGain. Stateless across frames: a gain of 1.0
//! with soft clipping off passes frames through without touching sample
//! memory.

use crate::pipeline::control::{ControlCommand, ControlResponse};
use crate::pipeline::registry::{OptionKind, OptionSpec, OptionValues, StageDescriptor};
use crate::pipeline::{FilterStatus, Negotiation, OpenContext, Stage, StageError, StageOutput};
use crate::{PipelineError, Result};
use aria_core::{Frame, ReplayGain};
use std::f32::consts::FRAC_PI_2;

const NAME: &str = "volume";

pub(crate) static DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: NAME,
    description: "Volume adjustment with soft clipping and ReplayGain support",
    options: &[
        OptionSpec {
            key: "gain",
            kind: OptionKind::Float,
            help: "linear gain factor (default 1.0)",
        },
        OptionSpec {
            key: "softclip",
            kind: OptionKind::Bool,
            help: "soft-clip samples instead of letting them exceed full scale",
        },
        OptionSpec {
            key: "replaygain",
            kind: OptionKind::Text,
            help: "apply stream ReplayGain: no, track or album",
        },
    ],
    create,
};

fn create(options: &OptionValues) -> Result<Box<dyn Stage>> {
    let mut settings = VolumeSettings::default();
    if let Some(gain) = options.float("gain") {
        if gain < 0.0 {
            return Err(PipelineError::BadOption {
                stage: NAME.to_string(),
                option: "gain".to_string(),
                message: "gain must be non-negative".to_string(),
            });
        }
        settings.gain = gain as f32;
    }
    if let Some(softclip) = options.bool("softclip") {
        settings.softclip = softclip;
    }
    if let Some(mode) = options.text("replaygain") {
        settings.replaygain = match mode {
            "no" => RgMode::No,
            "track" => RgMode::Track,
            "album" => RgMode::Album,
            _ => {
                return Err(PipelineError::BadOption {
                    stage: NAME.to_string(),
                    option: "replaygain".to_string(),
                    message: format!("expected no, track or album, got '{mode}'"),
                });
            }
        };
    }
    Ok(Box::new(VolumeStage::new(settings)))
}

/// Soft clipper: linear near zero, saturating smoothly at ±1.0
pub(crate) fn softclip(a: f32) -> f32 {
    if a >= FRAC_PI_2 {
        1.0
    } else if a <= -FRAC_PI_2 {
        -1.0
    } else {
        a.sin()
    }
}

fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RgMode {
    No,
    Track,
    Album,
}

#[derive(Debug, Clone)]
struct VolumeSettings {
    gain: f32,
    softclip: bool,
    replaygain: RgMode,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            gain: 1.0,
            softclip: false,
            replaygain: RgMode::No,
        }
    }
}

pub(crate) struct VolumeStage {
    settings: VolumeSettings,
    rg_gain: f32,
    replaygain: Option<ReplayGain>,
}

impl VolumeStage {
    fn new(settings: VolumeSettings) -> Self {
        Self {
            settings,
            rg_gain: 1.0,
            replaygain: None,
        }
    }

    fn effective_gain(&self) -> f32 {
        self.settings.gain * self.rg_gain
    }
}

impl Stage for VolumeStage {
    fn open(&mut self, ctx: &OpenContext) -> std::result::Result<Negotiation, StageError> {
        self.replaygain = ctx.replaygain;
        self.rg_gain = match (self.settings.replaygain, ctx.replaygain) {
            (RgMode::Track, Some(rg)) => db_to_linear(rg.track_gain),
            (RgMode::Album, Some(rg)) => db_to_linear(rg.album_gain),
            _ => 1.0,
        };
        Ok(Negotiation::Accept(ctx.input))
    }

    fn filter(
        &mut self,
        out: &mut StageOutput,
        frame: Option<Frame>,
    ) -> std::result::Result<FilterStatus, StageError> {
        let Some(mut frame) = frame else {
            return Ok(FilterStatus::Ok); // nothing buffered to flush
        };
        let gain = self.effective_gain();
        if gain != 1.0 || self.settings.softclip {
            for sample in frame.make_writable() {
                *sample *= gain;
                if self.settings.softclip {
                    *sample = softclip(*sample);
                }
            }
        }
        out.push(frame);
        Ok(FilterStatus::Ok)
    }

    fn control(
        &mut self,
        cmd: &ControlCommand,
    ) -> std::result::Result<ControlResponse, StageError> {
        match cmd {
            ControlCommand::SetVolume(gain) => {
                if *gain < 0.0 {
                    return Err(StageError::Failed(format!("invalid gain {gain}")));
                }
                self.settings.gain = *gain;
                Ok(ControlResponse::Ok)
            }
            ControlCommand::Command { name, arg } if name == "setvolume" => {
                let gain: f32 = arg
                    .parse()
                    .map_err(|_| StageError::Failed(format!("invalid volume '{arg}'")))?;
                if gain < 0.0 {
                    return Err(StageError::Failed(format!("invalid volume '{arg}'")));
                }
                self.settings.gain = gain;
                Ok(ControlResponse::Ok)
            }
            ControlCommand::GetMetadata => match self.replaygain {
                Some(rg) => Ok(ControlResponse::Metadata(vec![
                    ("replaygain_track_gain".to_string(), format!("{:.2}", rg.track_gain)),
                    ("replaygain_track_peak".to_string(), format!("{:.6}", rg.track_peak)),
                    ("replaygain_album_gain".to_string(), format!("{:.2}", rg.album_gain)),
                    ("replaygain_album_peak".to_string(), format!("{:.6}", rg.album_peak)),
                ])),
                None => Ok(ControlResponse::NotImplemented),
            },
            _ => Ok(ControlResponse::NotImplemented),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aria_core::{AudioFormat, SampleRate};

    fn stereo() -> AudioFormat {
        AudioFormat::new(SampleRate::DVD_QUALITY, 2, 32)
    }

    fn open_stage(stage: &mut VolumeStage, replaygain: Option<ReplayGain>) -> StageOutput {
        let ctx = OpenContext {
            input: stereo(),
            replaygain,
        };
        assert!(matches!(stage.open(&ctx), Ok(Negotiation::Accept(_))));
        StageOutput::new(stereo())
    }

    #[test]
    fn scales_samples() {
        let mut stage = VolumeStage::new(VolumeSettings {
            gain: 0.5,
            ..VolumeSettings::default()
        });
        let mut out = open_stage(&mut stage, None);
        stage
            .filter(&mut out, Some(Frame::new(vec![0.8; 8], stereo())))
            .unwrap();
        let frame = out.pop().unwrap();
        assert!(frame.samples().iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn unity_gain_shares_buffer() {
        let mut stage = VolumeStage::new(VolumeSettings::default());
        let mut out = open_stage(&mut stage, None);
        let frame = Frame::new(vec![0.8; 8], stereo());
        let original = frame.clone();
        stage.filter(&mut out, Some(frame)).unwrap();
        assert!(original.is_shared());
    }

    #[test]
    fn softclip_bounds() {
        assert_eq!(softclip(0.0), 0.0);
        assert_eq!(softclip(3.0), 1.0);
        assert_eq!(softclip(-3.0), -1.0);
        assert!(softclip(0.5) < 0.5);
        assert!(softclip(0.5) > 0.4);
    }

    #[test]
    fn setvolume_command_parses() {
        let mut stage = VolumeStage::new(VolumeSettings::default());
        let resp = stage
            .control(&ControlCommand::Command {
                name: "setvolume".to_string(),
                arg: "0.25".to_string(),
            })
            .unwrap();
        assert_eq!(resp, ControlResponse::Ok);
        assert_eq!(stage.settings.gain, 0.25);

        let err = stage.control(&ControlCommand::Command {
            name: "setvolume".to_string(),
            arg: "loud".to_string(),
        });
        assert!(err.is_err());
    }

    #[test]
    fn replaygain_track_mode_applies_gain() {
        let mut stage = VolumeStage::new(VolumeSettings {
            replaygain: RgMode::Track,
            ..VolumeSettings::default()
        });
        let rg = ReplayGain::track_only(-6.0, 0.9);
        let _ = open_stage(&mut stage, Some(rg));
        let expected = db_to_linear(-6.0);
        assert!((stage.effective_gain() - expected).abs() < 1e-6);
    }

    #[test]
    fn metadata_reports_replaygain() {
        let mut stage = VolumeStage::new(VolumeSettings::default());
        let _ = open_stage(&mut stage, Some(ReplayGain::track_only(-6.4, 0.98)));
        let resp = stage.control(&ControlCommand::GetMetadata).unwrap();
        let ControlResponse::Metadata(entries) = resp else {
            panic!("expected metadata");
        };
        assert!(entries
            .iter()
            .any(|(k, v)| k == "replaygain_track_gain" && v == "-6.40"));
    }

    #[test]
    fn no_replaygain_means_not_implemented() {
        let mut stage = VolumeStage::new(VolumeSettings::default());
        let _ = open_stage(&mut stage, None);
        let resp = stage.control(&ControlCommand::GetMetadata).unwrap();
        assert_eq!(resp, ControlResponse::NotImplemented);
    }
}
