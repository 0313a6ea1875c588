//! Playback speed stage
//!
//! Time-scales audio by linear interpolation: at speed `s`, every output
//! sample advances the input read position by `s` frames, so output length
//! is input length divided by `s`. The last input frame is carried across
//! calls for interpolation continuity; that carry is internal lookahead
//! state that must be dropped on reset, otherwise a seek would blend
//! samples across the discontinuity.

use crate::pipeline::control::{ControlCommand, ControlResponse};
use crate::pipeline::registry::{OptionKind, OptionSpec, OptionValues, StageDescriptor};
use crate::pipeline::{FilterStatus, Negotiation, OpenContext, Stage, StageError, StageOutput};
use crate::{PipelineError, Result};
use aria_core::{AudioFormat, Frame};

const NAME: &str = "speed";

pub(crate) static DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: NAME,
    description: "Playback speed change by linear-interpolation time scaling",
    options: &[OptionSpec {
        key: "speed",
        kind: OptionKind::Float,
        help: "speed factor, > 0 (default 1.0)",
    }],
    create,
};

fn create(options: &OptionValues) -> Result<Box<dyn Stage>> {
    let speed = options.float("speed").unwrap_or(1.0);
    if speed <= 0.0 {
        return Err(PipelineError::BadOption {
            stage: NAME.to_string(),
            option: "speed".to_string(),
            message: format!("speed must be positive, got {speed}"),
        });
    }
    Ok(Box::new(SpeedStage::new(speed)))
}

pub(crate) struct SpeedStage {
    speed: f64,
    /// Last input frame, kept for interpolation across call boundaries
    carry: Vec<f32>,
    have_carry: bool,
    /// Fractional read position relative to the carry frame
    phase: f64,
    channels: usize,
    out_format: AudioFormat,
}

impl SpeedStage {
    fn new(speed: f64) -> Self {
        Self {
            speed,
            carry: Vec::new(),
            have_carry: false,
            phase: 0.0,
            channels: 0,
            out_format: AudioFormat::cd_quality(),
        }
    }

    fn clear_state(&mut self) {
        self.carry.clear();
        self.have_carry = false;
        self.phase = 0.0;
    }
}

impl Stage for SpeedStage {
    fn open(&mut self, ctx: &OpenContext) -> std::result::Result<Negotiation, StageError> {
        self.clear_state();
        self.channels = ctx.input.channels as usize;
        self.out_format = ctx.input;
        Ok(Negotiation::Accept(ctx.input))
    }

    fn filter(
        &mut self,
        out: &mut StageOutput,
        frame: Option<Frame>,
    ) -> std::result::Result<FilterStatus, StageError> {
        let Some(frame) = frame else {
            // the at-most-one carried frame is dropped at end of stream
            self.clear_state();
            out.set_delay(0.0);
            return Ok(FilterStatus::Ok);
        };
        if self.speed == 1.0 && !self.have_carry && self.phase == 0.0 {
            out.push(frame);
            return Ok(FilterStatus::Ok);
        }

        let channels = self.channels;
        let rate = f64::from(self.out_format.sample_rate.as_hz());
        let src = frame.samples();
        let carried = usize::from(self.have_carry);
        let total = carried + frame.frames();
        let sample_at = |index: usize, channel: usize| -> f32 {
            if index < carried {
                self.carry[channel]
            } else {
                src[(index - carried) * channels + channel]
            }
        };

        let mut scaled = Vec::new();
        let mut position = self.phase;
        while position + 1.0 < total as f64 {
            let index = position as usize;
            let t = (position - index as f64) as f32;
            for c in 0..channels {
                let a = sample_at(index, c);
                let b = sample_at(index + 1, c);
                scaled.push(a + (b - a) * t);
            }
            position += self.speed;
        }

        if total > 0 {
            let new_carry: Vec<f32> = (0..channels).map(|c| sample_at(total - 1, c)).collect();
            self.carry = new_carry;
            self.have_carry = true;
            self.phase = position - (total - 1) as f64;
        }
        if !scaled.is_empty() {
            out.push(Frame::new(scaled, self.out_format));
        }
        out.set_delay(if self.have_carry { 1.0 / rate } else { 0.0 });
        Ok(FilterStatus::Ok)
    }

    fn control(
        &mut self,
        cmd: &ControlCommand,
    ) -> std::result::Result<ControlResponse, StageError> {
        match cmd {
            ControlCommand::SetPlaybackSpeed(speed) => {
                if *speed <= 0.0 {
                    return Err(StageError::Failed(format!("invalid speed {speed}")));
                }
                self.speed = *speed;
                Ok(ControlResponse::Ok)
            }
            ControlCommand::Reset => {
                self.clear_state();
                Ok(ControlResponse::Ok)
            }
            _ => Ok(ControlResponse::NotImplemented),
        }
    }
}
