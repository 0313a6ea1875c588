//! Stage contract and per-stage bookkeeping
//!
//! A stage is one unit of audio transformation. The [`Stage`] trait is the
//! capability set every stage implements: format negotiation (`open`), frame
//! processing (`filter`), optional gradual production (`produce`), control
//! dispatch (`control`), and a cleanup hook (`uninit`). [`StageInstance`]
//! couples a boxed stage with everything the pipeline tracks about it:
//! negotiated formats, the pending-output queue, reported delay, its label,
//! and whether the pipeline inserted it automatically.

use crate::pipeline::control::{ControlCommand, ControlResponse};
use crate::pipeline::registry::StageDescriptor;
use crate::{PipelineError, Result};
use aria_core::{AudioFormat, Frame, ReplayGain};
use std::collections::VecDeque;
use thiserror::Error;

/// Error reported from inside a stage hook.
///
/// Mapped to the pipeline error taxonomy at every call site, so stage codes
/// never vanish silently.
#[derive(Error, Debug)]
pub(crate) enum StageError {
    /// The stage cannot work with the offered input format at all
    #[error("unsupported input format: {0}")]
    Unsupported(AudioFormat),
    /// Unrecoverable stage fault
    #[error("{0}")]
    Failed(String),
}

/// Everything a stage may inspect while (re)negotiating its formats.
pub(crate) struct OpenContext {
    /// The format the predecessor stage produces
    pub input: AudioFormat,
    /// ReplayGain side data attached to the stream, if any
    pub replaygain: Option<ReplayGain>,
}

/// Outcome of a stage's open/negotiation step.
pub(crate) enum Negotiation {
    /// Input accepted; the stage will produce the given output format
    Accept(AudioFormat),
    /// Input rejected; the stage wants this format instead. The pipeline
    /// gets one shot at inserting converters to provide it.
    Adjust(AudioFormat),
    /// The stage is a no-op for this input. Auto-inserted stages are
    /// removed; user stages stay in the chain as pass-through so their
    /// label remains addressable.
    Detach,
}

/// Outcome of a stage's frame-processing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterStatus {
    /// Frame consumed (output, if any, was queued)
    Ok,
    /// The stage wants to remove itself from the chain
    Detach,
}

/// The pipeline-owned side of a stage: its pending-output queue, reported
/// delay, and negotiated formats. Stages write through this handle during
/// `filter`/`produce`; the queue only ever grows through [`Self::push`].
pub(crate) struct StageOutput {
    input_format: AudioFormat,
    output_format: AudioFormat,
    queue: VecDeque<Frame>,
    delay: f64,
}

impl StageOutput {
    pub(crate) fn new(format: AudioFormat) -> Self {
        Self {
            input_format: format,
            output_format: format,
            queue: VecDeque::new(),
            delay: 0.0,
        }
    }

    /// Append a produced frame to the pending-output queue
    pub fn push(&mut self, frame: Frame) {
        debug_assert_eq!(frame.format, self.output_format);
        self.queue.push_back(frame);
    }

    /// Report the audio time currently consumed but not yet emitted
    pub fn set_delay(&mut self, seconds: f64) {
        self.delay = seconds;
    }

    /// The format this stage receives
    pub fn input_format(&self) -> AudioFormat {
        self.input_format
    }

    /// The format this stage produces
    pub fn output_format(&self) -> AudioFormat {
        self.output_format
    }

    /// Take the oldest queued frame
    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    /// Number of frames currently queued
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The currently reported buffering delay in seconds
    pub(crate) fn delay(&self) -> f64 {
        self.delay
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.delay = 0.0;
    }

    fn queued_duration(&self) -> f64 {
        self.queue.iter().map(Frame::duration_secs).sum()
    }
}

/// The per-stage capability set.
///
/// `filter` receives `None` as the end-of-stream sentinel and must flush any
/// internally buffered audio then. `produce` is the optional gradual
/// production hook for stages whose output count is decoupled from their
/// input count; the default produces nothing.
pub(crate) trait Stage: Send {
    /// Negotiate formats for the given input
    fn open(&mut self, ctx: &OpenContext) -> std::result::Result<Negotiation, StageError>;

    /// Process one input frame (`None` = end of stream, flush)
    fn filter(
        &mut self,
        out: &mut StageOutput,
        frame: Option<Frame>,
    ) -> std::result::Result<FilterStatus, StageError>;

    /// Try to manufacture more output without new input
    fn produce(&mut self, _out: &mut StageOutput) -> std::result::Result<(), StageError> {
        Ok(())
    }

    /// Handle an out-of-band control command
    fn control(
        &mut self,
        _cmd: &ControlCommand,
    ) -> std::result::Result<ControlResponse, StageError> {
        Ok(ControlResponse::NotImplemented)
    }

    /// Cleanup hook, run before the stage is released or reinitialized
    fn uninit(&mut self) {}
}

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Stage")
    }
}

/// One running stage in a pipeline's chain.
pub struct StageInstance {
    descriptor: &'static StageDescriptor,
    display_name: String,
    label: Option<String>,
    auto_inserted: bool,
    inner: Box<dyn Stage>,
    out: StageOutput,
    replaygain: Option<ReplayGain>,
    saw_eof: bool,
    opened: bool,
    /// One automatic conversion insertion has already been granted to this
    /// stage during the current initialize walk
    pub(crate) conversion_attempted: bool,
}

impl StageInstance {
    pub(crate) fn new(
        descriptor: &'static StageDescriptor,
        inner: Box<dyn Stage>,
        label: Option<&str>,
        provisional_format: AudioFormat,
    ) -> Self {
        let display_name = match label {
            Some(l) => format!("{}@{}", descriptor.name, l),
            None => descriptor.name.to_string(),
        };
        Self {
            descriptor,
            display_name,
            label: label.map(str::to_string),
            auto_inserted: false,
            inner,
            out: StageOutput::new(provisional_format),
            replaygain: None,
            saw_eof: false,
            opened: false,
            conversion_attempted: false,
        }
    }

    pub(crate) fn auto(
        descriptor: &'static StageDescriptor,
        inner: Box<dyn Stage>,
        provisional_format: AudioFormat,
    ) -> Self {
        let mut instance = Self::new(descriptor, inner, None, provisional_format);
        instance.auto_inserted = true;
        instance
    }

    /// The stage type name from the registry
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// "type" or "type@label", used in errors and logs
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The user-assigned label, if any
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Whether the pipeline inserted this stage for format conversion
    pub fn auto_inserted(&self) -> bool {
        self.auto_inserted
    }

    /// Negotiated input format (valid after a successful initialize)
    pub fn input_format(&self) -> AudioFormat {
        self.out.input_format()
    }

    /// Negotiated output format (valid after a successful initialize)
    pub fn output_format(&self) -> AudioFormat {
        self.out.output_format()
    }

    /// Audio time this stage has consumed without emitting output
    pub fn delay(&self) -> f64 {
        self.out.delay
    }

    pub(crate) fn queued_duration(&self) -> f64 {
        self.out.queued_duration()
    }

    pub(crate) fn has_output(&self) -> bool {
        !self.out.queue.is_empty()
    }

    pub(crate) fn pop_output(&mut self) -> Option<Frame> {
        self.out.queue.pop_front()
    }

    pub(crate) fn push_output_front(&mut self, frame: Frame) {
        self.out.queue.push_front(frame);
    }

    pub(crate) fn drain_output(&mut self) -> Vec<Frame> {
        self.out.queue.drain(..).collect()
    }

    pub(crate) fn saw_eof(&self) -> bool {
        self.saw_eof
    }

    /// Run the open/negotiation hook against the given input format.
    pub(crate) fn open(
        &mut self,
        input: AudioFormat,
        replaygain: Option<ReplayGain>,
    ) -> Result<Negotiation> {
        self.replaygain = replaygain;
        let ctx = OpenContext { input, replaygain };
        let negotiation = self
            .inner
            .open(&ctx)
            .map_err(|e| PipelineError::Negotiation {
                stage: self.display_name.clone(),
                message: e.to_string(),
            })?;
        if let Negotiation::Accept(output) = &negotiation {
            self.out.input_format = input;
            self.out.output_format = *output;
            self.opened = true;
        }
        Ok(negotiation)
    }

    /// Accept the input as-is without consulting the stage; used when a user
    /// stage declares itself a no-op but must stay addressable.
    pub(crate) fn accept_passthrough(&mut self, format: AudioFormat) {
        self.out.input_format = format;
        self.out.output_format = format;
        self.opened = true;
    }

    /// Feed one frame (or the EOF sentinel) through the stage.
    pub(crate) fn filter(&mut self, frame: Option<Frame>) -> Result<FilterStatus> {
        if self.saw_eof && frame.is_some() {
            return Err(PipelineError::Processing {
                stage: self.display_name.clone(),
                message: "frame delivered after end of stream".to_string(),
            });
        }
        if frame.is_none() {
            if self.saw_eof {
                return Ok(FilterStatus::Ok);
            }
            self.saw_eof = true;
        }
        self.inner
            .filter(&mut self.out, frame)
            .map_err(|e| PipelineError::Processing {
                stage: self.display_name.clone(),
                message: e.to_string(),
            })
    }

    /// Ask the gradual-production hook for more output.
    pub(crate) fn produce(&mut self) -> Result<()> {
        self.inner
            .produce(&mut self.out)
            .map_err(|e| PipelineError::Processing {
                stage: self.display_name.clone(),
                message: e.to_string(),
            })
    }

    /// Dispatch a control command to the stage.
    ///
    /// `Reinit` re-runs the open hook against the current negotiated input;
    /// a resulting output-format change cannot be absorbed mid-chain and is
    /// reported as an error telling the caller to reinitialize the whole
    /// pipeline. `Reset` additionally clears the pending-output queue, the
    /// reported delay, and the EOF latch.
    pub(crate) fn control(&mut self, cmd: &ControlCommand) -> Result<ControlResponse> {
        match cmd {
            ControlCommand::Reinit => {
                let input = self.out.input_format();
                let previous = self.out.output_format();
                match self.open(input, self.replaygain)? {
                    Negotiation::Accept(output) if output == previous => Ok(ControlResponse::Ok),
                    Negotiation::Detach => Ok(ControlResponse::Ok),
                    _ => Err(PipelineError::Processing {
                        stage: self.display_name.clone(),
                        message: "output format changed on reinit; reinitialize the pipeline"
                            .to_string(),
                    }),
                }
            }
            ControlCommand::Reset => {
                self.inner
                    .control(cmd)
                    .map_err(|e| PipelineError::Processing {
                        stage: self.display_name.clone(),
                        message: e.to_string(),
                    })?;
                self.out.clear();
                self.saw_eof = false;
                Ok(ControlResponse::Ok)
            }
            _ => self
                .inner
                .control(cmd)
                .map_err(|e| PipelineError::Processing {
                    stage: self.display_name.clone(),
                    message: e.to_string(),
                }),
        }
    }

    /// Run the cleanup hook and drop all runtime state, keeping the stage in
    /// the chain so it can be reinitialized later.
    pub(crate) fn uninit(&mut self) {
        if self.opened {
            self.inner.uninit();
            self.opened = false;
        }
        self.out.clear();
        self.saw_eof = false;
    }
}

impl std::fmt::Debug for StageInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageInstance")
            .field("name", &self.display_name)
            .field("auto_inserted", &self.auto_inserted)
            .field("input_format", &self.out.input_format)
            .field("output_format", &self.out.output_format)
            .field("queued", &self.out.queue.len())
            .field("delay", &self.out.delay)
            .finish()
    }
}
