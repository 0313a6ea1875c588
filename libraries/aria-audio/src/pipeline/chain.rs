//! The pipeline: an owned, ordered chain of stages
//!
//! Stages live in a `Vec` in chain order; neighbor relationships are implied
//! by position, so inserting and removing stages is a splice instead of
//! pointer surgery. The pipeline owns every stage, negotiates formats
//! between neighbors on `initialize`, pushes frames in at the head, drains
//! produced frames from the tail, and aggregates per-stage delay.
//!
//! All operations run to completion on the calling thread. Reconfiguration
//! (add/remove/reinitialize) must happen between frame pushes, never while a
//! frame is mid-flight; a pipeline is meant to be owned by a single thread.

use crate::effects;
use crate::pipeline::control::{ControlCommand, ControlResponse};
use crate::pipeline::registry;
use crate::pipeline::spec::PipelineConfig;
use crate::pipeline::stage::{FilterStatus, Negotiation, StageInstance};
use crate::{PipelineError, Result};
use aria_core::{AudioFormat, Frame, ReplayGain};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Upper bound on refill rounds per stage per drain call, so a stage that
/// consumes input without ever producing output cannot spin the pull path
/// forever.
const PULL_LIMIT: usize = 256;

/// Initialization state of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Chain topology exists but formats are not negotiated
    Uninitialized,
    /// Formats negotiated, frames may flow
    Initialized,
    /// The last initialize or processing call failed
    Failed,
}

/// Result of a drain attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// A frame is queued at the tail, ready to read
    Ready,
    /// The chain cannot produce more output without new input
    NeedMoreInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedOutcome {
    Ok,
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refill {
    Ready,
    NeedMore,
    Restart,
}

/// The audio filter pipeline.
///
/// Created once per playback session. The declared input format is what the
/// decoder delivers; the declared output format, if set, is what the sink
/// requires — `initialize` appends converters if the chain's tail disagrees
/// with it.
pub struct Pipeline {
    state: PipelineState,
    stages: Vec<StageInstance>,
    input: AudioFormat,
    output: Option<AudioFormat>,
    filter_output: AudioFormat,
    replaygain: Option<ReplayGain>,
    /// Stands in for the tail queue while the chain is empty (pass-through)
    direct: VecDeque<Frame>,
    input_eof: bool,
}

impl Pipeline {
    /// Create an empty, uninitialized pipeline for the given input format
    pub fn new(input: AudioFormat) -> Self {
        Self {
            state: PipelineState::Uninitialized,
            stages: Vec::new(),
            input,
            output: None,
            filter_output: input,
            replaygain: None,
            direct: VecDeque::new(),
            input_eof: false,
        }
    }

    /// Build a pipeline from a configuration: formats, side data, and the
    /// ordered stage list. Negotiation still happens on `initialize`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut pipeline = Self::new(config.input);
        pipeline.output = config.output;
        pipeline.replaygain = config.replaygain;
        for spec in &config.stages {
            let args: Vec<(&str, &str)> = spec
                .args
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            pipeline.add_stage(&spec.name, spec.label.as_deref(), &args)?;
        }
        Ok(pipeline)
    }

    /// Current initialization state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of stages in the chain (including auto-inserted converters)
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain holds no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The declared input format
    pub fn input_format(&self) -> AudioFormat {
        self.input
    }

    /// The declared output (sink) format, if one was set
    pub fn output_format(&self) -> Option<AudioFormat> {
        self.output
    }

    /// The negotiated output format, valid after a successful initialize
    pub fn filter_output(&self) -> AudioFormat {
        self.filter_output
    }

    /// Stages in chain order
    pub fn stages(&self) -> impl Iterator<Item = &StageInstance> {
        self.stages.iter()
    }

    /// Display names of the stages in chain order, for diagnostics
    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|s| s.display_name().to_string())
            .collect()
    }

    /// Change the declared input format; takes effect on the next initialize
    pub fn set_input_format(&mut self, format: AudioFormat) {
        self.input = format;
    }

    /// Change the declared output format; takes effect on the next initialize
    pub fn set_output_format(&mut self, format: Option<AudioFormat>) {
        self.output = format;
    }

    /// Attach ReplayGain side data; stages see it on the next initialize
    pub fn set_replaygain(&mut self, replaygain: Option<ReplayGain>) {
        self.replaygain = replaygain;
    }

    // ---- lifecycle ------------------------------------------------------

    /// Negotiate formats head to tail and bring the pipeline into the
    /// initialized state.
    ///
    /// Walks the chain opening each stage with its predecessor's output
    /// format (the head gets the declared input format). A stage that
    /// rejects its input gets one automatic conversion attempt: the pipeline
    /// inserts the needed converter stages immediately before it and retries
    /// once. A second rejection, or a converter failing itself, is terminal:
    /// the state becomes `Failed` and the chain is left intact for the
    /// caller to inspect or modify. If a declared output format is set and
    /// the tail disagrees with it, the same conversion logic runs at the
    /// tail.
    pub fn initialize(&mut self) -> Result<()> {
        self.discard_runtime_state();
        self.state = PipelineState::Failed;
        // conversions are re-derived from scratch on every walk; converters
        // from a previous initialize would pin stale format decisions
        let mut i = 0;
        while i < self.stages.len() {
            if self.stages[i].auto_inserted() {
                let mut stage = self.stages.remove(i);
                stage.uninit();
            } else {
                i += 1;
            }
        }
        for stage in &mut self.stages {
            stage.conversion_attempted = false;
        }

        let mut format = self.input;
        let mut i = 0;
        while i < self.stages.len() {
            match self.stages[i].open(format, self.replaygain)? {
                Negotiation::Accept(output) => {
                    format = output;
                    i += 1;
                }
                Negotiation::Detach => {
                    if self.stages[i].auto_inserted() {
                        let mut stage = self.stages.remove(i);
                        debug!("dropping redundant converter {}", stage.display_name());
                        stage.uninit();
                    } else {
                        self.stages[i].accept_passthrough(format);
                        i += 1;
                    }
                }
                Negotiation::Adjust(wanted) => {
                    if self.stages[i].auto_inserted() || self.stages[i].conversion_attempted {
                        let stage = self.stages[i].display_name().to_string();
                        warn!("negotiation failed at {stage}: {format} -> {wanted}");
                        return Err(PipelineError::Negotiation {
                            stage,
                            message: format!("cannot convert {format} to {wanted}"),
                        });
                    }
                    self.stages[i].conversion_attempted = true;
                    let inserted = self.conversion_stages(format, wanted)?;
                    debug!(
                        "inserting {} converter(s) before {}",
                        inserted.len(),
                        self.stages[i].display_name()
                    );
                    for (offset, stage) in inserted.into_iter().enumerate() {
                        self.stages.insert(i + offset, stage);
                    }
                    // loop resumes at the first inserted converter
                }
            }
        }

        if let Some(want) = self.output {
            if format != want {
                debug!("bridging tail format {format} to sink format {want}");
                for mut stage in self.conversion_stages(format, want)? {
                    match stage.open(format, self.replaygain)? {
                        Negotiation::Accept(output) => {
                            format = output;
                            self.stages.push(stage);
                        }
                        _ => {
                            return Err(PipelineError::Negotiation {
                                stage: stage.display_name().to_string(),
                                message: format!("cannot reach sink format {want}"),
                            });
                        }
                    }
                }
                if format != want {
                    return Err(PipelineError::Negotiation {
                        stage: "output".to_string(),
                        message: format!("tail produces {format}, sink requires {want}"),
                    });
                }
            }
        }

        self.filter_output = format;
        self.state = PipelineState::Initialized;
        debug!(
            "pipeline initialized: {} -> {} through [{}]",
            self.input,
            self.filter_output,
            self.stage_names().join(", ")
        );
        Ok(())
    }

    /// Run every stage's cleanup hook and drop runtime state, keeping the
    /// chain topology so it can be initialized again.
    pub fn uninitialize(&mut self) {
        for stage in &mut self.stages {
            stage.uninit();
        }
        self.discard_runtime_state();
        self.state = PipelineState::Uninitialized;
    }

    /// Uninitialize, then initialize again
    pub fn reinitialize(&mut self) -> Result<()> {
        self.uninitialize();
        self.initialize()
    }

    fn discard_runtime_state(&mut self) {
        for stage in &mut self.stages {
            let _ = stage.drain_output();
        }
        self.direct.clear();
        self.input_eof = false;
    }

    /// The converter stages needed to turn `have` into `want`, unopened
    fn conversion_stages(
        &self,
        have: AudioFormat,
        want: AudioFormat,
    ) -> Result<Vec<StageInstance>> {
        let mut inserted = Vec::new();
        if have.channels != want.channels || have.bits_per_sample != want.bits_per_sample {
            inserted.push(StageInstance::auto(
                &effects::convert::DESCRIPTOR,
                Box::new(effects::convert::ConvertStage::with_target(
                    want.channels,
                    want.bits_per_sample,
                )),
                have,
            ));
        }
        if have.sample_rate != want.sample_rate {
            inserted.push(StageInstance::auto(
                &effects::resample::DESCRIPTOR,
                Box::new(effects::resample::ResampleStage::with_target(
                    want.sample_rate,
                )),
                have,
            ));
        }
        if inserted.is_empty() {
            return Err(PipelineError::Negotiation {
                stage: "convert".to_string(),
                message: format!("no conversion available from {have} to {want}"),
            });
        }
        Ok(inserted)
    }

    // ---- dynamic reconfiguration ----------------------------------------

    /// Add a stage to the chain.
    ///
    /// Looks the type up in the registry, validates `args` against its
    /// option schema, and appends it — ahead of any trailing auto-inserted
    /// converter run, which exists to satisfy the sink and stays at the
    /// tail. Format negotiation is deferred to the next `initialize`.
    /// Returns the position the stage was inserted at.
    pub fn add_stage(
        &mut self,
        name: &str,
        label: Option<&str>,
        args: &[(&str, &str)],
    ) -> Result<usize> {
        let descriptor =
            registry::find(name).ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        if let Some(label) = label {
            if self.stages.iter().any(|s| s.label() == Some(label)) {
                return Err(PipelineError::DuplicateLabel(label.to_string()));
            }
        }
        let inner = descriptor.instantiate(args)?;
        let instance = StageInstance::new(descriptor, inner, label, self.input);
        let at = self.insertion_point();
        debug!("adding stage {} at position {at}", instance.display_name());
        self.stages.insert(at, instance);
        Ok(at)
    }

    fn insertion_point(&self) -> usize {
        let mut at = self.stages.len();
        while at > 0 && self.stages[at - 1].auto_inserted() {
            at -= 1;
        }
        at
    }

    /// Remove the stage carrying `label`, plus any immediately adjacent
    /// auto-inserted converters — they only existed to bridge the removed
    /// stage's format contract. Auto-inserted stages carry no label and
    /// cannot be targeted directly.
    pub fn remove_by_label(&mut self, label: &str) -> Result<()> {
        let idx = self
            .stages
            .iter()
            .position(|s| s.label() == Some(label))
            .ok_or_else(|| PipelineError::NoSuchLabel(label.to_string()))?;
        let mut start = idx;
        while start > 0 && self.stages[start - 1].auto_inserted() {
            start -= 1;
        }
        let mut end = idx + 1;
        while end < self.stages.len() && self.stages[end].auto_inserted() {
            end += 1;
        }
        for mut stage in self.stages.drain(start..end) {
            debug!("removing stage {}", stage.display_name());
            stage.uninit();
        }
        Ok(())
    }

    /// Find the stage carrying `label`
    pub fn find_by_label(&self, label: &str) -> Option<&StageInstance> {
        self.stages.iter().find(|s| s.label() == Some(label))
    }

    // ---- frame flow ------------------------------------------------------

    /// Push one frame (or the end-of-stream sentinel, `None`) into the head
    /// of the chain.
    ///
    /// The frame's format must match the declared input format. After EOF
    /// has been pushed, further frames are rejected until a reset.
    pub fn filter_frame(&mut self, frame: Option<Frame>) -> Result<()> {
        if self.state != PipelineState::Initialized {
            return Err(PipelineError::NotInitialized);
        }
        if self.input_eof {
            return Err(PipelineError::Processing {
                stage: "input".to_string(),
                message: "frame pushed after end of stream".to_string(),
            });
        }
        match frame {
            Some(frame) => {
                if frame.format != self.input {
                    return Err(PipelineError::Processing {
                        stage: "input".to_string(),
                        message: format!(
                            "frame format {} does not match declared input {}",
                            frame.format, self.input
                        ),
                    });
                }
                if self.stages.is_empty() {
                    self.direct.push_back(frame);
                    Ok(())
                } else {
                    self.feed(0, Some(frame)).map(|_| ())
                }
            }
            None => {
                self.input_eof = true;
                if !self.stages.is_empty() {
                    self.feed(0, None)?;
                }
                Ok(())
            }
        }
    }

    /// Try to get a frame queued at the tail, pulling gradually through the
    /// chain. With `eof` set, stages whose upstream is exhausted are flushed
    /// so the chain drains completely.
    pub fn output_frame(&mut self, eof: bool) -> Result<OutputStatus> {
        if self.state != PipelineState::Initialized {
            return Err(PipelineError::NotInitialized);
        }
        loop {
            if self.stages.is_empty() {
                return Ok(if self.direct.is_empty() {
                    OutputStatus::NeedMoreInput
                } else {
                    OutputStatus::Ready
                });
            }
            let tail = self.stages.len() - 1;
            match self.refill(tail, eof)? {
                Refill::Ready => return Ok(OutputStatus::Ready),
                Refill::NeedMore => return Ok(OutputStatus::NeedMoreInput),
                Refill::Restart => {} // a stage detached itself; re-resolve the tail
            }
        }
    }

    /// Remove and return the frame currently queued at the tail, if any
    pub fn read_output_frame(&mut self) -> Result<Option<Frame>> {
        let tail_empty = match self.stages.last() {
            Some(stage) => !stage.has_output(),
            None => self.direct.is_empty(),
        };
        if tail_empty {
            let _ = self.output_frame(false)?;
        }
        Ok(match self.stages.last_mut() {
            Some(stage) => stage.pop_output(),
            None => self.direct.pop_front(),
        })
    }

    /// Push a frame back onto the front of the tail queue, undoing the most
    /// recent read. The frame regains the position it held before removal.
    pub fn unread_output_frame(&mut self, frame: Frame) {
        match self.stages.last_mut() {
            Some(stage) => stage.push_output_front(frame),
            None => self.direct.push_front(frame),
        }
    }

    /// Ensure stage `idx` has output queued, recursing upstream for input.
    fn refill(&mut self, idx: usize, eof: bool) -> Result<Refill> {
        for _ in 0..PULL_LIMIT {
            if self.stages[idx].has_output() {
                return Ok(Refill::Ready);
            }
            self.stages[idx].produce()?;
            if self.stages[idx].has_output() {
                return Ok(Refill::Ready);
            }
            if self.stages[idx].saw_eof() {
                return Ok(Refill::NeedMore);
            }
            let upstream = if idx == 0 {
                None
            } else {
                match self.refill(idx - 1, eof)? {
                    Refill::Ready => self.stages[idx - 1].pop_output(),
                    Refill::NeedMore => None,
                    Refill::Restart => return Ok(Refill::Restart),
                }
            };
            match upstream {
                Some(frame) => {
                    if self.feed(idx, Some(frame))? == FeedOutcome::Detached {
                        return Ok(Refill::Restart);
                    }
                }
                None => {
                    let upstream_eof = if idx == 0 {
                        self.input_eof
                    } else {
                        self.stages[idx - 1].saw_eof()
                    };
                    if eof || upstream_eof {
                        if self.feed(idx, None)? == FeedOutcome::Detached {
                            return Ok(Refill::Restart);
                        }
                    } else {
                        return Ok(Refill::NeedMore);
                    }
                }
            }
        }
        self.state = PipelineState::Failed;
        Err(PipelineError::Processing {
            stage: self.stages[idx].display_name().to_string(),
            message: format!("no progress after {PULL_LIMIT} pull rounds"),
        })
    }

    /// Feed one frame (or EOF) into stage `idx`, handling self-detach
    fn feed(&mut self, idx: usize, frame: Option<Frame>) -> Result<FeedOutcome> {
        let status = match self.stages[idx].filter(frame) {
            Ok(status) => status,
            Err(e) => {
                warn!("stage {} failed: {e}", self.stages[idx].display_name());
                self.state = PipelineState::Failed;
                return Err(e);
            }
        };
        match status {
            FilterStatus::Ok => Ok(FeedOutcome::Ok),
            FilterStatus::Detach => {
                self.detach_stage(idx)?;
                Ok(FeedOutcome::Detached)
            }
        }
    }

    /// Unlink stage `idx` at its own request, preserving the order of
    /// frames it had already queued.
    fn detach_stage(&mut self, idx: usize) -> Result<()> {
        let mut stage = self.stages.remove(idx);
        let frames = stage.drain_output();
        debug!("stage {} detached itself", stage.display_name());
        stage.uninit();
        if idx == 0 {
            if self.stages.is_empty() {
                self.direct.extend(frames);
            } else {
                // already past the removed head, so they are input to the new head
                for frame in frames {
                    self.feed(0, Some(frame))?;
                }
            }
        } else {
            // queued output had passed the removed stage; parking it at the
            // predecessor's queue front keeps it ahead of anything newer
            let prev = &mut self.stages[idx - 1];
            for frame in frames.into_iter().rev() {
                prev.push_output_front(frame);
            }
        }
        Ok(())
    }

    // ---- control ---------------------------------------------------------

    /// Broadcast a command to every stage, head to tail. `NotImplemented`
    /// responses are skipped; hard failures propagate.
    pub fn control_all(&mut self, cmd: &ControlCommand) -> Result<()> {
        for stage in &mut self.stages {
            let _ = stage.control(cmd)?;
        }
        Ok(())
    }

    /// Search tail to head for a stage that answers the command; the most
    /// downstream answer wins. `None` if every stage reports
    /// `NotImplemented`.
    pub fn control_any_rev(&mut self, cmd: &ControlCommand) -> Result<Option<ControlResponse>> {
        for idx in (0..self.stages.len()).rev() {
            match self.stages[idx].control(cmd)? {
                ControlResponse::NotImplemented => {}
                response => {
                    debug!("{} answered {:?}", self.stages[idx].display_name(), cmd);
                    return Ok(Some(response));
                }
            }
        }
        Ok(None)
    }

    /// Dispatch a command to the stage carrying `label`
    pub fn control_by_label(
        &mut self,
        label: &str,
        cmd: &ControlCommand,
    ) -> Result<ControlResponse> {
        let idx = self
            .stages
            .iter()
            .position(|s| s.label() == Some(label))
            .ok_or_else(|| PipelineError::NoSuchLabel(label.to_string()))?;
        self.stages[idx].control(cmd)
    }

    /// Resolve `label` and dispatch a free-form named command to it
    pub fn send_command(&mut self, label: &str, name: &str, arg: &str) -> Result<ControlResponse> {
        self.control_by_label(
            label,
            &ControlCommand::Command {
                name: name.to_string(),
                arg: arg.to_string(),
            },
        )
    }

    /// Broadcast `Reset` to every stage and drop all buffered frames.
    ///
    /// Must be called whenever the playback position jumps discontinuously;
    /// stages with internal buffering would otherwise blend samples across
    /// the discontinuity.
    pub fn seek_reset(&mut self) -> Result<()> {
        for stage in &mut self.stages {
            let _ = stage.control(&ControlCommand::Reset)?;
        }
        self.direct.clear();
        self.input_eof = false;
        Ok(())
    }

    // ---- delay -----------------------------------------------------------

    /// Total latency of the chain in seconds: every stage's self-reported
    /// buffering delay plus the duration of all frames queued but not yet
    /// drained. Recomputed on every call.
    pub fn calc_delay(&self) -> f64 {
        let mut delay: f64 = self
            .stages
            .iter()
            .map(|s| s.delay() + s.queued_duration())
            .sum();
        delay += self.direct.iter().map(Frame::duration_secs).sum::<f64>();
        delay
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.uninitialize();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("stages", &self.stage_names())
            .field("input", &self.input)
            .field("output", &self.output)
            .field("filter_output", &self.filter_output)
            .finish()
    }
}
