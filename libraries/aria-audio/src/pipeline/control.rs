//! Out-of-band control protocol
//!
//! Commands travel through the chain outside the frame flow: broadcast to
//! every stage, searched tail-to-head for the first stage with an answer, or
//! targeted at a label. The command set is closed; stage-specific runtime
//! adjustments go through the free-form [`ControlCommand::Command`] variant,
//! whose argument syntax is owned by the receiving stage.

/// A control command delivered to one or more stages.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// Re-run the stage's open/negotiation step against its current input
    Reinit,
    /// Clear all internal buffering without destroying the stage (seek)
    Reset,
    /// Set the playback volume (linear gain)
    SetVolume(f32),
    /// Set the mixing level feeding one output channel
    SetPanLevel {
        /// Output channel index
        channel: usize,
        /// Linear level for that channel
        level: f32,
    },
    /// Set the pan stage's output channel count (applies on next initialize)
    SetPanChannelCount(usize),
    /// Set stereo balance, -1.0 (full left) to 1.0 (full right)
    SetPanBalance(f32),
    /// Query the current stereo balance
    GetPanBalance,
    /// Set playback speed via time scaling
    SetPlaybackSpeed(f64),
    /// Set playback speed via resampling ratio adjustment
    SetPlaybackSpeedResample(f64),
    /// Query stage-exported key/value metadata (e.g. ReplayGain values)
    GetMetadata,
    /// Free-form, string-keyed stage command
    Command {
        /// Command name, interpreted by the receiving stage
        name: String,
        /// Opaque argument string, syntax owned by the stage
        arg: String,
    },
}

/// A stage's answer to a control command.
///
/// `NotImplemented` is not an error: broadcast and reverse-search dispatch
/// use it to move on to the next stage. Hard failures are reported through
/// `Err` instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlResponse {
    /// Command handled
    Ok,
    /// Command handled, with a numeric result (e.g. `GetPanBalance`)
    Value(f32),
    /// Command handled, with exported key/value side data (`GetMetadata`)
    Metadata(Vec<(String, String)>),
    /// The stage does not handle this command
    NotImplemented,
}
