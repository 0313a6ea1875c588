//! Aria Player Audio
//!
//! The audio filter pipeline for Aria Player: a dynamically reconfigurable
//! chain of processing stages that carries decoded frames from the decoder's
//! format to the format the output sink accepts, applying user-selected
//! effects on the way.
//!
//! This crate provides:
//! - The [`Pipeline`] engine: chain construction and teardown, frame push
//!   and pull, dynamic stage insertion/removal by label, automatic insertion
//!   of format converters between disagreeing neighbors, and end-to-end
//!   latency accounting.
//! - The built-in stage set (`volume`, `pan`, `speed`, `resample`,
//!   `convert`), addressed through the static [`pipeline::registry`].
//! - The out-of-band [`ControlCommand`] protocol for live parameter changes,
//!   seeking resets, and metadata queries.
//!
//! # Example: building and running a chain
//!
//! ```rust
//! use aria_audio::{OutputStatus, Pipeline};
//! use aria_core::{AudioFormat, Frame, SampleRate};
//!
//! # fn example() -> aria_audio::Result<()> {
//! let format = AudioFormat::new(SampleRate::DVD_QUALITY, 2, 32);
//! let mut pipeline = Pipeline::new(format);
//! pipeline.add_stage("volume", Some("vol"), &[("gain", "0.5")])?;
//! pipeline.initialize()?;
//!
//! pipeline.filter_frame(Some(Frame::new(vec![1.0; 96], format)))?;
//! while pipeline.output_frame(false)? == OutputStatus::Ready {
//!     let frame = pipeline.read_output_frame()?.unwrap();
//!     // hand `frame` to the sink
//! }
//!
//! // runtime adjustment, addressed by label
//! pipeline.send_command("vol", "setvolume", "0.8")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod effects;
pub mod error;
pub mod pipeline;

pub use error::{PipelineError, Result};
pub use pipeline::{
    ControlCommand, ControlResponse, OutputStatus, Pipeline, PipelineConfig, PipelineState,
    StageInstance, StageSpec,
};
