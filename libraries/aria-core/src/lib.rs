//! Aria Player Core
//!
//! Platform-agnostic value types shared across the Aria Player crates.
//!
//! This crate defines the audio data model the rest of the player builds on:
//! - **Formats**: [`SampleRate`] and [`AudioFormat`] describe a stream's
//!   rate, channel layout, and declared bit depth.
//! - **Frames**: [`Frame`] is a chunk of interleaved f32 audio with
//!   copy-on-write sample sharing, so a frame can pass through several
//!   processing stages without its sample buffer being copied until someone
//!   actually mutates it.
//! - **Side data**: [`ReplayGain`] loudness information a decoder may attach
//!   to a stream.
//!
//! # Example
//!
//! ```rust
//! use aria_core::{AudioFormat, Frame, SampleRate};
//!
//! let format = AudioFormat::new(SampleRate::DVD_QUALITY, 2, 32);
//! let mut frame = Frame::new(vec![0.5; 96], format);
//!
//! let shared = frame.clone(); // cheap, shares the sample buffer
//! for sample in frame.make_writable() {
//!     *sample *= 0.5; // copies the buffer first, `shared` is untouched
//! }
//! assert_eq!(shared.samples()[0], 0.5);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod types;

pub use types::{AudioFormat, Frame, ReplayGain, SampleRate};
