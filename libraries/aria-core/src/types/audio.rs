/// Audio-related types
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleRate(pub u32);

impl SampleRate {
    /// Common sample rates
    pub const CD_QUALITY: Self = Self(44_100);
    pub const DVD_QUALITY: Self = Self(48_000);
    pub const HIGH_RES_88: Self = Self(88_200);
    pub const HIGH_RES_96: Self = Self(96_000);
    pub const HIGH_RES_176: Self = Self(176_400);
    pub const HIGH_RES_192: Self = Self(192_000);

    /// Create a new sample rate
    #[must_use]
    pub fn new(hz: u32) -> Self {
        Self(hz)
    }

    /// Get the sample rate as Hz
    pub fn as_hz(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.0)
    }
}

/// Audio format information
///
/// Two formats are interchangeable on the wire only when all three fields
/// match; stream negotiation compares whole values, never single fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate
    pub sample_rate: SampleRate,

    /// Number of channels (1 = mono, 2 = stereo, etc.)
    pub channels: u16,

    /// Declared bits per sample of the stream this format describes.
    /// In-memory samples are always f32; this is the depth the stream is
    /// quantized to at its endpoints.
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Create a new audio format
    pub fn new(sample_rate: SampleRate, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Create CD quality stereo format (44.1kHz, 16-bit, stereo)
    pub fn cd_quality() -> Self {
        Self {
            sample_rate: SampleRate::CD_QUALITY,
            channels: 2,
            bits_per_sample: 16,
        }
    }

    /// Calculate the byte rate (bytes per second)
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.as_hz() * u32::from(self.channels) * u32::from(self.bits_per_sample) / 8
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {} ch, {} bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// One chunk of interleaved audio travelling through the player.
///
/// Samples are stored as f32 in the range [-1.0, 1.0], interleaved
/// ([L, R, L, R, ...] for stereo). The sample buffer is reference counted:
/// cloning a frame shares it, and [`Frame::make_writable`] copies it only
/// when another frame still holds a reference. A stage that forwards a frame
/// unmodified therefore never touches sample memory.
#[derive(Debug, Clone)]
pub struct Frame {
    samples: Arc<Vec<f32>>,
    /// Audio format of the samples
    pub format: AudioFormat,
}

impl Frame {
    /// Create a new frame taking ownership of the samples
    pub fn new(samples: Vec<f32>, format: AudioFormat) -> Self {
        Self {
            samples: Arc::new(samples),
            format,
        }
    }

    /// Create a silent frame of the given length in frames (per-channel samples)
    pub fn silence(frames: usize, format: AudioFormat) -> Self {
        Self::new(vec![0.0; frames * format.channels as usize], format)
    }

    /// Read access to the interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Exclusive access to the interleaved samples.
    ///
    /// If the sample buffer is shared with another frame it is copied first,
    /// so mutation never leaks into frames held elsewhere.
    pub fn make_writable(&mut self) -> &mut [f32] {
        Arc::make_mut(&mut self.samples).as_mut_slice()
    }

    /// Whether the sample buffer is currently shared with another frame
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.samples) > 1
    }

    /// The same samples under a different format declaration, sharing the
    /// buffer. The new format must keep the channel count, otherwise the
    /// frame boundaries would shift.
    pub fn with_format(&self, format: AudioFormat) -> Self {
        debug_assert_eq!(format.channels, self.format.channels);
        Self {
            samples: Arc::clone(&self.samples),
            format,
        }
    }

    /// Get the number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels as usize
    }

    /// Get the duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.format.sample_rate.as_hz())
    }

    /// Check if the frame holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the length in samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}
