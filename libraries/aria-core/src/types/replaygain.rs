/// ReplayGain side data
use serde::{Deserialize, Serialize};

/// ReplayGain loudness information attached to a stream by its decoder.
///
/// Gains are in dB relative to the reference level, peaks are linear sample
/// amplitudes. The playback path decides which pair (track or album) to
/// apply; this type just carries the values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayGain {
    /// Track gain in dB
    pub track_gain: f32,
    /// Track peak (linear)
    pub track_peak: f32,
    /// Album gain in dB
    pub album_gain: f32,
    /// Album peak (linear)
    pub album_peak: f32,
}

impl ReplayGain {
    /// ReplayGain data with only track values, album values mirroring them
    pub fn track_only(gain: f32, peak: f32) -> Self {
        Self {
            track_gain: gain,
            track_peak: peak,
            album_gain: gain,
            album_peak: peak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_only_mirrors_album() {
        let rg = ReplayGain::track_only(-6.4, 0.98);
        assert_eq!(rg.album_gain, -6.4);
        assert_eq!(rg.album_peak, 0.98);
    }
}
