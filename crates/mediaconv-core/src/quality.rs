// crates/mediaconv-core/src/quality.rs
//
// Maps a subjective quality factor to a codec-specific bitrate. See
// Quality model in the design notes for the reference bitrate table —
// those numbers (128 kbps AAC, 3 Mbps 1080p H.264, …) are deliberately the
// same ones shown on web-codec bitrate guides, not measured on any corpus
// here: this is a reference-default mapping, not a rate-control model.

use crate::codecs::{AudioCodec, VideoCodec};
use serde::{Deserialize, Serialize};

/// A positive real multiplier on top of each codec's reference bitrate.
///
/// Immutable once constructed; cheaply `Copy`, so it can be shared across
/// track pipelines without an `Arc`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quality(f64);

impl Quality {
    pub const VERY_LOW: Quality = Quality(0.3);
    pub const LOW: Quality = Quality(0.6);
    pub const MEDIUM: Quality = Quality(1.0);
    pub const HIGH: Quality = Quality(2.0);
    pub const VERY_HIGH: Quality = Quality(4.0);

    /// Construct from an arbitrary positive factor.
    ///
    /// ```
    /// use mediaconv_core::quality::Quality;
    /// assert!(Quality::from_factor(1.5).is_some());
    /// assert!(Quality::from_factor(0.0).is_none());
    /// assert!(Quality::from_factor(-1.0).is_none());
    /// ```
    pub fn from_factor(factor: f64) -> Option<Quality> {
        if factor > 0.0 && factor.is_finite() {
            Some(Quality(factor))
        } else {
            None
        }
    }

    pub fn factor(self) -> f64 {
        self.0
    }

    /// `base = 3_000_000 * (w*h / (1920*1080))^0.95`, scaled by codec
    /// efficiency and the quality factor, rounded up to the nearest 1000.
    pub fn to_video_bitrate(self, codec: VideoCodec, width: u32, height: u32) -> u64 {
        let area_ratio = (width as f64 * height as f64) / (1920.0 * 1080.0);
        let base = 3_000_000.0 * area_ratio.powf(0.95);
        let bps = base * codec.efficiency() * self.0;
        round_up_to_thousand(bps)
    }

    /// `None` for PCM codecs and FLAC, which carry no bitrate parameter.
    /// Otherwise the codec's base bitrate scaled by the factor, then snapped
    /// to the codec's legal-rate set where one exists.
    pub fn to_audio_bitrate(self, codec: AudioCodec) -> Option<u64> {
        let base = codec.base_bitrate()? as f64;
        let scaled = base * self.0;

        let snapped = match codec {
            AudioCodec::Aac => snap_nearest(scaled, &[96_000.0, 128_000.0, 160_000.0, 192_000.0]),
            AudioCodec::Mp3 => snap_nearest(scaled, &MP3_RATES),
            AudioCodec::Opus | AudioCodec::Vorbis => scaled.max(6_000.0),
            _ => scaled,
        };

        Some(round_to_thousand(snapped))
    }
}

const MP3_RATES: [f64; 16] = [
    8_000.0, 16_000.0, 24_000.0, 32_000.0, 40_000.0, 48_000.0, 64_000.0, 80_000.0, 96_000.0,
    112_000.0, 128_000.0, 160_000.0, 192_000.0, 224_000.0, 256_000.0, 320_000.0,
];

fn snap_nearest(value: f64, candidates: &[f64]) -> f64 {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| (a - value).abs().partial_cmp(&(b - value).abs()).unwrap())
        .unwrap_or(value)
}

fn round_up_to_thousand(bps: f64) -> u64 {
    (bps / 1000.0).ceil() as u64 * 1000
}

fn round_to_thousand(bps: f64) -> u64 {
    (bps / 1000.0).round() as u64 * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_bitrate_is_positive_multiple_of_1000() {
        let br = Quality::MEDIUM.to_video_bitrate(VideoCodec::Avc, 1920, 1080);
        assert!(br > 0);
        assert_eq!(br % 1000, 0);
    }

    #[test]
    fn video_bitrate_increases_with_factor() {
        let low = Quality::LOW.to_video_bitrate(VideoCodec::Avc, 1920, 1080);
        let high = Quality::HIGH.to_video_bitrate(VideoCodec::Avc, 1920, 1080);
        assert!(high > low);
    }

    #[test]
    fn hevc_cheaper_than_avc_at_same_size_and_factor() {
        let avc = Quality::MEDIUM.to_video_bitrate(VideoCodec::Avc, 1920, 1080);
        let hevc = Quality::MEDIUM.to_video_bitrate(VideoCodec::Hevc, 1920, 1080);
        assert!(hevc < avc);
    }

    #[test]
    fn pcm_and_flac_have_no_bitrate() {
        assert_eq!(
            Quality::MEDIUM.to_audio_bitrate(AudioCodec::Pcm(crate::codecs::PcmFormat::S16Le)),
            None
        );
        assert_eq!(Quality::MEDIUM.to_audio_bitrate(AudioCodec::Flac), None);
    }

    #[test]
    fn aac_snaps_to_legal_rate() {
        let br = Quality::MEDIUM.to_audio_bitrate(AudioCodec::Aac).unwrap();
        assert!([96_000, 128_000, 160_000, 192_000].contains(&br));
    }

    #[test]
    fn mp3_snaps_to_legal_rate() {
        let br = Quality::HIGH.to_audio_bitrate(AudioCodec::Mp3).unwrap();
        assert!(MP3_RATES.iter().any(|&r| r as u64 == br));
    }

    #[test]
    fn opus_clamped_to_minimum() {
        let br = Quality::VERY_LOW.to_audio_bitrate(AudioCodec::Opus).unwrap();
        assert!(br >= 6_000);
    }

    #[test]
    fn ac3_rounds_to_nearest_thousand_without_snapping() {
        let br = Quality::from_factor(1.0001)
            .unwrap()
            .to_audio_bitrate(AudioCodec::Ac3)
            .unwrap();
        assert_eq!(br % 1000, 0);
    }
}
