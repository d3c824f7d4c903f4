// crates/mediaconv-core/src/codecs.rs
//
// Codec enumerations shared by the quality model, the capability probe, and
// both track pipelines.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    Avc,
    Hevc,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    /// Encoder "efficiency" multiplier used by `Quality::to_video_bitrate`.
    /// Lower is more efficient — fewer bits needed for the same quality.
    pub fn efficiency(self) -> f64 {
        match self {
            VideoCodec::Avc => 1.0,
            VideoCodec::Vp8 => 1.2,
            VideoCodec::Hevc => 0.6,
            VideoCodec::Vp9 => 0.6,
            VideoCodec::Av1 => 0.4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PcmFormat {
    S16Le,
    S16Be,
    S24Le,
    S32Le,
    F32Le,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    Aac,
    Opus,
    Mp3,
    Vorbis,
    Ac3,
    Eac3,
    Flac,
    Pcm(PcmFormat),
}

impl AudioCodec {
    /// PCM codecs and FLAC carry raw or losslessly-coded samples; a bitrate
    /// parameter is meaningless for them (§4.1).
    pub fn is_pcm(self) -> bool {
        matches!(self, AudioCodec::Pcm(_))
    }

    /// Whether this codec ever takes an explicit bitrate knob.
    pub fn takes_bitrate(self) -> bool {
        !self.is_pcm() && self != AudioCodec::Flac
    }

    /// Base bitrate (bits/s) at quality factor 1.0, per §4.1. `None` for
    /// codecs with no bitrate parameter.
    pub fn base_bitrate(self) -> Option<u32> {
        match self {
            AudioCodec::Aac => Some(128_000),
            AudioCodec::Opus => Some(64_000),
            AudioCodec::Mp3 => Some(160_000),
            AudioCodec::Vorbis => Some(64_000),
            AudioCodec::Ac3 => Some(640_000),
            AudioCodec::Eac3 => Some(256_000),
            AudioCodec::Flac | AudioCodec::Pcm(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleCodec {
    WebVtt,
    Srt,
    MovText,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_takes_no_bitrate() {
        assert!(AudioCodec::Pcm(PcmFormat::S16Le).is_pcm());
        assert!(!AudioCodec::Pcm(PcmFormat::S16Le).takes_bitrate());
    }

    #[test]
    fn flac_takes_no_bitrate_but_is_not_pcm() {
        assert!(!AudioCodec::Flac.is_pcm());
        assert!(!AudioCodec::Flac.takes_bitrate());
        assert_eq!(AudioCodec::Flac.base_bitrate(), None);
    }

    #[test]
    fn hevc_is_more_efficient_than_avc() {
        assert!(VideoCodec::Hevc.efficiency() < VideoCodec::Avc.efficiency());
    }
}
