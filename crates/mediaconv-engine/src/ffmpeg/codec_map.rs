// crates/mediaconv-engine/src/ffmpeg/codec_map.rs
//
// Maps `mediaconv-core`'s backend-agnostic codec enums onto
// `ffmpeg_the_third::codec::Id` and back, plus the PCM sample-format
// correspondence `AudioCodec::Pcm(PcmFormat)` needs.

use ffmpeg_the_third::codec::Id as AvId;
use ffmpeg_the_third::format::Sample as AvSample;
use ffmpeg_the_third::format::sample::Type as AvSampleType;

use mediaconv_core::codecs::{AudioCodec, PcmFormat, VideoCodec};

pub fn video_codec_to_id(codec: VideoCodec) -> AvId {
    match codec {
        VideoCodec::Avc => AvId::H264,
        VideoCodec::Hevc => AvId::HEVC,
        VideoCodec::Vp8 => AvId::VP8,
        VideoCodec::Vp9 => AvId::VP9,
        VideoCodec::Av1 => AvId::AV1,
    }
}

pub fn id_to_video_codec(id: AvId) -> Option<VideoCodec> {
    match id {
        AvId::H264 => Some(VideoCodec::Avc),
        AvId::HEVC => Some(VideoCodec::Hevc),
        AvId::VP8 => Some(VideoCodec::Vp8),
        AvId::VP9 => Some(VideoCodec::Vp9),
        AvId::AV1 => Some(VideoCodec::Av1),
        _ => None,
    }
}

pub fn audio_codec_to_id(codec: AudioCodec) -> AvId {
    match codec {
        AudioCodec::Aac => AvId::AAC,
        AudioCodec::Opus => AvId::OPUS,
        AudioCodec::Mp3 => AvId::MP3,
        AudioCodec::Vorbis => AvId::VORBIS,
        AudioCodec::Ac3 => AvId::AC3,
        AudioCodec::Eac3 => AvId::EAC3,
        AudioCodec::Flac => AvId::FLAC,
        AudioCodec::Pcm(fmt) => pcm_format_to_id(fmt),
    }
}

pub fn id_to_audio_codec(id: AvId) -> Option<AudioCodec> {
    match id {
        AvId::AAC => Some(AudioCodec::Aac),
        AvId::OPUS => Some(AudioCodec::Opus),
        AvId::MP3 => Some(AudioCodec::Mp3),
        AvId::VORBIS => Some(AudioCodec::Vorbis),
        AvId::AC3 => Some(AudioCodec::Ac3),
        AvId::EAC3 => Some(AudioCodec::Eac3),
        AvId::FLAC => Some(AudioCodec::Flac),
        other => id_to_pcm_format(other).map(AudioCodec::Pcm),
    }
}

fn pcm_format_to_id(fmt: PcmFormat) -> AvId {
    match fmt {
        PcmFormat::S16Le => AvId::PCM_S16LE,
        PcmFormat::S16Be => AvId::PCM_S16BE,
        PcmFormat::S24Le => AvId::PCM_S24LE,
        PcmFormat::S32Le => AvId::PCM_S32LE,
        PcmFormat::F32Le => AvId::PCM_F32LE,
    }
}

fn id_to_pcm_format(id: AvId) -> Option<PcmFormat> {
    match id {
        AvId::PCM_S16LE => Some(PcmFormat::S16Le),
        AvId::PCM_S16BE => Some(PcmFormat::S16Be),
        AvId::PCM_S24LE => Some(PcmFormat::S24Le),
        AvId::PCM_S32LE => Some(PcmFormat::S32Le),
        AvId::PCM_F32LE => Some(PcmFormat::F32Le),
        _ => None,
    }
}

/// The libav sample format the decode path converts every audio frame into
/// before it is handed to `mediaconv-core`'s resampler/mixer, which expects
/// interleaved f32 (§3 "Resampler state").
pub fn interleaved_f32() -> AvSample {
    AvSample::F32(AvSampleType::Packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_codec_round_trips_through_avcodec_id() {
        for codec in [
            VideoCodec::Avc,
            VideoCodec::Hevc,
            VideoCodec::Vp8,
            VideoCodec::Vp9,
            VideoCodec::Av1,
        ] {
            assert_eq!(id_to_video_codec(video_codec_to_id(codec)), Some(codec));
        }
    }

    #[test]
    fn audio_codec_round_trips_through_avcodec_id() {
        for codec in [
            AudioCodec::Aac,
            AudioCodec::Opus,
            AudioCodec::Mp3,
            AudioCodec::Vorbis,
            AudioCodec::Ac3,
            AudioCodec::Eac3,
            AudioCodec::Flac,
            AudioCodec::Pcm(PcmFormat::S16Le),
            AudioCodec::Pcm(PcmFormat::F32Le),
        ] {
            assert_eq!(id_to_audio_codec(audio_codec_to_id(codec)), Some(codec));
        }
    }
}
