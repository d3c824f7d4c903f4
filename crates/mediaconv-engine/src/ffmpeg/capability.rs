// crates/mediaconv-engine/src/ffmpeg/capability.rs
//
// `EncoderBackend`/`DecoderBackend` over whatever libav was built with.
// `ffmpeg_the_third::encoder::find`/`decoder::find` return `None` when the
// codec wasn't compiled in (e.g. no libx264), which is exactly the signal
// the capability probe (§4.2) needs.

use ffmpeg_the_third::{decoder, encoder};

use mediaconv_core::codecs::{AudioCodec, SubtitleCodec, VideoCodec};

use crate::backend::{DecoderBackend, EncoderBackend};

use super::codec_map::{audio_codec_to_id, video_codec_to_id};

pub struct FfmpegEncoderBackend;

impl EncoderBackend for FfmpegEncoderBackend {
    fn can_encode_video(&self, codec: VideoCodec, _width: u32, _height: u32, _bitrate: u64) -> bool {
        encoder::find(video_codec_to_id(codec)).is_some()
    }

    fn can_encode_audio(&self, codec: AudioCodec, _channels: u32, _sample_rate: u32, _bitrate: Option<u64>) -> bool {
        if codec.is_pcm() {
            return true;
        }
        encoder::find(audio_codec_to_id(codec)).is_some()
    }

    fn can_encode_subtitles(&self, codec: SubtitleCodec) -> bool {
        let id = match codec {
            SubtitleCodec::WebVtt => ffmpeg_the_third::codec::Id::WEBVTT,
            SubtitleCodec::Srt => ffmpeg_the_third::codec::Id::SUBRIP,
            SubtitleCodec::MovText => ffmpeg_the_third::codec::Id::MOV_TEXT,
        };
        encoder::find(id).is_some()
    }

    // libavcodec's `avcodec_find_encoder` only checks whether a codec was
    // compiled in, not whether the requested dimensions/bitrate actually
    // encode — it does not over-report the way a remote or hardware backend
    // might, so a trial encode is never required here.
    fn requires_trial_encode(&self) -> bool {
        false
    }
}

pub struct FfmpegDecoderBackend;

impl DecoderBackend for FfmpegDecoderBackend {
    fn can_decode_video(&self, codec: VideoCodec) -> bool {
        decoder::find(video_codec_to_id(codec)).is_some()
    }

    fn can_decode_audio(&self, codec: AudioCodec) -> bool {
        if codec.is_pcm() {
            return true;
        }
        decoder::find(audio_codec_to_id(codec)).is_some()
    }
}
