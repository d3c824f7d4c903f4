// crates/mediaconv-engine/src/backend.rs
//
// External collaborator interfaces (§6): the input demuxer, the output
// muxer, and the encoder/decoder backends. `mediaconv-engine::ffmpeg`
// implements all of these atop `ffmpeg-the-third`; the orchestrator and
// both track pipelines are generic over them so a consumer can swap in a
// different backend (a test double, a hardware-accelerated encoder, …)
// without touching planning or synchronization logic.

use std::fmt;

use mediaconv_core::codecs::{AudioCodec, SubtitleCodec, VideoCodec};
use mediaconv_core::conversion::TrackCountLimits;
use mediaconv_core::options::{AlphaHandling, Crop, Fit, Rotation};
use mediaconv_core::track::TrackKind;

/// Decoder configuration opaque to the planner — forwarded verbatim on the
/// copy path, consulted for decodability on the transcode path.
pub trait DecoderConfig: fmt::Debug + Send + Sync {
    fn is_decodable(&self) -> bool;
}

/// One packet of still-encoded media, as read from the input demuxer.
#[derive(Clone, Debug)]
pub struct EncodedPacket {
    pub timestamp: f64,
    pub duration: f64,
    pub key_frame: bool,
    pub data: std::sync::Arc<[u8]>,
    /// Whether this packet carries alpha side-data that must be stripped
    /// when the track's `alpha` option is `discard` (§4.5).
    pub has_alpha_side_data: bool,
}

/// Rasterized canvas frame handed to the transcode path's encoder, or to
/// `video.process` when the pipeline rerenders (§4.5, §6).
#[derive(Clone, Debug)]
pub struct CanvasFrame {
    pub timestamp: f64,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub data: std::sync::Arc<[u8]>,
}

/// Per-track facts and sample sources the planner and pipelines need from
/// the input container (§6 "Input collaborator").
pub trait InputTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn index(&self) -> usize;
    fn coded_width(&self) -> u32;
    fn coded_height(&self) -> u32;
    fn rotation(&self) -> Rotation;
    fn language_code(&self) -> Option<String>;
    fn name(&self) -> Option<String>;
    fn disposition(&self) -> Vec<String>;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u32;
    fn video_codec(&self) -> Option<VideoCodec>;
    fn audio_codec(&self) -> Option<AudioCodec>;
    fn subtitle_codec(&self) -> Option<SubtitleCodec>;
    fn get_first_timestamp(&self) -> f64;
    fn can_decode(&self) -> bool;
    fn decoder_config(&self) -> &dyn DecoderConfig;

    /// Reads the next encoded packet, in non-decreasing timestamp order, or
    /// `None` at end of track. Used by the copy path.
    fn next_packet(&mut self) -> anyhow::Result<Option<EncodedPacket>>;

    /// Decodes and returns the next video sample, rasterizing it to
    /// `{width, height, fit, rotation, crop, alpha}` when `canvas` is set —
    /// the rerender path of §4.5. `None` at end of track.
    fn next_video_sample(
        &mut self,
        canvas: Option<CanvasSpec>,
    ) -> anyhow::Result<Option<CanvasFrame>>;

    /// Decodes and returns the next audio sample (interleaved f32). `None`
    /// at end of track.
    fn next_audio_sample(&mut self) -> anyhow::Result<Option<mediaconv_core::options::AudioSample>>;
}

/// Canvas rasterization request for the video rerender path (§6).
#[derive(Clone, Copy, Debug)]
pub struct CanvasSpec {
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
    pub rotation: Rotation,
    pub crop: Option<Crop>,
    pub alpha: AlphaHandling,
}

/// The input container itself (§6 "Input collaborator").
pub trait InputSource {
    fn tracks(&mut self) -> Vec<Box<dyn InputTrack>>;
    fn metadata_tags(&self) -> serde_json::Value;
    fn mime_type(&self) -> String;
    fn compute_duration(&self) -> f64;
}

/// The output container's declared capabilities (§6 "Output collaborator").
pub trait OutputFormat {
    fn mime_type(&self) -> String;
    fn supported_track_counts(&self) -> TrackCountLimits;
    fn supported_video_codecs(&self) -> Vec<VideoCodec>;
    fn supported_audio_codecs(&self) -> Vec<AudioCodec>;
    fn supported_subtitle_codecs(&self) -> Vec<SubtitleCodec>;
    fn supports_video_rotation_metadata(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputState {
    Pending,
    Starting,
    Running,
    Finalizing,
    Finalized,
    Canceled,
}

/// Track metadata written at `add_*_track` time (§4.5/§4.6 "Track metadata
/// written to the output").
#[derive(Clone, Debug, Default)]
pub struct OutputTrackMeta {
    pub frame_rate: Option<f64>,
    pub language_code: Option<String>,
    pub name: Option<String>,
    pub disposition: Vec<String>,
    pub rotation: Rotation,
}

/// Encoder construction parameters decided by the planner (§4.5/§4.6).
#[derive(Clone, Debug)]
pub struct VideoEncoderConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    pub key_frame_interval: Option<u32>,
    pub size_change_behavior: Fit,
}

#[derive(Clone, Debug)]
pub struct AudioEncoderConfig {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: Option<u64>,
}

/// The output container being written to (§6 "Output collaborator").
pub trait OutputSink {
    fn state(&self) -> OutputState;

    fn add_video_track_copy(
        &mut self,
        meta: OutputTrackMeta,
        decoder_config: &dyn DecoderConfig,
    ) -> anyhow::Result<usize>;
    fn add_video_track_encoded(
        &mut self,
        meta: OutputTrackMeta,
        config: VideoEncoderConfig,
    ) -> anyhow::Result<usize>;
    fn add_audio_track_copy(
        &mut self,
        meta: OutputTrackMeta,
        decoder_config: &dyn DecoderConfig,
    ) -> anyhow::Result<usize>;
    fn add_audio_track_encoded(
        &mut self,
        meta: OutputTrackMeta,
        config: AudioEncoderConfig,
    ) -> anyhow::Result<usize>;

    fn write_packet(&mut self, track: usize, packet: EncodedPacket) -> anyhow::Result<()>;
    fn write_video_frame(&mut self, track: usize, frame: &CanvasFrame) -> anyhow::Result<()>;
    fn write_audio_frame(
        &mut self,
        track: usize,
        sample: &mediaconv_core::options::AudioSample,
    ) -> anyhow::Result<()>;

    fn set_metadata_tags(&mut self, tags: serde_json::Value) -> anyhow::Result<()>;
    fn start(&mut self) -> anyhow::Result<()>;
    fn finalize(&mut self) -> anyhow::Result<()>;
    fn cancel(&mut self) -> anyhow::Result<()>;
}

/// Asks an encoder backend whether a given configuration is actually
/// encodable (§4.2). Registered user encoders and the ffmpeg reference
/// backend both implement this.
pub trait EncoderBackend: Send + Sync {
    fn can_encode_video(
        &self,
        codec: VideoCodec,
        width: u32,
        height: u32,
        bitrate: u64,
    ) -> bool;

    fn can_encode_audio(&self, codec: AudioCodec, channels: u32, sample_rate: u32, bitrate: Option<u64>) -> bool;

    fn can_encode_subtitles(&self, codec: SubtitleCodec) -> bool;

    /// Whether this backend is known to over-report support and therefore
    /// needs a one-frame trial encode to confirm (§4.2).
    fn requires_trial_encode(&self) -> bool {
        false
    }
}

pub trait DecoderBackend: Send + Sync {
    fn can_decode_video(&self, codec: VideoCodec) -> bool;
    fn can_decode_audio(&self, codec: AudioCodec) -> bool;
}
