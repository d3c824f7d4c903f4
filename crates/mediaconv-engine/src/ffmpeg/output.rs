// crates/mediaconv-engine/src/ffmpeg/output.rs
//
// `OutputFormat`/`OutputSink` over a file muxed with `ffmpeg_the_third`.
// Grounded in the teacher's `encode.rs`: `run_encode()`'s per-track encoder
// construction, the `avcodec_parameters_from_context` copy into the muxer
// stream's codecpar, `pkt.rescale_ts()` timebase conversion on write, the
// CRF/preset `Dictionary` options, and the `AudioFifo` pattern for feeding
// encoders (AAC in particular) fixed-size frames regardless of how the
// upstream resampler segmented its output.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::context::Context as CodecContext;
use ffmpeg::format::context::Output as AvOutput;
use ffmpeg::format::{output_as, Pixel};
use ffmpeg::software::resampling::Context as ResampleContext;
use ffmpeg::software::scaling::{Context as ScaleContext, Flags as ScaleFlags};
use ffmpeg::util::frame::{audio::Audio as AvAudioFrame, video::Video as AvVideoFrame};
use ffmpeg::Dictionary;

use mediaconv_core::codecs::{AudioCodec, SubtitleCodec, VideoCodec};
use mediaconv_core::conversion::{CountLimits, TrackCountLimits};
use mediaconv_core::options::AudioSample;

use crate::backend::{
    AudioEncoderConfig, CanvasFrame, DecoderConfig, EncodedPacket, OutputFormat, OutputSink,
    OutputState, OutputTrackMeta, VideoEncoderConfig,
};

use super::codec_map::{audio_codec_to_id, video_codec_to_id};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputContainer {
    Mp4,
    WebM,
    Matroska,
}

impl OutputContainer {
    fn muxer_name(self) -> &'static str {
        match self {
            OutputContainer::Mp4 => "mp4",
            OutputContainer::WebM => "webm",
            OutputContainer::Matroska => "matroska",
        }
    }

    fn mime_type(self) -> &'static str {
        match self {
            OutputContainer::Mp4 => "video/mp4",
            OutputContainer::WebM => "video/webm",
            OutputContainer::Matroska => "video/x-matroska",
        }
    }
}

/// Declared container capabilities (§6 "Output collaborator"). These are
/// fixed per-container facts, not probed from libav — libavformat doesn't
/// expose "what codecs will mp4 typically carry", so this mirrors the
/// well-known support matrix the way a real muxing frontend would hardcode
/// it.
pub struct FfmpegOutputFormat {
    container: OutputContainer,
}

impl FfmpegOutputFormat {
    pub fn new(container: OutputContainer) -> Self {
        FfmpegOutputFormat { container }
    }
}

impl OutputFormat for FfmpegOutputFormat {
    fn mime_type(&self) -> String {
        self.container.mime_type().to_string()
    }

    fn supported_track_counts(&self) -> TrackCountLimits {
        TrackCountLimits {
            total: CountLimits { min: 1, max: 64 },
            video: CountLimits { min: 0, max: 16 },
            audio: CountLimits { min: 0, max: 32 },
            subtitle: CountLimits {
                min: 0,
                max: if self.container == OutputContainer::WebM { 0 } else { 32 },
            },
        }
    }

    fn supported_video_codecs(&self) -> Vec<VideoCodec> {
        match self.container {
            OutputContainer::Mp4 => vec![VideoCodec::Avc, VideoCodec::Hevc, VideoCodec::Av1],
            OutputContainer::WebM => vec![VideoCodec::Vp8, VideoCodec::Vp9, VideoCodec::Av1],
            OutputContainer::Matroska => vec![
                VideoCodec::Avc,
                VideoCodec::Hevc,
                VideoCodec::Vp8,
                VideoCodec::Vp9,
                VideoCodec::Av1,
            ],
        }
    }

    fn supported_audio_codecs(&self) -> Vec<AudioCodec> {
        match self.container {
            OutputContainer::Mp4 => vec![AudioCodec::Aac, AudioCodec::Mp3, AudioCodec::Ac3, AudioCodec::Eac3, AudioCodec::Flac],
            OutputContainer::WebM => vec![AudioCodec::Opus, AudioCodec::Vorbis],
            OutputContainer::Matroska => vec![
                AudioCodec::Aac,
                AudioCodec::Opus,
                AudioCodec::Mp3,
                AudioCodec::Vorbis,
                AudioCodec::Ac3,
                AudioCodec::Eac3,
                AudioCodec::Flac,
            ],
        }
    }

    fn supported_subtitle_codecs(&self) -> Vec<SubtitleCodec> {
        match self.container {
            OutputContainer::Mp4 => vec![SubtitleCodec::MovText],
            OutputContainer::WebM => vec![],
            OutputContainer::Matroska => vec![SubtitleCodec::Srt, SubtitleCodec::WebVtt],
        }
    }

    fn supports_video_rotation_metadata(&self) -> bool {
        // Display-matrix rotation side data is an isom/mp4 and matroska
        // convention; webm muxers commonly drop it.
        !matches!(self.container, OutputContainer::WebM)
    }
}

enum TrackEncoder {
    VideoCopy,
    VideoEncode {
        encoder: ffmpeg::encoder::video::Video,
        scaler: Option<ScaleContext>,
        config: VideoEncoderConfig,
    },
    AudioCopy,
    AudioEncode {
        encoder: ffmpeg::encoder::audio::Audio,
        resampler: Option<ResampleContext>,
        fifo: AudioFifo,
        config: AudioEncoderConfig,
    },
}

/// Accumulates interleaved f32 samples until there are enough for one
/// encoder frame (`frame_size`), since `mediaconv-core`'s resampler hands
/// out samples windowed to its own 5-second buffer, not to whatever frame
/// size AAC/Opus encoders require. Mirrors the teacher's `AudioFifo`.
struct AudioFifo {
    channels: usize,
    frame_size: usize,
    buffered: VecDeque<f32>,
}

impl AudioFifo {
    fn new(channels: usize, frame_size: usize) -> Self {
        AudioFifo {
            channels,
            frame_size: frame_size.max(1),
            buffered: VecDeque::new(),
        }
    }

    fn push(&mut self, interleaved: &[f32]) {
        self.buffered.extend(interleaved.iter().copied());
    }

    /// Drains complete frames, leaving any remainder buffered for the next
    /// push. The final partial frame is left to the caller's `flush`.
    fn drain_frames(&mut self) -> Vec<Vec<f32>> {
        let frame_len = self.frame_size * self.channels;
        let mut frames = Vec::new();
        while self.buffered.len() >= frame_len {
            frames.push(self.buffered.drain(..frame_len).collect());
        }
        frames
    }

    fn flush(&mut self) -> Option<Vec<f32>> {
        if self.buffered.is_empty() {
            return None;
        }
        Some(self.buffered.drain(..).collect())
    }
}

pub struct FfmpegOutput {
    path: PathBuf,
    octx: Option<AvOutput>,
    tracks: Vec<TrackEncoder>,
    state: OutputState,
}

impl FfmpegOutput {
    pub fn create(path: impl AsRef<Path>, container: OutputContainer) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let octx = output_as(&path, container.muxer_name())?;
        Ok(FfmpegOutput {
            path,
            octx: Some(octx),
            tracks: Vec::new(),
            state: OutputState::Pending,
        })
    }

    fn octx_mut(&mut self) -> anyhow::Result<&mut AvOutput> {
        self.octx.as_mut().ok_or_else(|| anyhow::anyhow!("output context already finalized"))
    }

    fn apply_meta(stream: &mut ffmpeg::format::stream::StreamMut, meta: &OutputTrackMeta) {
        if let Some(lang) = &meta.language_code {
            let _ = stream.metadata_mut().set("language", lang);
        }
        if let Some(name) = &meta.name {
            let _ = stream.metadata_mut().set("title", name);
        }
        if meta.rotation != mediaconv_core::options::Rotation::Deg0 {
            let _ = stream
                .metadata_mut()
                .set("rotate", &meta.rotation.degrees().to_string());
        }
    }
}

impl OutputSink for FfmpegOutput {
    fn state(&self) -> OutputState {
        self.state
    }

    fn add_video_track_copy(&mut self, meta: OutputTrackMeta, _decoder_config: &dyn DecoderConfig) -> anyhow::Result<usize> {
        let octx = self.octx_mut()?;
        let mut stream = octx.add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))?;
        Self::apply_meta(&mut stream, &meta);
        let index = stream.index();
        self.tracks.push(TrackEncoder::VideoCopy);
        Ok(index)
    }

    fn add_video_track_encoded(&mut self, meta: OutputTrackMeta, config: VideoEncoderConfig) -> anyhow::Result<usize> {
        let id = video_codec_to_id(config.codec);
        let codec = ffmpeg::encoder::find(id).ok_or_else(|| anyhow::anyhow!("no encoder for {:?}", config.codec))?;

        let octx = self.octx_mut()?;
        let mut stream = octx.add_stream(codec)?;
        let mut encoder = CodecContext::new_with_codec(codec).encoder().video()?;
        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_format(ffmpeg::format::Pixel::YUV420P);
        encoder.set_bit_rate(config.bitrate as usize);
        encoder.set_time_base(ffmpeg::Rational::new(1, 90_000));
        if let Some(gop) = config.key_frame_interval {
            encoder.set_gop(gop);
        }

        let mut opts = Dictionary::new();
        if matches!(config.codec, VideoCodec::Avc | VideoCodec::Hevc) {
            opts.set("preset", "medium");
        }

        let opened = encoder.open_with(opts)?;
        unsafe {
            ffmpeg::ffi::avcodec_parameters_from_context(stream.parameters_mut().as_mut_ptr(), opened.as_ptr());
        }
        stream.set_time_base(opened.time_base());
        Self::apply_meta(&mut stream, &meta);
        let index = stream.index();

        self.tracks.push(TrackEncoder::VideoEncode {
            encoder: opened,
            scaler: None,
            config,
        });
        Ok(index)
    }

    fn add_audio_track_copy(&mut self, meta: OutputTrackMeta, _decoder_config: &dyn DecoderConfig) -> anyhow::Result<usize> {
        let octx = self.octx_mut()?;
        let mut stream = octx.add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))?;
        Self::apply_meta(&mut stream, &meta);
        let index = stream.index();
        self.tracks.push(TrackEncoder::AudioCopy);
        Ok(index)
    }

    fn add_audio_track_encoded(&mut self, meta: OutputTrackMeta, config: AudioEncoderConfig) -> anyhow::Result<usize> {
        let id = audio_codec_to_id(config.codec);
        let codec = ffmpeg::encoder::find(id).ok_or_else(|| anyhow::anyhow!("no encoder for {:?}", config.codec))?;

        let octx = self.octx_mut()?;
        let mut stream = octx.add_stream(codec)?;
        let mut encoder = CodecContext::new_with_codec(codec).encoder().audio()?;
        encoder.set_rate(config.sample_rate as i32);
        encoder.set_channel_layout(ffmpeg::ChannelLayout::default(config.channels as i32));
        encoder.set_format(super::codec_map::interleaved_f32());
        if let Some(bitrate) = config.bitrate {
            encoder.set_bit_rate(bitrate as usize);
        }
        encoder.set_time_base(ffmpeg::Rational::new(1, config.sample_rate as i32));

        let opened = encoder.open_as(codec)?;
        unsafe {
            ffmpeg::ffi::avcodec_parameters_from_context(stream.parameters_mut().as_mut_ptr(), opened.as_ptr());
        }
        stream.set_time_base(opened.time_base());
        Self::apply_meta(&mut stream, &meta);
        let index = stream.index();

        let frame_size = if opened.frame_size() > 0 { opened.frame_size() as usize } else { 1024 };
        self.tracks.push(TrackEncoder::AudioEncode {
            encoder: opened,
            resampler: None,
            fifo: AudioFifo::new(config.channels as usize, frame_size),
            config,
        });
        Ok(index)
    }

    fn write_packet(&mut self, track: usize, packet: EncodedPacket) -> anyhow::Result<()> {
        let octx = self.octx_mut()?;
        let tb = octx.stream(track).map(|s| s.time_base()).unwrap_or(ffmpeg::Rational::new(1, 1000));
        let mut pkt = ffmpeg::Packet::copy(&packet.data);
        let pts = (packet.timestamp * tb.denominator() as f64 / tb.numerator() as f64).round() as i64;
        pkt.set_pts(Some(pts));
        pkt.set_dts(Some(pts));
        pkt.set_stream(track);
        if packet.key_frame {
            pkt.set_flags(ffmpeg::packet::Flags::KEY);
        }
        pkt.write_interleaved(octx)?;
        Ok(())
    }

    fn write_video_frame(&mut self, track: usize, frame: &CanvasFrame) -> anyhow::Result<()> {
        let tb = self
            .octx_mut()?
            .stream(track)
            .map(|s| s.time_base())
            .unwrap_or(ffmpeg::Rational::new(1, 90_000));
        let pts = (frame.timestamp * tb.denominator() as f64 / tb.numerator() as f64).round() as i64;

        let TrackEncoder::VideoEncode { encoder, scaler, config } = &mut self.tracks[track] else {
            anyhow::bail!("track {track} is not a video encoder");
        };

        let mut rgba = AvVideoFrame::new(Pixel::RGBA, frame.width, frame.height);
        rgba.data_mut(0)[..frame.data.len()].copy_from_slice(&frame.data);

        if scaler.is_none() {
            *scaler = Some(ScaleContext::get(
                Pixel::RGBA,
                frame.width,
                frame.height,
                Pixel::YUV420P,
                config.width,
                config.height,
                ScaleFlags::BILINEAR,
            )?);
        }
        let mut yuv = AvVideoFrame::new(Pixel::YUV420P, config.width, config.height);
        scaler.as_mut().unwrap().run(&rgba, &mut yuv)?;
        yuv.set_pts(Some(pts));

        encoder.send_frame(&yuv)?;
        drain_video_encoder(encoder, track, self.octx.as_mut().unwrap())
    }

    fn write_audio_frame(&mut self, track: usize, sample: &AudioSample) -> anyhow::Result<()> {
        let TrackEncoder::AudioEncode { encoder, resampler, fifo, config } = &mut self.tracks[track] else {
            anyhow::bail!("track {track} is not an audio encoder");
        };

        let needs_resample = sample.channels != config.channels || sample.sample_rate != config.sample_rate;
        let interleaved: Vec<f32> = if !needs_resample {
            sample.data.to_vec()
        } else {
            let src_layout = ffmpeg::ChannelLayout::default(sample.channels as i32);
            let dst_layout = ffmpeg::ChannelLayout::default(config.channels as i32);
            let resampler = resampler.get_or_insert_with(|| {
                ResampleContext::get(
                    super::codec_map::interleaved_f32(),
                    src_layout,
                    sample.sample_rate,
                    super::codec_map::interleaved_f32(),
                    dst_layout,
                    config.sample_rate,
                )
                .expect("construct output resampler")
            });
            let mut src_frame = AvAudioFrame::new(
                super::codec_map::interleaved_f32(),
                sample.data.len() / sample.channels.max(1) as usize,
                src_layout,
            );
            src_frame.data_mut(0)[..sample.data.len() * 4]
                .copy_from_slice(bytemuck_cast_f32(&sample.data));
            let mut dst_frame = AvAudioFrame::empty();
            resampler.run(&src_frame, &mut dst_frame)?;
            samples_from_frame(&dst_frame, config.channels as usize)
        };

        fifo.push(&interleaved);
        let frame_size = fifo.frame_size;
        let channels = fifo.channels;
        for frame_samples in fifo.drain_frames() {
            encode_audio_frame(encoder, &frame_samples, frame_size, channels, track, self.octx.as_mut().unwrap())?;
        }
        Ok(())
    }

    fn set_metadata_tags(&mut self, tags: serde_json::Value) -> anyhow::Result<()> {
        let octx = self.octx_mut()?;
        if let serde_json::Value::Object(map) = tags {
            for (key, value) in map {
                if let serde_json::Value::String(s) = value {
                    let _ = octx.metadata_mut().set(&key, &s);
                }
            }
        }
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.state = OutputState::Starting;
        self.octx_mut()?.write_header()?;
        self.state = OutputState::Running;
        Ok(())
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        self.state = OutputState::Finalizing;

        let octx = self.octx.as_mut().ok_or_else(|| anyhow::anyhow!("output context already finalized"))?;
        for (index, track) in self.tracks.iter_mut().enumerate() {
            match track {
                TrackEncoder::AudioEncode { encoder, fifo, .. } => {
                    let channels = fifo.channels;
                    let frame_size = fifo.frame_size;
                    // The last partial frame (fewer than `frame_size` samples
                    // per channel): `encode_audio_frame` allocates a
                    // full-size frame and zero-pads past `tail`'s length, so
                    // no buffered audio is dropped before EOF.
                    if let Some(tail) = fifo.flush() {
                        encode_audio_frame(encoder, &tail, frame_size, channels, index, octx)?;
                    }
                    encoder.send_eof()?;
                }
                TrackEncoder::VideoEncode { encoder, .. } => {
                    encoder.send_eof()?;
                }
                _ => {}
            }
        }

        octx.write_trailer()?;
        self.octx = None;
        self.state = OutputState::Finalized;
        Ok(())
    }

    fn cancel(&mut self) -> anyhow::Result<()> {
        self.state = OutputState::Canceled;
        self.octx = None;
        let _ = std::fs::remove_file(&self.path);
        Ok(())
    }
}

fn drain_video_encoder(encoder: &mut ffmpeg::encoder::video::Video, track: usize, octx: &mut AvOutput) -> anyhow::Result<()> {
    let mut encoded = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut encoded).is_ok() {
        encoded.set_stream(track);
        encoded.write_interleaved(octx)?;
        encoded = ffmpeg::Packet::empty();
    }
    Ok(())
}

fn encode_audio_frame(
    encoder: &mut ffmpeg::encoder::audio::Audio,
    samples: &[f32],
    frame_size: usize,
    channels: usize,
    track: usize,
    octx: &mut AvOutput,
) -> anyhow::Result<()> {
    let layout = ffmpeg::ChannelLayout::default(channels as i32);
    let mut frame = AvAudioFrame::new(super::codec_map::interleaved_f32(), frame_size, layout);
    frame.data_mut(0)[..samples.len() * 4].copy_from_slice(bytemuck_cast_f32(samples));
    encoder.send_frame(&frame)?;

    let mut encoded = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut encoded).is_ok() {
        encoded.set_stream(track);
        encoded.write_interleaved(octx)?;
        encoded = ffmpeg::Packet::empty();
    }
    Ok(())
}

fn samples_from_frame(frame: &AvAudioFrame, channels: usize) -> Vec<f32> {
    let n = frame.samples() * channels;
    if n == 0 {
        return Vec::new();
    }
    unsafe {
        let bytes = frame.data(0);
        std::slice::from_raw_parts(bytes.as_ptr() as *const f32, n).to_vec()
    }
}

fn bytemuck_cast_f32(samples: &[f32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(samples.as_ptr() as *const u8, samples.len() * 4) }
}
