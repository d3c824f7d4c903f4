// crates/mediaconv-engine/src/ffmpeg/input.rs
//
// `InputSource`/`InputTrack` over a file opened with `ffmpeg_the_third`.
// Grounded in the teacher's `probe.rs` (stream enumeration, duration) and
// `decode.rs` (`LiveDecoder` — lazy decoder/scaler construction, the
// "open a second context for the decoder to sidestep the packet iterator's
// borrow" idiom, and calling `.packets()` fresh on every pull rather than
// holding a live iterator across calls).
//
// Each track reopens the source file independently rather than sharing one
// demuxer across tracks — the same pattern `probe.rs`/`decode.rs` already
// use (opening `ictx`/`ictx2` separately per concern). It costs an extra
// file descriptor and demux pass per track; it buys freedom from threading
// a shared demuxer's borrow checker through `Box<dyn InputTrack>` objects
// that `mediaconv-engine`'s orchestrator hands to independent OS threads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::context::Context as CodecContext;
use ffmpeg::format::context::Input as AvInput;
use ffmpeg::format::{input as open_input, Pixel};
use ffmpeg::media::Type as AvMediaType;
use ffmpeg::software::resampling::Context as ResampleContext;
use ffmpeg::software::scaling::{Context as ScaleContext, Flags as ScaleFlags};
use ffmpeg::util::frame::{audio::Audio as AvAudioFrame, video::Video as AvVideoFrame};

use mediaconv_core::codecs::{AudioCodec, SubtitleCodec, VideoCodec};
use mediaconv_core::options::{AudioSample, Rotation};
use mediaconv_core::track::TrackKind;

use crate::backend::{CanvasFrame, CanvasSpec, DecoderConfig, EncodedPacket, InputSource, InputTrack};

use super::codec_map::{id_to_audio_codec, id_to_video_codec, interleaved_f32};

#[derive(Debug)]
pub struct FfmpegDecoderConfig {
    decodable: bool,
}

impl DecoderConfig for FfmpegDecoderConfig {
    fn is_decodable(&self) -> bool {
        self.decodable
    }
}

/// Static per-track facts gathered once when the file is opened, so planning
/// doesn't need to hold the demuxer open (§6 "Input collaborator").
#[derive(Clone)]
struct TrackDescriptor {
    kind: TrackKind,
    stream_index: usize,
    coded_width: u32,
    coded_height: u32,
    rotation: Rotation,
    language_code: Option<String>,
    name: Option<String>,
    disposition: Vec<String>,
    sample_rate: u32,
    channels: u32,
    video_codec: Option<VideoCodec>,
    audio_codec: Option<AudioCodec>,
    subtitle_codec: Option<SubtitleCodec>,
    first_timestamp: f64,
    can_decode: bool,
}

pub struct FfmpegInput {
    path: PathBuf,
    descriptors: Vec<TrackDescriptor>,
    metadata_tags: serde_json::Value,
    mime_type: String,
    duration: f64,
}

impl FfmpegInput {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ictx = open_input(&path)?;

        let duration = (ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64).max(0.0);
        let mime_type = guess_mime_type(&path);

        let mut metadata_tags = serde_json::Map::new();
        for (key, value) in ictx.metadata().iter() {
            metadata_tags.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        }

        let mut descriptors = Vec::new();
        for stream in ictx.streams() {
            let params = stream.parameters();
            let medium = params.medium();
            let kind = match medium {
                AvMediaType::Video => TrackKind::Video,
                AvMediaType::Audio => TrackKind::Audio,
                AvMediaType::Subtitle => TrackKind::Subtitle,
                _ => continue,
            };

            let tb = stream.time_base();
            let first_timestamp = if stream.start_time() > 0 {
                stream.start_time() as f64 * tb.numerator() as f64 / tb.denominator() as f64
            } else {
                0.0
            };

            let language_code = stream.metadata().get("language").map(|s| s.to_string());
            let name = stream.metadata().get("title").map(|s| s.to_string());
            let disposition = disposition_flags(stream.disposition());

            let (coded_width, coded_height, sample_rate, channels) = unsafe {
                let p = params.as_ptr();
                (
                    (*p).width.max(0) as u32,
                    (*p).height.max(0) as u32,
                    (*p).sample_rate.max(0) as u32,
                    (*p).ch_layout.nb_channels.max(0) as u32,
                )
            };

            let rotation = stream
                .metadata()
                .get("rotate")
                .and_then(|s| s.parse::<i32>().ok())
                .map(Rotation::from_degrees_mod_360)
                .unwrap_or(Rotation::Deg0);

            let can_decode = ffmpeg::decoder::find(params.id()).is_some();

            descriptors.push(TrackDescriptor {
                kind,
                stream_index: stream.index(),
                coded_width,
                coded_height,
                rotation,
                language_code,
                name,
                disposition,
                sample_rate,
                channels,
                video_codec: (kind == TrackKind::Video).then(|| id_to_video_codec(params.id())).flatten(),
                audio_codec: (kind == TrackKind::Audio).then(|| id_to_audio_codec(params.id())).flatten(),
                subtitle_codec: None,
                first_timestamp,
                can_decode,
            });
        }

        Ok(FfmpegInput {
            path,
            descriptors,
            metadata_tags: serde_json::Value::Object(metadata_tags),
            mime_type,
            duration,
        })
    }
}

fn disposition_flags(disp: ffmpeg::format::stream::Disposition) -> Vec<String> {
    use ffmpeg::format::stream::Disposition as D;
    let mut out = Vec::new();
    if disp.contains(D::DEFAULT) {
        out.push("default".to_string());
    }
    if disp.contains(D::FORCED) {
        out.push("forced".to_string());
    }
    if disp.contains(D::HEARING_IMPAIRED) {
        out.push("hearing-impaired".to_string());
    }
    if disp.contains(D::VISUAL_IMPAIRED) {
        out.push("visual-impaired".to_string());
    }
    out
}

fn guess_mime_type(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase().as_str() {
        "mp4" | "m4v" | "mov" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        other if other.is_empty() => "application/octet-stream",
        _ => "application/octet-stream",
    }
    .to_string()
}

impl InputSource for FfmpegInput {
    fn tracks(&mut self) -> Vec<Box<dyn InputTrack>> {
        self.descriptors
            .iter()
            .cloned()
            .map(|d| Box::new(FfmpegInputTrack::new(self.path.clone(), d)) as Box<dyn InputTrack>)
            .collect()
    }

    fn metadata_tags(&self) -> serde_json::Value {
        self.metadata_tags.clone()
    }

    fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    fn compute_duration(&self) -> f64 {
        self.duration
    }
}

/// One track's independent decode/demux state. The packet context and any
/// decoder/scaler/resampler are created lazily on first use so discarded or
/// copy-path tracks never pay for a decoder they won't run (§4.5/§4.6 copy
/// path never decodes).
pub struct FfmpegInputTrack {
    path: PathBuf,
    descriptor: TrackDescriptor,
    decoder_config: FfmpegDecoderConfig,

    packet_ctx: Option<AvInput>,
    video_decoder: Option<ffmpeg::decoder::video::Video>,
    audio_decoder: Option<ffmpeg::decoder::audio::Audio>,
    scaler: Option<(ScaleContext, CanvasSpec)>,
    resampler: Option<ResampleContext>,
}

impl FfmpegInputTrack {
    fn new(path: PathBuf, descriptor: TrackDescriptor) -> Self {
        let decodable = descriptor.can_decode;
        FfmpegInputTrack {
            path,
            descriptor,
            decoder_config: FfmpegDecoderConfig { decodable },
            packet_ctx: None,
            video_decoder: None,
            audio_decoder: None,
            scaler: None,
            resampler: None,
        }
    }

    fn ensure_packet_ctx(&mut self) -> anyhow::Result<&mut AvInput> {
        if self.packet_ctx.is_none() {
            self.packet_ctx = Some(open_input(&self.path)?);
        }
        Ok(self.packet_ctx.as_mut().unwrap())
    }

    fn ensure_video_decoder(&mut self) -> anyhow::Result<()> {
        if self.video_decoder.is_some() {
            return Ok(());
        }
        // Second, independent context for the decoder, mirroring
        // `LiveDecoder::open`'s split between the packet-reading context
        // and the one whose `StreamRef::parameters()` builds the decoder.
        let ctx2 = open_input(&self.path)?;
        let stream = ctx2
            .stream(self.descriptor.stream_index)
            .ok_or_else(|| anyhow::anyhow!("video stream {} vanished", self.descriptor.stream_index))?;
        let codec_ctx = CodecContext::from_parameters(stream.parameters())?;
        self.video_decoder = Some(codec_ctx.decoder().video()?);
        Ok(())
    }

    fn ensure_audio_decoder(&mut self) -> anyhow::Result<()> {
        if self.audio_decoder.is_some() {
            return Ok(());
        }
        let ctx2 = open_input(&self.path)?;
        let stream = ctx2
            .stream(self.descriptor.stream_index)
            .ok_or_else(|| anyhow::anyhow!("audio stream {} vanished", self.descriptor.stream_index))?;
        let codec_ctx = CodecContext::from_parameters(stream.parameters())?;
        self.audio_decoder = Some(codec_ctx.decoder().audio()?);
        Ok(())
    }

    fn ensure_scaler(&mut self, canvas: CanvasSpec) -> anyhow::Result<()> {
        let decoder = self.video_decoder.as_ref().expect("decoder initialized before scaler");
        let needs_new = match &self.scaler {
            Some((_, existing)) => {
                existing.width != canvas.width || existing.height != canvas.height
            }
            None => true,
        };
        if needs_new {
            // A full `Fit` implementation would letterbox (`Contain`) or
            // center-crop (`Cover`) before this scale; this reference
            // backend always does a direct bilinear resize to the target
            // dimensions (closest to `Fit::Fill`).
            let ctx = ScaleContext::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                Pixel::RGBA,
                canvas.width,
                canvas.height,
                ScaleFlags::BILINEAR,
            )?;
            self.scaler = Some((ctx, canvas));
        }
        Ok(())
    }

    fn pts_to_secs(tb: ffmpeg::util::rational::Rational, pts: i64) -> f64 {
        pts as f64 * tb.numerator() as f64 / tb.denominator() as f64
    }
}

impl InputTrack for FfmpegInputTrack {
    fn kind(&self) -> TrackKind {
        self.descriptor.kind
    }

    fn index(&self) -> usize {
        self.descriptor.stream_index
    }

    fn coded_width(&self) -> u32 {
        self.descriptor.coded_width
    }

    fn coded_height(&self) -> u32 {
        self.descriptor.coded_height
    }

    fn rotation(&self) -> Rotation {
        self.descriptor.rotation
    }

    fn language_code(&self) -> Option<String> {
        self.descriptor.language_code.clone()
    }

    fn name(&self) -> Option<String> {
        self.descriptor.name.clone()
    }

    fn disposition(&self) -> Vec<String> {
        self.descriptor.disposition.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.descriptor.sample_rate
    }

    fn channels(&self) -> u32 {
        self.descriptor.channels
    }

    fn video_codec(&self) -> Option<VideoCodec> {
        self.descriptor.video_codec
    }

    fn audio_codec(&self) -> Option<AudioCodec> {
        self.descriptor.audio_codec
    }

    fn subtitle_codec(&self) -> Option<SubtitleCodec> {
        self.descriptor.subtitle_codec
    }

    fn get_first_timestamp(&self) -> f64 {
        self.descriptor.first_timestamp
    }

    fn can_decode(&self) -> bool {
        self.descriptor.can_decode
    }

    fn decoder_config(&self) -> &dyn DecoderConfig {
        &self.decoder_config
    }

    fn next_packet(&mut self) -> anyhow::Result<Option<EncodedPacket>> {
        let stream_index = self.descriptor.stream_index;
        let ctx = self.ensure_packet_ctx()?;
        for (stream, packet) in ctx.packets().flatten() {
            if stream.index() != stream_index {
                continue;
            }
            let tb = stream.time_base();
            let timestamp = packet.pts().or(packet.dts()).map(|p| Self::pts_to_secs(tb, p)).unwrap_or(0.0);
            let duration = packet.duration().max(0) as f64 * tb.numerator() as f64 / tb.denominator() as f64;
            let data: Arc<[u8]> = packet.data().unwrap_or(&[]).to_vec().into();
            return Ok(Some(EncodedPacket {
                timestamp,
                duration,
                key_frame: packet.is_key(),
                data,
                has_alpha_side_data: false,
            }));
        }
        Ok(None)
    }

    fn next_video_sample(&mut self, canvas: Option<CanvasSpec>) -> anyhow::Result<Option<CanvasFrame>> {
        self.ensure_video_decoder()?;
        if let Some(spec) = canvas {
            self.ensure_scaler(spec)?;
        }

        let stream_index = self.descriptor.stream_index;
        let ctx = self.ensure_packet_ctx()?;

        loop {
            let mut found_packet = false;
            for (stream, packet) in ctx.packets().flatten() {
                if stream.index() != stream_index {
                    continue;
                }
                found_packet = true;
                let tb = stream.time_base();
                self.video_decoder.as_mut().unwrap().send_packet(&packet)?;
                let mut decoded = AvVideoFrame::empty();
                if self.video_decoder.as_mut().unwrap().receive_frame(&mut decoded).is_ok() {
                    let pts = decoded.pts().unwrap_or(0);
                    let timestamp = Self::pts_to_secs(tb, pts);
                    let frame_rate = self.video_decoder.as_ref().unwrap().frame_rate();
                    let duration = frame_rate
                        .map(|r| r.denominator() as f64 / r.numerator().max(1) as f64)
                        .unwrap_or(0.0);

                    return Ok(Some(self.rasterize(&decoded, timestamp, duration)?));
                }
                // Decoder buffered the packet without emitting a frame yet
                // (B-frame reordering); keep reading.
            }
            if !found_packet {
                return Ok(None);
            }
        }
    }

    fn next_audio_sample(&mut self) -> anyhow::Result<Option<AudioSample>> {
        self.ensure_audio_decoder()?;
        let stream_index = self.descriptor.stream_index;
        let ctx = self.ensure_packet_ctx()?;

        loop {
            let mut found_packet = false;
            for (stream, packet) in ctx.packets().flatten() {
                if stream.index() != stream_index {
                    continue;
                }
                found_packet = true;
                let tb = stream.time_base();
                self.audio_decoder.as_mut().unwrap().send_packet(&packet)?;
                let mut decoded = AvAudioFrame::empty();
                if self.audio_decoder.as_mut().unwrap().receive_frame(&mut decoded).is_ok() {
                    let pts = decoded.pts().unwrap_or(0);
                    let timestamp = Self::pts_to_secs(tb, pts);
                    return Ok(Some(self.to_audio_sample(&decoded, timestamp)?));
                }
            }
            if !found_packet {
                return Ok(None);
            }
        }
    }
}

impl FfmpegInputTrack {
    fn rasterize(&mut self, decoded: &AvVideoFrame, timestamp: f64, duration: f64) -> anyhow::Result<CanvasFrame> {
        let (width, height, data) = if let Some((scaler, spec)) = self.scaler.as_mut() {
            let mut out = AvVideoFrame::empty();
            scaler.run(decoded, &mut out)?;
            let stride = out.stride(0);
            let row_bytes = spec.width as usize * 4;
            let raw = out.data(0);
            let bytes: Vec<u8> = (0..spec.height as usize)
                .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
                .copied()
                .collect();
            (spec.width, spec.height, bytes)
        } else {
            // No canvas requested: pass the decoded frame through as RGBA
            // at its native dimensions (the non-rerender transcode path
            // still needs bytes the encoder understands).
            let w = decoded.width();
            let h = decoded.height();
            let ctx = ScaleContext::get(decoded.format(), w, h, Pixel::RGBA, w, h, ScaleFlags::BILINEAR)?;
            let mut ctx = ctx;
            let mut out = AvVideoFrame::empty();
            ctx.run(decoded, &mut out)?;
            let stride = out.stride(0);
            let row_bytes = w as usize * 4;
            let raw = out.data(0);
            let bytes: Vec<u8> = (0..h as usize)
                .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
                .copied()
                .collect();
            (w, h, bytes)
        };

        Ok(CanvasFrame {
            timestamp,
            duration,
            width,
            height,
            data: data.into(),
        })
    }

    fn to_audio_sample(&mut self, decoded: &AvAudioFrame, timestamp: f64) -> anyhow::Result<AudioSample> {
        let target_fmt = interleaved_f32();
        let channels = decoded.ch_layout().channels().max(1) as u32;
        let rate = decoded.rate();

        let interleaved = if decoded.format() == target_fmt {
            samples_from_packed_frame(decoded, channels as usize)
        } else {
            let resampler = self.resampler.get_or_insert_with(|| {
                ResampleContext::get(
                    decoded.format(),
                    decoded.ch_layout(),
                    rate,
                    target_fmt,
                    decoded.ch_layout(),
                    rate,
                )
                .expect("construct audio format resampler")
            });
            let mut resampled = AvAudioFrame::empty();
            resampler.run(decoded, &mut resampled)?;
            samples_from_packed_frame(&resampled, channels as usize)
        };

        Ok(AudioSample {
            timestamp,
            sample_rate: rate,
            channels,
            data: interleaved.into(),
        })
    }
}

/// Reads an interleaved-f32 `AvAudioFrame`'s plane 0 into a flat `Vec<f32>`.
fn samples_from_packed_frame(frame: &AvAudioFrame, channels: usize) -> Vec<f32> {
    let n = frame.samples() * channels;
    if n == 0 {
        return Vec::new();
    }
    unsafe {
        let bytes = frame.data(0);
        std::slice::from_raw_parts(bytes.as_ptr() as *const f32, n).to_vec()
    }
}
