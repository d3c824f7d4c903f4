// crates/mediaconv-engine/src/video_pipeline.rs
//
// Per-video-track state machine (§4.5): decides copy vs. transcode at
// planning time, then drives the chosen path against the backend traits at
// execution time. Conceptual transform order is rotate -> crop -> scale ->
// frame-rate -> user-process -> encode; rotation is delegated to container
// metadata instead of baked into pixels whenever the output format allows it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mediaconv_core::codecs::VideoCodec;
use mediaconv_core::options::{
    AlphaHandling, Crop, Fit, ProcessedFrame, Rotation, VideoSample, VideoTrackOptions,
};
use mediaconv_core::quality::Quality;
use mediaconv_core::synchronizer::Synchronizer;
use mediaconv_core::track::{DiscardReason, PlanningError, TrackRef};

use crate::backend::{
    CanvasFrame, CanvasSpec, InputTrack, OutputSink, OutputTrackMeta, VideoEncoderConfig,
};
use crate::capability::CapabilityProbe;
use crate::frame_rate::FrameRateAligner;
use crate::planner;

pub enum VideoPlan {
    Copy,
    Transcode(TranscodePlan),
}

pub struct TranscodePlan {
    pub codec: VideoCodec,
    pub target_width: u32,
    pub target_height: u32,
    pub bitrate: u64,
    pub total_rotation: Rotation,
    pub crop: Option<Crop>,
    pub fit: Fit,
    pub frame_rate: Option<f64>,
    pub key_frame_interval: Option<u32>,
    pub alpha: AlphaHandling,
    pub processed_width: Option<u32>,
    pub processed_height: Option<u32>,
    /// Starts out from planning's geometric verdict; may be forced `true` at
    /// execution time if the no-rerender probe encode fails (§4.5).
    pub needs_rerender: bool,
    pub rotation_via_metadata: bool,
}

/// Plans one video track per §4.5. Returns the path to take, or the reason
/// the track must be discarded.
pub fn plan_video_track(
    track: &dyn InputTrack,
    opts: &VideoTrackOptions,
    output: &dyn crate::backend::OutputFormat,
    probe: &CapabilityProbe,
    trim_start: f64,
) -> Result<VideoPlan, PlanningError> {
    let source_codec = track.video_codec().ok_or(DiscardReason::UnknownSourceCodec)?;

    let total_rotation = planner::total_rotation(track.rotation(), opts.rotate);
    let (rotated_w, rotated_h) =
        planner::rotated_dimensions(track.coded_width(), track.coded_height(), total_rotation);
    let (cropped_w, cropped_h) = planner::cropped_dimensions(rotated_w, rotated_h, opts.crop);
    let (target_w, target_h) = planner::target_dimensions(cropped_w, cropped_h, opts.width, opts.height);

    let rotation_metadata_ok = planner::rotation_via_metadata(
        output.supports_video_rotation_metadata(),
        opts.allow_rotation_metadata.into(),
    );

    let needs_transcode = opts.force_transcode
        || trim_start > 0.0
        || track.get_first_timestamp() < 0.0
        || opts.frame_rate.is_some()
        || opts.key_frame_interval.is_some()
        || opts.process.is_some();

    let needs_rerender = planner::needs_rerender(
        (target_w, target_h),
        (cropped_w, cropped_h),
        total_rotation,
        rotation_metadata_ok,
        opts.process.is_some(),
        opts.crop,
    );

    let copy_eligible = !needs_transcode
        && opts.bitrate.is_none()
        && !needs_rerender
        && output.supported_video_codecs().contains(&source_codec)
        && opts.codec.map_or(true, |c| c == source_codec);

    if copy_eligible {
        return Ok(VideoPlan::Copy);
    }

    if !track.can_decode() {
        return Err(DiscardReason::UndecodableSourceCodec.into());
    }

    let candidates: Vec<VideoCodec> = output
        .supported_video_codecs()
        .into_iter()
        .filter(|c| opts.codec.map_or(true, |wanted| wanted == *c))
        .collect();

    let probe_w = opts.processed_width.unwrap_or(target_w);
    let probe_h = opts.processed_height.unwrap_or(target_h);

    let bitrate_for = |codec: VideoCodec| -> u64 {
        match opts.bitrate {
            Some(mediaconv_core::options::Bitrate::Exact(b)) => b,
            Some(mediaconv_core::options::Bitrate::Quality(q)) => q.to_video_bitrate(codec, probe_w, probe_h),
            None => Quality::HIGH.to_video_bitrate(codec, probe_w, probe_h),
        }
    };

    let codec = probe
        .get_first_encodable_video(&candidates, probe_w, probe_h, bitrate_for)
        .ok_or_else(|| PlanningError {
            reason: DiscardReason::NoEncodableTargetCodec,
            detail: Some(format!("{candidates:?}")),
        })?;

    Ok(VideoPlan::Transcode(TranscodePlan {
        codec,
        target_width: target_w,
        target_height: target_h,
        bitrate: bitrate_for(codec),
        total_rotation,
        crop: opts.crop,
        fit: opts.fit.unwrap_or(Fit::Contain),
        frame_rate: opts.frame_rate,
        key_frame_interval: opts.key_frame_interval,
        alpha: opts.alpha,
        processed_width: opts.processed_width,
        processed_height: opts.processed_height,
        needs_rerender,
        rotation_via_metadata: rotation_metadata_ok,
    }))
}

fn output_rotation_meta(plan: &TranscodePlan, rerendered: bool) -> Rotation {
    if rerendered {
        Rotation::Deg0
    } else {
        plan.total_rotation
    }
}

/// Runs the copy path: forward encoded packets, trimmed to `[trim_start,
/// trim_end]`, to the output without decoding (§4.5).
pub fn run_copy_path(
    track_ref: TrackRef,
    mut source: Box<dyn InputTrack>,
    output: &mut dyn OutputSink,
    output_track: usize,
    alpha: AlphaHandling,
    trim_start: f64,
    trim_end: f64,
    sync: &Synchronizer,
    cancel: &AtomicBool,
    mut on_progress: impl FnMut(TrackRef, f64),
) -> anyhow::Result<()> {
    loop {
        if cancel.load(Ordering::Relaxed) {
            sync.close_track(track_ref);
            return Ok(());
        }
        let Some(mut packet) = source.next_packet()? else {
            break;
        };
        if packet.timestamp < trim_start {
            continue;
        }
        if packet.timestamp > trim_end {
            break;
        }
        if alpha == AlphaHandling::Discard && packet.has_alpha_side_data {
            // `packet` is owned by this call (next_packet returns by value),
            // so clearing the flag in place is safe — no other consumer can
            // observe the side-data we're about to drop.
            packet.has_alpha_side_data = false;
        }

        if sync.should_wait(track_ref, packet.timestamp) {
            sync.wait(packet.timestamp);
        }
        if cancel.load(Ordering::Relaxed) {
            sync.close_track(track_ref);
            return Ok(());
        }

        output.write_packet(output_track, packet.clone())?;
        on_progress(track_ref, packet.timestamp);
    }
    sync.close_track(track_ref);
    Ok(())
}

/// Runs the transcode path: decode (rerendering if needed), run the
/// transform chain, invoke `video.process`, and encode (§4.5).
#[allow(clippy::too_many_arguments)]
pub fn run_transcode_path(
    track_ref: TrackRef,
    mut source: Box<dyn InputTrack>,
    output: &mut dyn OutputSink,
    output_track: usize,
    mut plan: TranscodePlan,
    process: Option<Arc<dyn Fn(VideoSample) -> ProcessedFrame + Send + Sync>>,
    trim_start: f64,
    trim_end: f64,
    probe: &CapabilityProbe,
    sync: &Synchronizer,
    cancel: &AtomicBool,
    mut on_progress: impl FnMut(TrackRef, f64),
) -> anyhow::Result<()> {
    let mut aligner = plan.frame_rate.map(FrameRateAligner::new);
    let mut last_ts_seen = trim_start;
    let mut rerender_fallback_probed = false;

    loop {
        if cancel.load(Ordering::Relaxed) {
            sync.close_track(track_ref);
            return Ok(());
        }

        let canvas = if plan.needs_rerender {
            Some(CanvasSpec {
                width: plan.target_width,
                height: plan.target_height,
                fit: plan.fit,
                rotation: plan.total_rotation,
                crop: plan.crop,
                alpha: plan.alpha,
            })
        } else {
            None
        };

        let Some(frame) = source.next_video_sample(canvas)? else {
            break;
        };
        if frame.timestamp < trim_start {
            continue;
        }
        if frame.timestamp > trim_end {
            break;
        }

        // §4.5/§7 rerender fallback: on the first decoded sample, when we
        // weren't already rerendering, probe whether the encoder actually
        // accepts this frame's real dimensions/bitrate. A backend that
        // over-reports support at planning time (before anything is
        // decoded) can still fail here; if it does, force the rerender path
        // for every subsequent sample on this track.
        if !plan.needs_rerender && !rerender_fallback_probed {
            rerender_fallback_probed = true;
            if !probe.can_encode_video(plan.codec, frame.width, frame.height, plan.bitrate) {
                log::warn!(
                    "video track {}: encoder rejected {}x{} on the no-rerender path, forcing rerender",
                    track_ref.index,
                    frame.width,
                    frame.height,
                );
                plan.needs_rerender = true;
            }
        }

        let sample = VideoSample {
            timestamp: frame.timestamp,
            duration: frame.duration,
            width: frame.width,
            height: frame.height,
            data: frame.data,
        };

        let aligned: Vec<VideoSample> = match aligner.as_mut() {
            Some(a) => a.push(sample).into_iter().map(|x| x.sample).collect(),
            None => vec![sample],
        };

        for aligned_sample in aligned {
            if let Some(f) = process.as_ref() {
                let outputs = match f(aligned_sample.clone()) {
                    ProcessedFrame::None => Vec::new(),
                    ProcessedFrame::One(s) => vec![inherit_timing(s, &aligned_sample)],
                    ProcessedFrame::Many(many) => many
                        .into_iter()
                        .map(|s| inherit_timing(s, &aligned_sample))
                        .collect(),
                };
                for out_sample in outputs {
                    emit_video_sample(track_ref, output, output_track, &out_sample, sync, cancel, &mut on_progress)?;
                    last_ts_seen = out_sample.timestamp + out_sample.duration;
                }
            } else {
                emit_video_sample(track_ref, output, output_track, &aligned_sample, sync, cancel, &mut on_progress)?;
                last_ts_seen = aligned_sample.timestamp + aligned_sample.duration;
            }
        }
    }

    if let Some(a) = aligner.as_mut() {
        for padded in a.finalize(last_ts_seen) {
            emit_video_sample(track_ref, output, output_track, &padded.sample, sync, cancel, &mut on_progress)?;
        }
    }

    sync.close_track(track_ref);
    let _ = plan.codec; // retained in struct for encoder setup done by the backend at add_video_track_encoded time.
    Ok(())
}

fn inherit_timing(sample: VideoSample, source: &VideoSample) -> VideoSample {
    // `process` may return samples without meaningful timestamps; non-
    // timestamped returns inherit the source sample's timestamp/duration
    // (§4.5, design notes). We treat a `0.0` timestamp with a `0.0`
    // duration as "not set" since real samples always carry a positive
    // duration once frame-rate alignment has run.
    if sample.duration == 0.0 {
        VideoSample {
            timestamp: source.timestamp,
            duration: source.duration,
            ..sample
        }
    } else {
        sample
    }
}

fn emit_video_sample(
    track_ref: TrackRef,
    output: &mut dyn OutputSink,
    output_track: usize,
    sample: &VideoSample,
    sync: &Synchronizer,
    cancel: &AtomicBool,
    on_progress: &mut impl FnMut(TrackRef, f64),
) -> anyhow::Result<()> {
    if sync.should_wait(track_ref, sample.timestamp) {
        sync.wait(sample.timestamp);
    }
    if cancel.load(Ordering::Relaxed) {
        return Ok(());
    }
    let frame = CanvasFrame {
        timestamp: sample.timestamp,
        duration: sample.duration,
        width: sample.width,
        height: sample.height,
        data: sample.data.clone(),
    };
    output.write_video_frame(output_track, &frame)?;
    on_progress(track_ref, sample.timestamp);
    Ok(())
}

/// Encoder configuration matching a planned transcode (§4.5 "build encoder
/// config with `size_change_behavior = opts.fit ?? passThrough`").
pub fn encoder_config(plan: &TranscodePlan) -> VideoEncoderConfig {
    VideoEncoderConfig {
        codec: plan.codec,
        width: plan.target_width,
        height: plan.target_height,
        bitrate: plan.bitrate,
        key_frame_interval: plan.key_frame_interval,
        size_change_behavior: plan.fit,
    }
}

/// Output track metadata (§4.5: frame rate hint, language if valid ISO
/// 639-2, name, disposition, rotation).
pub fn output_meta(
    track: &dyn InputTrack,
    plan: Option<&TranscodePlan>,
    rerendered: bool,
) -> OutputTrackMeta {
    OutputTrackMeta {
        frame_rate: plan.and_then(|p| p.frame_rate),
        language_code: track.language_code().filter(|c| crate::iso639::is_valid(c)),
        name: track.name(),
        disposition: track.disposition(),
        rotation: plan.map(|p| output_rotation_meta(p, rerendered)).unwrap_or(Rotation::Deg0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaconv_core::codecs::{AudioCodec, SubtitleCodec};
    use mediaconv_core::conversion::{CountLimits, TrackCountLimits};

    #[derive(Debug)]
    struct MockDecoderConfig;
    impl crate::backend::DecoderConfig for MockDecoderConfig {
        fn is_decodable(&self) -> bool {
            true
        }
    }

    struct MockTrack {
        codec: VideoCodec,
        width: u32,
        height: u32,
        rotation: Rotation,
        language_code: Option<String>,
    }

    impl InputTrack for MockTrack {
        fn kind(&self) -> mediaconv_core::track::TrackKind {
            mediaconv_core::track::TrackKind::Video
        }
        fn index(&self) -> usize {
            0
        }
        fn coded_width(&self) -> u32 {
            self.width
        }
        fn coded_height(&self) -> u32 {
            self.height
        }
        fn rotation(&self) -> Rotation {
            self.rotation
        }
        fn language_code(&self) -> Option<String> {
            self.language_code.clone()
        }
        fn name(&self) -> Option<String> {
            None
        }
        fn disposition(&self) -> Vec<String> {
            vec![]
        }
        fn sample_rate(&self) -> u32 {
            0
        }
        fn channels(&self) -> u32 {
            0
        }
        fn video_codec(&self) -> Option<VideoCodec> {
            Some(self.codec)
        }
        fn audio_codec(&self) -> Option<AudioCodec> {
            None
        }
        fn subtitle_codec(&self) -> Option<SubtitleCodec> {
            None
        }
        fn get_first_timestamp(&self) -> f64 {
            0.0
        }
        fn can_decode(&self) -> bool {
            true
        }
        fn decoder_config(&self) -> &dyn crate::backend::DecoderConfig {
            &MockDecoderConfig
        }
        fn next_packet(&mut self) -> anyhow::Result<Option<crate::backend::EncodedPacket>> {
            Ok(None)
        }
        fn next_video_sample(
            &mut self,
            _canvas: Option<CanvasSpec>,
        ) -> anyhow::Result<Option<CanvasFrame>> {
            Ok(None)
        }
        fn next_audio_sample(
            &mut self,
        ) -> anyhow::Result<Option<mediaconv_core::options::AudioSample>> {
            Ok(None)
        }
    }

    struct FixedFormat {
        video: Vec<VideoCodec>,
        rotation_metadata: bool,
    }

    impl crate::backend::OutputFormat for FixedFormat {
        fn mime_type(&self) -> String {
            "test/mock".into()
        }
        fn supported_track_counts(&self) -> TrackCountLimits {
            TrackCountLimits {
                total: CountLimits { min: 1, max: 8 },
                video: CountLimits { min: 0, max: 1 },
                audio: CountLimits { min: 0, max: 1 },
                subtitle: CountLimits { min: 0, max: 0 },
            }
        }
        fn supported_video_codecs(&self) -> Vec<VideoCodec> {
            self.video.clone()
        }
        fn supported_audio_codecs(&self) -> Vec<AudioCodec> {
            vec![]
        }
        fn supported_subtitle_codecs(&self) -> Vec<SubtitleCodec> {
            vec![]
        }
        fn supports_video_rotation_metadata(&self) -> bool {
            self.rotation_metadata
        }
    }

    struct AllowAllEncoder;
    impl crate::backend::EncoderBackend for AllowAllEncoder {
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

    struct RejectAllEncoder;
    impl crate::backend::EncoderBackend for RejectAllEncoder {
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

    #[test]
    fn plans_copy_when_no_transform_needed() {
        let track = MockTrack {
            codec: VideoCodec::Avc,
            width: 640,
            height: 480,
            rotation: Rotation::Deg0,
            language_code: None,
        };
        let format = FixedFormat {
            video: vec![VideoCodec::Avc],
            rotation_metadata: true,
        };
        let backend = AllowAllEncoder;
        let probe = CapabilityProbe::new(&backend);
        let opts = VideoTrackOptions::default();
        let plan = plan_video_track(&track, &opts, &format, &probe, 0.0).unwrap();
        assert!(matches!(plan, VideoPlan::Copy));
    }

    #[test]
    fn resize_forces_rerender_transcode() {
        let track = MockTrack {
            codec: VideoCodec::Avc,
            width: 1281,
            height: 721,
            rotation: Rotation::Deg0,
            language_code: None,
        };
        let format = FixedFormat {
            video: vec![VideoCodec::Avc, VideoCodec::Vp9],
            rotation_metadata: true,
        };
        let backend = AllowAllEncoder;
        let probe = CapabilityProbe::new(&backend);
        let opts = VideoTrackOptions {
            width: Some(641),
            ..Default::default()
        };
        let plan = plan_video_track(&track, &opts, &format, &probe, 0.0).unwrap();
        match plan {
            VideoPlan::Transcode(t) => {
                assert!(t.needs_rerender);
                assert_eq!(t.target_width, 642);
            }
            VideoPlan::Copy => panic!("expected transcode"),
        }
    }

    #[test]
    fn discards_when_nothing_encodable() {
        let track = MockTrack {
            codec: VideoCodec::Avc,
            width: 640,
            height: 480,
            rotation: Rotation::Deg0,
            language_code: None,
        };
        let format = FixedFormat {
            video: vec![],
            rotation_metadata: true,
        };
        let backend = RejectAllEncoder;
        let probe = CapabilityProbe::new(&backend);
        let opts = VideoTrackOptions {
            force_transcode: true,
            ..Default::default()
        };
        let err = plan_video_track(&track, &opts, &format, &probe, 0.0).unwrap_err();
        assert_eq!(err.reason, DiscardReason::NoEncodableTargetCodec);
    }

    #[test]
    fn discard_detail_names_the_rejected_codecs() {
        let track = MockTrack {
            codec: VideoCodec::Avc,
            width: 640,
            height: 480,
            rotation: Rotation::Deg0,
            language_code: None,
        };
        let format = FixedFormat {
            video: vec![VideoCodec::Vp9],
            rotation_metadata: true,
        };
        let backend = RejectAllEncoder;
        let probe = CapabilityProbe::new(&backend);
        let opts = VideoTrackOptions {
            force_transcode: true,
            ..Default::default()
        };
        let err = plan_video_track(&track, &opts, &format, &probe, 0.0).unwrap_err();
        let detail = err.detail.unwrap();
        assert!(detail.contains("Vp9"), "expected detail to name Vp9, got: {detail}");
    }

    #[test]
    fn output_meta_omits_invalid_language_code() {
        let track = MockTrack {
            codec: VideoCodec::Avc,
            width: 640,
            height: 480,
            rotation: Rotation::Deg0,
            language_code: Some("xx-not-a-code".into()),
        };
        let meta = output_meta(&track, None, false);
        assert_eq!(meta.language_code, None);
    }

    #[test]
    fn rotation_without_metadata_support_bakes_into_pixels() {
        let track = MockTrack {
            codec: VideoCodec::Avc,
            width: 640,
            height: 480,
            rotation: Rotation::Deg90,
            language_code: None,
        };
        let format = FixedFormat {
            video: vec![VideoCodec::Avc],
            rotation_metadata: false,
        };
        let backend = AllowAllEncoder;
        let probe = CapabilityProbe::new(&backend);
        let opts = VideoTrackOptions::default();
        let plan = plan_video_track(&track, &opts, &format, &probe, 0.0).unwrap();
        match plan {
            VideoPlan::Transcode(t) => {
                assert!(t.needs_rerender);
                assert!(!t.rotation_via_metadata);
            }
            VideoPlan::Copy => panic!("expected transcode"),
        }
    }
}
