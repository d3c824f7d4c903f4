// crates/mediaconv-engine/src/audio_pipeline.rs
//
// Per-audio-track state machine (§4.6): copy vs. transcode, resample/remix,
// the fallback-params retry when no non-PCM codec is encodable at the
// requested channel/rate, and the user `process` hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mediaconv_core::codecs::AudioCodec;
use mediaconv_core::options::{AudioProcessResult, AudioSample, AudioTrackOptions};
use mediaconv_core::quality::Quality;
use mediaconv_core::resampler::Resampler;
use mediaconv_core::synchronizer::Synchronizer;
use mediaconv_core::track::{DiscardReason, PlanningError, TrackRef};

use crate::backend::{AudioEncoderConfig, InputTrack, OutputSink, OutputTrackMeta};
use crate::capability::CapabilityProbe;

/// Fallback channel/rate pair tried when no non-PCM codec encodes at the
/// requested parameters but the output format does support some non-PCM
/// codec (§4.6).
const FALLBACK_CHANNELS: u32 = 2;
const FALLBACK_RATE: u32 = 48_000;

pub enum AudioPlan {
    Copy,
    Transcode(TranscodePlan),
}

pub struct TranscodePlan {
    pub codec: AudioCodec,
    pub target_channels: u32,
    pub target_rate: u32,
    pub bitrate: Option<u64>,
    pub needs_resample: bool,
}

pub fn plan_audio_track(
    track: &dyn InputTrack,
    opts: &AudioTrackOptions,
    output: &dyn crate::backend::OutputFormat,
    probe: &CapabilityProbe,
    trim_start: f64,
    show_warnings: bool,
) -> Result<AudioPlan, PlanningError> {
    let source_codec = track.audio_codec().ok_or(DiscardReason::UnknownSourceCodec)?;

    let target_channels = opts.number_of_channels.unwrap_or_else(|| track.channels());
    let target_rate = opts.sample_rate.unwrap_or_else(|| track.sample_rate());

    let mut needs_resample = target_channels != track.channels()
        || target_rate != track.sample_rate()
        || trim_start > 0.0
        || track.get_first_timestamp() < 0.0;

    let copy_eligible = !opts.force_transcode
        && opts.bitrate.is_none()
        && !needs_resample
        && output.supported_audio_codecs().contains(&source_codec)
        && opts.codec.map_or(true, |c| c == source_codec)
        && opts.process.is_none();

    if copy_eligible {
        return Ok(AudioPlan::Copy);
    }

    if !track.can_decode() {
        return Err(DiscardReason::UndecodableSourceCodec.into());
    }

    let mut channels = target_channels;
    let mut rate = target_rate;

    let candidates: Vec<AudioCodec> = output
        .supported_audio_codecs()
        .into_iter()
        .filter(|c| opts.codec.map_or(true, |wanted| wanted == *c))
        .collect();

    let bitrate_for = |codec: AudioCodec| -> Option<u64> {
        match opts.bitrate {
            Some(mediaconv_core::options::Bitrate::Exact(b)) => codec.takes_bitrate().then_some(b),
            Some(mediaconv_core::options::Bitrate::Quality(q)) => q.to_audio_bitrate(codec),
            None => Quality::HIGH.to_audio_bitrate(codec),
        }
    };

    let mut codec = probe.get_first_encodable_audio(&candidates, channels, rate, bitrate_for);

    // No non-PCM codec encodable at the requested params, but the output
    // format supports *some* non-PCM codec: retry at fallback channels/rate
    // (§4.6).
    let non_pcm_exists_in_output = candidates.iter().any(|c| !c.is_pcm());
    let non_pcm_found = codec.map_or(false, |c| !c.is_pcm());
    if !non_pcm_found && non_pcm_exists_in_output {
        let fallback_codecs: Vec<AudioCodec> =
            candidates.iter().copied().filter(|c| !c.is_pcm()).collect();
        if let Some(fallback_codec) = probe.get_first_encodable_audio(
            &fallback_codecs,
            FALLBACK_CHANNELS,
            FALLBACK_RATE,
            bitrate_for,
        ) {
            if show_warnings {
                log::warn!(
                    "no encodable codec at {channels}ch/{rate}Hz for audio track {}, falling back to {fallback_codec:?} at {FALLBACK_CHANNELS}ch/{FALLBACK_RATE}Hz",
                    track.index()
                );
            }
            codec = Some(fallback_codec);
            channels = FALLBACK_CHANNELS;
            rate = FALLBACK_RATE;
            needs_resample = true;
        }
    }

    let codec = codec.ok_or_else(|| PlanningError {
        reason: DiscardReason::NoEncodableTargetCodec,
        detail: Some(format!("{candidates:?}")),
    })?;

    Ok(AudioPlan::Transcode(TranscodePlan {
        codec,
        target_channels: channels,
        target_rate: rate,
        bitrate: bitrate_for(codec),
        needs_resample,
    }))
}

pub fn run_copy_path(
    track_ref: TrackRef,
    mut source: Box<dyn InputTrack>,
    output: &mut dyn OutputSink,
    output_track: usize,
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
        let Some(packet) = source.next_packet()? else {
            break;
        };
        if packet.timestamp < trim_start {
            continue;
        }
        if packet.timestamp > trim_end {
            break;
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

#[allow(clippy::too_many_arguments)]
pub fn run_transcode_path(
    track_ref: TrackRef,
    mut source: Box<dyn InputTrack>,
    output: &mut dyn OutputSink,
    output_track: usize,
    plan: &TranscodePlan,
    process: Option<Arc<dyn Fn(AudioSample) -> AudioProcessResult + Send + Sync>>,
    trim_start: f64,
    trim_end: f64,
    global_end: f64,
    sync: &Synchronizer,
    cancel: &AtomicBool,
    mut on_progress: impl FnMut(TrackRef, f64),
) -> anyhow::Result<()> {
    let mut resampler = plan
        .needs_resample
        .then(|| Resampler::new(plan.target_rate, plan.target_channels, trim_start, global_end));

    loop {
        if cancel.load(Ordering::Relaxed) {
            sync.close_track(track_ref);
            return Ok(());
        }
        let Some(sample) = source.next_audio_sample()? else {
            break;
        };
        if sample.timestamp > trim_end {
            break;
        }

        let emitted: Vec<AudioSample> = if let Some(r) = resampler.as_mut() {
            r.push(&sample)
        } else {
            vec![sample]
        };

        for out_sample in emitted {
            let to_emit: Vec<AudioSample> = if let Some(f) = process.as_ref() {
                match f(out_sample.clone()) {
                    AudioProcessResult::None => Vec::new(),
                    AudioProcessResult::One(s) => vec![s],
                    AudioProcessResult::Many(many) => many,
                }
            } else {
                vec![out_sample]
            };

            for s in to_emit {
                if sync.should_wait(track_ref, s.timestamp) {
                    sync.wait(s.timestamp);
                }
                if cancel.load(Ordering::Relaxed) {
                    sync.close_track(track_ref);
                    return Ok(());
                }
                output.write_audio_frame(output_track, &s)?;
                on_progress(track_ref, s.timestamp);
            }
        }
    }

    if let Some(r) = resampler.as_mut() {
        if let Some(tail) = r.finalize() {
            if sync.should_wait(track_ref, tail.timestamp) {
                sync.wait(tail.timestamp);
            }
            output.write_audio_frame(output_track, &tail)?;
            on_progress(track_ref, tail.timestamp);
        }
    }

    sync.close_track(track_ref);
    Ok(())
}

pub fn encoder_config(plan: &TranscodePlan) -> AudioEncoderConfig {
    AudioEncoderConfig {
        codec: plan.codec,
        sample_rate: plan.target_rate,
        channels: plan.target_channels,
        bitrate: plan.bitrate,
    }
}

pub fn output_meta(track: &dyn InputTrack) -> OutputTrackMeta {
    OutputTrackMeta {
        frame_rate: None,
        language_code: track.language_code().filter(|c| crate::iso639::is_valid(c)),
        name: track.name(),
        disposition: track.disposition(),
        rotation: mediaconv_core::options::Rotation::Deg0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaconv_core::codecs::{PcmFormat, SubtitleCodec, VideoCodec};
    use mediaconv_core::conversion::{CountLimits, TrackCountLimits};

    struct FixedFormat {
        audio: Vec<AudioCodec>,
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
            vec![]
        }
        fn supported_audio_codecs(&self) -> Vec<AudioCodec> {
            self.audio.clone()
        }
        fn supported_subtitle_codecs(&self) -> Vec<SubtitleCodec> {
            vec![]
        }
        fn supports_video_rotation_metadata(&self) -> bool {
            false
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

    struct RejectNonPcmEncoder;
    impl crate::backend::EncoderBackend for RejectNonPcmEncoder {
        fn can_encode_video(&self, _: VideoCodec, _: u32, _: u32, _: u64) -> bool {
            false
        }
        fn can_encode_audio(&self, codec: AudioCodec, channels: u32, rate: u32, _: Option<u64>) -> bool {
            !codec.is_pcm() && channels == FALLBACK_CHANNELS && rate == FALLBACK_RATE
        }
        fn can_encode_subtitles(&self, _: SubtitleCodec) -> bool {
            false
        }
    }

    struct MockTrack {
        codec: AudioCodec,
        channels: u32,
        rate: u32,
    }

    impl InputTrack for MockTrack {
        fn kind(&self) -> mediaconv_core::track::TrackKind {
            mediaconv_core::track::TrackKind::Audio
        }
        fn index(&self) -> usize {
            0
        }
        fn coded_width(&self) -> u32 {
            0
        }
        fn coded_height(&self) -> u32 {
            0
        }
        fn rotation(&self) -> mediaconv_core::options::Rotation {
            mediaconv_core::options::Rotation::Deg0
        }
        fn language_code(&self) -> Option<String> {
            None
        }
        fn name(&self) -> Option<String> {
            None
        }
        fn disposition(&self) -> Vec<String> {
            vec![]
        }
        fn sample_rate(&self) -> u32 {
            self.rate
        }
        fn channels(&self) -> u32 {
            self.channels
        }
        fn video_codec(&self) -> Option<VideoCodec> {
            None
        }
        fn audio_codec(&self) -> Option<AudioCodec> {
            Some(self.codec)
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
            _canvas: Option<crate::backend::CanvasSpec>,
        ) -> anyhow::Result<Option<crate::backend::CanvasFrame>> {
            Ok(None)
        }
        fn next_audio_sample(&mut self) -> anyhow::Result<Option<AudioSample>> {
            Ok(None)
        }
    }

    #[derive(Debug)]
    struct MockDecoderConfig;
    impl crate::backend::DecoderConfig for MockDecoderConfig {
        fn is_decodable(&self) -> bool {
            true
        }
    }

    #[test]
    fn plans_copy_when_codec_already_supported() {
        let track = MockTrack {
            codec: AudioCodec::Aac,
            channels: 2,
            rate: 48_000,
        };
        let format = FixedFormat {
            audio: vec![AudioCodec::Aac],
        };
        let backend = AllowAllEncoder;
        let probe = CapabilityProbe::new(&backend);
        let opts = AudioTrackOptions::default();
        let plan = plan_audio_track(&track, &opts, &format, &probe, 0.0, true).unwrap();
        assert!(matches!(plan, AudioPlan::Copy));
    }

    #[test]
    fn falls_back_to_stereo_48k_when_requested_params_unencodable() {
        let track = MockTrack {
            codec: AudioCodec::Pcm(PcmFormat::S16Le),
            channels: 6,
            rate: 96_000,
        };
        let format = FixedFormat {
            audio: vec![AudioCodec::Opus, AudioCodec::Pcm(PcmFormat::S16Le)],
        };
        let backend = RejectNonPcmEncoder;
        let probe = CapabilityProbe::new(&backend);
        let opts = AudioTrackOptions::default();
        let plan = plan_audio_track(&track, &opts, &format, &probe, 0.0, true).unwrap();
        match plan {
            AudioPlan::Transcode(t) => {
                assert_eq!(t.codec, AudioCodec::Opus);
                assert_eq!(t.target_channels, FALLBACK_CHANNELS);
                assert_eq!(t.target_rate, FALLBACK_RATE);
                assert!(t.needs_resample);
            }
            AudioPlan::Copy => panic!("expected transcode"),
        }
    }

    #[test]
    fn discards_when_nothing_encodable() {
        let track = MockTrack {
            codec: AudioCodec::Aac,
            channels: 2,
            rate: 48_000,
        };
        let format = FixedFormat { audio: vec![] };
        struct RejectAll;
        impl crate::backend::EncoderBackend for RejectAll {
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
        let backend = RejectAll;
        let probe = CapabilityProbe::new(&backend);
        let opts = AudioTrackOptions {
            force_transcode: true,
            ..Default::default()
        };
        let err = plan_audio_track(&track, &opts, &format, &probe, 0.0, true).unwrap_err();
        assert_eq!(err.reason, DiscardReason::NoEncodableTargetCodec);
    }
}
