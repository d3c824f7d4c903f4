// crates/mediaconv-engine/src/orchestrator.rs
//
// Conversion orchestrator (§4.7): validates options, plans every input
// track, drives all track pipelines concurrently, reports progress, and
// cancels. Owns the single `ConversionState` for the lifetime of the job;
// track pipelines own nothing beyond their own decode/encode loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use mediaconv_core::conversion::{CapacityError, ConversionState};
use mediaconv_core::error::ConversionError;
use mediaconv_core::options::{ConversionOptions, TagsOption, TrackInfo, VideoTrackOptions, AudioTrackOptions};
use mediaconv_core::progress::ProgressTracker;
use mediaconv_core::synchronizer::Synchronizer;
use mediaconv_core::track::{DiscardReason, TrackKind, TrackRef};

use crate::audio_pipeline::{self, AudioPlan};
use crate::backend::{EncoderBackend, InputSource, InputTrack, OutputFormat, OutputSink, OutputTrackMeta};
use crate::capability::CapabilityProbe;
use crate::video_pipeline::{self, VideoPlan};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Planning,
    Ready,
    Executing,
    Finalized,
    Canceled,
    Failed,
}

enum TrackPlan {
    Video {
        plan: VideoPlan,
        opts: VideoTrackOptions,
    },
    Audio {
        plan: AudioPlan,
        opts: AudioTrackOptions,
    },
}

/// `OutputSink` shared across per-track threads by locking around every
/// call. `OutputSink`'s own methods take `&mut self` since a single-threaded
/// caller is the common case (a test double, a one-track conversion); the
/// orchestrator is the one place that actually contends on it.
#[derive(Clone)]
struct SharedOutput(Arc<Mutex<Box<dyn OutputSink + Send>>>);

impl OutputSink for SharedOutput {
    fn state(&self) -> crate::backend::OutputState {
        self.0.lock().unwrap().state()
    }
    fn add_video_track_copy(
        &mut self,
        meta: OutputTrackMeta,
        decoder_config: &dyn crate::backend::DecoderConfig,
    ) -> anyhow::Result<usize> {
        self.0.lock().unwrap().add_video_track_copy(meta, decoder_config)
    }
    fn add_video_track_encoded(
        &mut self,
        meta: OutputTrackMeta,
        config: crate::backend::VideoEncoderConfig,
    ) -> anyhow::Result<usize> {
        self.0.lock().unwrap().add_video_track_encoded(meta, config)
    }
    fn add_audio_track_copy(
        &mut self,
        meta: OutputTrackMeta,
        decoder_config: &dyn crate::backend::DecoderConfig,
    ) -> anyhow::Result<usize> {
        self.0.lock().unwrap().add_audio_track_copy(meta, decoder_config)
    }
    fn add_audio_track_encoded(
        &mut self,
        meta: OutputTrackMeta,
        config: crate::backend::AudioEncoderConfig,
    ) -> anyhow::Result<usize> {
        self.0.lock().unwrap().add_audio_track_encoded(meta, config)
    }
    fn write_packet(&mut self, track: usize, packet: crate::backend::EncodedPacket) -> anyhow::Result<()> {
        self.0.lock().unwrap().write_packet(track, packet)
    }
    fn write_video_frame(&mut self, track: usize, frame: &crate::backend::CanvasFrame) -> anyhow::Result<()> {
        self.0.lock().unwrap().write_video_frame(track, frame)
    }
    fn write_audio_frame(
        &mut self,
        track: usize,
        sample: &mediaconv_core::options::AudioSample,
    ) -> anyhow::Result<()> {
        self.0.lock().unwrap().write_audio_frame(track, sample)
    }
    fn set_metadata_tags(&mut self, tags: serde_json::Value) -> anyhow::Result<()> {
        self.0.lock().unwrap().set_metadata_tags(tags)
    }
    fn start(&mut self) -> anyhow::Result<()> {
        self.0.lock().unwrap().start()
    }
    fn finalize(&mut self) -> anyhow::Result<()> {
        self.0.lock().unwrap().finalize()
    }
    fn cancel(&mut self) -> anyhow::Result<()> {
        self.0.lock().unwrap().cancel()
    }
}

/// Drives one conversion job end to end (§4.7).
pub struct Orchestrator {
    input: Box<dyn InputSource>,
    output_format: Box<dyn OutputFormat>,
    output: SharedOutput,
    encoder_backend: Arc<dyn EncoderBackend>,
    options: ConversionOptions,
    state: ConversionState,
    sources: HashMap<TrackRef, Box<dyn InputTrack>>,
    planned: Vec<(TrackRef, TrackPlan)>,
    trim_start: f64,
    trim_end: f64,
    input_duration: f64,
    phase: Phase,
    cancel: Arc<AtomicBool>,
}

/// Cheap, `Send + Sync` handle that lets a caller request cancellation from
/// a different thread than the one blocked inside `execute()` (§4.7 `cancel`
/// "idempotent, no-op if already finalizing/finalized").
#[derive(Clone)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Orchestrator {
    pub fn new(
        input: Box<dyn InputSource>,
        output_format: Box<dyn OutputFormat>,
        output: Box<dyn OutputSink + Send>,
        encoder_backend: Box<dyn EncoderBackend>,
        options: ConversionOptions,
    ) -> Self {
        let limits = output_format.supported_track_counts();
        Orchestrator {
            input,
            output_format,
            output: SharedOutput(Arc::new(Mutex::new(output))),
            encoder_backend: Arc::from(encoder_backend),
            options,
            state: ConversionState::new(limits),
            sources: HashMap::new(),
            planned: Vec::new(),
            trim_start: 0.0,
            trim_end: f64::INFINITY,
            input_duration: 0.0,
            phase: Phase::Planning,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A cloneable handle a caller can hold onto and invoke from another
    /// thread while `execute()` is blocked on this one.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle(Arc::clone(&self.cancel))
    }

    pub fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    pub fn explain_invalid(&self) -> Option<String> {
        self.state.explain_invalid()
    }

    pub fn discarded_tracks(&self) -> &[mediaconv_core::track::DiscardedTrack] {
        self.state.discarded_tracks()
    }

    /// Plans every input track: resolves per-track options, decides
    /// copy/transcode/discard, and enforces the output format's track-count
    /// limits (§4.7 `planning`).
    pub fn init(&mut self) -> Result<(), ConversionError> {
        let duration = self.input.compute_duration();
        self.input_duration = duration;
        self.trim_start = self.options.trim.start.unwrap_or(0.0).max(0.0);
        self.trim_end = self.options.trim.end.unwrap_or(duration);
        if self.trim_end <= self.trim_start {
            return Err(ConversionError::InvalidOption {
                path: "trim.end".into(),
                message: "trim.end must be greater than trim.start".into(),
            });
        }

        let probe = CapabilityProbe::new(self.encoder_backend.as_ref());
        let mut video_n = 0usize;
        let mut audio_n = 0usize;

        for track in self.input.tracks() {
            let track_ref = TrackRef {
                kind: track.kind(),
                index: track.index(),
            };
            let info = TrackInfo {
                coded_width: track.coded_width(),
                coded_height: track.coded_height(),
                source_rotation: track.rotation(),
                language_code: track.language_code(),
                name: track.name(),
            };

            match track.kind() {
                TrackKind::Video => {
                    video_n += 1;
                    let opts = self
                        .options
                        .video
                        .as_ref()
                        .map(|f| f.resolve(&info, video_n))
                        .unwrap_or_default();
                    if opts.discard {
                        self.state.discard(track_ref, DiscardReason::DiscardedByUser);
                        continue;
                    }
                    match video_pipeline::plan_video_track(
                        track.as_ref(),
                        &opts,
                        self.output_format.as_ref(),
                        &probe,
                        self.trim_start,
                    ) {
                        Ok(plan) => self.register_planned(track_ref, track, TrackPlan::Video { plan, opts }),
                        Err(e) => self.state.discard_with_detail(track_ref, e.reason, e.detail),
                    }
                }
                TrackKind::Audio => {
                    audio_n += 1;
                    let opts = self
                        .options
                        .audio
                        .as_ref()
                        .map(|f| f.resolve(&info, audio_n))
                        .unwrap_or_default();
                    if opts.discard {
                        self.state.discard(track_ref, DiscardReason::DiscardedByUser);
                        continue;
                    }
                    match audio_pipeline::plan_audio_track(
                        track.as_ref(),
                        &opts,
                        self.output_format.as_ref(),
                        &probe,
                        self.trim_start,
                        self.options.show_warnings,
                    ) {
                        Ok(plan) => self.register_planned(track_ref, track, TrackPlan::Audio { plan, opts }),
                        Err(e) => self.state.discard_with_detail(track_ref, e.reason, e.detail),
                    }
                }
                TrackKind::Subtitle => {
                    // No subtitle output path is wired into `OutputSink`
                    // (§6 only specifies `add_video_track`/`add_audio_track`);
                    // every subtitle track is therefore unutilizable.
                    let detail = track.subtitle_codec().map(|c| format!("{c:?}"));
                    self.state
                        .discard_with_detail(track_ref, DiscardReason::NoEncodableTargetCodec, detail);
                }
            }
        }

        for discarded in self.state.discarded_tracks() {
            log::debug!(
                "discarding {:?} track {}: {:?}",
                discarded.track_ref.kind,
                discarded.track_ref.index,
                discarded.reason
            );
        }

        self.phase = Phase::Ready;
        Ok(())
    }

    fn register_planned(&mut self, track_ref: TrackRef, source: Box<dyn InputTrack>, plan: TrackPlan) {
        match self.state.try_add_utilized(track_ref) {
            Ok(()) => {
                self.sources.insert(track_ref, source);
                self.planned.push((track_ref, plan));
            }
            Err(CapacityError::TotalExceeded) => {
                self.state.discard(track_ref, DiscardReason::MaxTrackCountReached);
            }
            Err(CapacityError::TypeExceeded) => {
                self.state
                    .discard(track_ref, DiscardReason::MaxTrackCountOfTypeReached);
            }
        }
    }

    fn resolve_tags(&self) -> serde_json::Value {
        let input_tags = self.input.metadata_tags();
        let resolved = match &self.options.tags {
            TagsOption::Passthrough => input_tags.clone(),
            TagsOption::Value(v) => v.clone(),
            TagsOption::Function(f) => f(&input_tags),
        };
        let formats_differ = self.input.mime_type() != self.output_format.mime_type();
        let unchanged = matches!(&self.options.tags, TagsOption::Passthrough) && resolved == input_tags;
        if unchanged && formats_differ {
            serde_json::Value::Null
        } else {
            resolved
        }
    }

    /// Drives the whole execution (§4.7 `execute`): adds tracks to the
    /// output, spawns one thread per utilized track, awaits all of them,
    /// then finalizes (or tears down on cancellation/error).
    pub fn execute(&mut self) -> Result<(), ConversionError> {
        if self.state.is_executed() {
            return Err(ConversionError::ConversionAlreadyExecuted);
        }
        if !self.state.is_valid() {
            return Err(ConversionError::ConversionNotValid {
                reason: self
                    .state
                    .explain_invalid()
                    .unwrap_or_else(|| "conversion is not valid".into()),
            });
        }

        self.state.mark_executed();
        self.phase = Phase::Executing;
        log::info!("starting conversion: {} track(s) planned", self.planned.len());
        self.output.start().map_err(ConversionError::from_backend)?;

        let tags = self.resolve_tags();
        self.output.set_metadata_tags(tags).map_err(ConversionError::from_backend)?;

        let cancel = Arc::clone(&self.cancel);
        let sync = Arc::new(Synchronizer::new());
        let (progress_tx, progress_rx) = crossbeam_channel::unbounded::<(TrackRef, f64)>();

        // §4.7: progress is reported against whichever is shorter — the
        // trimmed span the caller asked for, or what's actually left in the
        // input past `trim_start` (a `trim.end` past EOF doesn't inflate the
        // denominator).
        let total_duration = (self.trim_end - self.trim_start).min(self.input_duration - self.trim_start);
        let mut progress_tracker = self
            .options
            .on_progress
            .is_some()
            .then(|| ProgressTracker::new(total_duration));

        let mut handles = Vec::new();

        for (track_ref, plan) in self.planned.drain(..) {
            let source = self
                .sources
                .remove(&track_ref)
                .expect("every planned track has a registered source");
            let mut output = self.output.clone();
            let cancel = Arc::clone(&cancel);
            let sync = Arc::clone(&sync);
            let tx = progress_tx.clone();
            let trim_start = self.trim_start;
            let trim_end = self.trim_end;

            if let Some(tracker) = progress_tracker.as_mut() {
                tracker.register_track(track_ref);
            }

            match plan {
                TrackPlan::Video { plan, opts } => {
                    let meta = match &plan {
                        VideoPlan::Copy => video_pipeline::output_meta(source.as_ref(), None, false),
                        VideoPlan::Transcode(t) => {
                            video_pipeline::output_meta(source.as_ref(), Some(t), t.needs_rerender)
                        }
                    };
                    let output_track = match &plan {
                        VideoPlan::Copy => output
                            .add_video_track_copy(meta, source.decoder_config())
                            .map_err(ConversionError::from_backend)?,
                        VideoPlan::Transcode(t) => output
                            .add_video_track_encoded(meta, video_pipeline::encoder_config(t))
                            .map_err(ConversionError::from_backend)?,
                    };
                    let encoder_backend = Arc::clone(&self.encoder_backend);

                    handles.push(thread::spawn(move || -> anyhow::Result<()> {
                        let on_progress = move |track_ref: TrackRef, ts: f64| {
                            let _ = tx.send((track_ref, ts));
                        };
                        log::debug!("video track {} starting ({})", track_ref.index, if matches!(plan, VideoPlan::Copy) { "copy" } else { "transcode" });
                        let result = match plan {
                            VideoPlan::Copy => video_pipeline::run_copy_path(
                                track_ref,
                                source,
                                &mut output,
                                output_track,
                                opts.alpha,
                                trim_start,
                                trim_end,
                                &sync,
                                &cancel,
                                on_progress,
                            ),
                            VideoPlan::Transcode(t) => {
                                let probe = CapabilityProbe::new(encoder_backend.as_ref());
                                video_pipeline::run_transcode_path(
                                    track_ref,
                                    source,
                                    &mut output,
                                    output_track,
                                    t,
                                    opts.process.clone(),
                                    trim_start,
                                    trim_end,
                                    &probe,
                                    &sync,
                                    &cancel,
                                    on_progress,
                                )
                            }
                        };
                        if let Err(e) = &result {
                            log::error!("video track {} failed: {e}", track_ref.index);
                        } else {
                            log::debug!("video track {} finished", track_ref.index);
                        }
                        result
                    }));
                }
                TrackPlan::Audio { plan, opts } => {
                    let meta = audio_pipeline::output_meta(source.as_ref());
                    let output_track = match &plan {
                        AudioPlan::Copy => output
                            .add_audio_track_copy(meta, source.decoder_config())
                            .map_err(ConversionError::from_backend)?,
                        AudioPlan::Transcode(t) => output
                            .add_audio_track_encoded(meta, audio_pipeline::encoder_config(t))
                            .map_err(ConversionError::from_backend)?,
                    };

                    let global_end = trim_end;
                    handles.push(thread::spawn(move || -> anyhow::Result<()> {
                        let on_progress = move |track_ref: TrackRef, ts: f64| {
                            let _ = tx.send((track_ref, ts));
                        };
                        log::debug!("audio track {} starting ({})", track_ref.index, if matches!(plan, AudioPlan::Copy) { "copy" } else { "transcode" });
                        let result = match plan {
                            AudioPlan::Copy => audio_pipeline::run_copy_path(
                                track_ref,
                                source,
                                &mut output,
                                output_track,
                                trim_start,
                                trim_end,
                                &sync,
                                &cancel,
                                on_progress,
                            ),
                            AudioPlan::Transcode(t) => audio_pipeline::run_transcode_path(
                                track_ref,
                                source,
                                &mut output,
                                output_track,
                                &t,
                                opts.process.clone(),
                                trim_start,
                                trim_end,
                                global_end,
                                &sync,
                                &cancel,
                                on_progress,
                            ),
                        };
                        if let Err(e) = &result {
                            log::error!("audio track {} failed: {e}", track_ref.index);
                        } else {
                            log::debug!("audio track {} finished", track_ref.index);
                        }
                        result
                    }));
                }
            }
        }

        drop(progress_tx);

        let on_progress_cb = self.options.on_progress.clone();
        for (track_ref, ts) in progress_rx.iter() {
            if let (Some(tracker), Some(cb)) = (progress_tracker.as_mut(), on_progress_cb.as_ref()) {
                if let Some(p) = tracker.update(track_ref, ts) {
                    cb(p);
                }
            }
        }

        let mut first_err: Option<anyhow::Error> = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => first_err.get_or_insert(e),
                Err(_) => first_err.get_or_insert_with(|| anyhow::anyhow!("track thread panicked")),
            };
        }

        if cancel.load(Ordering::SeqCst) {
            log::info!("conversion canceled");
            self.state.mark_canceled();
            self.phase = Phase::Canceled;
            let _ = self.output.cancel();
            return Err(ConversionError::ConversionCanceled);
        }

        if let Some(e) = first_err {
            log::error!("conversion failed: {e}");
            self.phase = Phase::Failed;
            let _ = self.output.cancel();
            return Err(ConversionError::from_backend(e));
        }

        self.output.finalize().map_err(ConversionError::from_backend)?;
        if progress_tracker.is_some() {
            if let Some(cb) = on_progress_cb.as_ref() {
                // Every track has closed; report a final 1.0 regardless of
                // the last per-track min computed along the way.
                cb(1.0);
            }
        }
        self.phase = Phase::Finalized;
        log::info!("conversion finalized");
        Ok(())
    }

    /// Idempotent; a no-op once the conversion is finalizing or finalized
    /// (§4.7). Prefer [`Orchestrator::cancellation_handle`] to cancel a
    /// conversion whose `execute()` is running on another thread.
    pub fn cancel(&mut self) {
        if matches!(self.phase, Phase::Finalized | Phase::Canceled) {
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
        self.state.mark_canceled();
    }
}
