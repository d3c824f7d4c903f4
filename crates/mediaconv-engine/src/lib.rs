// crates/mediaconv-engine/src/lib.rs
//
// Per-track conversion pipelines, capability probing, and orchestration
// (§4.2–§4.7), plus an ffmpeg-the-third reference implementation of the
// external collaborator traits (§6). Depends on `mediaconv-core` for
// planning primitives, the resampler, the synchronizer, and the options/
// error/track types; nothing here is required by `mediaconv-core`.
//
// A consumer wires up `Orchestrator::new` with its own `InputSource`/
// `OutputSink`/`EncoderBackend`, or with the `ffmpeg` module's concrete
// implementations when an actual media file is involved.

pub mod audio_pipeline;
pub mod backend;
pub mod capability;
pub mod ffmpeg;
pub mod frame_rate;
pub mod iso639;
pub mod orchestrator;
pub mod planner;
pub mod video_pipeline;

pub use orchestrator::{CancellationHandle, Orchestrator};
