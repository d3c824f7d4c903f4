// crates/mediaconv-engine/src/ffmpeg/mod.rs
//
// One concrete, `ffmpeg-the-third`-backed implementation of every trait in
// `crate::backend` (§6 "External Interfaces"). Grounded in the teacher's
// `probe.rs` (stream/duration enumeration), `decode.rs` (per-track decode
// loop, scaler setup, the "open a second context to avoid a borrow conflict
// with the packet iterator" idiom) and `encode.rs` (encoder construction,
// packet timebase rescaling, codecpar copy via `avcodec_parameters_from_context`,
// the audio FIFO framing pattern).
//
// This backend is a reference implementation, not the point of the crate:
// the planner, synchronizer, resampler, and orchestrator never depend on it.
// Any type implementing `InputSource`/`OutputSink`/`EncoderBackend`/
// `DecoderBackend` works. Fit/crop transforms in the video rerender path
// use a plain bilinear scale to the target dimensions — a faithful
// `Fit::{Fill,Contain,Cover}` letterbox/crop implementation is out of scope
// for this reference and is noted where it's simplified.

mod capability;
mod codec_map;
mod input;
mod output;

pub use capability::{FfmpegDecoderBackend, FfmpegEncoderBackend};
pub use codec_map::{audio_codec_to_id, video_codec_to_id};
pub use input::FfmpegInput;
pub use output::{FfmpegOutput, FfmpegOutputFormat, OutputContainer};
