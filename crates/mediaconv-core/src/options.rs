// crates/mediaconv-core/src/options.rs
//
// ConversionOptions and the per-track option bundles (§6). Track-producing
// options ("video", "audio") are represented uniformly as a function from
// (track info, 1-based index) to an options value — a value-form option is
// wrapped in a closure that ignores its arguments, per the design notes'
// resolution of "options-as-function vs options-as-value".

use crate::codecs::{AudioCodec, VideoCodec};
use crate::quality::Quality;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bitrate expressed either as an exact bits/s value or as a `Quality`
/// level to be resolved against the chosen codec and dimensions.
#[derive(Clone, Copy, Debug)]
pub enum Bitrate {
    Exact(u64),
    Quality(Quality),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fit {
    Fill,
    Contain,
    Cover,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Normalize an arbitrary signed degree sum into one of the four
    /// supported rotations, per §4.5's `total_rotation = (source + opts)
    /// mod 360`.
    pub fn from_degrees_mod_360(deg: i32) -> Rotation {
        let normalized = deg.rem_euclid(360);
        match normalized {
            0 => Rotation::Deg0,
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            // Source rotation metadata and opts.rotate are both constrained
            // to multiples of 90 by construction; anything else rounds down
            // to the nearest supported step rather than panicking.
            other => match other / 90 {
                0 => Rotation::Deg0,
                1 => Rotation::Deg90,
                2 => Rotation::Deg180,
                _ => Rotation::Deg270,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlphaHandling {
    Discard,
    Keep,
}

impl Default for AlphaHandling {
    fn default() -> Self {
        AlphaHandling::Discard
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareAcceleration {
    NoPreference,
    PreferHardware,
    PreferSoftware,
}

impl Default for HardwareAcceleration {
    fn default() -> Self {
        HardwareAcceleration::NoPreference
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Crop {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Minimal, backend-agnostic facts about a source track, passed into
/// function-form options so callers can vary behavior per track without
/// `mediaconv-core` depending on any concrete container backend.
#[derive(Clone, Debug)]
pub struct TrackInfo {
    pub coded_width: u32,
    pub coded_height: u32,
    pub source_rotation: Rotation,
    pub language_code: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone, Default, Debug)]
pub struct VideoTrackOptions {
    pub discard: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Option<Fit>,
    pub rotate: i32,
    pub allow_rotation_metadata: bool_default_true::BoolDefaultTrue,
    pub crop: Option<Crop>,
    pub frame_rate: Option<f64>,
    pub codec: Option<VideoCodec>,
    pub bitrate: Option<Bitrate>,
    pub alpha: AlphaHandling,
    pub key_frame_interval: Option<u32>,
    pub hardware_acceleration: HardwareAcceleration,
    pub force_transcode: bool,
    pub process: Option<Arc<dyn Fn(ProcessInput) -> ProcessedFrame + Send + Sync>>,
    pub processed_width: Option<u32>,
    pub processed_height: Option<u32>,
}

#[derive(Clone, Default, Debug)]
pub struct AudioTrackOptions {
    pub discard: bool,
    pub number_of_channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub codec: Option<AudioCodec>,
    pub bitrate: Option<Bitrate>,
    pub force_transcode: bool,
    pub process: Option<Arc<dyn Fn(AudioSample) -> AudioProcessResult + Send + Sync>>,
    pub processed_number_of_channels: Option<u32>,
    pub processed_sample_rate: Option<u32>,
}

/// Input handed to `video.process`: either a decoded/transformed video
/// sample or, when the pipeline rerenders, a rasterized canvas frame.
/// Non-timestamped returns from the hook inherit this sample's timestamp
/// and duration (§4.5).
#[derive(Clone, Debug)]
pub struct VideoSample {
    pub timestamp: f64,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

pub type ProcessInput = VideoSample;

/// Tagged variant resolving the "process returns one sample, many, or
/// nothing" ambiguity from the design notes.
#[derive(Clone, Debug, Default)]
pub enum ProcessedFrame {
    #[default]
    None,
    One(VideoSample),
    Many(Vec<VideoSample>),
}

#[derive(Clone, Debug)]
pub struct AudioSample {
    pub timestamp: f64,
    pub sample_rate: u32,
    pub channels: u32,
    /// Interleaved f32 samples.
    pub data: Arc<[f32]>,
}

/// `audio.process` must return only audio samples (§4.6) — modeled as a
/// `Result` rather than a variant so a misbehaving hook is a structured
/// error, not a silently-dropped frame.
#[derive(Clone, Debug, Default)]
pub enum AudioProcessResult {
    #[default]
    None,
    One(AudioSample),
    Many(Vec<AudioSample>),
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Trim {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// Per-(kind, 1-based index) option resolver. A value-form option is
/// `TrackOptionsFn::value(opts)`, which ignores its arguments.
#[derive(Clone)]
pub struct TrackOptionsFn<T>(Arc<dyn Fn(&TrackInfo, usize) -> T + Send + Sync>);

impl<T: Clone + Send + Sync + 'static> TrackOptionsFn<T> {
    pub fn value(opts: T) -> Self {
        TrackOptionsFn(Arc::new(move |_track, _n| opts.clone()))
    }

    pub fn function(f: impl Fn(&TrackInfo, usize) -> T + Send + Sync + 'static) -> Self {
        TrackOptionsFn(Arc::new(f))
    }

    pub fn resolve(&self, track: &TrackInfo, n: usize) -> T {
        (self.0)(track, n)
    }
}

/// Metadata tag resolution: user function, user-provided object, or passthrough.
#[derive(Clone)]
pub enum TagsOption {
    Passthrough,
    Value(serde_json::Value),
    Function(Arc<dyn Fn(&serde_json::Value) -> serde_json::Value + Send + Sync>),
}

impl Default for TagsOption {
    fn default() -> Self {
        TagsOption::Passthrough
    }
}

pub struct ConversionOptions {
    pub video: Option<TrackOptionsFn<VideoTrackOptions>>,
    pub audio: Option<TrackOptionsFn<AudioTrackOptions>>,
    pub trim: Trim,
    pub tags: TagsOption,
    pub show_warnings: bool,
    pub on_progress: Option<Arc<dyn Fn(f64) + Send + Sync>>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions {
            video: None,
            audio: None,
            trim: Trim::default(),
            tags: TagsOption::default(),
            show_warnings: true,
            on_progress: None,
        }
    }
}

/// `bool` whose `Default` is `true`, used for `allow_rotation_metadata`
/// (§6: `allow_rotation_metadata = true` by default) without hand-rolling
/// `#[serde(default = "...")]` boilerplate at every call site.
pub mod bool_default_true {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BoolDefaultTrue(pub bool);

    impl Default for BoolDefaultTrue {
        fn default() -> Self {
            BoolDefaultTrue(true)
        }
    }

    impl From<BoolDefaultTrue> for bool {
        fn from(b: BoolDefaultTrue) -> bool {
            b.0
        }
    }

    impl From<bool> for BoolDefaultTrue {
        fn from(b: bool) -> BoolDefaultTrue {
            BoolDefaultTrue(b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_form_ignores_track_and_index() {
        let opts = TrackOptionsFn::value(42u32);
        let track = TrackInfo {
            coded_width: 100,
            coded_height: 100,
            source_rotation: Rotation::Deg0,
            language_code: None,
            name: None,
        };
        assert_eq!(opts.resolve(&track, 1), 42);
        assert_eq!(opts.resolve(&track, 7), 42);
    }

    #[test]
    fn function_form_sees_index() {
        let opts = TrackOptionsFn::function(|_track, n| n as u32 * 10);
        let track = TrackInfo {
            coded_width: 100,
            coded_height: 100,
            source_rotation: Rotation::Deg0,
            language_code: None,
            name: None,
        };
        assert_eq!(opts.resolve(&track, 2), 20);
    }

    #[test]
    fn rotation_normalizes_modulo_360() {
        assert_eq!(Rotation::from_degrees_mod_360(450), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees_mod_360(-90), Rotation::Deg270);
    }
}
