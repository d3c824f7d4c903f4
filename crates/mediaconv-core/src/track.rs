// crates/mediaconv-core/src/track.rs
//
// Track references and the reasons a source track never makes it into the
// output (§3 DiscardedTrack).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

/// Identifies a source track within the input container — the input's own
/// track index, not an index into `utilized_tracks`/`discarded_tracks`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackRef {
    pub kind: TrackKind,
    pub index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    DiscardedByUser,
    MaxTrackCountReached,
    MaxTrackCountOfTypeReached,
    UnknownSourceCodec,
    UndecodableSourceCodec,
    NoEncodableTargetCodec,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscardedTrack {
    pub track_ref: TrackRef,
    pub reason: DiscardReason,
    /// Free-form elaboration on `reason`, e.g. the codec(s) that turned out
    /// unencodable for `NoEncodableTargetCodec`. `None` for reasons that
    /// don't need one (§7 "a message naming" the rejected codec).
    pub detail: Option<String>,
}

/// What planning a single track failed with: the `DiscardReason` plus an
/// optional elaboration, e.g. which codec(s) were tried and rejected.
/// Returned by `plan_video_track`/`plan_audio_track` instead of a bare
/// `DiscardReason` so the orchestrator can carry the detail into
/// `DiscardedTrack` and ultimately `explain_invalid`'s message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanningError {
    pub reason: DiscardReason,
    pub detail: Option<String>,
}

impl From<DiscardReason> for PlanningError {
    fn from(reason: DiscardReason) -> Self {
        PlanningError { reason, detail: None }
    }
}
