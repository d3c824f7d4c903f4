// crates/mediaconv-core/src/conversion.rs
//
// Conversion state (§3): planning-phase mutable, execution-phase
// append-only except for the cancellation flag. `mediaconv-engine`'s
// orchestrator owns one of these and drives it through planning; this module
// only holds the invariants, not the planning algorithm itself (that lives
// in the engine crate, which has the track/codec knowledge to run it).

use std::collections::HashMap;

use crate::track::{DiscardReason, DiscardedTrack, TrackKind, TrackRef};

/// `{min, max}` bound on how many tracks of a kind (or overall) an output
/// format accepts — mirrors `OutputFormat::get_supported_track_counts` (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountLimits {
    pub min: u32,
    pub max: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackCountLimits {
    pub total: CountLimits,
    pub video: CountLimits,
    pub audio: CountLimits,
    pub subtitle: CountLimits,
}

impl TrackCountLimits {
    fn limits_for(&self, kind: TrackKind) -> CountLimits {
        match kind {
            TrackKind::Video => self.video,
            TrackKind::Audio => self.audio,
            TrackKind::Subtitle => self.subtitle,
        }
    }
}

/// Why planning rejected adding a track beyond an explicit discard reason —
/// used by the planner to choose between `MaxTrackCountReached` and
/// `MaxTrackCountOfTypeReached` (§3 DiscardedTrack).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityError {
    TotalExceeded,
    TypeExceeded,
}

pub struct ConversionState {
    limits: TrackCountLimits,
    added_counts: HashMap<TrackKind, u32>,
    utilized_tracks: Vec<TrackRef>,
    discarded_tracks: Vec<DiscardedTrack>,
    executed: bool,
    canceled: bool,
}

impl ConversionState {
    pub fn new(limits: TrackCountLimits) -> Self {
        ConversionState {
            limits,
            added_counts: HashMap::new(),
            utilized_tracks: Vec::new(),
            discarded_tracks: Vec::new(),
            executed: false,
            canceled: false,
        }
    }

    /// Attempts to record `track` as utilized. Enforces
    /// `added_counts[type] <= max[type]` and `sum(added) <= max.total`
    /// (§3 invariant); on failure returns which bound was hit so the caller
    /// can discard with the matching reason instead.
    pub fn try_add_utilized(&mut self, track: TrackRef) -> Result<(), CapacityError> {
        let type_limit = self.limits.limits_for(track.kind).max;
        let total_limit = self.limits.total.max;

        let current_of_type = *self.added_counts.get(&track.kind).unwrap_or(&0);
        if current_of_type + 1 > type_limit {
            return Err(CapacityError::TypeExceeded);
        }
        let total: u32 = self.added_counts.values().sum();
        if total + 1 > total_limit {
            return Err(CapacityError::TotalExceeded);
        }

        *self.added_counts.entry(track.kind).or_insert(0) += 1;
        self.utilized_tracks.push(track);
        Ok(())
    }

    pub fn discard(&mut self, track: TrackRef, reason: DiscardReason) {
        self.discard_with_detail(track, reason, None);
    }

    /// Like `discard`, but attaches a free-form detail (e.g. the codec name
    /// that made the track unencodable) surfaced later by `explain_invalid`.
    pub fn discard_with_detail(&mut self, track: TrackRef, reason: DiscardReason, detail: Option<String>) {
        self.discarded_tracks.push(DiscardedTrack {
            track_ref: track,
            reason,
            detail,
        });
    }

    pub fn utilized_tracks(&self) -> &[TrackRef] {
        &self.utilized_tracks
    }

    pub fn discarded_tracks(&self) -> &[DiscardedTrack] {
        &self.discarded_tracks
    }

    /// `is_valid ⇔ Σ added ≥ output.min.total ∧ ∀ type: added[type] ≥ output.min[type]`.
    pub fn is_valid(&self) -> bool {
        let total: u32 = self.added_counts.values().sum();
        if total < self.limits.total.min {
            return false;
        }
        for kind in [TrackKind::Video, TrackKind::Audio, TrackKind::Subtitle] {
            let added = *self.added_counts.get(&kind).unwrap_or(&0);
            if added < self.limits.limits_for(kind).min {
                return false;
            }
        }
        true
    }

    /// Human-readable explanation for an invalid plan, surfaced in
    /// `ConversionNotValid` (§7). Names the unencodable codec(s) behind any
    /// `NoEncodableTargetCodec` discard, per §8 scenario 6 ("a message
    /// naming VP9").
    pub fn explain_invalid(&self) -> Option<String> {
        if self.is_valid() {
            return None;
        }
        let total: u32 = self.added_counts.values().sum();
        let base = if total < self.limits.total.min {
            format!(
                "only {} track(s) survive planning, output requires at least {}",
                total, self.limits.total.min
            )
        } else {
            [TrackKind::Video, TrackKind::Audio, TrackKind::Subtitle]
                .into_iter()
                .find_map(|kind| {
                    let added = *self.added_counts.get(&kind).unwrap_or(&0);
                    let min = self.limits.limits_for(kind).min;
                    (added < min).then(|| {
                        format!("only {added} {kind:?} track(s) survive planning, output requires at least {min}")
                    })
                })?
        };

        let unencodable: Vec<&str> = self
            .discarded_tracks
            .iter()
            .filter(|d| d.reason == DiscardReason::NoEncodableTargetCodec)
            .filter_map(|d| d.detail.as_deref())
            .collect();
        if unencodable.is_empty() {
            Some(base)
        } else {
            Some(format!("{base} (no encodable target codec for: {})", unencodable.join(", ")))
        }
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Monotonic false→true; never reverts (§3 invariant).
    pub fn mark_executed(&mut self) {
        self.executed = true;
    }

    /// Monotonic false→true; never reverts (§3 invariant).
    pub fn mark_canceled(&mut self) {
        self.canceled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> TrackCountLimits {
        TrackCountLimits {
            total: CountLimits { min: 1, max: 8 },
            video: CountLimits { min: 0, max: 1 },
            audio: CountLimits { min: 0, max: 4 },
            subtitle: CountLimits { min: 0, max: 8 },
        }
    }

    fn track(kind: TrackKind, index: usize) -> TrackRef {
        TrackRef { kind, index }
    }

    #[test]
    fn rejects_second_video_track_over_type_limit() {
        let mut state = ConversionState::new(limits());
        assert!(state.try_add_utilized(track(TrackKind::Video, 0)).is_ok());
        assert_eq!(
            state.try_add_utilized(track(TrackKind::Video, 1)),
            Err(CapacityError::TypeExceeded)
        );
    }

    #[test]
    fn invalid_until_minimum_met() {
        let mut state = ConversionState::new(limits());
        assert!(!state.is_valid());
        state.try_add_utilized(track(TrackKind::Audio, 0)).unwrap();
        assert!(state.is_valid());
    }

    #[test]
    fn utilized_and_discarded_partition_every_track() {
        let mut state = ConversionState::new(limits());
        state.try_add_utilized(track(TrackKind::Video, 0)).unwrap();
        state.discard(track(TrackKind::Audio, 0), DiscardReason::DiscardedByUser);
        assert_eq!(state.utilized_tracks().len() + state.discarded_tracks().len(), 2);
    }

    #[test]
    fn explain_invalid_names_the_unencodable_codec() {
        let mut state = ConversionState::new(limits());
        state.discard_with_detail(
            track(TrackKind::Video, 0),
            DiscardReason::NoEncodableTargetCodec,
            Some("Vp9".to_string()),
        );
        let msg = state.explain_invalid().unwrap();
        assert!(msg.contains("Vp9"), "expected message to name Vp9, got: {msg}");
    }

    #[test]
    fn executed_and_canceled_are_monotonic() {
        let mut state = ConversionState::new(limits());
        assert!(!state.is_executed());
        state.mark_executed();
        assert!(state.is_executed());
        state.mark_canceled();
        assert!(state.is_canceled());
    }
}
