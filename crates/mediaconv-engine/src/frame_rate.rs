// crates/mediaconv-engine/src/frame_rate.rs
//
// Frame-rate enforcement for the video transcode path (§4.5): align each
// sample's timestamp to the target rate's frame grid, drop samples that
// land on or before the last aligned timestamp, and pad by repeating the
// previous sample across any skipped frames so the output never has gaps.

use mediaconv_core::options::VideoSample;

/// One aligned output instant: either a sample straight from the source
/// (possibly re-timestamped) or a padding repeat of the previous sample.
pub struct Aligned {
    pub sample: VideoSample,
    pub is_padding: bool,
}

pub struct FrameRateAligner {
    rate: f64,
    last_aligned_ts: Option<f64>,
    last_sample: Option<VideoSample>,
}

impl FrameRateAligner {
    pub fn new(rate: f64) -> Self {
        FrameRateAligner {
            rate,
            last_aligned_ts: None,
            last_sample: None,
        }
    }

    fn align(&self, ts: f64) -> f64 {
        (ts * self.rate).floor() / self.rate
    }

    /// Feeds one post-transform sample through the aligner. Returns the
    /// (possibly several, for padding) aligned samples to forward to the
    /// encoder — empty if this sample is dropped as a duplicate frame.
    pub fn push(&mut self, sample: VideoSample) -> Vec<Aligned> {
        let aligned_ts = self.align(sample.timestamp);
        let duration = 1.0 / self.rate;

        let mut out = Vec::new();

        if let Some(last_ts) = self.last_aligned_ts {
            if aligned_ts <= last_ts {
                // Duplicate/out-of-order frame at this rate: drop.
                return out;
            }
            let frame_step = ((aligned_ts - last_ts) * self.rate).round() as i64;
            if frame_step > 1 {
                // Pad with repeats of the previous sample at each
                // intermediate aligned timestamp.
                if let Some(prev) = self.last_sample.clone() {
                    for k in 1..frame_step {
                        let pad_ts = last_ts + k as f64 / self.rate;
                        out.push(Aligned {
                            sample: VideoSample {
                                timestamp: pad_ts,
                                duration,
                                ..prev.clone()
                            },
                            is_padding: true,
                        });
                    }
                }
            }
        }

        self.last_aligned_ts = Some(aligned_ts);
        let emitted = VideoSample {
            timestamp: aligned_ts,
            duration,
            ..sample.clone()
        };
        self.last_sample = Some(emitted.clone());
        out.push(Aligned {
            sample: emitted,
            is_padding: false,
        });
        out
    }

    /// Pads out to `floor(last_end_ts * r) / r` after the final sample
    /// (§4.5, §9 — `floor` semantics kept for compatibility even though
    /// `ceil` would better preserve total duration; this is an explicit
    /// open question resolved in favor of the original behavior).
    pub fn finalize(&mut self, last_end_ts: f64) -> Vec<Aligned> {
        let target_ts = (last_end_ts * self.rate).floor() / self.rate;
        let duration = 1.0 / self.rate;
        let mut out = Vec::new();
        let Some(prev) = self.last_sample.clone() else {
            return out;
        };
        let Some(last_ts) = self.last_aligned_ts else {
            return out;
        };
        let mut ts = last_ts + duration;
        while ts <= target_ts + 1e-9 {
            out.push(Aligned {
                sample: VideoSample {
                    timestamp: ts,
                    duration,
                    ..prev.clone()
                },
                is_padding: true,
            });
            ts += duration;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(ts: f64) -> VideoSample {
        VideoSample {
            timestamp: ts,
            duration: 0.0,
            width: 4,
            height: 4,
            data: Arc::from(vec![0u8; 16]),
        }
    }

    #[test]
    fn drops_frames_that_align_to_same_slot() {
        let mut a = FrameRateAligner::new(30.0);
        let first = a.push(sample(0.0));
        assert_eq!(first.len(), 1);
        let second = a.push(sample(0.01)); // same 1/30s slot as 0.0
        assert!(second.is_empty());
    }

    #[test]
    fn pads_skipped_frames_by_repeating_previous() {
        let mut a = FrameRateAligner::new(10.0); // 0.1s per frame
        a.push(sample(0.0));
        let jumped = a.push(sample(0.35)); // 3 slots ahead -> 2 pad + 1 real
        assert_eq!(jumped.len(), 3);
        assert!(jumped[0].is_padding);
        assert!(jumped[1].is_padding);
        assert!(!jumped[2].is_padding);
    }

    #[test]
    fn finalize_pads_to_floor_of_end_timestamp() {
        let mut a = FrameRateAligner::new(10.0);
        a.push(sample(0.0));
        let tail = a.finalize(0.25);
        // floor(0.25*10)/10 = 0.2 -> one pad frame at 0.1.
        assert_eq!(tail.len(), 1);
        assert!((tail[0].sample.timestamp - 0.1).abs() < 1e-9);
    }
}
