// crates/mediaconv-core/src/resampler.rs
//
// Streaming rate conversion + channel mixdown with fixed-size output
// windowing (§4.4). Linear interpolation only — no low-pass filtering, per
// §1's explicit non-goal of high-fidelity anti-aliasing resampling.
//
// Input samples may be arbitrarily segmented (the caller does not need to
// hand over fixed-size chunks); output windows are always a fixed number of
// frames (5 seconds' worth at the target rate) except the final, trailing
// partial window returned by `finalize()`. Writes into the output buffer are
// additive (`+=`) so that two input segments whose fractional source
// positions differ can both contribute to the same output frame without one
// clobbering the other — §4.4 calls this out explicitly as "overlap-add".

use crate::mixer::{self, MixFn};
use crate::options::AudioSample;

/// Output ring buffer window length, in seconds, per §3's resampler state.
const BUFFER_SECONDS: u32 = 5;

pub struct Resampler {
    target_sample_rate: u32,
    target_channels: u32,
    global_start: f64,
    global_end: f64,

    buffer: Vec<f32>,
    buffer_size_frames: i64,
    buffer_start_frame: i64,
    max_written_frame: i64,

    source_sample_rate: Option<u32>,
    source_channels: Option<u32>,
    channel_mixer: Option<MixFn>,
}

impl Resampler {
    /// `global_start`/`global_end` bound the input in output time-base
    /// seconds — typically the trimmed conversion window (§4.7).
    pub fn new(
        target_sample_rate: u32,
        target_channels: u32,
        global_start: f64,
        global_end: f64,
    ) -> Self {
        let buffer_size_frames = (BUFFER_SECONDS as u64 * target_sample_rate as u64) as i64;
        let buffer_len = buffer_size_frames as usize * target_channels as usize;
        Resampler {
            target_sample_rate,
            target_channels,
            global_start,
            global_end,
            buffer: vec![0.0; buffer_len],
            buffer_size_frames,
            buffer_start_frame: 0,
            max_written_frame: -1,
            source_sample_rate: None,
            source_channels: None,
            channel_mixer: None,
        }
    }

    /// Feeds one input sample through the resampler, returning zero or more
    /// fixed-size output windows that became complete as a result (§4.4
    /// steps 1–3). The source sample rate/channel count are recorded from
    /// the first call and never change afterward (§3 invariant).
    pub fn push(&mut self, sample: &AudioSample) -> Vec<AudioSample> {
        let source_rate = *self.source_sample_rate.get_or_insert(sample.sample_rate) as f64;
        let source_channels = *self.source_channels.get_or_insert(sample.channels) as usize;
        let mixer = *self
            .channel_mixer
            .get_or_insert_with(|| mixer::select(source_channels as u32, self.target_channels));

        if source_channels == 0 || sample.data.is_empty() {
            return Vec::new();
        }
        let n_frames = sample.data.len() / source_channels;
        if n_frames == 0 {
            return Vec::new();
        }

        let in_start = sample.timestamp - self.global_start;
        let in_end =
            (in_start + n_frames as f64 / source_rate).min(self.global_end - self.global_start);
        if in_end <= in_start {
            return Vec::new();
        }

        let target_rate = self.target_sample_rate as f64;
        let out_lo = (in_start * target_rate).floor() as i64;
        let out_hi = (in_end * target_rate).ceil() as i64;

        let target_channels = self.target_channels as usize;
        let mut emitted = Vec::new();

        for f in out_lo..out_hi {
            if f < self.buffer_start_frame {
                continue;
            }
            while f >= self.buffer_start_frame + self.buffer_size_frames {
                if let Some(window) = self.finalize_current_buffer() {
                    emitted.push(window);
                }
                self.buffer_start_frame += self.buffer_size_frames;
            }

            let out_t = f as f64 / target_rate;
            let src_pos = (out_t - in_start) * source_rate;
            let lo = src_pos.floor();
            let hi = src_pos.ceil();
            let frac = (src_pos - lo) as f32;
            let lo_idx = lo as i64;
            let hi_idx = hi as i64;

            let f_rel = (f - self.buffer_start_frame) as usize;
            for c in 0..target_channels {
                let lo_val = source_channel_sample(sample.data.as_ref(), source_channels, lo_idx, c, mixer);
                let hi_val = source_channel_sample(sample.data.as_ref(), source_channels, hi_idx, c, mixer);
                let s = lo_val * (1.0 - frac) + hi_val * frac;
                self.buffer[f_rel * target_channels + c] += s;
            }
            self.max_written_frame = self.max_written_frame.max(f_rel as i64);
        }

        emitted
    }

    /// Emits the current output window as an `AudioSample` and zeroes the
    /// buffer, or returns `None` if nothing was ever written into it (§4.4).
    fn finalize_current_buffer(&mut self) -> Option<AudioSample> {
        if self.max_written_frame < 0 {
            return None;
        }
        let target_channels = self.target_channels as usize;
        let frame_count = (self.max_written_frame + 1) as usize;
        let data = self.buffer[..frame_count * target_channels].to_vec();

        self.buffer.iter_mut().for_each(|v| *v = 0.0);
        self.max_written_frame = -1;

        Some(AudioSample {
            timestamp: self.buffer_start_frame as f64 / self.target_sample_rate as f64,
            sample_rate: self.target_sample_rate,
            channels: self.target_channels,
            data: data.into(),
        })
    }

    /// Emits the trailing partial window, if any samples were ever written
    /// to it. Call once, after the last `push`.
    pub fn finalize(&mut self) -> Option<AudioSample> {
        self.finalize_current_buffer()
    }
}

/// One mixed-down target-channel sample at source frame `frame_idx`, or
/// silence for an out-of-range (negative or past-the-end) frame index.
fn source_channel_sample(
    data: &[f32],
    source_channels: usize,
    frame_idx: i64,
    target_channel: usize,
    mixer: MixFn,
) -> f32 {
    if frame_idx < 0 {
        return 0.0;
    }
    let start = frame_idx as usize * source_channels;
    let end = start + source_channels;
    if end > data.len() {
        return 0.0;
    }
    mixer(&data[start..end], target_channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: f64, rate: u32, channels: u32, frames: &[f32]) -> AudioSample {
        AudioSample {
            timestamp: ts,
            sample_rate: rate,
            channels,
            data: frames.to_vec().into(),
        }
    }

    #[test]
    fn identity_resample_reproduces_input_within_epsilon() {
        let mut r = Resampler::new(48_000, 1, 0.0, f64::INFINITY);
        let input: Vec<f32> = (0..48_000).map(|i| (i as f32 * 0.0001).sin()).collect();
        let mut emitted = r.push(&sample(0.0, 48_000, 1, &input));
        if let Some(tail) = r.finalize() {
            emitted.push(tail);
        }
        let out: Vec<f32> = emitted.iter().flat_map(|s| s.data.iter().copied()).collect();
        assert_eq!(out.len(), input.len());
        for (a, b) in input.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn arbitrarily_segmented_input_concatenates_like_one_run() {
        let target_rate = 16_000;
        let mut whole = Resampler::new(target_rate, 1, 0.0, f64::INFINITY);
        let mut split = Resampler::new(target_rate, 1, 0.0, f64::INFINITY);

        let full: Vec<f32> = (0..16_000).map(|i| (i as f32 * 0.0002).cos()).collect();
        let mut whole_out = whole.push(&sample(0.0, 16_000, 1, &full));
        if let Some(t) = whole.finalize() {
            whole_out.push(t);
        }

        let mut split_out = Vec::new();
        let chunk_ts = [(0, 0.0), (6000, 6000.0 / 16_000.0), (11000, 11000.0 / 16_000.0)];
        for (i, &(start, ts)) in chunk_ts.iter().enumerate() {
            let end = chunk_ts.get(i + 1).map(|&(s, _)| s).unwrap_or(full.len());
            split_out.extend(split.push(&sample(ts, 16_000, 1, &full[start..end])));
        }
        if let Some(t) = split.finalize() {
            split_out.push(t);
        }

        let whole_flat: Vec<f32> = whole_out.iter().flat_map(|s| s.data.iter().copied()).collect();
        let split_flat: Vec<f32> = split_out.iter().flat_map(|s| s.data.iter().copied()).collect();
        assert_eq!(whole_flat.len(), split_flat.len());
        for (a, b) in whole_flat.iter().zip(split_flat.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn downmix_stereo_to_mono_averages_channels() {
        let mut r = Resampler::new(8_000, 1, 0.0, f64::INFINITY);
        let interleaved = vec![1.0, -1.0, 1.0, -1.0];
        let mut out = r.push(&sample(0.0, 8_000, 2, &interleaved));
        if let Some(t) = r.finalize() {
            out.push(t);
        }
        let flat: Vec<f32> = out.iter().flat_map(|s| s.data.iter().copied()).collect();
        assert!(flat.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn tail_beyond_one_window_is_emitted_separately() {
        // 6 seconds of audio at a 1-second-per-window test rate forces a
        // mid-stream emission plus a final partial window.
        let target_rate = 10;
        let mut r = Resampler::new(target_rate, 1, 0.0, f64::INFINITY);
        let frames: Vec<f32> = vec![1.0; 6 * target_rate as usize];
        let mut out = r.push(&sample(0.0, target_rate, 1, &frames));
        assert_eq!(out.len(), 1); // one full 5s window emitted mid-push
        if let Some(tail) = r.finalize() {
            out.push(tail);
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].data.len(), 5 * target_rate as usize);
    }
}
