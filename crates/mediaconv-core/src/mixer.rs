// crates/mediaconv-core/src/mixer.rs
//
// Channel mixdown table (§6, GLOSSARY "channel-mixer") — the standard
// Web Audio up/downmix rules for the four discrete speaker layouts this
// pipeline cares about: mono (1), stereo (2), quad FL/FR/SL/SR (4), and
// 5.1 L/R/C/LFE/SL/SR (6). Any other (source, target) pair falls back to
// discrete passthrough: target channel `i` takes source channel `i` if it
// exists, else silence.
//
// Each entry is a plain `fn(&[f32], usize) -> f32` over one source frame's
// samples — cheap enough to select once per resampler setup and call once
// per output sample, matching §4.4's "channel_mixer (selected function
// table entry)".

const SQRT_HALF: f32 = std::f32::consts::FRAC_1_SQRT_2;

pub type MixFn = fn(&[f32], usize) -> f32;

/// Source channel `i`, or silence if the frame is shorter than `i + 1`.
fn ch(frame: &[f32], i: usize) -> f32 {
    frame.get(i).copied().unwrap_or(0.0)
}

fn discrete_passthrough(frame: &[f32], target: usize) -> f32 {
    ch(frame, target)
}

// ── mono (1) ──────────────────────────────────────────────────────────────

fn mono_to_stereo(frame: &[f32], _target: usize) -> f32 {
    ch(frame, 0)
}

fn mono_to_quad(frame: &[f32], target: usize) -> f32 {
    // FL, FR <- M; SL, SR <- 0
    if target < 2 {
        ch(frame, 0)
    } else {
        0.0
    }
}

fn mono_to_surround(frame: &[f32], target: usize) -> f32 {
    // L, R, LFE, SL, SR <- 0; C <- M
    if target == 2 {
        ch(frame, 0)
    } else {
        0.0
    }
}

// ── stereo (2) ────────────────────────────────────────────────────────────

fn stereo_to_mono(frame: &[f32], _target: usize) -> f32 {
    0.5 * (ch(frame, 0) + ch(frame, 1))
}

fn stereo_to_quad(frame: &[f32], target: usize) -> f32 {
    // FL <- L, FR <- R, SL/SR <- 0
    match target {
        0 => ch(frame, 0),
        1 => ch(frame, 1),
        _ => 0.0,
    }
}

fn stereo_to_surround(frame: &[f32], target: usize) -> f32 {
    // L <- L, R <- R, C/LFE/SL/SR <- 0
    match target {
        0 => ch(frame, 0),
        1 => ch(frame, 1),
        _ => 0.0,
    }
}

// ── quad (4): FL, FR, SL, SR ────────────────────────────────────────────────

fn quad_to_mono(frame: &[f32], _target: usize) -> f32 {
    0.25 * (ch(frame, 0) + ch(frame, 1) + ch(frame, 2) + ch(frame, 3))
}

fn quad_to_stereo(frame: &[f32], target: usize) -> f32 {
    // L <- 0.5*(FL+SL), R <- 0.5*(FR+SR)
    match target {
        0 => 0.5 * (ch(frame, 0) + ch(frame, 2)),
        1 => 0.5 * (ch(frame, 1) + ch(frame, 3)),
        _ => 0.0,
    }
}

fn quad_to_surround(frame: &[f32], target: usize) -> f32 {
    // L <- FL, R <- FR, SL <- SL, SR <- SR; C/LFE <- 0
    match target {
        0 => ch(frame, 0),
        1 => ch(frame, 1),
        4 => ch(frame, 2),
        5 => ch(frame, 3),
        _ => 0.0,
    }
}

// ── surround (6): L, R, C, LFE, SL, SR ──────────────────────────────────────

fn surround_to_mono(frame: &[f32], _target: usize) -> f32 {
    SQRT_HALF * (ch(frame, 0) + ch(frame, 1)) + ch(frame, 2) + 0.5 * (ch(frame, 4) + ch(frame, 5))
}

fn surround_to_stereo(frame: &[f32], target: usize) -> f32 {
    // L' = L + sqrt(1/2)*(C + SL), R' = R + sqrt(1/2)*(C + SR)
    match target {
        0 => ch(frame, 0) + SQRT_HALF * (ch(frame, 2) + ch(frame, 4)),
        1 => ch(frame, 1) + SQRT_HALF * (ch(frame, 2) + ch(frame, 5)),
        _ => 0.0,
    }
}

fn surround_to_quad(frame: &[f32], target: usize) -> f32 {
    // FL <- L + sqrt(1/2)*C, FR <- R + sqrt(1/2)*C, SL <- SL, SR <- SR
    match target {
        0 => ch(frame, 0) + SQRT_HALF * ch(frame, 2),
        1 => ch(frame, 1) + SQRT_HALF * ch(frame, 2),
        2 => ch(frame, 4),
        3 => ch(frame, 5),
        _ => 0.0,
    }
}

/// Selects the mix function for `(source_channels, target_channels)`, per
/// the standard Web Audio layouts for 1/2/4/6-channel combinations with
/// discrete passthrough elsewhere.
pub fn select(source_channels: u32, target_channels: u32) -> MixFn {
    match (source_channels, target_channels) {
        (1, 2) => mono_to_stereo,
        (1, 4) => mono_to_quad,
        (1, 6) => mono_to_surround,
        (2, 1) => stereo_to_mono,
        (2, 4) => stereo_to_quad,
        (2, 6) => stereo_to_surround,
        (4, 1) => quad_to_mono,
        (4, 2) => quad_to_stereo,
        (4, 6) => quad_to_surround,
        (6, 1) => surround_to_mono,
        (6, 2) => surround_to_stereo,
        (6, 4) => surround_to_quad,
        _ => discrete_passthrough,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_upmixes_identically_to_both_stereo_channels() {
        let f = mixer_select_and_run(1, 2, &[0.5], 0);
        let g = mixer_select_and_run(1, 2, &[0.5], 1);
        assert_eq!(f, 0.5);
        assert_eq!(g, 0.5);
    }

    #[test]
    fn stereo_downmixes_to_average() {
        let out = mixer_select_and_run(2, 1, &[1.0, 0.0], 0);
        assert_eq!(out, 0.5);
    }

    #[test]
    fn surround_to_stereo_matches_standard_formula() {
        // L=0.2 R=0.3 C=0.4 LFE=0.9(ignored) SL=0.1 SR=0.1
        let frame = [0.2, 0.3, 0.4, 0.9, 0.1, 0.1];
        let l = mixer_select_and_run(6, 2, &frame, 0);
        let r = mixer_select_and_run(6, 2, &frame, 1);
        let expected_l = 0.2 + SQRT_HALF * (0.4 + 0.1);
        let expected_r = 0.3 + SQRT_HALF * (0.4 + 0.1);
        assert!((l - expected_l).abs() < 1e-6);
        assert!((r - expected_r).abs() < 1e-6);
    }

    #[test]
    fn unlisted_combination_falls_back_to_discrete_passthrough() {
        let frame = [1.0, 2.0, 3.0];
        assert_eq!(mixer_select_and_run(3, 3, &frame, 2), 3.0);
        assert_eq!(mixer_select_and_run(3, 5, &frame, 4), 0.0);
    }

    fn mixer_select_and_run(src: u32, dst: u32, frame: &[f32], target: usize) -> f32 {
        select(src, dst)(frame, target)
    }
}
