// crates/mediaconv-engine/src/planner.rs
//
// Pure geometry/rotation helpers shared by the video track pipeline's
// planning phase (§4.5). Kept separate from `video_pipeline.rs` so the
// dimension math — the part most worth unit-testing in isolation — doesn't
// require a backend or an `InputTrack` to exercise, the way
// `velocut-core::helpers::geometry` keeps aspect-ratio math free of any UI
// or media-worker dependency.

use mediaconv_core::options::{Crop, Fit, Rotation};

/// `(source_rotation + opts.rotate) mod 360`, normalized to one of the four
/// supported rotations (§4.5).
pub fn total_rotation(source_rotation: Rotation, opts_rotate: i32) -> Rotation {
    Rotation::from_degrees_mod_360(source_rotation.degrees() as i32 + opts_rotate)
}

/// Coded dimensions after rotation is taken into account — swapped when the
/// rotation is an odd multiple of 90 degrees (§4.5).
pub fn rotated_dimensions(coded_w: u32, coded_h: u32, rotation: Rotation) -> (u32, u32) {
    if rotation.degrees() % 180 == 0 {
        (coded_w, coded_h)
    } else {
        (coded_h, coded_w)
    }
}

/// Dimensions after an optional crop, clamped into `[0, rotated_w] x [0,
/// rotated_h]` (§4.5).
pub fn cropped_dimensions(rotated_w: u32, rotated_h: u32, crop: Option<Crop>) -> (u32, u32) {
    match crop {
        Some(c) => {
            let w = c.width.min(rotated_w.saturating_sub(c.left.min(rotated_w)));
            let h = c.height.min(rotated_h.saturating_sub(c.top.min(rotated_h)));
            (w, h)
        }
        None => (rotated_w, rotated_h),
    }
}

/// Rounds up to the nearest even integer (§4.5 "all target dimensions
/// rounded up to the nearest even integer").
pub fn round_up_even(v: u32) -> u32 {
    if v % 2 == 0 {
        v
    } else {
        v + 1
    }
}

/// Rounds a fractional dimension up to the nearest even integer via
/// `ceil(v/2)*2`, per scenario 4's `height = ceil(642/(1281/721)/2)*2`. Not
/// the same as rounding to the nearest integer and then bumping odd values
/// up by one: e.g. a raw value of `500.3` rounds-to-nearest as `500` (already
/// even, so `round_up_even` leaves it alone), but `ceil(500.3/2)*2 = 502`.
fn ceil_up_even(raw: f64) -> u32 {
    let v = raw.max(1.0);
    ((v / 2.0).ceil() as u32) * 2
}

/// Resolves target output dimensions from `opts.width`/`opts.height` against
/// the post-rotation/crop source dimensions, deriving a missing one from
/// aspect ratio, and rounding both up to even (§4.5).
pub fn target_dimensions(
    source_w: u32,
    source_h: u32,
    opts_width: Option<u32>,
    opts_height: Option<u32>,
) -> (u32, u32) {
    match (opts_width, opts_height) {
        (Some(w), Some(h)) => (round_up_even(w.max(1)), round_up_even(h.max(1))),
        (Some(w), None) => {
            let w = round_up_even(w.max(1));
            let h_raw = (w as f64) * (source_h as f64) / (source_w.max(1) as f64);
            (w, ceil_up_even(h_raw))
        }
        (None, Some(h)) => {
            let h = round_up_even(h.max(1));
            let w_raw = (h as f64) * (source_w as f64) / (source_h.max(1) as f64);
            (ceil_up_even(w_raw), h)
        }
        (None, None) => (round_up_even(source_w.max(1)), round_up_even(source_h.max(1))),
    }
}

/// Whether the video pipeline must rerender (decode, rasterize with
/// geometric transforms, re-encode) rather than feed decoded samples
/// straight through (§4.5 `needs_rerender`).
pub fn needs_rerender(
    target_dims: (u32, u32),
    source_dims: (u32, u32),
    rotation: Rotation,
    rotation_metadata_supported: bool,
    has_process_hook: bool,
    crop: Option<Crop>,
) -> bool {
    target_dims != source_dims
        || (rotation.degrees() != 0 && (!rotation_metadata_supported || has_process_hook))
        || crop.is_some()
}

/// Whether rotation can be delegated to container metadata instead of baked
/// into pixels (§4.5 "whenever possible, rotation is delegated to container
/// rotation metadata").
pub fn rotation_via_metadata(
    output_supports_rotation_metadata: bool,
    allow_rotation_metadata: bool,
) -> bool {
    output_supports_rotation_metadata && allow_rotation_metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_swaps_dims_for_90_and_270() {
        assert_eq!(rotated_dimensions(1920, 1080, Rotation::Deg90), (1080, 1920));
        assert_eq!(rotated_dimensions(1920, 1080, Rotation::Deg270), (1080, 1920));
        assert_eq!(rotated_dimensions(1920, 1080, Rotation::Deg180), (1920, 1080));
    }

    #[test]
    fn target_dims_derive_missing_from_aspect_ratio_and_round_even() {
        // 1281x721 with width=641 requested: width rounds up to 642 first,
        // then height is derived from *that* rounded width (§4.5 scenario 4).
        let (w, h) = target_dimensions(1281, 721, Some(641), None);
        assert_eq!(w, 642);
        // Independent ceil-to-even check, not routed through the function
        // under test: ceil(642*721/1281 / 2) * 2.
        assert_eq!(h, 362);
    }

    #[test]
    fn target_dims_ceil_to_even_not_round_then_bump() {
        // Raw derived height 500.3 rounds-to-nearest as 500, which is
        // already even, so a round-then-bump implementation would wrongly
        // leave it at 500. The spec's ceil-to-even rule requires 502.
        let (w, h) = target_dimensions(10000, 5003, Some(1000), None);
        assert_eq!(w, 1000);
        assert_eq!(h, 502);
    }

    #[test]
    fn neither_dim_given_uses_source_rounded_even() {
        let (w, h) = target_dimensions(641, 480, None, None);
        assert_eq!((w, h), (642, 480));
    }

    #[test]
    fn needs_rerender_true_when_dims_change() {
        assert!(needs_rerender((640, 480), (1920, 1080), Rotation::Deg0, true, false, None));
        assert!(!needs_rerender((1920, 1080), (1920, 1080), Rotation::Deg0, true, false, None));
    }

    #[test]
    fn rotation_forces_rerender_without_metadata_support() {
        assert!(needs_rerender(
            (1920, 1080),
            (1920, 1080),
            Rotation::Deg90,
            false,
            false,
            None
        ));
        assert!(!needs_rerender(
            (1920, 1080),
            (1920, 1080),
            Rotation::Deg90,
            true,
            false,
            None
        ));
    }
}
