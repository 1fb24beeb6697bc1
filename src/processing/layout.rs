use crate::config::{AspectRatio, SplitType};

/// Largest area an image may occupy after the layout resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub max_width: u32,
    pub max_height: u32,
}

impl BoundingBox {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width: max_width.max(1),
            max_height: max_height.max(1),
        }
    }

    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }
}

/// Box available to each image for the given layout.
///
/// A single image keeps `border` pixels clear on every side. A diptych keeps
/// `border` around the outside and splits what is left in two along `split`.
pub fn bounding_box(
    aspect_ratio: AspectRatio,
    border: u32,
    split: SplitType,
    diptych: bool,
) -> BoundingBox {
    let (w, h) = aspect_ratio.dimensions();
    if !diptych {
        return BoundingBox::new(
            w.saturating_sub(border.saturating_mul(2)),
            h.saturating_sub(border.saturating_mul(2)),
        );
    }
    match split {
        SplitType::Horizontal => BoundingBox::new(w.saturating_sub(border) / 2, h.saturating_sub(border)),
        SplitType::Vertical => BoundingBox::new(w.saturating_sub(border), h.saturating_sub(border) / 2),
    }
}

/// EXIF orientations whose stored pixels are transposed relative to the upright image.
pub fn is_quarter_turn(orientation: u16) -> bool {
    matches!(orientation, 5..=8)
}

/// Target size for scaling a `src_w`×`src_h` image so that, once its EXIF
/// orientation is applied, it fills `max_w`×`max_h` as much as possible.
///
/// The returned size is in stored (pre-rotation) pixel space. Enlargement only
/// happens when `allow_upscale` is set, and each side is at least one pixel.
pub fn fit_dimensions(
    src_w: u32,
    src_h: u32,
    orientation: u16,
    max_w: u32,
    max_h: u32,
    allow_upscale: bool,
) -> (u32, u32) {
    let (eff_w, eff_h) = if is_quarter_turn(orientation) {
        (src_h, src_w)
    } else {
        (src_w, src_h)
    };
    let mut scale = (max_w as f64 / eff_w.max(1) as f64).min(max_h as f64 / eff_h.max(1) as f64);
    if !scale.is_finite() {
        scale = 1.0;
    }
    if scale > 1.0 && !allow_upscale {
        scale = 1.0;
    }
    let w = (src_w as f64 * scale).round().max(1.0);
    let h = (src_h as f64 * scale).round().max(1.0);
    (w as u32, h as u32)
}

/// Top-left corner that centres an `inner` rectangle inside `outer`.
///
/// Odd remainders are floored; an inner rectangle larger than `outer` gets a
/// negative offset.
pub fn center_offset(inner_w: u32, inner_h: u32, outer_w: u32, outer_h: u32) -> (i64, i64) {
    let ox = (outer_w as i64 - inner_w as i64).div_euclid(2);
    let oy = (outer_h as i64 - inner_h as i64).div_euclid(2);
    (ox, oy)
}

/// Pixels between the centre line and each half of a diptych.
pub fn diptych_half_gap(gap: u32, gap_fraction: f32) -> i64 {
    (gap as f64 * gap_fraction as f64).round() as i64
}

/// Top-left corners for the two halves of a diptych on an `outer_w`×`outer_h` canvas.
///
/// With a horizontal split the first image ends `half_gap` pixels left of the
/// vertical centre line and the second starts `half_gap` pixels right of it;
/// each is centred vertically. A vertical split swaps the axes.
pub fn diptych_offsets(
    outer_w: u32,
    outer_h: u32,
    first: Option<(u32, u32)>,
    second: Option<(u32, u32)>,
    half_gap: i64,
    split: SplitType,
) -> [Option<(i64, i64)>; 2] {
    let cx = outer_w as i64 / 2;
    let cy = outer_h as i64 / 2;
    match split {
        SplitType::Horizontal => [
            first.map(|(w, h)| (cx - half_gap - w as i64, center_offset(w, h, outer_w, outer_h).1)),
            second.map(|(w, h)| (cx + half_gap, center_offset(w, h, outer_w, outer_h).1)),
        ],
        SplitType::Vertical => [
            first.map(|(w, h)| (center_offset(w, h, outer_w, outer_h).0, cy - half_gap - h as i64)),
            second.map(|(w, h)| (center_offset(w, h, outer_w, outer_h).0, cy + half_gap)),
        ],
    }
}
