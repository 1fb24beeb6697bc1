//! Paints prepared bitmaps onto the destination surface.
//!
//! Sources arrive already scaled to their layout box; these functions only
//! size the destination, flood it with the background and place the bitmaps
//! at native size. Nothing here keeps state between calls.

use image::{Rgba, RgbaImage, imageops::overlay};

use crate::config::{AspectRatio, SplitType};
use crate::processing::layout::{center_offset, diptych_half_gap, diptych_offsets};

/// Resizes `dest` to the aspect ratio's pixel size and floods it with `fill`.
pub fn prepare_surface(dest: &mut RgbaImage, aspect_ratio: AspectRatio, fill: Rgba<u8>) {
    let (w, h) = aspect_ratio.dimensions();
    if dest.dimensions() == (w, h) {
        for px in dest.pixels_mut() {
            *px = fill;
        }
    } else {
        *dest = RgbaImage::from_pixel(w, h, fill);
    }
}

/// One centred image on a filled frame. A missing source leaves just the fill.
pub fn draw_single(
    dest: &mut RgbaImage,
    src: Option<&RgbaImage>,
    aspect_ratio: AspectRatio,
    fill: Rgba<u8>,
) {
    prepare_surface(dest, aspect_ratio, fill);
    let Some(src) = src else {
        return;
    };
    let (dx, dy) = center_offset(src.width(), src.height(), dest.width(), dest.height());
    overlay(dest, src, dx, dy);
}

/// Two images either side of the centre line, `gap * gap_fraction` pixels away from it.
#[allow(clippy::too_many_arguments)]
pub fn draw_diptych(
    dest: &mut RgbaImage,
    first: Option<&RgbaImage>,
    second: Option<&RgbaImage>,
    aspect_ratio: AspectRatio,
    gap: u32,
    fill: Rgba<u8>,
    split: SplitType,
    gap_fraction: f32,
) {
    prepare_surface(dest, aspect_ratio, fill);
    let half_gap = diptych_half_gap(gap, gap_fraction);
    let offsets = diptych_offsets(
        dest.width(),
        dest.height(),
        first.map(RgbaImage::dimensions),
        second.map(RgbaImage::dimensions),
        half_gap,
        split,
    );
    for (src, offset) in [first, second].into_iter().zip(offsets) {
        if let (Some(src), Some((dx, dy))) = (src, offset) {
            overlay(dest, src, dx, dy);
        }
    }
}
