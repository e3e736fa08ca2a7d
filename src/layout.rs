//! Character placement: anchor spacing, jitter shifts and the outward
//! anti-overlap correction pass.

use crate::{
    color::Color,
    settings::{FontId, Settings},
};
use ab_glyph::{Font, ScaleFont};
use rand::Rng;

/// One styled glyph scheduled for drawing, anchored at its centre.
#[derive(Clone, Debug)]
pub struct CharacterPlacement {
    pub ch: char,
    pub font: FontId,
    pub px_size: u32,
    /// Horizontal anchor; strictly increasing across a placement set.
    pub x: i32,
    /// Vertical anchor.
    pub y: i32,
    pub color: Color,
}

impl CharacterPlacement {
    /// Distance from the anchor to the left or right drawn edge: half
    /// the scaled advance.
    pub(crate) fn half_width(&self, settings: &Settings) -> i32 {
        let font = settings.fonts()[self.font.0].font();
        let advance = font
            .as_scaled(self.px_size as f32)
            .h_advance(font.glyph_id(self.ch));
        (advance / 2.0).round() as i32
    }

    /// Distance from the anchor to the top or bottom drawn edge: half
    /// the outline bounds height. Zero for glyphs without an outline.
    pub(crate) fn half_height(&self, settings: &Settings) -> i32 {
        let font = settings.fonts()[self.font.0].font();
        let glyph = font.glyph_id(self.ch).with_scale(self.px_size as f32);
        match font.outline_glyph(glyph) {
            Some(outline) => (outline.px_bounds().height() / 2.0).round() as i32,
            None => 0,
        }
    }
}

/// Position for `anchor` of `total_anchors` along an axis of `extent`
/// pixels, jittered by up to `shift_pct` percent of the anchor spacing
/// and clamped strictly past `previous`.
pub(crate) fn shifted_position<R: Rng>(
    rng: &mut R,
    anchor: u32,
    total_anchors: u32,
    extent: u32,
    shift_pct: u32,
    previous: i32,
) -> i32 {
    let spacing = f64::from(extent) / f64::from(total_anchors);
    let center = spacing * f64::from(anchor);
    let mut position = if shift_pct > 0 {
        let offset = rng.gen_range(-(shift_pct as i64)..=shift_pct as i64);
        (center + spacing * offset as f64 / 100.0).round() as i32
    } else {
        center.round() as i32
    };
    if position <= previous {
        position = previous + 1;
    }
    position
}

/// Pushes overlapping neighbours outward from the median glyph, pulls
/// cut-off edge glyphs back inside the image (spending the largest
/// recorded gap), and bounces glyphs off the top and bottom edges.
///
/// Returns the number of corrections applied. When gap sizes tie, the
/// scan order decides which gap is spent; ties near the edges can
/// therefore shift characters asymmetrically.
pub(crate) fn prevent_overlap(placements: &mut [CharacterPlacement], settings: &Settings) -> u64 {
    let len = placements.len();
    if len == 0 {
        return 0;
    }
    let mut corrections = 0u64;
    let width = settings.width() as i32;
    let height = settings.height() as i32;
    let half_w: Vec<i32> = placements.iter().map(|p| p.half_width(settings)).collect();
    let half_h: Vec<i32> = placements.iter().map(|p| p.half_height(settings)).collect();

    let median = len / 2;
    let mut largest_gap = 0;
    let mut gap_index = median;
    for index in (1..=median).rev() {
        let left_edge = placements[index].x - half_w[index];
        let neighbor_right = placements[index - 1].x + half_w[index - 1];
        if neighbor_right > left_edge {
            corrections += 1;
            placements[index - 1].x -= neighbor_right - left_edge;
        } else {
            let gap = left_edge - neighbor_right;
            if gap >= largest_gap {
                largest_gap = gap;
                gap_index = index - 1;
            }
        }
    }
    for index in median..len.saturating_sub(1) {
        let right_edge = placements[index].x + half_w[index];
        let neighbor_left = placements[index + 1].x - half_w[index + 1];
        if neighbor_left < right_edge {
            corrections += 1;
            placements[index + 1].x += right_edge - neighbor_left;
        } else {
            let gap = neighbor_left - right_edge;
            if gap >= largest_gap {
                largest_gap = gap;
                gap_index = index;
            }
        }
    }

    // a cut-off first character drags everything up to the largest gap
    // right by exactly the overflow; the mirror applies to the last
    let left_edge = placements[0].x - half_w[0];
    if left_edge < 0 {
        for placement in &mut placements[..=gap_index] {
            corrections += 1;
            placement.x -= left_edge;
        }
    }
    let right_edge = placements[len - 1].x + half_w[len - 1];
    if right_edge > width {
        for placement in placements[gap_index + 1..].iter_mut().rev() {
            corrections += 1;
            placement.x -= right_edge - width;
        }
    }

    for (index, placement) in placements.iter_mut().enumerate() {
        let top = placement.y - half_h[index];
        if top < 0 {
            corrections += 1;
            placement.y -= top;
        }
        let bottom = placement.y + half_h[index];
        if bottom > height {
            corrections += 1;
            placement.y -= bottom - height;
        }
    }

    corrections
}
