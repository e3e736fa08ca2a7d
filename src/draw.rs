//! Minimal raster helpers for noise strokes.
//!
//! Stroke endpoints may be sampled one pixel past the canvas; every
//! plot is bounds-checked instead of clipped up front.

use crate::color::Color;
use image::RgbImage;

#[inline]
pub(crate) fn plot(image: &mut RgbImage, x: i64, y: i64, color: Color) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color.into());
    }
}

/// Square pen of `width` pixels per axis centred on (x, y).
fn plot_pen(image: &mut RgbImage, x: i64, y: i64, width: u32, color: Color) {
    let lo = -((width as i64 - 1) / 2);
    let hi = width as i64 / 2;
    for dy in lo..=hi {
        for dx in lo..=hi {
            plot(image, x + dx, y + dy, color);
        }
    }
}

pub(crate) fn line(
    image: &mut RgbImage,
    from: (i64, i64),
    to: (i64, i64),
    width: u32,
    color: Color,
) {
    let (x0, y0) = from;
    let (x1, y1) = to;
    let steps = (x1 - x0).abs().max((y1 - y0).abs()).max(1);
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = x0 as f64 + (x1 - x0) as f64 * t;
        let y = y0 as f64 + (y1 - y0) as f64 * t;
        plot_pen(image, x.round() as i64, y.round() as i64, width, color);
    }
}

/// Elliptical arc inscribed in the bounding box `(x0, y0)..(x1, y1)`,
/// swept from `start_deg` to `end_deg` measured clockwise from three
/// o'clock. An end angle behind the start wraps around a full turn.
pub(crate) fn arc(
    image: &mut RgbImage,
    bounds: (i64, i64, i64, i64),
    start_deg: u32,
    end_deg: u32,
    width: u32,
    color: Color,
) {
    let (x0, y0, x1, y1) = bounds;
    let cx = (x0 + x1) as f64 / 2.0;
    let cy = (y0 + y1) as f64 / 2.0;
    let rx = (x1 - x0) as f64 / 2.0;
    let ry = (y1 - y0) as f64 / 2.0;
    let sweep = (f64::from(end_deg) - f64::from(start_deg)).rem_euclid(360.0);
    // one step per pixel of arc length keeps the stroke gap free
    let steps = ((sweep.to_radians() * rx.max(ry)).ceil() as i64).max(1);
    for i in 0..=steps {
        let angle = (f64::from(start_deg) + sweep * i as f64 / steps as f64).to_radians();
        let x = cx + rx * angle.cos();
        let y = cy + ry * angle.sin();
        plot_pen(image, x.round() as i64, y.round() as i64, width, color);
    }
}

pub(crate) fn points(image: &mut RgbImage, coordinates: &[(i64, i64)], color: Color) {
    for &(x, y) in coordinates {
        plot(image, x, y, color);
    }
}

#[cfg(test)]
mod draw_test {
    use super::*;

    const INK: Color = Color { r: 255, g: 0, b: 0 };
    const PAPER: image::Rgb<u8> = image::Rgb([0, 0, 0]);

    fn canvas() -> RgbImage {
        RgbImage::from_pixel(32, 32, PAPER)
    }

    fn inked(image: &RgbImage) -> usize {
        image.pixels().filter(|px| **px != PAPER).count()
    }

    #[test]
    fn out_of_bounds_plots_are_dropped() {
        let mut image = canvas();
        plot(&mut image, -1, 0, INK);
        plot(&mut image, 0, 32, INK);
        plot(&mut image, 40, 40, INK);
        assert_eq!(inked(&image), 0);
    }

    #[test]
    fn line_connects_endpoints() {
        let mut image = canvas();
        line(&mut image, (0, 0), (31, 31), 1, INK);
        assert_eq!(*image.get_pixel(0, 0), image::Rgb::from(INK));
        assert_eq!(*image.get_pixel(31, 31), image::Rgb::from(INK));
        assert_eq!(inked(&image), 32);
    }

    #[test]
    fn wider_strokes_cover_more() {
        let mut thin = canvas();
        let mut thick = canvas();
        line(&mut thin, (0, 16), (31, 16), 1, INK);
        line(&mut thick, (0, 16), (31, 16), 4, INK);
        assert!(inked(&thick) > inked(&thin) * 3);
    }

    #[test]
    fn full_turn_arc_is_closed() {
        let mut image = canvas();
        // end == start sweeps nothing, end behind start wraps
        arc(&mut image, (4, 4, 28, 28), 90, 89, 1, INK);
        let on_circle = inked(&image);
        assert!(on_circle > 40, "expected a near-complete ellipse, got {} px", on_circle);
        assert_eq!(*image.get_pixel(28, 16), image::Rgb::from(INK));
        assert_eq!(*image.get_pixel(4, 16), image::Rgb::from(INK));
    }

    #[test]
    fn points_land_where_asked() {
        let mut image = canvas();
        points(&mut image, &[(1, 1), (2, 3), (31, 31), (64, 64)], INK);
        assert_eq!(inked(&image), 3);
        assert_eq!(*image.get_pixel(2, 3), image::Rgb::from(INK));
    }
}
