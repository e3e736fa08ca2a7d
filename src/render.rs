//! Whole-image CAPTCHA rendering: solution text, styled glyph
//! placement, noise layering and encoding.

use crate::{
    color::{self, Color},
    draw,
    error::Error,
    layout::{self, CharacterPlacement},
    settings::{FontId, Settings},
};
use ab_glyph::Font;
use image::{DynamicImage, RgbImage};
use log::{debug, warn};
use rand::{CryptoRng, Rng};
use std::io::Cursor;

/// Whole-image retries granted to a render whose color search came up
/// empty before the failure is surfaced to the caller.
const MAX_RENDER_ATTEMPTS: u32 = 10;

/// Everything produced by one successful render.
pub(crate) struct Rendered {
    pub solution: String,
    pub bytes: Vec<u8>,
    pub background: Color,
    pub layers_of_noise: u64,
    pub position_corrections: u64,
    pub colors_evaluated: u64,
    pub font_size_total: u64,
}

enum AttemptError {
    /// No compliant color within the draw budget; restart the image.
    ColorSearch,
    Fatal(Error),
}

/// Renders one CAPTCHA. `rng` supplies the visual jitter, `csprng` the
/// solution characters and font picks.
pub(crate) fn render<R, C>(
    settings: &Settings,
    rng: &mut R,
    csprng: &mut C,
) -> Result<Rendered, Error>
where
    R: Rng,
    C: Rng + CryptoRng,
{
    let mut colors_evaluated = 0;
    for attempt in 1..=MAX_RENDER_ATTEMPTS {
        match render_once(settings, rng, csprng, &mut colors_evaluated) {
            Ok(mut rendered) => {
                rendered.colors_evaluated = colors_evaluated;
                debug!(
                    "rendered {}x{} captcha on background {:?} at attempt {}",
                    settings.width(),
                    settings.height(),
                    rendered.background,
                    attempt
                );
                return Ok(rendered);
            }
            Err(AttemptError::ColorSearch) => {
                warn!(
                    "no compliant color after {} draws, restarting image (attempt {})",
                    color::MAX_COLOR_DRAWS,
                    attempt
                );
            }
            Err(AttemptError::Fatal(err)) => return Err(err),
        }
    }
    Err(Error::RenderRetries {
        attempts: MAX_RENDER_ATTEMPTS,
    })
}

fn render_once<R, C>(
    settings: &Settings,
    rng: &mut R,
    csprng: &mut C,
    colors_evaluated: &mut u64,
) -> Result<Rendered, AttemptError>
where
    R: Rng,
    C: Rng + CryptoRng,
{
    let background = Color::random(rng);
    let solution = solution_text(settings, csprng);

    let mut placements = style_characters(
        settings,
        background,
        &solution,
        rng,
        csprng,
        colors_evaluated,
    )
    .ok_or(AttemptError::ColorSearch)?;
    let position_corrections = if settings.overlap_allowed() {
        0
    } else {
        layout::prevent_overlap(&mut placements, settings)
    };
    let font_size_total = placements.iter().map(|p| u64::from(p.px_size)).sum();

    let mut image = RgbImage::from_pixel(settings.width(), settings.height(), background.into());
    for placement in &placements {
        draw_character(&mut image, settings, placement);
    }
    let layers_of_noise = add_noise(&mut image, settings, background, rng, colors_evaluated)
        .ok_or(AttemptError::ColorSearch)?;

    let bytes = encode(&image, settings).map_err(AttemptError::Fatal)?;

    Ok(Rendered {
        solution,
        bytes,
        background,
        layers_of_noise,
        position_corrections,
        colors_evaluated: 0, // totalled across attempts by the caller
        font_size_total,
    })
}

/// The configured fixed text, or `text_length` characters drawn from
/// the character set by the CSPRNG.
pub(crate) fn solution_text<C: Rng + CryptoRng>(settings: &Settings, csprng: &mut C) -> String {
    if !settings.text().is_empty() {
        return settings.text().to_owned();
    }
    let character_set = settings.character_set();
    (0..settings.text_length())
        .map(|_| character_set[csprng.gen_range(0..character_set.len())])
        .collect()
}

/// Picks a font, size, anchor position and fill color for every
/// solution character, left to right. `None` when the color search for
/// some character exhausts its draw budget.
pub(crate) fn style_characters<R, C>(
    settings: &Settings,
    background: Color,
    solution: &str,
    rng: &mut R,
    csprng: &mut C,
    colors_evaluated: &mut u64,
) -> Option<Vec<CharacterPlacement>>
where
    R: Rng,
    C: Rng + CryptoRng,
{
    let characters: Vec<char> = solution.chars().collect();
    let total_anchors = characters.len() as u32 + 1;
    let size_shift = settings.font_size_shift_pct();

    let mut placements = Vec::with_capacity(characters.len());
    let mut previous_x = 0;
    for (index, &ch) in characters.iter().enumerate() {
        let font = FontId(csprng.gen_range(0..settings.fonts().len()));
        let base_px = settings.fonts()[font.0].base_px();
        let px_size = if size_shift > 0 {
            let offset = rng.gen_range(-(size_shift as i64)..=size_shift as i64);
            let shifted = (base_px as f64 + base_px as f64 * offset as f64 / 100.0).round();
            (shifted as u32).max(1)
        } else {
            base_px
        };
        let x = layout::shifted_position(
            rng,
            index as u32 + 1,
            total_anchors,
            settings.width(),
            settings.horizontal_shift_pct(),
            previous_x,
        );
        let y = layout::shifted_position(
            rng,
            1,
            2,
            settings.height(),
            settings.vertical_shift_pct(),
            0,
        );
        let color = color::contrasting_color(
            rng,
            background,
            settings.min_brightness_difference(),
            settings.min_hue_difference(),
            colors_evaluated,
        )?;
        previous_x = x;
        placements.push(CharacterPlacement {
            ch,
            font,
            px_size,
            x,
            y,
            color,
        });
    }
    Some(placements)
}

/// Rasterizes one character with its outline bounds centred on the
/// anchor. Coverage is hard-thresholded so every painted pixel carries
/// the full fill color.
fn draw_character(image: &mut RgbImage, settings: &Settings, placement: &CharacterPlacement) {
    let font = settings.fonts()[placement.font.0].font();
    let glyph = font
        .glyph_id(placement.ch)
        .with_scale(placement.px_size as f32);
    if let Some(outline) = font.outline_glyph(glyph) {
        let bounds = outline.px_bounds();
        let left = i64::from(placement.x) - (f64::from(bounds.width()) / 2.0).round() as i64;
        let top = i64::from(placement.y) - (f64::from(bounds.height()) / 2.0).round() as i64;
        let color = placement.color;
        outline.draw(|gx, gy, coverage| {
            if coverage >= 0.5 {
                draw::plot(image, left + i64::from(gx), top + i64::from(gy), color);
            }
        });
    }
}

/// Layers up to `max_noise` random arcs, lines and point clouds over
/// the image; roughly a quarter of the rolls add nothing. Every noise
/// color clears the same contrast floors as the characters.
fn add_noise<R: Rng>(
    image: &mut RgbImage,
    settings: &Settings,
    background: Color,
    rng: &mut R,
    colors_evaluated: &mut u64,
) -> Option<u64> {
    let width = i64::from(settings.width());
    let height = i64::from(settings.height());
    let pick_color = |rng: &mut R, evaluated: &mut u64| {
        color::contrasting_color(
            rng,
            background,
            settings.min_brightness_difference(),
            settings.min_hue_difference(),
            evaluated,
        )
    };

    let mut layers = 0;
    for _ in 0..settings.max_noise() {
        match rng.gen_range(0..4u32) {
            0 => {
                let color = pick_color(rng, colors_evaluated)?;
                let x0 = rng.gen_range(0..=width);
                let y0 = rng.gen_range(0..=height);
                let x1 = rng.gen_range(x0..=width);
                let y1 = rng.gen_range(y0..=height);
                let start = rng.gen_range(0..360);
                let end = rng.gen_range(0..360);
                draw::arc(image, (x0, y0, x1, y1), start, end, rng.gen_range(1..=4), color);
            }
            1 => {
                let color = pick_color(rng, colors_evaluated)?;
                let from = (rng.gen_range(0..=width), rng.gen_range(0..=height));
                let to = (rng.gen_range(0..=width), rng.gen_range(0..=height));
                draw::line(image, from, to, rng.gen_range(1..=4), color);
            }
            2 => {
                let color = pick_color(rng, colors_evaluated)?;
                let coordinates: Vec<(i64, i64)> = (0..rng.gen_range(0..300))
                    .map(|_| (rng.gen_range(0..=width), rng.gen_range(0..=height)))
                    .collect();
                draw::points(image, &coordinates, color);
            }
            _ => continue,
        }
        layers += 1;
    }
    Some(layers)
}

fn encode(image: &RgbImage, settings: &Settings) -> Result<Vec<u8>, Error> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut bytes, settings.format().image_format())?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
mod render_test {
    use super::*;
    use crate::settings::{Format, DEFAULT_FONTS};
    use rand::rngs::OsRng;

    fn small_settings() -> crate::settings::SettingsBuilder {
        Settings::builder()
            .width(160)
            .height(60)
            .fonts(vec![DEFAULT_FONTS[0]])
            .max_noise(8)
            .pool_size(1)
    }

    fn render_small(builder: crate::settings::SettingsBuilder) -> Rendered {
        let settings = builder.build().unwrap();
        render(&settings, &mut rand::thread_rng(), &mut OsRng).unwrap()
    }

    #[test]
    fn blob_decodes_to_the_configured_dimensions() {
        let rendered = render_small(small_settings());
        assert_eq!(
            image::guess_format(&rendered.bytes).unwrap(),
            image::ImageFormat::Png
        );
        let decoded = image::load_from_memory(&rendered.bytes).unwrap().into_rgb8();
        assert_eq!(decoded.width(), 160);
        assert_eq!(decoded.height(), 60);
    }

    #[test]
    fn every_supported_format_encodes() {
        for format in Format::ALL.iter().copied() {
            // ICO caps out at 256 px per side
            let rendered = render_small(small_settings().format(format));
            assert_eq!(
                image::guess_format(&rendered.bytes).unwrap(),
                format.image_format(),
                "bad magic for {}",
                format
            );
        }
    }

    #[test]
    fn random_solutions_come_from_the_character_set() {
        let settings = small_settings().character_set("2345679").build().unwrap();
        for _ in 0..20 {
            let solution = solution_text(&settings, &mut OsRng);
            assert_eq!(solution.chars().count(), 6);
            assert!(solution.chars().all(|ch| "2345679".contains(ch)));
        }
    }

    #[test]
    fn fixed_text_is_used_verbatim() {
        let rendered = render_small(small_settings().text("mill"));
        assert_eq!(rendered.solution, "mill");
    }

    #[test]
    fn painted_pixels_clear_the_contrast_floors() {
        let rendered = render_small(small_settings().max_noise(12));
        let decoded = image::load_from_memory(&rendered.bytes).unwrap().into_rgb8();
        let background = rendered.background;
        let mut painted = 0u32;
        for pixel in decoded.pixels() {
            let color = Color {
                r: pixel[0],
                g: pixel[1],
                b: pixel[2],
            };
            if color == background {
                continue;
            }
            painted += 1;
            assert!(
                color.brightness_difference(background) >= 65.0,
                "brightness floor violated by {:?} on {:?}",
                color,
                background
            );
            assert!(color.hue_difference(background) >= 250, "hue floor violated");
        }
        assert!(painted > 50, "expected drawn characters, got {} painted px", painted);
    }

    #[test]
    fn tight_layouts_hold_the_placement_invariants() {
        let settings = Settings::builder()
            .width(120)
            .height(45)
            .fonts(vec![DEFAULT_FONTS[0]])
            .text_length(6)
            .pool_size(1)
            .build()
            .unwrap();
        let mut rng = rand::thread_rng();
        let mut evaluated = 0;
        for _ in 0..100 {
            let background = Color::random(&mut rng);
            let solution = solution_text(&settings, &mut OsRng);
            let mut placements = style_characters(
                &settings,
                background,
                &solution,
                &mut rng,
                &mut OsRng,
                &mut evaluated,
            )
            .expect("default floors are satisfiable");
            layout::prevent_overlap(&mut placements, &settings);

            let width = settings.width() as i32;
            let height = settings.height() as i32;
            for pair in placements.windows(2) {
                assert!(pair[0].x < pair[1].x);
                assert!(
                    pair[0].x + pair[0].half_width(&settings)
                        <= pair[1].x - pair[1].half_width(&settings)
                );
            }
            for p in &placements {
                assert!(p.x - p.half_width(&settings) >= 0);
                assert!(p.x + p.half_width(&settings) <= width);
                assert!(p.y - p.half_height(&settings) >= 0);
                assert!(p.y + p.half_height(&settings) <= height);
            }
        }
    }
}
