use rand::Rng;

/// A 24-bit RGB fill color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Color draws evaluated before a contrast search gives up on the
/// current image.
pub(crate) const MAX_COLOR_DRAWS: u64 = 10_000;

impl Color {
    /// Uniformly sampled 24-bit color.
    #[inline]
    pub(crate) fn random<R: Rng>(rng: &mut R) -> Self {
        Color {
            r: rng.gen(),
            g: rng.gen(),
            b: rng.gen(),
        }
    }

    /// Perceived brightness `(299 R + 587 G + 114 B) / 1000`, in `0.0..=255.0`.
    #[inline]
    pub fn brightness(self) -> f32 {
        (299 * u32::from(self.r) + 587 * u32::from(self.g) + 114 * u32::from(self.b)) as f32
            / 1000.0
    }

    /// Absolute difference in perceived brightness.
    #[inline]
    pub fn brightness_difference(self, other: Color) -> f32 {
        (self.brightness() - other.brightness()).abs()
    }

    /// Channel-wise manhattan distance `|ΔR| + |ΔG| + |ΔB|`, in `0..=765`.
    #[inline]
    pub fn hue_difference(self, other: Color) -> u32 {
        let d = |a: u8, b: u8| u32::from(a.max(b)) - u32::from(a.min(b));
        d(self.r, other.r) + d(self.g, other.g) + d(self.b, other.b)
    }

    /// Whether `self` clears both contrast floors against `background`.
    #[inline]
    pub fn contrasts_with(self, background: Color, min_brightness: u32, min_hue: u32) -> bool {
        self.brightness_difference(background) >= min_brightness as f32
            && self.hue_difference(background) >= min_hue
    }
}

impl From<Color> for image::Rgb<u8> {
    fn from(color: Color) -> Self {
        image::Rgb([color.r, color.g, color.b])
    }
}

/// Rejection-samples a color clearing both contrast floors against
/// `background`, counting draws into `evaluated`.
///
/// `None` after [`MAX_COLOR_DRAWS`] rejections; the caller is expected
/// to restart the whole image rather than treat this as fatal.
pub(crate) fn contrasting_color<R: Rng>(
    rng: &mut R,
    background: Color,
    min_brightness: u32,
    min_hue: u32,
    evaluated: &mut u64,
) -> Option<Color> {
    for _ in 0..MAX_COLOR_DRAWS {
        *evaluated += 1;
        let proposed = Color::random(rng);
        if proposed.contrasts_with(background, min_brightness, min_hue) {
            return Some(proposed);
        }
    }
    None
}

#[cfg(test)]
mod color_test {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn brightness_extremes() {
        assert_relative_eq!(Color { r: 0, g: 0, b: 0 }.brightness(), 0.0);
        assert_relative_eq!(
            Color {
                r: 255,
                g: 255,
                b: 255
            }
            .brightness(),
            255.0
        );
        // green dominates the perceived weighting
        assert!(
            Color { r: 0, g: 255, b: 0 }.brightness() > Color { r: 255, g: 0, b: 0 }.brightness()
        );
    }

    #[test]
    fn hue_difference_is_symmetric() {
        let a = Color { r: 10, g: 200, b: 0 };
        let b = Color {
            r: 250,
            g: 3,
            b: 128,
        };
        assert_eq!(a.hue_difference(b), b.hue_difference(a));
        assert_eq!(a.hue_difference(b), 240 + 197 + 128);
        assert_eq!(a.hue_difference(a), 0);
    }

    #[test]
    fn sampled_colors_clear_the_floors() {
        let mut rng = StdRng::seed_from_u64(7);
        let background = Color { r: 0, g: 0, b: 0 };
        let mut evaluated = 0;
        for _ in 0..50 {
            let color = contrasting_color(&mut rng, background, 65, 250, &mut evaluated)
                .expect("floors are satisfiable against black");
            assert!(color.brightness_difference(background) >= 65.0);
            assert!(color.hue_difference(background) >= 250);
        }
        assert!(evaluated >= 50);
    }

    #[test]
    fn unsatisfiable_floors_give_up() {
        // against mid-gray no color can reach a hue distance of 600
        let mut rng = StdRng::seed_from_u64(7);
        let background = Color {
            r: 128,
            g: 128,
            b: 128,
        };
        let mut evaluated = 0;
        assert_eq!(
            contrasting_color(&mut rng, background, 0, 600, &mut evaluated),
            None
        );
        assert_eq!(evaluated, MAX_COLOR_DRAWS);
    }
}
