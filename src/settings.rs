use crate::{captcha::Captcha, error::Error};
use ab_glyph::{Font, FontArc, GlyphId, ScaleFont};
use log::info;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::{Duration, Instant},
};

/// Default curated character set: latin letters and digits minus
/// easily-confused glyphs (`0/O`, `1/l/I`, `i/L`).
pub const DEFAULT_CHARACTER_SET: &str =
    "abcdefghjkmnpqrstuvwxyzABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Bundled open-source typefaces used by the default configuration.
pub const DEFAULT_FONTS: [&str; 3] = [
    concat!(env!("CARGO_MANIFEST_DIR"), "/fonts/DejaVuSans.ttf"),
    concat!(env!("CARGO_MANIFEST_DIR"), "/fonts/DejaVuSerif.ttf"),
    concat!(env!("CARGO_MANIFEST_DIR"), "/fonts/DejaVuSansMono.ttf"),
];

const MIN_WIDTH: u32 = 10;
const MIN_HEIGHT: u32 = 5;
const MIN_TEXT_LENGTH: usize = 3;
const MAX_SHIFT_PCT: u32 = 100;
const MAX_BRIGHTNESS_FLOOR: u32 = 200;
const MAX_HUE_FLOOR: u32 = 600;

/// Index of a loaded font in [`Settings::fonts`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FontId(pub usize);

/// A parsed font file plus the base pixel size derived for it.
#[derive(Clone)]
pub struct LoadedFont {
    path: PathBuf,
    font: FontArc,
    base_px: u32,
}

impl LoadedFont {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn font(&self) -> &FontArc {
        &self.font
    }

    /// Derived base pixel size; per-character sizes jitter around it.
    pub fn base_px(&self) -> u32 {
        self.base_px
    }
}

impl fmt::Debug for LoadedFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedFont")
            .field("path", &self.path)
            .field("base_px", &self.base_px)
            .finish()
    }
}

/// Supported output image encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Bmp,
    Gif,
    Ico,
    Jpeg,
    Png,
    Tiff,
    Webp,
}

impl Format {
    pub const ALL: [Format; 7] = [
        Format::Bmp,
        Format::Gif,
        Format::Ico,
        Format::Jpeg,
        Format::Png,
        Format::Tiff,
        Format::Webp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Format::Bmp => "BMP",
            Format::Gif => "GIF",
            Format::Ico => "ICO",
            Format::Jpeg => "JPEG",
            Format::Png => "PNG",
            Format::Tiff => "TIFF",
            Format::Webp => "WEBP",
        }
    }

    pub(crate) fn image_format(self) -> image::ImageFormat {
        match self {
            Format::Bmp => image::ImageFormat::Bmp,
            Format::Gif => image::ImageFormat::Gif,
            Format::Ico => image::ImageFormat::Ico,
            Format::Jpeg => image::ImageFormat::Jpeg,
            Format::Png => image::ImageFormat::Png,
            Format::Tiff => image::ImageFormat::Tiff,
            Format::Webp => image::ImageFormat::WebP,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Error> {
        Format::ALL
            .iter()
            .copied()
            .find(|format| format.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::InvalidConfig {
                setting: "format",
                reason: format!("'{}' is not a supported output image format", name),
            })
    }
}

/// Pacing policy for the background refresher.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RateLimit {
    /// Refresh consumed CAPTCHAs as fast as they come back.
    Unlimited,
    /// At most this many regenerations per 60 s window.
    PerMinute(u32),
    /// A fixed pause of this many seconds before each regeneration.
    SecsBetween(f64),
}

impl RateLimit {
    pub fn is_unlimited(self) -> bool {
        self == RateLimit::Unlimited
    }
}

/// Immutable, validated configuration snapshot.
///
/// Built with a [`SettingsBuilder`]; every constructed value has passed
/// full validation including per-font size derivation, so downstream
/// code never re-checks it. Cloning is cheap (fonts are shared).
#[derive(Clone, Debug)]
pub struct Settings {
    width: u32,
    height: u32,
    format: Format,
    text: String,
    text_length: usize,
    character_set: Vec<char>,
    fonts: Vec<LoadedFont>,
    horizontal_shift_pct: u32,
    vertical_shift_pct: u32,
    font_size_shift_pct: u32,
    overlap_allowed: bool,
    max_noise: u32,
    min_brightness_difference: u32,
    min_hue_difference: u32,
    case_sensitive: bool,
    lifetime_secs: u64,
    pool_size: usize,
    rate_limit: RateLimit,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::builder()
            .build()
            .expect("default settings are valid")
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// A builder seeded with this configuration, for
    /// modify-and-revalidate flows.
    pub fn to_builder(&self) -> SettingsBuilder {
        SettingsBuilder {
            width: self.width,
            height: self.height,
            format: self.format,
            text: self.text.clone(),
            text_length: self.text_length,
            character_set: self.character_set.iter().collect(),
            fonts: self.fonts.iter().map(|font| font.path.clone()).collect(),
            horizontal_shift_pct: self.horizontal_shift_pct,
            vertical_shift_pct: self.vertical_shift_pct,
            font_size_shift_pct: self.font_size_shift_pct,
            overlap_allowed: self.overlap_allowed,
            max_noise: self.max_noise,
            min_brightness_difference: self.min_brightness_difference,
            min_hue_difference: self.min_hue_difference,
            case_sensitive: self.case_sensitive,
            lifetime_secs: self.lifetime_secs,
            pool_size: self.pool_size,
            rate_limit: self.rate_limit,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Fixed solution text; empty means a random solution per render.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn text_length(&self) -> usize {
        self.text_length
    }

    pub fn character_set(&self) -> &[char] {
        &self.character_set
    }

    pub fn fonts(&self) -> &[LoadedFont] {
        &self.fonts
    }

    pub fn horizontal_shift_pct(&self) -> u32 {
        self.horizontal_shift_pct
    }

    pub fn vertical_shift_pct(&self) -> u32 {
        self.vertical_shift_pct
    }

    pub fn font_size_shift_pct(&self) -> u32 {
        self.font_size_shift_pct
    }

    pub fn overlap_allowed(&self) -> bool {
        self.overlap_allowed
    }

    pub fn max_noise(&self) -> u32 {
        self.max_noise
    }

    pub fn min_brightness_difference(&self) -> u32 {
        self.min_brightness_difference
    }

    pub fn min_hue_difference(&self) -> u32 {
        self.min_hue_difference
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn lifetime_secs(&self) -> u64 {
        self.lifetime_secs
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.rate_limit
    }

    /// Characters per rendered solution: the fixed text's length when
    /// one is configured, `text_length` otherwise.
    pub fn effective_text_length(&self) -> usize {
        if self.text.is_empty() {
            self.text_length
        } else {
            self.text.chars().count()
        }
    }

    /// Times CAPTCHA generation under `self` against `other`, splitting
    /// `budget` between the two sides. Purely informational.
    ///
    /// Ten generations per side calibrate the iteration count first, so
    /// very short budgets error out rather than reporting noise.
    pub fn compare_efficiency(
        &self,
        other: &Settings,
        budget: Duration,
    ) -> Result<EfficiencyReport, Error> {
        const CALIBRATION_ROUNDS: u64 = 10;

        fn timed(captcha: &mut Captcha, rounds: u64) -> Result<Duration, Error> {
            let start = Instant::now();
            for _ in 0..rounds {
                captcha.generate()?;
            }
            Ok(start.elapsed())
        }

        let mut current = Captcha::new(self.clone())?;
        let mut candidate = Captcha::new(other.clone())?;

        let slower = timed(&mut current, CALIBRATION_ROUNDS)?
            .max(timed(&mut candidate, CALIBRATION_ROUNDS)?);
        let per_generation = (slower / CALIBRATION_ROUNDS as u32).max(Duration::from_nanos(1));
        let iterations = ((budget / 2).as_nanos() / per_generation.as_nanos()) as u64;
        if iterations == 0 {
            return Err(Error::InvalidConfig {
                setting: "budget",
                reason: "too short to benchmark the slower of the two configurations".into(),
            });
        }

        info!("benchmarking {} generations per side", iterations);
        let current_time = timed(&mut current, iterations)?;
        info!("benchmark 50% complete");
        let candidate_time = timed(&mut candidate, iterations)?;
        info!("benchmark complete");

        Ok(EfficiencyReport {
            iterations_per_side: iterations,
            current: current_time,
            candidate: candidate_time,
        })
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "WIDTH                     = {}", self.width)?;
        writeln!(f, "HEIGHT                    = {}", self.height)?;
        writeln!(f, "FORMAT                    = {}", self.format)?;
        writeln!(f, "TEXT                      = '{}'", self.text)?;
        writeln!(f, "TEXT_LENGTH               = {}", self.text_length)?;
        let character_set: String = self.character_set.iter().collect();
        writeln!(f, "CHARACTER_SET             = '{}'", character_set)?;
        writeln!(f, "FONTS                     = [")?;
        for font in &self.fonts {
            writeln!(f, "                                '{}',", font.path.display())?;
        }
        writeln!(f, "                            ]")?;
        writeln!(f, "HORIZONTAL_SHIFT_PCT      = {}", self.horizontal_shift_pct)?;
        writeln!(f, "VERTICAL_SHIFT_PCT        = {}", self.vertical_shift_pct)?;
        writeln!(f, "FONT_SIZE_SHIFT_PCT       = {}", self.font_size_shift_pct)?;
        writeln!(f, "OVERLAP_ALLOWED           = {}", self.overlap_allowed)?;
        writeln!(f, "MAX_NOISE                 = {}", self.max_noise)?;
        writeln!(f, "MIN_BRIGHTNESS_DIFFERENCE = {}", self.min_brightness_difference)?;
        writeln!(f, "MIN_HUE_DIFFERENCE        = {}", self.min_hue_difference)?;
        writeln!(f, "CASE_SENSITIVE            = {}", self.case_sensitive)?;
        writeln!(f, "LIFETIME                  = {}", self.lifetime_secs)?;
        writeln!(f, "POOL_SIZE                 = {}", self.pool_size)?;
        write!(f, "RATE_LIMIT                = {:?}", self.rate_limit)
    }
}

/// Chainable configuration builder; [`build`](SettingsBuilder::build)
/// validates everything at once.
#[derive(Clone, Debug)]
pub struct SettingsBuilder {
    width: u32,
    height: u32,
    format: Format,
    text: String,
    text_length: usize,
    character_set: String,
    fonts: Vec<PathBuf>,
    horizontal_shift_pct: u32,
    vertical_shift_pct: u32,
    font_size_shift_pct: u32,
    overlap_allowed: bool,
    max_noise: u32,
    min_brightness_difference: u32,
    min_hue_difference: u32,
    case_sensitive: bool,
    lifetime_secs: u64,
    pool_size: usize,
    rate_limit: RateLimit,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        SettingsBuilder {
            width: 750,
            height: 250,
            format: Format::Png,
            text: String::new(),
            text_length: 6,
            character_set: DEFAULT_CHARACTER_SET.to_owned(),
            fonts: DEFAULT_FONTS.iter().map(PathBuf::from).collect(),
            horizontal_shift_pct: 65,
            vertical_shift_pct: 65,
            font_size_shift_pct: 25,
            overlap_allowed: false,
            max_noise: 25,
            min_brightness_difference: 65,
            min_hue_difference: 250,
            case_sensitive: false,
            lifetime_secs: 600,
            pool_size: 500,
            rate_limit: RateLimit::Unlimited,
        }
    }
}

impl SettingsBuilder {
    /// Image width in pixels.
    pub fn width(mut self, px: u32) -> Self {
        self.width = px;
        self
    }

    /// Image height in pixels. Must not exceed the width.
    pub fn height(mut self, px: u32) -> Self {
        self.height = px;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Fixed solution text. Empty (the default) draws a random solution
    /// from the character set for every render.
    pub fn text<S: Into<String>>(mut self, text: S) -> Self {
        self.text = text.into();
        self
    }

    /// Random solution length; ignored while a fixed text is set.
    pub fn text_length(mut self, length: usize) -> Self {
        self.text_length = length;
        self
    }

    /// Characters random solutions are drawn from. Duplicates are
    /// rejected at build time.
    pub fn character_set<S: Into<String>>(mut self, characters: S) -> Self {
        self.character_set = characters.into();
        self
    }

    /// Font files used for rendering; one is picked per character.
    pub fn fonts<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.fonts = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Horizontal jitter around each character's anchor, as a
    /// percentage of the anchor spacing (0 to 100).
    pub fn horizontal_shift_pct(mut self, percent: u32) -> Self {
        self.horizontal_shift_pct = percent;
        self
    }

    /// Vertical jitter around the centre line (0 to 100).
    pub fn vertical_shift_pct(mut self, percent: u32) -> Self {
        self.vertical_shift_pct = percent;
        self
    }

    /// Per-character font size jitter around the derived base size
    /// (0 to 100).
    pub fn font_size_shift_pct(mut self, percent: u32) -> Self {
        self.font_size_shift_pct = percent;
        self
    }

    /// Allow drawn characters to overlap. Off by default; the layout
    /// pass then pushes colliding neighbours apart.
    pub fn overlap_allowed(mut self, allowed: bool) -> Self {
        self.overlap_allowed = allowed;
        self
    }

    /// Upper bound on noise layers per image.
    pub fn max_noise(mut self, layers: u32) -> Self {
        self.max_noise = layers;
        self
    }

    /// Perceived-brightness floor every drawn color must clear against
    /// the background (at most 200).
    pub fn min_brightness_difference(mut self, floor: u32) -> Self {
        self.min_brightness_difference = floor;
        self
    }

    /// Channel-distance floor every drawn color must clear against the
    /// background (at most 600).
    pub fn min_hue_difference(mut self, floor: u32) -> Self {
        self.min_hue_difference = floor;
        self
    }

    /// Compare answers case-sensitively. Off by default.
    pub fn case_sensitive(mut self, sensitive: bool) -> Self {
        self.case_sensitive = sensitive;
        self
    }

    /// Seconds a token stays valid after its CAPTCHA is issued.
    pub fn lifetime_secs(mut self, seconds: u64) -> Self {
        self.lifetime_secs = seconds;
        self
    }

    /// Number of pre-rendered CAPTCHA instances the engine keeps warm.
    pub fn pool_size(mut self, instances: usize) -> Self {
        self.pool_size = instances;
        self
    }

    /// Refresher pacing; see [`RateLimit`].
    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = limit;
        self
    }

    /// Validates every option, loads the fonts and derives their base
    /// sizes.
    pub fn build(self) -> Result<Settings, Error> {
        if self.width < MIN_WIDTH {
            return Err(invalid("width", format!("cannot be less than {}", MIN_WIDTH)));
        }
        if self.height < MIN_HEIGHT {
            return Err(invalid("height", format!("cannot be less than {}", MIN_HEIGHT)));
        }
        if self.height > self.width {
            return Err(invalid("height", "cannot be greater than the width".to_owned()));
        }
        if !self.text.is_empty() && self.text.chars().count() < MIN_TEXT_LENGTH {
            return Err(invalid(
                "text",
                format!("cannot be shorter than {} characters", MIN_TEXT_LENGTH),
            ));
        }
        if self.text_length < MIN_TEXT_LENGTH {
            return Err(invalid(
                "text_length",
                format!("cannot be less than {}", MIN_TEXT_LENGTH),
            ));
        }
        let character_set: Vec<char> = self.character_set.chars().collect();
        if character_set.is_empty() && self.text.is_empty() {
            return Err(invalid(
                "character_set",
                "cannot be empty while no fixed text is set".to_owned(),
            ));
        }
        for (i, ch) in character_set.iter().enumerate() {
            if character_set[..i].contains(ch) {
                return Err(invalid(
                    "character_set",
                    format!("may not contain duplicates; '{}' appears more than once", ch),
                ));
            }
        }
        if self.fonts.is_empty() {
            return Err(invalid("fonts", "must name at least one font file".to_owned()));
        }
        if self.horizontal_shift_pct > MAX_SHIFT_PCT {
            return Err(invalid("horizontal_shift_pct", "must be 0 to 100".to_owned()));
        }
        if self.vertical_shift_pct > MAX_SHIFT_PCT {
            return Err(invalid("vertical_shift_pct", "must be 0 to 100".to_owned()));
        }
        if self.font_size_shift_pct > MAX_SHIFT_PCT {
            return Err(invalid("font_size_shift_pct", "must be 0 to 100".to_owned()));
        }
        if self.min_brightness_difference > MAX_BRIGHTNESS_FLOOR {
            return Err(invalid(
                "min_brightness_difference",
                format!("must be at most {}", MAX_BRIGHTNESS_FLOOR),
            ));
        }
        if self.min_hue_difference > MAX_HUE_FLOOR {
            return Err(invalid(
                "min_hue_difference",
                format!("must be at most {}", MAX_HUE_FLOOR),
            ));
        }
        if self.pool_size < 1 {
            return Err(invalid("pool_size", "must be at least 1".to_owned()));
        }
        let rate_limit = match self.rate_limit {
            RateLimit::PerMinute(0) => RateLimit::Unlimited,
            RateLimit::SecsBetween(secs) if !secs.is_finite() || secs < 0.0 => {
                return Err(invalid("rate_limit", "pause must be a non-negative number".to_owned()));
            }
            RateLimit::SecsBetween(secs) if secs == 0.0 => RateLimit::Unlimited,
            limit => limit,
        };

        // size derivation measures the widest glyph that can actually
        // appear: the charset, or the fixed text when the charset is empty
        let size_candidates: Vec<char> = if character_set.is_empty() {
            self.text.chars().collect()
        } else {
            character_set.clone()
        };
        let effective_length = if self.text.is_empty() {
            self.text_length
        } else {
            self.text.chars().count()
        };
        let anchors = effective_length as u32 + 1;

        let mut fonts = Vec::with_capacity(self.fonts.len());
        for path in self.fonts {
            if !path.is_file() {
                return Err(invalid(
                    "fonts",
                    format!("font file '{}' could not be found", path.display()),
                ));
            }
            let data = fs::read(&path).map_err(|err| Error::FontLoad {
                font: path.clone(),
                reason: err.to_string(),
            })?;
            let font = FontArc::try_from_vec(data).map_err(|err| Error::FontLoad {
                font: path.clone(),
                reason: err.to_string(),
            })?;
            let base_px = derive_base_px(
                &path,
                &font,
                &size_candidates,
                anchors,
                self.width,
                self.font_size_shift_pct,
            )?;
            fonts.push(LoadedFont { path, font, base_px });
        }

        Ok(Settings {
            width: self.width,
            height: self.height,
            format: self.format,
            text: self.text,
            text_length: self.text_length,
            character_set,
            fonts,
            horizontal_shift_pct: self.horizontal_shift_pct,
            vertical_shift_pct: self.vertical_shift_pct,
            font_size_shift_pct: self.font_size_shift_pct,
            overlap_allowed: self.overlap_allowed,
            max_noise: self.max_noise,
            min_brightness_difference: self.min_brightness_difference,
            min_hue_difference: self.min_hue_difference,
            case_sensitive: self.case_sensitive,
            lifetime_secs: self.lifetime_secs,
            pool_size: self.pool_size,
            rate_limit,
        })
    }
}

fn invalid(setting: &'static str, reason: String) -> Error {
    Error::InvalidConfig { setting, reason }
}

/// Largest integer pixel size whose widest glyph, repeated once per
/// anchor, still fits inside `width`, scaled down so that the size
/// jitter can never push a character past that bound.
fn derive_base_px(
    path: &Path,
    font: &FontArc,
    candidates: &[char],
    anchors: u32,
    width: u32,
    size_shift_pct: u32,
) -> Result<u32, Error> {
    // advance scales linearly, so the widest glyph at any size is the
    // widest unscaled
    let mut widest: Option<GlyphId> = None;
    let mut widest_advance = 0.0f32;
    for &ch in candidates {
        let id = font.glyph_id(ch);
        let advance = font.h_advance_unscaled(id);
        if advance > widest_advance {
            widest_advance = advance;
            widest = Some(id);
        }
    }
    let widest = match widest {
        Some(id) if widest_advance > 0.0 => id,
        _ => return Err(Error::FontsUnusable { font: path.to_owned() }),
    };

    let row_width = |px: i64| font.as_scaled(px as f32).h_advance(widest) * anchors as f32;

    let mut px = (f64::from(width) / f64::from(anchors)).round() as i64;
    if px < 1 {
        px = 1;
    }
    let started_above = row_width(px) >= width as f32;
    loop {
        if row_width(px) >= width as f32 {
            px -= 1;
            if !started_above || px <= 0 {
                break;
            }
        } else {
            if started_above {
                break;
            }
            px += 1;
            if px > i64::from(width) {
                px -= 1;
                break;
            }
        }
    }
    let max_px = px.max(0);

    let shift = f64::from(size_shift_pct) / 100.0;
    let base = (max_px as f64 / (1.0 + shift)).round();
    let minimum = (base - base * shift).round() as i64;
    if minimum <= 0 {
        return Err(Error::FontsUnusable { font: path.to_owned() });
    }
    Ok(base as u32)
}

/// Outcome of [`Settings::compare_efficiency`].
#[derive(Clone, Copy, Debug)]
pub struct EfficiencyReport {
    /// Generations timed per configuration.
    pub iterations_per_side: u64,
    /// Wall-clock time spent by the calling configuration.
    pub current: Duration,
    /// Wall-clock time spent by the compared configuration.
    pub candidate: Duration,
}

impl EfficiencyReport {
    pub fn total(&self) -> Duration {
        self.current + self.candidate
    }

    /// Positive when the compared configuration generated faster,
    /// negative when the calling one did.
    pub fn candidate_gain_pct(&self) -> f64 {
        let current = self.current.as_secs_f64();
        let candidate = self.candidate.as_secs_f64().max(f64::EPSILON);
        (current / candidate - 1.0) * 100.0
    }
}

impl fmt::Display for EfficiencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} CAPTCHAs generated in about {:.3} s",
            self.iterations_per_side * 2,
            self.total().as_secs_f64()
        )?;
        writeln!(
            f,
            "these settings:    {:.3} s for {} CAPTCHAs",
            self.current.as_secs_f64(),
            self.iterations_per_side
        )?;
        writeln!(
            f,
            "compared settings: {:.3} s for {} CAPTCHAs",
            self.candidate.as_secs_f64(),
            self.iterations_per_side
        )?;
        let gain = self.candidate_gain_pct();
        if gain >= 0.0 {
            write!(f, "the compared settings were about {:.3}% more efficient", gain)
        } else {
            let current_gain = (self.candidate.as_secs_f64()
                / self.current.as_secs_f64().max(f64::EPSILON)
                - 1.0)
                * 100.0;
            write!(f, "these settings were about {:.3}% more efficient", current_gain)
        }
    }
}
