use crate::{error::Error, render, settings::Settings};
use rand::rngs::OsRng;
use std::{fmt, fs, path::Path};

/// A single reusable CAPTCHA: the latest rendered image, its plaintext
/// solution and per-instance statistics.
///
/// Instances are the unit the engine pools; [`generate`](Captcha::generate)
/// replaces the held image in place so the same allocation cycles
/// between the fresh and used queues.
pub struct Captcha {
    settings: Settings,
    solution: String,
    blob: Vec<u8>,
    generation: u64,
    layers_of_noise: u64,
    position_corrections: u64,
    colors_evaluated: u64,
    font_size_total: u64,
}

impl Captcha {
    /// Builds an instance and renders its first CAPTCHA.
    pub fn new(settings: Settings) -> Result<Self, Error> {
        let mut captcha = Captcha {
            settings,
            solution: String::new(),
            blob: Vec::new(),
            generation: 0,
            layers_of_noise: 0,
            position_corrections: 0,
            colors_evaluated: 0,
            font_size_total: 0,
        };
        captcha.generate()?;
        Ok(captcha)
    }

    /// Renders a replacement CAPTCHA, resetting the per-generation
    /// counters and bumping the generation number.
    pub fn generate(&mut self) -> Result<(), Error> {
        let rendered = render::render(&self.settings, &mut rand::thread_rng(), &mut OsRng)?;
        self.solution = rendered.solution;
        self.blob = rendered.bytes;
        self.layers_of_noise = rendered.layers_of_noise;
        self.position_corrections = rendered.position_corrections;
        self.colors_evaluated = rendered.colors_evaluated;
        self.font_size_total = rendered.font_size_total;
        self.generation += 1;
        Ok(())
    }

    /// The encoded image.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// The plaintext solution of the current image.
    pub fn solution(&self) -> &str {
        &self.solution
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Writes the encoded image to `path` as-is.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        fs::write(path, &self.blob)?;
        Ok(())
    }

    /// Swaps in a new configuration and immediately re-renders under
    /// it.
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), Error> {
        self.settings = settings;
        self.generate()
    }

    pub fn stats(&self) -> CaptchaStats {
        let characters = self.settings.effective_text_length().max(1);
        CaptchaStats {
            generation: self.generation,
            average_font_size: self.font_size_total as f64 / characters as f64,
            colors_evaluated: self.colors_evaluated,
            position_corrections: self.position_corrections,
            image_data_size: self.blob.len() as u64,
            layers_of_noise: self.layers_of_noise,
            settings: self.settings.clone(),
        }
    }
}

impl fmt::Debug for Captcha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Captcha")
            .field("generation", &self.generation)
            .field("image_data_size", &self.blob.len())
            .finish()
    }
}

/// Point-in-time counters for one [`Captcha`] instance.
#[derive(Clone, Debug)]
pub struct CaptchaStats {
    /// How many CAPTCHAs this instance has rendered.
    pub generation: u64,
    /// Mean pixel size across the current image's characters.
    pub average_font_size: f64,
    /// Color draws evaluated while rendering the current image.
    pub colors_evaluated: u64,
    /// Placement corrections applied to the current image.
    pub position_corrections: u64,
    /// Encoded size of the current image in bytes.
    pub image_data_size: u64,
    /// Noise layers drawn onto the current image.
    pub layers_of_noise: u64,
    /// The configuration the current image was rendered under.
    pub settings: Settings,
}

impl fmt::Display for CaptchaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CAPTCHA INSTANCE")?;
        writeln!(f)?;
        writeln!(f, "    CAPTCHA Number for this Instance: {}", self.generation)?;
        writeln!(f, "    Average Font Size per Character: {:.2}", self.average_font_size)?;
        writeln!(f, "    Number of Character Colors Evaluated: {}", self.colors_evaluated)?;
        writeln!(
            f,
            "    Number of Corrections to Character Positions: {}",
            self.position_corrections
        )?;
        writeln!(f, "    Image Data Size (In Bytes): {}", self.image_data_size)?;
        writeln!(f, "    Layers of Noise Applied: {}", self.layers_of_noise)?;
        writeln!(f)?;
        writeln!(f, "    Settings:")?;
        for line in self.settings.to_string().lines() {
            writeln!(f, "    {}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod captcha_test {
    use super::*;
    use crate::settings::DEFAULT_FONTS;
    use std::env;

    fn small_settings() -> Settings {
        Settings::builder()
            .width(160)
            .height(60)
            .fonts(vec![DEFAULT_FONTS[0]])
            .max_noise(6)
            .pool_size(1)
            .build()
            .unwrap()
    }

    #[test]
    fn construction_renders_immediately() {
        let captcha = Captcha::new(small_settings()).unwrap();
        assert_eq!(captcha.stats().generation, 1);
        assert!(!captcha.blob().is_empty());
        assert_eq!(captcha.solution().chars().count(), 6);
    }

    #[test]
    fn regeneration_replaces_the_image() {
        let mut captcha = Captcha::new(small_settings()).unwrap();
        let first_blob = captcha.blob().to_vec();
        captcha.generate().unwrap();
        assert_eq!(captcha.stats().generation, 2);
        assert_ne!(captcha.blob(), &first_blob[..]);
        assert_eq!(captcha.stats().image_data_size, captcha.blob().len() as u64);
    }

    #[test]
    fn save_writes_the_blob_verbatim() {
        let captcha = Captcha::new(small_settings()).unwrap();
        let path = env::temp_dir().join(format!("captcha_mill_save_{}.png", std::process::id()));
        captcha.save(&path).unwrap();
        let written = fs::read(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(written, captcha.blob());
    }

    #[test]
    fn settings_update_takes_effect_on_the_spot() {
        let mut captcha = Captcha::new(small_settings()).unwrap();
        let digits_only = small_settings()
            .to_builder()
            .character_set("23456789")
            .build()
            .unwrap();
        captcha.update_settings(digits_only).unwrap();
        assert!(captcha.solution().chars().all(|ch| "23456789".contains(ch)));
        assert_eq!(captcha.stats().generation, 2);
    }

    #[test]
    fn stats_track_the_current_image() {
        let captcha = Captcha::new(small_settings()).unwrap();
        let stats = captcha.stats();
        assert!(stats.average_font_size > 0.0);
        assert!(stats.colors_evaluated >= 6, "one draw per character at minimum");
        assert_eq!(stats.image_data_size, captcha.blob().len() as u64);
        let report = stats.to_string();
        assert!(report.contains("Layers of Noise Applied"));
    }
}
