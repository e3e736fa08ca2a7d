//! Pooled CAPTCHA generation and one-shot validation.
//!
//! An [`Engine`] keeps a bounded pool of pre-rendered CAPTCHAs warm in
//! the background, hands them out as `(image bytes, sealed token)`
//! pairs, and later checks user answers against the token. A token
//! validates successfully at most once and only within its configured
//! lifetime; restarting the engine invalidates all outstanding tokens.
//!
//! ```no_run
//! use captcha_mill::{Engine, Settings};
//!
//! # fn main() -> Result<(), captcha_mill::Error> {
//! let settings = Settings::builder()
//!     .width(480)
//!     .height(160)
//!     .pool_size(16)
//!     .build()?;
//! let engine = Engine::new(settings)?;
//!
//! // hand the image to the user, keep the token with the session
//! let challenge = engine.get()?;
//!
//! // later: check the transcription, successfully at most once
//! if engine.validate(&challenge.token, "hJkm42")? {
//!     // grant access; the same token can never validate again
//! }
//!
//! engine.shutdown()?;
//! # Ok(())
//! # }
//! ```

mod captcha;
mod color;
mod draw;
mod engine;
mod error;
mod layout;
mod render;
mod settings;
mod token;

pub use crate::{
    captcha::{Captcha, CaptchaStats},
    color::Color,
    engine::{Challenge, Engine, EngineStats, InstanceAverages},
    error::Error,
    settings::{
        EfficiencyReport, Format, LoadedFont, RateLimit, Settings, SettingsBuilder,
        DEFAULT_CHARACTER_SET, DEFAULT_FONTS,
    },
};
