use std::{fmt, io, path::PathBuf};

/// Crate error type.
#[derive(Debug)]
pub enum Error {
    /// A configuration option failed validation.
    InvalidConfig {
        setting: &'static str,
        reason: String,
    },
    /// The derived font size collapsed to zero for the configured
    /// width, text length and character set.
    FontsUnusable { font: PathBuf },
    /// A font file could not be read or parsed.
    FontLoad { font: PathBuf, reason: String },
    /// The engine has been shut down; no further queries are served.
    ShutDown,
    /// Every whole-image retry failed to find colors satisfying the
    /// contrast floors.
    RenderRetries { attempts: u32 },
    /// Image encoding failed.
    Encode(image::ImageError),
    /// Saving a rendered image to disk failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig { setting, reason } => {
                write!(f, "invalid `{}` setting: {}", setting, reason)
            }
            Error::FontsUnusable { font } => write!(
                f,
                "width is too small to fit the configured number of characters with font {}",
                font.display()
            ),
            Error::FontLoad { font, reason } => {
                write!(f, "cannot load font {}: {}", font.display(), reason)
            }
            Error::ShutDown => write!(f, "this engine is shut down"),
            Error::RenderRetries { attempts } => write!(
                f,
                "no compliant character colors found in {} whole-image attempts",
                attempts
            ),
            Error::Encode(err) => write!(f, "image encoding failed: {}", err),
            Error::Io(err) => write!(f, "i/o failure: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Encode(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Encode(err)
    }
}
