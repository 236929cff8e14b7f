//! Error taxonomy for atlas loading, playback and surface lifecycle.
//!
//! Errors are `Clone` because one failure is shared by every waiter of the
//! same in-flight load or surface initialization.

/// Convenience result type used across the crate.
pub type AvatarResult<T> = Result<T, AvatarError>;

/// Top-level errors surfaced by the cache, the controller and the surface manager.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AvatarError {
    /// A single resolution variant failed to fetch, decode or slice.
    /// Recovered locally by falling back to the next variant.
    #[error("variant '{locator}' failed to load: {reason}")]
    VariantLoadFailed { locator: String, reason: LoadError },

    /// Every variant of a clip failed.
    #[error("all {attempts} variant(s) for '{key}' failed; last error: {last_error}")]
    ResourceLoadExhausted {
        key: String,
        attempts: usize,
        last_error: String,
    },

    /// The render surface could not be created.
    #[error("render surface initialization failed: {0}")]
    SurfaceInitFailed(String),

    /// No descriptor is configured for the requested clip.
    #[error("no atlas descriptor configured for '{key}'")]
    MissingDescriptor { key: String },
}

impl AvatarError {
    /// Build an [`AvatarError::SurfaceInitFailed`] value.
    pub fn surface_init(msg: impl Into<String>) -> Self {
        Self::SurfaceInitFailed(msg.into())
    }

    /// Build an [`AvatarError::MissingDescriptor`] value.
    pub fn missing_descriptor(key: impl Into<String>) -> Self {
        Self::MissingDescriptor { key: key.into() }
    }
}

/// Failure of one atlas source fetch or slice.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("loader unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<image::ImageError> for LoadError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => Self::Io(io.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}
