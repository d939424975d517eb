//! Error types for the dashboard capture service

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while producing an adapted dashboard image
#[derive(Error, Debug)]
pub enum Error {
    /// Browser launch, navigation, or wait-for-ready failed
    #[error("Render failed: {0}")]
    RenderFailed(String),

    /// Input bytes were not a valid raster image
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// Color adjustment or quantization failed internally
    #[error("Adapt failed: {0}")]
    AdaptFailed(String),

    /// Invalid request or service configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

// headless_chrome reports everything through anyhow; fold those into the
// render stage since that is the only place the crate is used.
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::RenderFailed(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::DecodeFailed(err.to_string())
    }
}
