//! Weather Dash
//!
//! Renders a live weather dashboard to a raster image, adapts the result for
//! a low-color electronic-ink panel, and serves it over HTTP to embedded
//! clients that poll on a fixed interval.
//!
//! The crate is split along the request path:
//!
//! - **Capture** ([`capture`]): drives a disposable headless Chrome instance
//!   to a stable, fully-loaded state and takes a single PNG screenshot.
//! - **Adapt** ([`adapt`]): saturation/brightness correction, optional
//!   black-level clipping, and optional palette quantization with
//!   Floyd-Steinberg dithering against a fixed 8-entry panel palette.
//! - **Serve** ([`server`]): the `GET /api/screenshot` endpoint binding the
//!   two, plus health, metrics, and static hosting for the dashboard SPA.
//! - **Device** ([`device`]): the fetch -> persist -> decode -> display
//!   cycle a remote e-ink frame runs against the endpoint.
//!
//! # Example
//!
//! ```no_run
//! use weather_dash::{AdaptOptions, RenderRequest};
//! use weather_dash::capture::{CaptureConfig, CdpRenderer, Renderer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let renderer = CdpRenderer::new(CaptureConfig::default());
//! let request = RenderRequest {
//!     width: 800,
//!     height: 480,
//!     latitude: 37.7749,
//!     longitude: -122.4194,
//!     name: Some("San Francisco".to_string()),
//! };
//! let raw = renderer.capture(&request)?;
//! let png = weather_dash::adapt::process(&raw, &AdaptOptions::default())?;
//! # let _ = png;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod adapt;
pub mod capture;
pub mod device;
pub mod palette;
pub mod server;

/// Parameters describing one screenshot to produce.
///
/// `width` and `height` are the target display's resolution in pixels; the
/// browser surface is sized to exactly these dimensions before capture.
/// `name` is a free-text location label and is percent-escaped when the
/// dashboard URL is built, so it cannot inject query structure.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub width: u32,
    pub height: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

impl RenderRequest {
    /// Check the request invariants: dimensions must be positive.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::ConfigError(
                "width and height must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Adaptation parameters applied to a raw capture, in pipeline order.
///
/// Factors of `1.0` leave the image unchanged; both must be positive.
/// `black_floor` clips every color channel down by the given amount before
/// quantization, compressing near-black noise toward true black.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptOptions {
    /// Saturation multiplier (>1 saturates, <1 desaturates toward gray)
    pub color_factor: f32,
    /// Brightness multiplier
    pub brightness_factor: f32,
    /// Quantize to the 8-entry panel palette with error diffusion
    pub quantize: bool,
    /// Per-channel clipping threshold applied before quantization
    pub black_floor: Option<u8>,
}

impl Default for AdaptOptions {
    fn default() -> Self {
        Self {
            // E-ink panels wash colors out; a mild boost reads better.
            color_factor: 1.2,
            brightness_factor: 1.0,
            quantize: false,
            black_floor: None,
        }
    }
}

impl AdaptOptions {
    /// Check the option invariants: factors must be positive.
    pub fn validate(&self) -> Result<()> {
        if self.color_factor <= 0.0 || self.brightness_factor <= 0.0 {
            return Err(Error::ConfigError(
                "color and brightness factors must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = AdaptOptions::default();
        assert_eq!(opts.color_factor, 1.2);
        assert_eq!(opts.brightness_factor, 1.0);
        assert!(!opts.quantize);
        assert!(opts.black_floor.is_none());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        let mut req = RenderRequest {
            width: 800,
            height: 480,
            latitude: 0.0,
            longitude: 0.0,
            name: None,
        };
        assert!(req.validate().is_ok());

        req.width = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_option_validation() {
        let mut opts = AdaptOptions::default();
        opts.color_factor = 0.0;
        assert!(opts.validate().is_err());

        opts.color_factor = 1.0;
        opts.brightness_factor = -0.5;
        assert!(opts.validate().is_err());
    }
}
