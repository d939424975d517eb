//! Image adaptation pipeline for low-color e-ink panels.
//!
//! All stages are pure transforms over in-memory rasters, applied in a fixed
//! order: saturation, brightness, black-floor clipping, palette quantization,
//! PNG re-encode. Identical inputs produce byte-identical output; the
//! dithering tie-break is deterministic (lowest palette index wins).

use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};

use crate::palette::{self, Palette};
use crate::{AdaptOptions, Error, Result};

/// Run the full adaptation pipeline on encoded capture bytes.
///
/// Decodes `raw`, applies the stages enabled in `opts`, and re-encodes to
/// PNG. Alpha is preserved unless quantization runs, which necessarily
/// flattens to opaque palette colors.
pub fn process(raw: &[u8], opts: &AdaptOptions) -> Result<Vec<u8>> {
    opts.validate()?;

    let decoded = image::load_from_memory(raw)
        .map_err(|e| Error::DecodeFailed(format!("invalid capture bytes: {}", e)))?;
    let mut img = decoded.to_rgba8();

    img = adjust_saturation(&img, opts.color_factor);
    img = adjust_brightness(&img, opts.brightness_factor);
    if let Some(floor) = opts.black_floor {
        img = apply_black_floor(&img, floor);
    }

    if opts.quantize {
        let flat = flatten_onto_white(&img);
        let quantized = quantize(&flat, &palette::INKY_FRAME);
        encode_rgb(&quantized)
    } else {
        encode_rgba(&img)
    }
}

/// Scale color saturation by `factor` (1.0 = no-op).
///
/// Each pixel is blended against its Rec.601 luma gray: values above 1
/// push channels away from gray, values below 1 pull them toward it.
pub fn adjust_saturation(img: &RgbaImage, factor: f32) -> RgbaImage {
    if factor == 1.0 {
        return img.clone();
    }
    map_rgb(img, |r, g, b| {
        let gray = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        (
            clamp_channel(gray + (r as f32 - gray) * factor),
            clamp_channel(gray + (g as f32 - gray) * factor),
            clamp_channel(gray + (b as f32 - gray) * factor),
        )
    })
}

/// Scale brightness by `factor` (1.0 = no-op).
pub fn adjust_brightness(img: &RgbaImage, factor: f32) -> RgbaImage {
    if factor == 1.0 {
        return img.clone();
    }
    map_rgb(img, |r, g, b| {
        (
            clamp_channel(r as f32 * factor),
            clamp_channel(g as f32 * factor),
            clamp_channel(b as f32 * factor),
        )
    })
}

/// Clip every color channel down by `floor`: `v -> max(0, v - floor)`.
///
/// A per-channel operation, not per-pixel luminance; it compresses
/// near-black noise toward true black before quantization. Alpha is kept.
pub fn apply_black_floor(img: &RgbaImage, floor: u8) -> RgbaImage {
    map_rgb(img, |r, g, b| {
        (
            r.saturating_sub(floor),
            g.saturating_sub(floor),
            b.saturating_sub(floor),
        )
    })
}

/// Map every pixel to the nearest palette entry with Floyd-Steinberg error
/// diffusion.
///
/// Quantization error propagates in raster order with the classical weight
/// split: 7/16 right, 3/16 below-left, 5/16 below, 1/16 below-right. Every
/// output pixel exactly equals one palette entry.
pub fn quantize(img: &RgbImage, palette: &Palette) -> RgbImage {
    let (width, height) = img.dimensions();
    let w = width as usize;
    let h = height as usize;

    // Accumulate diffusion error in f32 so repeated carries do not saturate.
    let mut buf: Vec<f32> = img.as_raw().iter().map(|&v| v as f32).collect();
    let mut out = RgbImage::new(width, height);

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) * 3;
            let old = Rgb([
                clamp_channel(buf[idx]),
                clamp_channel(buf[idx + 1]),
                clamp_channel(buf[idx + 2]),
            ]);
            let new = palette.entry(palette.nearest(old));
            out.put_pixel(x as u32, y as u32, new);

            let err = [
                old.0[0] as f32 - new.0[0] as f32,
                old.0[1] as f32 - new.0[1] as f32,
                old.0[2] as f32 - new.0[2] as f32,
            ];
            if x + 1 < w {
                diffuse(&mut buf, (y * w + x + 1) * 3, &err, 7.0 / 16.0);
            }
            if y + 1 < h {
                if x > 0 {
                    diffuse(&mut buf, ((y + 1) * w + x - 1) * 3, &err, 3.0 / 16.0);
                }
                diffuse(&mut buf, ((y + 1) * w + x) * 3, &err, 5.0 / 16.0);
                if x + 1 < w {
                    diffuse(&mut buf, ((y + 1) * w + x + 1) * 3, &err, 1.0 / 16.0);
                }
            }
        }
    }

    out
}

/// Drop alpha by compositing onto white, the panel's resting state.
pub fn flatten_onto_white(img: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let Rgba([r, g, b, a]) = *pixel;
        let a = a as u16;
        let blend = |v: u8| ((v as u16 * a + 255 * (255 - a)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

fn diffuse(buf: &mut [f32], idx: usize, err: &[f32; 3], weight: f32) {
    buf[idx] += err[0] * weight;
    buf[idx + 1] += err[1] * weight;
    buf[idx + 2] += err[2] * weight;
}

fn clamp_channel(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn map_rgb<F>(img: &RgbaImage, f: F) -> RgbaImage
where
    F: Fn(u8, u8, u8) -> (u8, u8, u8),
{
    let mut out = RgbaImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let Rgba([r, g, b, a]) = *pixel;
        let (r, g, b) = f(r, g, b);
        out.put_pixel(x, y, Rgba([r, g, b, a]));
    }
    out
}

fn encode_rgba(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ColorType::Rgba8,
        )
        .map_err(|e| Error::AdaptFailed(format!("PNG encoding failed: {}", e)))?;
    Ok(bytes)
}

fn encode_rgb(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ColorType::Rgb8,
        )
        .map_err(|e| Error::AdaptFailed(format!("PNG encoding failed: {}", e)))?;
    Ok(bytes)
}
