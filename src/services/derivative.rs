use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::error::{AppError, AppResult};

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Background used when flattening sources that carry alpha.
const FLATTEN_BACKGROUND: [u8; 3] = [255, 255, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// Fit within the box, keep aspect, never enlarge, never crop.
    Inside,
    /// Fill the box and center-crop the overflow.
    Cover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivativeSpec {
    pub name: &'static str,
    pub resize: Option<Resize>,
    pub quality: u8,
}

impl DerivativeSpec {
    pub const fn thumb() -> Self {
        Self {
            name: "thumb",
            resize: Some(Resize { width: None, height: Some(200), fit: Fit::Inside }),
            quality: 80,
        }
    }

    pub const fn small() -> Self {
        Self {
            name: "small",
            resize: Some(Resize { width: None, height: Some(300), fit: Fit::Inside }),
            quality: 80,
        }
    }

    pub const fn medium() -> Self {
        Self {
            name: "medium",
            resize: Some(Resize { width: Some(900), height: Some(900), fit: Fit::Inside }),
            quality: 85,
        }
    }

    pub const fn original() -> Self {
        Self {
            name: "original",
            resize: None,
            quality: 90,
        }
    }

    /// Square cropped thumbnail used by the old media library.
    pub const fn thumb_cover() -> Self {
        Self {
            name: "thumb",
            resize: Some(Resize { width: Some(300), height: Some(300), fit: Fit::Cover }),
            quality: 80,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Derivative {
    pub name: &'static str,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DerivativeSet {
    pub thumb: Derivative,
    pub medium: Derivative,
    pub original: Derivative,
}

pub fn decode(source: &[u8]) -> AppResult<DynamicImage> {
    Ok(image::load_from_memory(source)?)
}

/// Renders `{thumb, medium, original}` JPEGs from raw source bytes.
pub fn generate(source: &[u8]) -> AppResult<DerivativeSet> {
    let image = decode(source)?;
    Ok(DerivativeSet {
        thumb: render(&image, &DerivativeSpec::thumb())?,
        medium: render(&image, &DerivativeSpec::medium())?,
        original: render(&image, &DerivativeSpec::original())?,
    })
}

/// Renders an arbitrary list of specs, decoding the source once.
pub fn generate_with(source: &[u8], specs: &[DerivativeSpec]) -> AppResult<Vec<Derivative>> {
    let image = decode(source)?;
    specs.iter().map(|spec| render(&image, spec)).collect()
}

pub fn render(image: &DynamicImage, spec: &DerivativeSpec) -> AppResult<Derivative> {
    let resized = match spec.resize {
        None => None,
        Some(resize) => {
            let (src_w, src_h) = (image.width(), image.height());
            match (resize.fit, resize.width, resize.height) {
                (Fit::Cover, Some(w), Some(h)) => {
                    Some(image.resize_to_fill(w, h, FilterType::Lanczos3))
                }
                _ => {
                    let (w, h) = inside_dimensions(src_w, src_h, resize.width, resize.height);
                    if (w, h) == (src_w, src_h) {
                        None
                    } else {
                        Some(image.resize_exact(w, h, FilterType::Lanczos3))
                    }
                }
            }
        }
    };
    let image = resized.as_ref().unwrap_or(image);

    let rgb = flatten(image);
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, spec.quality)
        .encode_image(&rgb)
        .map_err(|e| AppError::Internal(format!("JPEG encode failed for {}: {}", spec.name, e)))?;

    Ok(Derivative {
        name: spec.name,
        bytes,
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Target size for a `fit=inside` resize: aspect preserved, never enlarged.
pub fn inside_dimensions(
    src_w: u32,
    src_h: u32,
    max_w: Option<u32>,
    max_h: Option<u32>,
) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (src_w, src_h);
    }

    let scale_w = max_w.map(|w| w as f64 / src_w as f64);
    let scale_h = max_h.map(|h| h as f64 / src_h as f64);
    let scale = match (scale_w, scale_h) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => 1.0,
    }
    .min(1.0);

    let w = ((src_w as f64 * scale).round() as u32).max(1);
    let h = ((src_h as f64 * scale).round() as u32).max(1);
    (w, h)
}

fn flatten(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let mix = |c: u8, bg: u8| ((c as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8;
        image::Rgb([
            mix(r, FLATTEN_BACKGROUND[0]),
            mix(g, FLATTEN_BACKGROUND[1]),
            mix(b, FLATTEN_BACKGROUND[2]),
        ])
    })
}
