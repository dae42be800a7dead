use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::types::{RegionOfInterest, ScanSource};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("Image too small to crop a region of interest ({width}x{height})")]
    InvalidRegion { width: u32, height: u32 },
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

/// Load an image file, normalize it for `source`, and return PNG bytes ready for OCR.
pub fn prepare_for_ocr(
    path: &Path,
    source: ScanSource,
    max_upload_dimension: u32,
) -> Result<Vec<u8>, PreprocessError> {
    let img = image::open(path)?.to_rgba8();
    prepare_frame(&img, source, max_upload_dimension)
}

/// Decode raw image bytes (JPEG / PNG / WEBP / …) and return normalized PNG bytes.
pub fn prepare_for_ocr_from_bytes(
    data: &[u8],
    source: ScanSource,
    max_upload_dimension: u32,
) -> Result<Vec<u8>, PreprocessError> {
    let img = image::load_from_memory(data)?.to_rgba8();
    prepare_frame(&img, source, max_upload_dimension)
}

/// Normalize an already-decoded frame and encode it as PNG.
pub fn prepare_frame(
    frame: &RgbaImage,
    source: ScanSource,
    max_upload_dimension: u32,
) -> Result<Vec<u8>, PreprocessError> {
    let normalized = match source {
        ScanSource::Capture => normalize_capture(frame)?,
        ScanSource::Upload => normalize_upload(frame, max_upload_dimension)?,
    };
    encode_as_png(normalized)
}

/// Camera path: crop the centered guide box, then grayscale.
pub fn normalize_capture(frame: &RgbaImage) -> Result<RgbaImage, PreprocessError> {
    ensure_not_empty(frame)?;
    let (width, height) = frame.dimensions();
    let roi = RegionOfInterest::centered(width, height)
        .ok_or(PreprocessError::InvalidRegion { width, height })?;
    tracing::debug!(width, height, ?roi, "cropping capture frame");

    let cropped = imageops::crop_imm(frame, roi.x, roi.y, roi.width, roi.height).to_image();
    Ok(grayscale(&cropped))
}

/// Upload path: bound the size, then grayscale the whole frame. No crop.
pub fn normalize_upload(
    frame: &RgbaImage,
    max_dimension: u32,
) -> Result<RgbaImage, PreprocessError> {
    ensure_not_empty(frame)?;
    match downsampled_size(frame.width(), frame.height(), max_dimension) {
        Some((w, h)) => {
            tracing::debug!(
                from_width = frame.width(),
                from_height = frame.height(),
                to_width = w,
                to_height = h,
                "downsampling upload"
            );
            let resized = imageops::resize(frame, w, h, FilterType::Lanczos3);
            Ok(grayscale(&resized))
        }
        None => Ok(grayscale(frame)),
    }
}

/// Target size when either side exceeds `max_dimension`, keeping the aspect
/// ratio with the larger side pinned to `max_dimension`. Square images pin
/// the height, which lands on the same size.
pub fn downsampled_size(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    if width <= max_dimension && height <= max_dimension {
        return None;
    }
    let scaled = |side: u32, larger: u32| -> u32 {
        let v = (f64::from(side) * f64::from(max_dimension) / f64::from(larger)).round();
        (v as u32).max(1)
    };
    if width > height {
        Some((max_dimension, scaled(height, width)))
    } else {
        Some((scaled(width, height), max_dimension))
    }
}

/// Replace R, G and B with the pixel's luma; alpha is carried over untouched.
/// No thresholding here: the recognizer binarizes adaptively on its own.
pub fn grayscale(img: &RgbaImage) -> RgbaImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b, a] = img.get_pixel(x, y).0;
        let l = luma(r, g, b);
        Rgba([l, l, l, a])
    })
}

/// Rec. 601 luma, rounded to the nearest channel value with ties to even.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    let l = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
    l.round_ties_even().clamp(0.0, 255.0) as u8
}

fn ensure_not_empty(frame: &RgbaImage) -> Result<(), PreprocessError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessError::EmptyImage { width, height });
    }
    Ok(())
}

pub fn encode_as_png(img: RgbaImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}
