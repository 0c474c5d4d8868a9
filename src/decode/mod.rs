//! Shared-thumbnail decoder.
//!
//! One decode per image, sized to the maximum target of the enabled
//! downstream consumers; each consumer then downscales further through its
//! own profile. RAW files go through embedded-preview extraction, standard
//! formats through the image crate.

pub mod raw_preview;

use image::{imageops::FilterType, DynamicImage};
use std::path::Path;

use crate::config::{Resampling, RAW_EXTENSIONS};
use crate::error::PipelineError;

/// Whether the path carries a camera-RAW extension.
pub fn is_raw_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_lowercase();
            RAW_EXTENSIONS.iter().any(|r| *r == lower)
        })
        .unwrap_or(false)
}

/// Decode an image to an RGB thumbnail no larger than `target_size` on the
/// longest side. Returns None on unrecoverable decode; never panics.
///
/// RAW previews come out of the camera already rotated, so orientation is
/// only applied for standard formats (read from the original file, not from
/// any re-encoded preview).
pub fn decode(path: &Path, target_size: u32) -> Option<DynamicImage> {
    let result = if is_raw_extension(path) {
        decode_raw(path, target_size)
    } else {
        decode_standard(path, target_size)
    };

    match result {
        Ok(img) => Some(img),
        Err(e) => {
            let err = PipelineError::Decode {
                path: path.display().to_string(),
                reason: e.to_string(),
            };
            tracing::warn!(category = err.category(), "{err}");
            None
        }
    }
}

fn decode_raw(path: &Path, target_size: u32) -> anyhow::Result<DynamicImage> {
    let preview = raw_preview::extract_preview(path)?
        .ok_or_else(|| anyhow::anyhow!("No extractable preview"))?;
    Ok(shrink_to(preview, target_size, FilterType::Lanczos3).to_rgb8().into())
}

fn decode_standard(path: &Path, target_size: u32) -> anyhow::Result<DynamicImage> {
    let img = image::open(path)?;
    let orientation = read_exif_orientation(path);
    let oriented = apply_orientation(img, orientation);
    Ok(shrink_to(oriented, target_size, FilterType::Lanczos3).to_rgb8().into())
}

/// Downscale so the longest side is at most `target_size`; smaller images
/// pass through unchanged.
pub fn shrink_to(img: DynamicImage, target_size: u32, filter: FilterType) -> DynamicImage {
    if target_size == 0 {
        return img;
    }
    let (w, h) = (img.width(), img.height());
    if w.max(h) <= target_size {
        img
    } else {
        img.resize(target_size, target_size, filter)
    }
}

/// Per-profile resample applied by each consumer on the shared thumbnail.
pub fn resample_for_profile(img: &DynamicImage, target_size: u32, resampling: Resampling) -> DynamicImage {
    shrink_to(img.clone(), target_size, filter_for(resampling))
}

pub fn filter_for(resampling: Resampling) -> FilterType {
    match resampling {
        Resampling::Lanczos => FilterType::Lanczos3,
        Resampling::Bilinear => FilterType::Triangle,
        // The image crate has no box filter; Triangle is the closest match
        // for moderate downscales. The technical scorer does its own block
        // average on the grayscale buffer.
        Resampling::Area => FilterType::Triangle,
        Resampling::Nearest => FilterType::Nearest,
    }
}

/// EXIF orientation (tag 0x0112) read from the original file, defaulting to 1.
pub fn read_exif_orientation(path: &Path) -> u16 {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return 1,
    };

    let mut reader = std::io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(e) => e,
        Err(_) => return 1,
    };

    if let Some(field) = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY) {
        if let exif::Value::Short(ref v) = field.value {
            if let Some(&orientation) = v.first() {
                if (1..=8).contains(&orientation) {
                    return orientation;
                }
            }
        }
    }
    1
}

/// Standard 8-value EXIF orientation table.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
