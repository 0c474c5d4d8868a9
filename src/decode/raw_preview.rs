//! Embedded preview extraction for camera RAW files.
//!
//! Priority: largest embedded JPEG preview, then a demosaiced half-size
//! grayscale render via rawloader. Returns None when neither is available.

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GrayImage};
use rawloader::{RawImage, RawImageData};
use std::path::Path;

/// Extract the best available preview from a RAW file.
pub fn extract_preview(path: &Path) -> Result<Option<DynamicImage>> {
    if let Some(jpeg) = largest_embedded_jpeg(path)? {
        let decoded = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            image::load_from_memory(&jpeg)
        }));
        match decoded {
            Ok(Ok(img)) => return Ok(Some(img)),
            Ok(Err(e)) => {
                tracing::debug!(path = %path.display(), error = %e, "Embedded JPEG decode failed, trying half-size render");
            }
            Err(_) => {
                tracing::debug!(path = %path.display(), "Embedded JPEG decoder panicked, trying half-size render");
            }
        }
    }

    match half_size_render(path) {
        Ok(img) => Ok(Some(img)),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Half-size render failed");
            Ok(None)
        }
    }
}

/// Scan the file for JPEG SOI/EOI marker pairs and return the largest span.
/// RAW containers embed one or more previews this way regardless of vendor.
fn largest_embedded_jpeg(path: &Path) -> Result<Option<Vec<u8>>> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read RAW file {}", path.display()))?;

    if data.len() < 4 {
        return Ok(None);
    }

    let mut best: Option<(usize, usize)> = None; // (start, len)
    let mut idx = 0;
    while idx + 1 < data.len() {
        if data[idx] == 0xFF && data[idx + 1] == 0xD8 {
            if let Some(end) = jpeg_end(&data, idx + 2) {
                let len = end - idx;
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((idx, len));
                }
                idx = end;
                continue;
            }
            break;
        }
        idx += 1;
    }

    Ok(best.map(|(start, len)| data[start..start + len].to_vec()))
}

fn jpeg_end(data: &[u8], mut idx: usize) -> Option<usize> {
    while idx + 1 < data.len() {
        if data[idx] == 0xFF && data[idx + 1] == 0xD9 {
            return Some(idx + 2);
        }
        idx += 1;
    }
    None
}

/// Demosaic-free fallback: average the CFA channels into a grayscale frame.
/// Good enough for embeddings when a RAW carries no usable preview.
fn half_size_render(path: &Path) -> Result<DynamicImage> {
    let raw = rawloader::decode_file(path).map_err(|e| anyhow!("rawloader error: {e}"))?;
    raw_to_gray(&raw)
}

fn raw_to_gray(raw: &RawImage) -> Result<DynamicImage> {
    let (crop_top, crop_left, width, height) = cropped_dimensions(raw)?;
    let cpp = raw.cpp.max(1);

    let mut buffer = Vec::with_capacity(width * height);
    match &raw.data {
        RawImageData::Integer(data) => {
            let black = raw.blacklevels.iter().map(|&v| v as f32).sum::<f32>() / 4.0;
            let white = raw.whitelevels.iter().copied().max().unwrap_or(u16::MAX) as f32;
            let scale = (white - black).max(1.0);
            for y in 0..height {
                for x in 0..width {
                    let idx = ((y + crop_top) * raw.width + (x + crop_left)) * cpp;
                    if idx + cpp > data.len() {
                        return Err(anyhow!("RAW buffer shorter than declared dimensions"));
                    }
                    let sum: u32 = data[idx..idx + cpp].iter().map(|&v| v as u32).sum();
                    let sample = sum as f32 / cpp as f32;
                    let norm = ((sample - black) / scale).clamp(0.0, 1.0);
                    buffer.push((norm * 255.0).round() as u8);
                }
            }
        }
        RawImageData::Float(data) => {
            for y in 0..height {
                for x in 0..width {
                    let idx = ((y + crop_top) * raw.width + (x + crop_left)) * cpp;
                    if idx + cpp > data.len() {
                        return Err(anyhow!("RAW buffer shorter than declared dimensions"));
                    }
                    let sum: f32 = data[idx..idx + cpp].iter().sum();
                    let norm = (sum / cpp as f32).clamp(0.0, 1.0);
                    buffer.push((norm * 255.0).round() as u8);
                }
            }
        }
    }

    let gray = GrayImage::from_vec(width as u32, height as u32, buffer)
        .ok_or_else(|| anyhow!("Invalid grayscale buffer"))?;
    Ok(DynamicImage::ImageLuma8(gray))
}

fn cropped_dimensions(raw: &RawImage) -> Result<(usize, usize, usize, usize)> {
    let crop_top = raw.crops.first().copied().unwrap_or(0).min(raw.height);
    let crop_right = raw.crops.get(1).copied().unwrap_or(0).min(raw.width);
    let crop_bottom = raw.crops.get(2).copied().unwrap_or(0).min(raw.height);
    let crop_left = raw.crops.get(3).copied().unwrap_or(0).min(raw.width);

    let width = raw.width.saturating_sub(crop_left + crop_right);
    let height = raw.height.saturating_sub(crop_top + crop_bottom);

    if width == 0 || height == 0 {
        return Err(anyhow!("Invalid RAW dimensions after crop"));
    }

    Ok((crop_top, crop_left, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_largest_embedded_jpeg_picks_biggest() {
        // Two fake JPEG spans inside filler bytes; the second is larger.
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 0xFF, 0xD9]);
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 4, 5, 6, 0xFF, 0xD9]);
        data.extend_from_slice(&[0u8; 4]);

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();

        let jpeg = largest_embedded_jpeg(tmp.path()).unwrap().unwrap();
        assert_eq!(jpeg.len(), 12);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_no_markers_yields_none() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 64]).unwrap();
        assert!(largest_embedded_jpeg(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn test_unterminated_jpeg_yields_none() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3]); // SOI without EOI
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        assert!(largest_embedded_jpeg(tmp.path()).unwrap().is_none());
    }
}
