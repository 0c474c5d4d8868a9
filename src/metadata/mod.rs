//! EXIF/IPTC metadata extraction into the canonical record fields.
//!
//! Extraction is best-effort: unreadable containers or missing tags leave
//! the corresponding fields null and never fail the record.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::PipelineError;
use crate::record::ImageRecord;

/// Windows XP star rating, stored in the TIFF namespace.
const TAG_RATING: exif::Tag = exif::Tag(exif::Context::Tiff, 0x4746);

/// Populate the Technical, Geo, Authorship and Editorial sections of the
/// record from the source file. Fields absent in the source stay null.
pub fn extract_into(path: &Path, record: &mut ImageRecord) {
    if let Ok(meta) = std::fs::metadata(path) {
        record.file_size = Some(meta.len());
    }

    // Container format and pixel dimensions via the image crate; RAW files
    // fall back to the EXIF dimension tags below.
    if let Ok(reader) = image::ImageReader::open(path) {
        if let Some(format) = reader.format() {
            record.format = Some(format!("{:?}", format).to_uppercase());
        }
    }
    if let Ok(reader) = image::ImageReader::open(path) {
        if let Ok((w, h)) = reader.into_dimensions() {
            record.set_dimensions(w, h);
        }
    }
    if record.format.is_none() {
        record.format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_uppercase());
    }

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            let err = PipelineError::Metadata {
                path: path.display().to_string(),
                source: e.into(),
            };
            tracing::debug!(category = err.category(), "{err}");
            return;
        }
    };

    let mut bufreader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut bufreader) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "No EXIF container");
            return;
        }
    };

    apply_exif(&exif, record);
}

fn apply_exif(exif: &exif::Exif, record: &mut ImageRecord) {
    // Camera and lens
    record.camera_make = get_string(exif, exif::Tag::Make);
    record.camera_model = get_string(exif, exif::Tag::Model);
    record.lens_model = get_string(exif, exif::Tag::LensModel);

    // Exposure
    record.focal_length = get_rational(exif, exif::Tag::FocalLength);
    record.focal_length_35mm = get_short(exif, exif::Tag::FocalLengthIn35mmFilm).map(f64::from);
    record.aperture = get_rational(exif, exif::Tag::FNumber);
    record.iso = get_short(exif, exif::Tag::PhotographicSensitivity).map(|v| v as i32);
    record.exposure_bias = get_srational(exif, exif::Tag::ExposureBiasValue);
    record.exposure_mode = get_display(exif, exif::Tag::ExposureProgram);
    record.metering_mode = get_display(exif, exif::Tag::MeteringMode);
    record.white_balance = get_display(exif, exif::Tag::WhiteBalance);
    record.color_space = get_display(exif, exif::Tag::ColorSpace);

    if let Some(field) = exif.get_field(exif::Tag::ExposureTime, exif::In::PRIMARY) {
        if let exif::Value::Rational(ref v) = field.value {
            if let Some(r) = v.first() {
                record.shutter_speed = Some(format_shutter(r.num, r.denom));
            }
        }
    }

    if let Some(flash) = get_short(exif, exif::Tag::Flash) {
        record.flash_used = Some(flash & 1 == 1);
        record.flash_mode = get_display(exif, exif::Tag::Flash);
    }

    if let Some(orientation) = get_short(exif, exif::Tag::Orientation) {
        if (1..=8).contains(&orientation) {
            record.orientation = Some(orientation);
        }
    }

    // Pixel dimensions for containers the image crate cannot parse (RAW)
    if record.width.is_none() {
        let w = get_long(exif, exif::Tag::PixelXDimension)
            .or_else(|| get_long(exif, exif::Tag::ImageWidth));
        let h = get_long(exif, exif::Tag::PixelYDimension)
            .or_else(|| get_long(exif, exif::Tag::ImageLength));
        if let (Some(w), Some(h)) = (w, h) {
            record.set_dimensions(w, h);
        }
    }

    // Dates
    record.datetime_original = get_string(exif, exif::Tag::DateTimeOriginal);
    record.datetime_digitized = get_string(exif, exif::Tag::DateTimeDigitized);
    record.datetime_modified = get_string(exif, exif::Tag::DateTime);

    // Authorship
    record.artist = get_string(exif, exif::Tag::Artist);
    record.copyright = get_string(exif, exif::Tag::Copyright);
    record.software = get_string(exif, exif::Tag::Software);

    // Editorial
    if record.description.is_none() {
        record.description = get_string(exif, exif::Tag::ImageDescription);
    }
    if let Some(rating) = get_short(exif, TAG_RATING) {
        if (1..=5).contains(&rating) {
            record.rating = Some(rating as i32);
        }
    }

    apply_gps(exif, record);
}

fn apply_gps(exif: &exif::Exif, record: &mut ImageRecord) {
    if let (Some(lat_field), Some(lat_ref), Some(lon_field), Some(lon_ref)) = (
        exif.get_field(exif::Tag::GPSLatitude, exif::In::PRIMARY),
        exif.get_field(exif::Tag::GPSLatitudeRef, exif::In::PRIMARY),
        exif.get_field(exif::Tag::GPSLongitude, exif::In::PRIMARY),
        exif.get_field(exif::Tag::GPSLongitudeRef, exif::In::PRIMARY),
    ) {
        if let (exif::Value::Rational(lat_vals), exif::Value::Rational(lon_vals)) =
            (&lat_field.value, &lon_field.value)
        {
            if lat_vals.len() >= 3 && lon_vals.len() >= 3 {
                let lat = dms_to_decimal(
                    lat_vals[0].to_f64(),
                    lat_vals[1].to_f64(),
                    lat_vals[2].to_f64(),
                );
                let lon = dms_to_decimal(
                    lon_vals[0].to_f64(),
                    lon_vals[1].to_f64(),
                    lon_vals[2].to_f64(),
                );

                let lat_ref_str = lat_ref.display_value().to_string();
                let lon_ref_str = lon_ref.display_value().to_string();

                record.gps_latitude = Some(if lat_ref_str.contains('S') { -lat } else { lat });
                record.gps_longitude = Some(if lon_ref_str.contains('W') { -lon } else { lon });
            }
        }
    }

    if let Some(alt) = get_rational(exif, exif::Tag::GPSAltitude) {
        let below_sea = get_byte(exif, exif::Tag::GPSAltitudeRef).map_or(false, |v| v == 1);
        record.gps_altitude = Some(if below_sea { -alt } else { alt });
    }

    record.gps_direction = get_rational(exif, exif::Tag::GPSImgDirection);
}

/// ExposureTime as a canonical textual fraction: "1/250" below one second,
/// "2.5s" at or above.
fn format_shutter(num: u32, denom: u32) -> String {
    if denom == 0 {
        return format!("{num}");
    }
    let seconds = num as f64 / denom as f64;
    if seconds >= 1.0 {
        if seconds.fract() == 0.0 {
            format!("{}s", seconds as u64)
        } else {
            format!("{seconds:.1}s")
        }
    } else if num == 1 {
        format!("1/{denom}")
    } else {
        // Reduce to a 1/x fraction
        let inverse = (denom as f64 / num as f64).round() as u64;
        format!("1/{inverse}")
    }
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

fn get_string(exif: &exif::Exif, tag: exif::Tag) -> Option<String> {
    exif.get_field(tag, exif::In::PRIMARY).map(|field| {
        field
            .display_value()
            .to_string()
            .trim_matches('"')
            .trim()
            .to_string()
    }).filter(|s| !s.is_empty())
}

fn get_display(exif: &exif::Exif, tag: exif::Tag) -> Option<String> {
    exif.get_field(tag, exif::In::PRIMARY)
        .map(|field| field.display_value().with_unit(exif).to_string())
        .filter(|s| !s.is_empty())
}

fn get_rational(exif: &exif::Exif, tag: exif::Tag) -> Option<f64> {
    if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
        if let exif::Value::Rational(ref v) = field.value {
            return v.first().map(|r| r.to_f64());
        }
    }
    None
}

fn get_srational(exif: &exif::Exif, tag: exif::Tag) -> Option<f64> {
    if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
        if let exif::Value::SRational(ref v) = field.value {
            return v.first().map(|r| r.to_f64());
        }
    }
    None
}

fn get_short(exif: &exif::Exif, tag: exif::Tag) -> Option<u16> {
    if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
        if let exif::Value::Short(ref v) = field.value {
            return v.first().copied();
        }
    }
    None
}

fn get_long(exif: &exif::Exif, tag: exif::Tag) -> Option<u32> {
    if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
        match field.value {
            exif::Value::Long(ref v) => return v.first().copied(),
            exif::Value::Short(ref v) => return v.first().map(|&s| s as u32),
            _ => {}
        }
    }
    None
}

fn get_byte(exif: &exif::Exif, tag: exif::Tag) -> Option<u8> {
    if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
        if let exif::Value::Byte(ref v) = field.value {
            return v.first().copied();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_format_shutter() {
        assert_eq!(format_shutter(1, 250), "1/250");
        assert_eq!(format_shutter(10, 2500), "1/250");
        assert_eq!(format_shutter(1, 1), "1s");
        assert_eq!(format_shutter(2, 1), "2s");
        assert_eq!(format_shutter(5, 2), "2.5s");
    }

    #[test]
    fn test_dms_to_decimal() {
        let dec = dms_to_decimal(43.0, 46.0, 10.56);
        assert!((dec - 43.7696).abs() < 0.001);
    }

    #[test]
    fn test_extract_plain_png_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        RgbImage::from_pixel(320, 200, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let mut record = ImageRecord::new(path.to_str().unwrap());
        extract_into(&path, &mut record);

        // No EXIF in a bare PNG, but dimensions and size still land.
        assert_eq!(record.width, Some(320));
        assert_eq!(record.height, Some(200));
        assert!(record.file_size.unwrap() > 0);
        assert_eq!(record.format.as_deref(), Some("PNG"));
        assert!(record.camera_make.is_none());
        assert!(record.gps_latitude.is_none());
    }

    #[test]
    fn test_extract_missing_file_leaves_record_intact() {
        let mut record = ImageRecord::new("/nonexistent/x.jpg");
        extract_into(Path::new("/nonexistent/x.jpg"), &mut record);
        assert!(record.width.is_none());
        assert!(record.camera_make.is_none());
    }
}
