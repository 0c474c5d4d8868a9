//! The canonical catalog record produced for every processed image.

use serde::{Deserialize, Serialize};

/// Agreement between the catalog record and any persisted sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Fresh record, no sidecar written yet.
    #[default]
    Unsynced,
    /// Sidecar written and matching the record.
    PerfectSync,
    /// Record edited after the last sidecar write.
    Dirty,
    /// Fatal inference failure while processing.
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unsynced => "UNSYNCED",
            SyncState::PerfectSync => "PERFECT_SYNC",
            SyncState::Dirty => "DIRTY",
            SyncState::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PERFECT_SYNC" => SyncState::PerfectSync,
            "DIRTY" => SyncState::Dirty,
            "ERROR" => SyncState::Error,
            _ => SyncState::Unsynced,
        }
    }
}

/// The five Adobe color labels, plus empty.
pub const COLOR_LABELS: &[&str] = &["Red", "Yellow", "Green", "Blue", "Purple"];

/// One fully-enriched catalog record.
///
/// Fields absent in the source file or skipped by configuration are `None`.
#[derive(Debug, Clone, Default)]
pub struct ImageRecord {
    // Identity
    pub filename: String,
    pub filepath: String,
    pub file_hash: Option<String>,
    pub file_size: Option<u64>,
    pub format: Option<String>,
    pub is_raw: bool,

    // Technical
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<f64>,
    pub megapixels: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens_model: Option<String>,
    pub focal_length: Option<f64>,
    pub focal_length_35mm: Option<f64>,
    pub aperture: Option<f64>,
    pub shutter_speed: Option<String>,
    pub iso: Option<i32>,
    pub exposure_mode: Option<String>,
    pub exposure_bias: Option<f64>,
    pub metering_mode: Option<String>,
    pub white_balance: Option<String>,
    pub flash_used: Option<bool>,
    pub flash_mode: Option<String>,
    pub color_space: Option<String>,
    pub orientation: Option<u16>,
    pub datetime_original: Option<String>,
    pub datetime_digitized: Option<String>,
    pub datetime_modified: Option<String>,

    // Geo
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
    pub gps_direction: Option<f64>,
    pub geo_hierarchy: Option<String>,

    // Authorship
    pub artist: Option<String>,
    pub copyright: Option<String>,
    pub software: Option<String>,

    // Editorial
    pub title: Option<String>,
    pub description: Option<String>,
    pub rating: Option<i32>,
    pub color_label: Option<String>,
    pub tags: Vec<String>,

    // AI
    pub clip_embedding: Option<Vec<f32>>,
    pub dinov2_embedding: Option<Vec<f32>>,
    pub aesthetic_score: Option<f64>,
    pub technical_score: Option<f64>,
    pub bioclip_taxonomy: Option<[String; 7]>,
    pub embedding_generated: bool,
    pub llm_generated: bool,

    // Provenance
    pub processed_date: Option<String>,
    pub processing_time: Option<f64>,
    pub app_version: Option<String>,
    pub sync_state: SyncState,
}

impl ImageRecord {
    pub fn new(filepath: &str) -> Self {
        let filename = std::path::Path::new(filepath)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| filepath.to_string());

        Self {
            filename,
            filepath: filepath.to_string(),
            app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            ..Default::default()
        }
    }

    /// Derive aspect ratio and megapixels once dimensions are known.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = Some(width);
        self.height = Some(height);
        if height > 0 {
            self.aspect_ratio = Some(round2(width as f64 / height as f64));
        }
        self.megapixels = Some(round2(width as f64 * height as f64 / 1_000_000.0));
    }

    /// Append a tag unless an equal one (case-insensitive) is already present.
    /// Returns true if the tag was added.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.has_tag(tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    /// Insert a tag at the front, removing any case-insensitive duplicate first.
    pub fn prepend_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() {
            return;
        }
        self.tags.retain(|t| !t.eq_ignore_ascii_case(tag));
        self.tags.insert(0, tag.to_string());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Set the color label if it is one of the five Adobe values; anything
    /// else clears it.
    pub fn set_color_label(&mut self, label: &str) {
        self.color_label = COLOR_LABELS
            .iter()
            .find(|l| l.eq_ignore_ascii_case(label.trim()))
            .map(|l| l.to_string());
    }

    /// Whether any embedding survived inference.
    pub fn any_embedding(&self) -> bool {
        self.clip_embedding.is_some() || self.dinov2_embedding.is_some()
    }
}

/// Deduplicate a tag list case-insensitively, preserving insertion order.
pub fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        if seen.contains(&lower) {
            continue;
        }
        seen.push(lower);
        out.push(trimmed.to_string());
    }
    out
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
