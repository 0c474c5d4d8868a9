//! The inference bank: independently enable-able model backends sharing one
//! decoded thumbnail.
//!
//! Every backend declares a target profile; the orchestrator decodes once at
//! the maximum enabled target size and each backend downscales further
//! through its own profile. Backends run sequentially (single compute
//! device) and at most once per record.

pub mod aesthetic;
pub mod bioclip;
pub mod clip;
pub mod dinov2;
pub mod repository;
pub mod technical;

use anyhow::Result;
use image::DynamicImage;
use std::path::Path;

use crate::config::{Config, ProfileConfig, Resampling};
use crate::decode;
use crate::error::PipelineError;

fn log_inference_error(model: &'static str, source: anyhow::Error) {
    let err = PipelineError::Inference { model, source };
    tracing::error!(category = err.category(), "{err}");
}

/// Which backends to load at worker startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitializationMode {
    #[default]
    Full,
    LlmOnly,
    BioclipOnly,
}

/// Outcome of one inference pass over a record's thumbnail.
#[derive(Debug, Clone, Default)]
pub struct InferenceOutput {
    pub clip_embedding: Option<Vec<f32>>,
    pub dinov2_embedding: Option<Vec<f32>>,
    pub aesthetic_score: Option<f64>,
    pub technical_score: Option<f64>,
    pub bioclip: Option<bioclip::TaxonomyPrediction>,
}

/// Enabled backends plus their decode profiles.
pub struct ModelBank {
    pub clip_enabled: bool,
    pub dinov2_enabled: bool,
    pub aesthetic_enabled: bool,
    pub technical_enabled: bool,
    pub bioclip_enabled: bool,
    llm_enabled: bool,

    clip_profile: ProfileConfig,
    dinov2_profile: ProfileConfig,
    aesthetic_profile: ProfileConfig,
    technical_profile: ProfileConfig,
    bioclip_profile: ProfileConfig,
    llm_profile: ProfileConfig,

    bioclip_top_k: usize,
    bioclip_threshold: f32,
}

impl ModelBank {
    /// Resolve enabled backends from configuration and eagerly load their
    /// sessions. Loading failures disable the backend rather than aborting.
    pub fn init(config: &Config, mode: InitializationMode) -> Result<Self> {
        let models = &config.embedding.models;
        let master = config.embedding.enabled;

        let restrict = |wanted: bool| match mode {
            InitializationMode::Full => wanted,
            InitializationMode::LlmOnly => false,
            InitializationMode::BioclipOnly => false,
        };

        let mut bank = Self {
            clip_enabled: master && restrict(models.clip.enabled),
            dinov2_enabled: master && restrict(models.dinov2.enabled),
            aesthetic_enabled: master && restrict(models.aesthetic.enabled),
            technical_enabled: master && restrict(models.technical.enabled),
            bioclip_enabled: master
                && models.bioclip.enabled
                && mode != InitializationMode::LlmOnly,
            llm_enabled: models.llm_vision.enabled && mode != InitializationMode::BioclipOnly,

            clip_profile: profile_or_default(config, "clip", 224, Resampling::Lanczos),
            dinov2_profile: profile_or_default(config, "dinov2", 518, Resampling::Lanczos),
            aesthetic_profile: profile_or_default(config, "aesthetic", 224, Resampling::Bilinear),
            technical_profile: profile_or_default(config, "technical", 1024, Resampling::Area),
            bioclip_profile: profile_or_default(config, "bioclip", 224, Resampling::Lanczos),
            llm_profile: profile_or_default(config, "llm_vision", 512, Resampling::Lanczos),

            bioclip_top_k: models.bioclip.max_tags,
            bioclip_threshold: models.bioclip.threshold,
        };

        let repo = &config.models_repository;

        if bank.clip_enabled || bank.aesthetic_enabled {
            if let Err(e) = clip::init_visual_model(repo) {
                tracing::error!(error = %e, "CLIP visual model unavailable");
                bank.clip_enabled = false;
                bank.aesthetic_enabled = false;
            }
        }
        if bank.aesthetic_enabled {
            aesthetic::init_head(repo);
        }
        if bank.dinov2_enabled {
            if let Err(e) = dinov2::init_model(repo) {
                tracing::error!(error = %e, "DINOv2 model unavailable");
                bank.dinov2_enabled = false;
            }
        }
        if bank.bioclip_enabled {
            if let Err(e) = bioclip::init_model(repo) {
                tracing::error!(error = %e, "BioCLIP model unavailable");
                bank.bioclip_enabled = false;
            }
        }

        Ok(bank)
    }

    pub fn llm_enabled(&self) -> bool {
        self.llm_enabled
    }

    /// Largest decode target over the enabled thumbnail consumers.
    /// Technical reads the original path and does not participate.
    pub fn max_target_size(&self) -> u32 {
        let mut size = 0;
        if self.clip_enabled {
            size = size.max(self.clip_profile.target_size);
        }
        if self.dinov2_enabled {
            size = size.max(self.dinov2_profile.target_size);
        }
        if self.aesthetic_enabled {
            size = size.max(self.aesthetic_profile.target_size);
        }
        if self.bioclip_enabled {
            size = size.max(self.bioclip_profile.target_size);
        }
        if self.llm_enabled {
            size = size.max(self.llm_profile.target_size);
        }
        size
    }

    /// True when any backend needs the shared thumbnail.
    pub fn any_thumbnail_consumer(&self) -> bool {
        self.max_target_size() > 0
    }

    /// The LLM payload resample target.
    pub fn llm_target_size(&self) -> u32 {
        self.llm_profile.target_size
    }

    /// Run every enabled backend once over the shared thumbnail. Errors are
    /// recovered per backend: the field stays None and the rest proceed.
    pub fn infer(&self, thumbnail: Option<&DynamicImage>, original_path: &Path, is_raw: bool) -> InferenceOutput {
        let mut output = InferenceOutput::default();

        if let Some(img) = thumbnail {
            if self.clip_enabled {
                let input = decode::resample_for_profile(
                    img,
                    self.clip_profile.target_size,
                    self.clip_profile.resampling,
                );
                match clip::embed_image(&input) {
                    Ok(embedding) => output.clip_embedding = guard_embedding(embedding, "clip"),
                    Err(e) => log_inference_error("clip", e),
                }
            }

            if self.dinov2_enabled {
                let input = decode::resample_for_profile(
                    img,
                    self.dinov2_profile.target_size,
                    self.dinov2_profile.resampling,
                );
                match dinov2::embed_image(&input) {
                    Ok(embedding) => output.dinov2_embedding = guard_embedding(embedding, "dinov2"),
                    Err(e) => log_inference_error("dinov2", e),
                }
            }

            if self.aesthetic_enabled {
                let input = decode::resample_for_profile(
                    img,
                    self.aesthetic_profile.target_size,
                    self.aesthetic_profile.resampling,
                );
                match aesthetic::score_image(&input) {
                    Ok(score) => output.aesthetic_score = Some(score),
                    Err(e) => log_inference_error("aesthetic", e),
                }
            }

            if self.bioclip_enabled {
                let input = decode::resample_for_profile(
                    img,
                    self.bioclip_profile.target_size,
                    self.bioclip_profile.resampling,
                );
                match bioclip::classify(&input, self.bioclip_top_k, self.bioclip_threshold) {
                    Ok(prediction) => output.bioclip = prediction,
                    Err(e) => log_inference_error("bioclip", e),
                }
            }
        }

        // Technical reads the original file and is skipped for RAW sources.
        if self.technical_enabled && !is_raw {
            let optimized = self.technical_profile.mode.as_deref() == Some("optimized");
            let max_size = self.technical_profile.max_size.unwrap_or(1024);
            match technical::score_file(original_path, optimized, max_size) {
                Ok(score) => output.technical_score = Some(score),
                Err(e) => log_inference_error("technical", e),
            }
        }

        output
    }
}

fn profile_or_default(config: &Config, name: &str, target_size: u32, resampling: Resampling) -> ProfileConfig {
    config
        .image_optimization
        .profile(name)
        .cloned()
        .unwrap_or(ProfileConfig {
            target_size,
            resampling,
            mode: None,
            max_size: None,
        })
}

/// L2-normalize and NaN-check an embedding; any non-finite component or a
/// zero norm drops the whole vector.
pub fn guard_embedding(embedding: Vec<f32>, model: &str) -> Option<Vec<f32>> {
    if embedding.iter().any(|v| !v.is_finite()) {
        tracing::error!(model, "Embedding contains NaN/Inf, dropping");
        return None;
    }

    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        tracing::error!(model, "Embedding has zero norm, dropping");
        return None;
    }

    Some(embedding.iter().map(|x| x / norm).collect())
}

/// Convert an RGB thumbnail to a normalized NCHW tensor buffer.
/// The image is resized exactly to `size` x `size` with the given filter.
pub(crate) fn preprocess_nchw(
    img: &DynamicImage,
    size: u32,
    filter: image::imageops::FilterType,
    mean: [f32; 3],
    std: [f32; 3],
) -> Vec<f32> {
    let resized = img.resize_exact(size, size, filter);
    let rgb = resized.to_rgb8();
    let n = (size * size) as usize;

    let mut input_data = vec![0.0f32; 3 * n];
    for y in 0..size as usize {
        for x in 0..size as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * size as usize + x;
            input_data[idx] = ((pixel[0] as f32 / 255.0) - mean[0]) / std[0];
            input_data[n + idx] = ((pixel[1] as f32 / 255.0) - mean[1]) / std[1];
            input_data[2 * n + idx] = ((pixel[2] as f32 / 255.0) - mean[2]) / std[2];
        }
    }

    input_data
}

/// ImageNet normalization constants shared by the CLIP-family encoders.
pub(crate) const CLIP_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
pub(crate) const CLIP_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

/// Standard ImageNet statistics used by DINOv2.
pub(crate) const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub(crate) const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_embedding_normalizes() {
        let normalized = guard_embedding(vec![3.0, 4.0], "test").unwrap();
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_guard_embedding_rejects_nan() {
        assert!(guard_embedding(vec![1.0, f32::NAN], "test").is_none());
        assert!(guard_embedding(vec![f32::INFINITY, 0.0], "test").is_none());
        assert!(guard_embedding(vec![0.0, 0.0], "test").is_none());
    }

    #[test]
    fn test_preprocess_shape() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            64,
            32,
            image::Rgb([255, 0, 0]),
        ));
        let data = preprocess_nchw(
            &img,
            224,
            image::imageops::FilterType::Triangle,
            CLIP_MEAN,
            CLIP_STD,
        );
        assert_eq!(data.len(), 3 * 224 * 224);
        // Red channel is high after normalization, green/blue negative.
        assert!(data[0] > 1.0);
        assert!(data[224 * 224] < 0.0);
    }
}
