//! Semantic-text embedding backend (CLIP ViT-B/32, ONNX Runtime).
//!
//! The image branch feeds the enrichment pipeline; the text branch serves
//! catalog search and is loaded lazily on first use.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::sync::{Mutex, OnceLock};

use crate::config::ModelsRepositoryConfig;
use super::repository::ensure_model;
use super::{guard_embedding, preprocess_nchw, CLIP_MEAN, CLIP_STD};

const INPUT_SIZE: u32 = 224;

/// CLIP visual encoder session
static VISUAL_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();

/// CLIP text encoder session (search only)
static TEXT_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();

/// Upstream ONNX export of the ViT-B/32 visual encoder.
const VISUAL_UPSTREAM: &str =
    "https://huggingface.co/Qdrant/clip-ViT-B-32-vision/resolve/main/model.onnx";
const TEXT_UPSTREAM: &str =
    "https://huggingface.co/Qdrant/clip-ViT-B-32-text/resolve/main/model.onnx";

pub fn init_visual_model(repo: &ModelsRepositoryConfig) -> Result<()> {
    if VISUAL_MODEL.get().is_some() {
        return Ok(());
    }

    let model_path = ensure_model(repo, "clip", "visual.onnx", VISUAL_UPSTREAM)?;

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(&model_path)?;

    let _ = VISUAL_MODEL.set(Mutex::new(session));
    Ok(())
}

pub fn init_text_model(repo: &ModelsRepositoryConfig) -> Result<()> {
    if TEXT_MODEL.get().is_some() {
        return Ok(());
    }

    let model_path = ensure_model(repo, "clip", "text.onnx", TEXT_UPSTREAM)?;

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(&model_path)?;

    let _ = TEXT_MODEL.set(Mutex::new(session));
    Ok(())
}

pub fn visual_model_ready() -> bool {
    VISUAL_MODEL.get().is_some()
}

/// Run the visual encoder and return the raw pooled feature.
/// Normalization and the NaN guard happen in the bank.
pub fn embed_image(img: &DynamicImage) -> Result<Vec<f32>> {
    let mut model = VISUAL_MODEL
        .get()
        .ok_or_else(|| anyhow!("CLIP visual model not initialized"))?
        .lock()
        .map_err(|e| anyhow!("Failed to lock CLIP model: {}", e))?;

    let input_data = preprocess_nchw(
        img,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
        CLIP_MEAN,
        CLIP_STD,
    );

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = model.run(ort::inputs!["pixel_values" => input_tensor])?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("No embedding output"))?;

    let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

    Ok(embedding_data.to_vec())
}

/// Embed a search query. Returns a unit-norm vector comparable to the
/// pipeline's image embeddings.
pub fn embed_text(repo: &ModelsRepositoryConfig, text: &str) -> Result<Vec<f32>> {
    if TEXT_MODEL.get().is_none() {
        init_text_model(repo)?;
    }

    let mut model = TEXT_MODEL
        .get()
        .ok_or_else(|| anyhow!("CLIP text model not initialized"))?
        .lock()
        .map_err(|e| anyhow!("Failed to lock CLIP text model: {}", e))?;

    let tokens = simple_tokenize(text);

    // Pad/truncate to CLIP's 77-token context window.
    let mut input_ids = vec![49406i64]; // start token
    input_ids.extend(tokens.iter().take(75).cloned());
    input_ids.push(49407); // end token
    while input_ids.len() < 77 {
        input_ids.push(0);
    }

    let input_tensor = Tensor::from_array(([1usize, 77], input_ids.into_boxed_slice()))?;

    let outputs = model.run(ort::inputs!["input_ids" => input_tensor])?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("No embedding output"))?;

    let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

    guard_embedding(embedding_data.to_vec(), "clip-text")
        .ok_or_else(|| anyhow!("Text embedding degenerate"))
}

/// Simplified tokenization for common queries (real CLIP uses BPE with a
/// specific vocabulary).
fn simple_tokenize(text: &str) -> Vec<i64> {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .take(75)
        .map(|c| c as i64)
        .collect()
}

/// Cosine similarity between two embeddings.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_simple_tokenize_caps_length() {
        let long = "parola ".repeat(50);
        assert!(simple_tokenize(&long).len() <= 75);
    }

    #[test]
    fn test_embed_image_requires_init() {
        // Without a loaded session the call must error, not panic.
        if !visual_model_ready() {
            let img = DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
            assert!(embed_image(&img).is_err());
        }
    }
}
