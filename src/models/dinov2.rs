//! Visual-similarity embedding backend (DINOv2, ONNX Runtime).
//!
//! The CLS-token hidden state of the last transformer layer is taken as the
//! image feature.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::sync::{Mutex, OnceLock};

use crate::config::ModelsRepositoryConfig;
use super::repository::ensure_model;
use super::{preprocess_nchw, IMAGENET_MEAN, IMAGENET_STD};

const INPUT_SIZE: u32 = 518;

static MODEL: OnceLock<Mutex<Session>> = OnceLock::new();

const UPSTREAM: &str =
    "https://huggingface.co/sefaburakokcu/dinov2-small-onnx/resolve/main/dinov2_vits14.onnx";

pub fn init_model(repo: &ModelsRepositoryConfig) -> Result<()> {
    if MODEL.get().is_some() {
        return Ok(());
    }

    let model_path = ensure_model(repo, "dinov2", "dinov2.onnx", UPSTREAM)?;

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(&model_path)?;

    let _ = MODEL.set(Mutex::new(session));
    Ok(())
}

pub fn model_ready() -> bool {
    MODEL.get().is_some()
}

/// Run the transformer and return the raw CLS feature. Normalization and
/// the NaN guard happen in the bank.
pub fn embed_image(img: &DynamicImage) -> Result<Vec<f32>> {
    let mut model = MODEL
        .get()
        .ok_or_else(|| anyhow!("DINOv2 model not initialized"))?
        .lock()
        .map_err(|e| anyhow!("Failed to lock DINOv2 model: {}", e))?;

    let input_data = preprocess_nchw(
        img,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
        IMAGENET_MEAN,
        IMAGENET_STD,
    );

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = model.run(ort::inputs!["pixel_values" => input_tensor])?;

    let output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("No hidden-state output"))?;

    let (shape, data) = output.1.try_extract_tensor::<f32>()?;

    extract_cls(&shape, data)
}

/// Pull the CLS token out of a `[batch, tokens, dim]` hidden state. Exports
/// that already pool to `[batch, dim]` pass through unchanged.
fn extract_cls(shape: &[i64], data: &[f32]) -> Result<Vec<f32>> {
    match shape.len() {
        3 => {
            let dim = shape[2] as usize;
            if data.len() < dim {
                return Err(anyhow!("Hidden state shorter than declared dim"));
            }
            // CLS is token 0 of the sequence.
            Ok(data[..dim].to_vec())
        }
        2 => Ok(data.to_vec()),
        other => Err(anyhow!("Unexpected output rank {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_cls_from_sequence() {
        // 1 batch, 3 tokens, dim 4: CLS is the first 4 values.
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let cls = extract_cls(&[1, 3, 4], &data).unwrap();
        assert_eq!(cls, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_extract_cls_pooled_passthrough() {
        let data = vec![0.5f32; 6];
        let cls = extract_cls(&[1, 6], &data).unwrap();
        assert_eq!(cls.len(), 6);
    }

    #[test]
    fn test_extract_cls_bad_rank() {
        assert!(extract_cls(&[6], &[0.0; 6]).is_err());
    }
}
