//! Aesthetic scoring: a linear head over the CLIP pooler output.
//!
//! The reported score is `10 * sigmoid(r)` rounded to two decimals. When no
//! pretrained head file is available the head is default-initialized
//! (deterministic Xavier, zero bias), which gives a stable mapping that is
//! only comparable within one installation.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::config::ModelsRepositoryConfig;
use crate::record::round2;
use super::clip;
use super::repository::ensure_model;

const UPSTREAM: &str =
    "https://huggingface.co/fotodex/aesthetic-head/resolve/main/head.json";

/// Fixed seed so a default-initialized head scores identically across runs.
const XAVIER_SEED: u64 = 0x5eed_f0d0_7e4a_0001;

#[derive(Debug, Clone, Deserialize)]
struct Head {
    weights: Vec<f32>,
    bias: f32,
}

static PRETRAINED: OnceLock<Option<Head>> = OnceLock::new();
static FALLBACK: OnceLock<Head> = OnceLock::new();

/// Try to load the pretrained head; absence is not an error.
pub fn init_head(repo: &ModelsRepositoryConfig) {
    let head = match ensure_model(repo, "aesthetic", "head.json", UPSTREAM) {
        Ok(path) => match load_head(&path) {
            Ok(head) => Some(head),
            Err(e) => {
                tracing::warn!(error = %e, "Aesthetic head unreadable, using default init");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "No pretrained aesthetic head, using default init");
            None
        }
    };
    let _ = PRETRAINED.set(head);
}

fn load_head(path: &std::path::Path) -> Result<Head> {
    let content = std::fs::read_to_string(path)?;
    let head: Head = serde_json::from_str(&content)?;
    if head.weights.is_empty() {
        return Err(anyhow!("Head has no weights"));
    }
    Ok(head)
}

/// Score an image: CLIP pooler output through the head, sigmoid-mapped to
/// [0, 10].
pub fn score_image(img: &DynamicImage) -> Result<f64> {
    let feature = clip::embed_image(img)?;
    Ok(score_feature(&feature))
}

/// Deterministic head application; exposed separately for tests.
pub fn score_feature(feature: &[f32]) -> f64 {
    let raw = match PRETRAINED.get().and_then(|h| h.as_ref()) {
        Some(head) if head.weights.len() == feature.len() => apply_head(head, feature),
        _ => {
            let head = FALLBACK.get_or_init(|| xavier_head(feature.len()));
            apply_head(head, feature)
        }
    };
    round2(10.0 * sigmoid(raw as f64))
}

fn apply_head(head: &Head, feature: &[f32]) -> f32 {
    let n = head.weights.len().min(feature.len());
    let dot: f32 = head.weights[..n]
        .iter()
        .zip(&feature[..n])
        .map(|(w, f)| w * f)
        .sum();
    dot + head.bias
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Xavier-uniform weights from a fixed-seed xorshift, zero bias.
fn xavier_head(dim: usize) -> Head {
    let bound = (6.0 / (dim as f64 + 1.0)).sqrt() as f32;
    let mut state = XAVIER_SEED;
    let weights = (0..dim)
        .map(|_| {
            state = xorshift64(state);
            // Map to [-bound, bound)
            let unit = (state >> 11) as f32 / (1u64 << 53) as f32;
            (unit * 2.0 - 1.0) * bound
        })
        .collect();

    Head { weights, bias: 0.0 }
}

fn xorshift64(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_bounds() {
        assert!(sigmoid(-100.0) < 1e-6);
        assert!(sigmoid(100.0) > 1.0 - 1e-6);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_score_feature_in_range() {
        let feature = vec![0.3f32; 512];
        let score = score_feature(&feature);
        assert!((0.0..=10.0).contains(&score), "score {score}");
    }

    #[test]
    fn test_score_feature_deterministic() {
        let feature: Vec<f32> = (0..512).map(|i| (i as f32 * 0.01).sin()).collect();
        assert_eq!(score_feature(&feature), score_feature(&feature));
    }

    #[test]
    fn test_xavier_head_stable_across_calls() {
        let a = xavier_head(16);
        let b = xavier_head(16);
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.bias, 0.0);
        let bound = (6.0 / 17.0_f64).sqrt() as f32;
        assert!(a.weights.iter().all(|w| w.abs() <= bound));
    }

    #[test]
    fn test_apply_head_tolerates_dim_mismatch() {
        let head = Head { weights: vec![1.0, 1.0], bias: 0.5 };
        let raw = apply_head(&head, &[2.0, 3.0, 4.0]);
        assert!((raw - 5.5).abs() < 1e-6);
    }
}
