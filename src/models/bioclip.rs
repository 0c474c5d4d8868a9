//! Biological-taxonomy classifier: a dual-encoder over a fixed species
//! catalogue with precomputed text embeddings.
//!
//! The image feature is matched against the catalogue by cosine similarity,
//! temperature-scaled softmax (factor 100), then top-k selection above a
//! probability threshold. The best survivor's 7-level taxonomy becomes the
//! record's `bioclip_taxonomy`.

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use ndarray::{Array1, Array2};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::Deserialize;
use std::sync::{Mutex, OnceLock};

use crate::config::ModelsRepositoryConfig;
use super::repository::ensure_model;
use super::{guard_embedding, preprocess_nchw, CLIP_MEAN, CLIP_STD};

const INPUT_SIZE: u32 = 224;

/// Softmax temperature factor carried over from the backbone's training
/// regime.
const TEMPERATURE: f32 = 100.0;

static MODEL: OnceLock<Mutex<Session>> = OnceLock::new();
static CATALOGUE: OnceLock<SpeciesCatalogue> = OnceLock::new();

const VISUAL_UPSTREAM: &str =
    "https://huggingface.co/imageomics/bioclip-onnx/resolve/main/visual.onnx";
const SPECIES_UPSTREAM: &str =
    "https://huggingface.co/imageomics/bioclip-onnx/resolve/main/species.json";
const EMBEDDINGS_UPSTREAM: &str =
    "https://huggingface.co/imageomics/bioclip-onnx/resolve/main/text_embeddings.bin";

/// One catalogue row: 7 taxonomy levels plus a vernacular name.
#[derive(Debug, Clone)]
pub struct SpeciesEntry {
    pub levels: [String; 7],
    pub common_name: String,
}

impl SpeciesEntry {
    /// Latin binomial from genus and species epithet, when both exist.
    pub fn latin_name(&self) -> Option<String> {
        let genus = self.levels[5].trim();
        let epithet = self.levels[6].trim();
        if genus.is_empty() {
            return None;
        }
        if epithet.is_empty() {
            Some(genus.to_string())
        } else {
            Some(format!("{genus} {epithet}"))
        }
    }

    /// Taxonomic class (third level), source of the LLM category hint.
    pub fn class_level(&self) -> &str {
        &self.levels[2]
    }
}

/// A surviving prediction with its softmax probability.
#[derive(Debug, Clone)]
pub struct SpeciesScore {
    pub entry: SpeciesEntry,
    pub confidence: f32,
}

/// Classifier output: the best prediction plus the other top-k survivors.
#[derive(Debug, Clone)]
pub struct TaxonomyPrediction {
    pub best: SpeciesScore,
    pub candidates: Vec<SpeciesScore>,
}

struct SpeciesCatalogue {
    entries: Vec<SpeciesEntry>,
    /// Unit-norm text embeddings, shaped (N, d).
    embeddings: Array2<f32>,
}

#[derive(Debug, Deserialize)]
struct SpeciesFileEntry {
    taxonomy: String,
    #[serde(default)]
    common_name: String,
}

pub fn init_model(repo: &ModelsRepositoryConfig) -> Result<()> {
    if MODEL.get().is_some() && CATALOGUE.get().is_some() {
        return Ok(());
    }

    let model_path = ensure_model(repo, "bioclip", "visual.onnx", VISUAL_UPSTREAM)?;
    let species_path = ensure_model(repo, "bioclip", "species.json", SPECIES_UPSTREAM)?;
    let embeddings_path = ensure_model(repo, "bioclip", "text_embeddings.bin", EMBEDDINGS_UPSTREAM)?;

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(&model_path)?;

    let catalogue = load_catalogue(&species_path, &embeddings_path)?;
    tracing::info!(species = catalogue.entries.len(), "BioCLIP catalogue loaded");

    let _ = MODEL.set(Mutex::new(session));
    let _ = CATALOGUE.set(catalogue);
    Ok(())
}

pub fn model_ready() -> bool {
    MODEL.get().is_some() && CATALOGUE.get().is_some()
}

fn load_catalogue(
    species_path: &std::path::Path,
    embeddings_path: &std::path::Path,
) -> Result<SpeciesCatalogue> {
    let content = std::fs::read_to_string(species_path)
        .with_context(|| format!("Failed to read {}", species_path.display()))?;
    let raw: Vec<SpeciesFileEntry> = serde_json::from_str(&content)?;

    let entries: Vec<SpeciesEntry> = raw
        .into_iter()
        .map(|e| SpeciesEntry {
            levels: parse_taxonomy(&e.taxonomy),
            common_name: e.common_name,
        })
        .collect();

    if entries.is_empty() {
        return Err(anyhow!("Species catalogue is empty"));
    }

    let embeddings = load_embedding_matrix(embeddings_path, entries.len())?;
    Ok(SpeciesCatalogue { entries, embeddings })
}

/// Split a `kingdom;phylum;class;order;family;genus;epithet` string into a
/// fixed 7-level array; missing tail levels stay empty.
pub fn parse_taxonomy(taxonomy: &str) -> [String; 7] {
    let mut levels: [String; 7] = Default::default();
    for (i, part) in taxonomy.split(';').take(7).enumerate() {
        levels[i] = part.trim().to_string();
    }
    levels
}

/// Binary matrix file: two u32 LE dimensions followed by f32 LE data.
/// Accepts either (N, d) or (d, N) orientation and transposes the latter.
fn load_embedding_matrix(path: &std::path::Path, n_species: usize) -> Result<Array2<f32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.len() < 8 {
        return Err(anyhow!("Embedding matrix file truncated"));
    }

    let rows = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let cols = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let expected = 8 + rows * cols * 4;
    if bytes.len() != expected {
        return Err(anyhow!(
            "Embedding matrix size mismatch: header says {rows}x{cols}, file has {} bytes",
            bytes.len()
        ));
    }

    let data: Vec<f32> = bytes[8..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();

    let matrix = Array2::from_shape_vec((rows, cols), data)?;

    if rows == n_species {
        Ok(matrix)
    } else if cols == n_species {
        Ok(matrix.t().to_owned())
    } else {
        Err(anyhow!(
            "Embedding matrix {rows}x{cols} does not match {n_species} species"
        ))
    }
}

/// Classify a thumbnail. None when no prediction clears the threshold.
pub fn classify(img: &DynamicImage, top_k: usize, threshold: f32) -> Result<Option<TaxonomyPrediction>> {
    let catalogue = CATALOGUE
        .get()
        .ok_or_else(|| anyhow!("BioCLIP catalogue not initialized"))?;

    let feature = encode_image(img)?;
    let feature = guard_embedding(feature, "bioclip")
        .ok_or_else(|| anyhow!("BioCLIP feature degenerate"))?;

    Ok(rank_species(&feature, catalogue, top_k, threshold))
}

fn encode_image(img: &DynamicImage) -> Result<Vec<f32>> {
    let mut model = MODEL
        .get()
        .ok_or_else(|| anyhow!("BioCLIP model not initialized"))?
        .lock()
        .map_err(|e| anyhow!("Failed to lock BioCLIP model: {}", e))?;

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

    let output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("No feature output"))?;

    let (_shape, data) = output.1.try_extract_tensor::<f32>()?;
    Ok(data.to_vec())
}

/// Pure ranking step: similarity, temperature softmax, top-k over threshold.
fn rank_species(
    feature: &[f32],
    catalogue: &SpeciesCatalogue,
    top_k: usize,
    threshold: f32,
) -> Option<TaxonomyPrediction> {
    let d = catalogue.embeddings.ncols();
    if feature.len() != d {
        tracing::error!(
            feature_dim = feature.len(),
            catalogue_dim = d,
            "BioCLIP dimension mismatch"
        );
        return None;
    }

    let f = Array1::from_vec(feature.to_vec());
    let similarities = catalogue.embeddings.dot(&f);
    let probabilities = softmax_scaled(similarities.as_slice()?, TEMPERATURE);

    let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let survivors: Vec<SpeciesScore> = ranked
        .into_iter()
        .take(top_k.max(1))
        .filter(|&(_, p)| p >= threshold)
        .map(|(i, p)| SpeciesScore {
            entry: catalogue.entries[i].clone(),
            confidence: p,
        })
        .collect();

    let best = survivors.first()?.clone();
    Some(TaxonomyPrediction {
        best,
        candidates: survivors,
    })
}

fn softmax_scaled(logits: &[f32], factor: f32) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| ((v - max) * factor).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; logits.len()];
    }
    exps.iter().map(|&v| v / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(taxonomy: &str, common: &str) -> SpeciesEntry {
        SpeciesEntry {
            levels: parse_taxonomy(taxonomy),
            common_name: common.to_string(),
        }
    }

    fn test_catalogue() -> SpeciesCatalogue {
        let entries = vec![
            entry(
                "Animalia;Chordata;Aves;Passeriformes;Passeridae;Passer;domesticus",
                "House Sparrow",
            ),
            entry(
                "Animalia;Chordata;Mammalia;Carnivora;Felidae;Felis;catus",
                "Domestic Cat",
            ),
            entry(
                "Plantae;Tracheophyta;Magnoliopsida;Rosales;Rosaceae;Rosa;canina",
                "Dog Rose",
            ),
        ];
        // Orthogonal unit embeddings: each species owns one axis.
        let embeddings = Array2::from_shape_vec(
            (3, 3),
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        )
        .unwrap();
        SpeciesCatalogue { entries, embeddings }
    }

    #[test]
    fn test_parse_taxonomy_full() {
        let levels = parse_taxonomy("Animalia;Chordata;Aves;Passeriformes;Passeridae;Passer;domesticus");
        assert_eq!(levels.len(), 7);
        assert_eq!(levels[2], "Aves");
        assert_eq!(levels[5], "Passer");
        assert_eq!(levels[6], "domesticus");
    }

    #[test]
    fn test_parse_taxonomy_partial() {
        let levels = parse_taxonomy("Animalia;Chordata");
        assert_eq!(levels[1], "Chordata");
        assert_eq!(levels[2], "");
        assert_eq!(levels[6], "");
    }

    #[test]
    fn test_latin_name() {
        let e = entry("Animalia;Chordata;Aves;Passeriformes;Passeridae;Passer;domesticus", "");
        assert_eq!(e.latin_name(), Some("Passer domesticus".to_string()));

        let genus_only = entry("Animalia;Chordata;Aves;Passeriformes;Passeridae;Passer;", "");
        assert_eq!(genus_only.latin_name(), Some("Passer".to_string()));

        let empty = entry(";;;;;;", "");
        assert_eq!(empty.latin_name(), None);
    }

    #[test]
    fn test_rank_species_picks_aligned_axis() {
        let catalogue = test_catalogue();
        let prediction = rank_species(&[0.95, 0.2, 0.1], &catalogue, 5, 0.1).unwrap();
        assert_eq!(prediction.best.entry.levels[5], "Passer");
        assert!(prediction.best.confidence >= 0.1);
    }

    #[test]
    fn test_rank_species_threshold_filters_all() {
        let catalogue = test_catalogue();
        // Near-uniform similarities: softmax spreads mass, nothing clears 0.9.
        assert!(rank_species(&[0.5, 0.5, 0.5], &catalogue, 5, 0.9).is_none());
    }

    #[test]
    fn test_rank_species_dimension_mismatch() {
        let catalogue = test_catalogue();
        assert!(rank_species(&[1.0, 0.0], &catalogue, 5, 0.1).is_none());
    }

    #[test]
    fn test_softmax_temperature_sharpens() {
        let soft = softmax_scaled(&[0.6, 0.5, 0.4], 1.0);
        let sharp = softmax_scaled(&[0.6, 0.5, 0.4], 100.0);
        assert!(sharp[0] > soft[0]);
        assert!((sharp.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_matrix_transpose_orientation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emb.bin");

        // Write a (2, 3) matrix for a 3-species catalogue: must transpose.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        for v in [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(&path, bytes).unwrap();

        let matrix = load_embedding_matrix(&path, 3).unwrap();
        assert_eq!(matrix.shape(), &[3, 2]);
        assert_eq!(matrix[[0, 0]], 1.0);
        assert_eq!(matrix[[0, 1]], 4.0);
    }
}
