//! Model file resolution: frozen mirror first, upstream fallback.
//!
//! Files are cached under `models_repository.models_dir/<model>/`. The
//! mirror is a Hugging Face repo whose per-model subfolders are pinned in
//! configuration, so installations keep working when upstream moves.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use crate::config::ModelsRepositoryConfig;

/// Resolve a model file, downloading it on first use.
///
/// Order: local cache, frozen mirror (`huggingface_repo` + configured
/// subfolder), then `upstream_url`.
pub fn ensure_model(
    repo: &ModelsRepositoryConfig,
    model_key: &str,
    filename: &str,
    upstream_url: &str,
) -> Result<PathBuf> {
    let model_dir = repo.models_dir.join(model_key);
    std::fs::create_dir_all(&model_dir)?;
    let model_path = model_dir.join(filename);

    if model_path.exists() {
        return Ok(model_path);
    }

    if let Some(subfolder) = repo.models.get(model_key) {
        let mirror_url = format!(
            "https://huggingface.co/{}/resolve/main/{}/{}",
            repo.huggingface_repo, subfolder, filename
        );
        match download(&mirror_url, &model_path) {
            Ok(()) => {
                tracing::info!(model = %model_key, file = %filename, "Model fetched from mirror");
                return Ok(model_path);
            }
            Err(e) => {
                tracing::warn!(model = %model_key, error = %e, "Mirror miss, falling back to upstream");
            }
        }
    }

    download(upstream_url, &model_path)
        .map_err(|e| anyhow!("Failed to download {} from upstream: {}", filename, e))?;
    tracing::info!(model = %model_key, file = %filename, "Model fetched from upstream");
    Ok(model_path)
}

fn download(url: &str, dest: &std::path::Path) -> Result<()> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| anyhow!("Request failed: {}", e))?;

    // Write to a sibling temp file so a partial download never masquerades
    // as a cached model.
    let tmp_path = dest.with_extension("part");
    let mut file = std::fs::File::create(&tmp_path)?;
    std::io::copy(&mut response.into_reader(), &mut file)?;
    std::fs::rename(&tmp_path, dest)?;

    Ok(())
}
