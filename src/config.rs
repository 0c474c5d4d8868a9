use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub image_processing: ImageProcessingConfig,

    #[serde(default)]
    pub image_optimization: ImageOptimizationConfig,

    #[serde(default)]
    pub models_repository: ModelsRepositoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_db_path")]
    pub database: PathBuf,

    /// Optional override for the offline places dataset (CSV with the same
    /// columns as the embedded one).
    #[serde(default)]
    pub places: Option<PathBuf>,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fotodex")
        .join("catalog.db")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: default_db_path(),
            places: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub models: ModelsConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            models: ModelsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub clip: ModelToggle,

    #[serde(default)]
    pub dinov2: ModelToggle,

    #[serde(default)]
    pub aesthetic: ModelToggle,

    #[serde(default)]
    pub technical: ModelToggle,

    #[serde(default)]
    pub bioclip: BioclipConfig,

    #[serde(default)]
    pub llm_vision: LlmVisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelToggle {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ModelToggle {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BioclipConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Top-k predictions kept from the species catalogue.
    #[serde(default = "default_bioclip_max_tags")]
    pub max_tags: usize,

    /// Minimum softmax probability for a prediction to survive.
    #[serde(default = "default_bioclip_threshold")]
    pub threshold: f32,
}

fn default_bioclip_max_tags() -> usize {
    5
}

fn default_bioclip_threshold() -> f32 {
    0.1
}

impl Default for BioclipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tags: default_bioclip_max_tags(),
            threshold: default_bioclip_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmVisionConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub auto_import: AutoImportConfig,
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5vl:7b".to_string()
}

fn default_llm_timeout() -> u64 {
    180
}

impl Default for LlmVisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout: default_llm_timeout(),
            generation: GenerationConfig::default(),
            auto_import: AutoImportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default = "default_min_p")]
    pub min_p: f32,

    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,

    #[serde(default = "default_num_batch")]
    pub num_batch: u32,

    /// Passed through to the server; -1 keeps the model resident.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: i64,
}

fn default_temperature() -> f32 {
    0.4
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> u32 {
    40
}

fn default_min_p() -> f32 {
    0.05
}

fn default_num_ctx() -> u32 {
    4096
}

fn default_num_batch() -> u32 {
    512
}

fn default_keep_alive() -> i64 {
    -1
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            min_p: default_min_p(),
            num_ctx: default_num_ctx(),
            num_batch: default_num_batch(),
            keep_alive: default_keep_alive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AutoImportConfig {
    #[serde(default)]
    pub tags: TagImportConfig,

    #[serde(default)]
    pub description: TextImportConfig,

    #[serde(default)]
    pub title: TitleImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagImportConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// When false, a non-empty existing tag list is kept and LLM tags are
    /// appended; when true the list is replaced.
    #[serde(default)]
    pub overwrite: bool,

    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
}

fn default_max_tags() -> usize {
    10
}

impl Default for TagImportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overwrite: false,
            max_tags: default_max_tags(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextImportConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub overwrite: bool,

    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

fn default_max_words() -> usize {
    60
}

impl Default for TextImportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overwrite: false,
            max_words: default_max_words(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleImportConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub overwrite: bool,

    #[serde(default = "default_max_title_words")]
    pub max_title_words: usize,
}

fn default_max_title_words() -> usize {
    8
}

impl Default for TitleImportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overwrite: false,
            max_title_words: default_max_title_words(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProcessingConfig {
    #[serde(default = "default_supported_formats")]
    pub supported_formats: Vec<String>,
}

fn default_supported_formats() -> Vec<String> {
    [
        "jpg", "jpeg", "png", "tif", "tiff", "webp", "bmp", // standard
        "cr2", "cr3", "nef", "arw", "orf", "raf", "rw2", "dng", // camera RAW
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ImageProcessingConfig {
    fn default() -> Self {
        Self {
            supported_formats: default_supported_formats(),
        }
    }
}

/// RAW extensions recognized by the decoder (subset of supported_formats).
pub const RAW_EXTENSIONS: &[&str] = &["cr2", "cr3", "nef", "arw", "orf", "raf", "rw2", "dng"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    #[default]
    Lanczos,
    Bilinear,
    Area,
    Nearest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub target_size: u32,

    #[serde(default)]
    pub resampling: Resampling,

    /// "optimized" downsizes before scoring; "full" uses the original pixels.
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub max_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOptimizationConfig {
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, ProfileConfig>,
}

fn default_profiles() -> HashMap<String, ProfileConfig> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "clip".to_string(),
        ProfileConfig { target_size: 224, resampling: Resampling::Lanczos, mode: None, max_size: None },
    );
    profiles.insert(
        "dinov2".to_string(),
        ProfileConfig { target_size: 518, resampling: Resampling::Lanczos, mode: None, max_size: None },
    );
    profiles.insert(
        "bioclip".to_string(),
        ProfileConfig { target_size: 224, resampling: Resampling::Lanczos, mode: None, max_size: None },
    );
    profiles.insert(
        "aesthetic".to_string(),
        ProfileConfig { target_size: 224, resampling: Resampling::Bilinear, mode: None, max_size: None },
    );
    profiles.insert(
        "technical".to_string(),
        ProfileConfig {
            target_size: 1024,
            resampling: Resampling::Area,
            mode: Some("optimized".to_string()),
            max_size: Some(1024),
        },
    );
    profiles.insert(
        "llm_vision".to_string(),
        ProfileConfig { target_size: 512, resampling: Resampling::Lanczos, mode: None, max_size: None },
    );
    profiles
}

impl Default for ImageOptimizationConfig {
    fn default() -> Self {
        Self {
            profiles: default_profiles(),
        }
    }
}

impl ImageOptimizationConfig {
    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.get(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsRepositoryConfig {
    /// Frozen mirror repo tried before the upstream model source.
    #[serde(default = "default_hf_repo")]
    pub huggingface_repo: String,

    /// Per-model subfolder inside the mirror.
    #[serde(default = "default_repo_models")]
    pub models: HashMap<String, String>,

    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

fn default_hf_repo() -> String {
    "fotodex/model-mirror".to_string()
}

fn default_repo_models() -> HashMap<String, String> {
    let mut models = HashMap::new();
    models.insert("clip".to_string(), "clip-vit-b32".to_string());
    models.insert("dinov2".to_string(), "dinov2-small".to_string());
    models.insert("aesthetic".to_string(), "aesthetic-head".to_string());
    models.insert("bioclip".to_string(), "bioclip".to_string());
    models
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("fotodex")
        .join("models")
}

impl Default for ModelsRepositoryConfig {
    fn default() -> Self {
        Self {
            huggingface_repo: default_hf_repo(),
            models: default_repo_models(),
            models_dir: default_models_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            embedding: EmbeddingConfig::default(),
            image_processing: ImageProcessingConfig::default(),
            image_optimization: ImageOptimizationConfig::default(),
            models_repository: ModelsRepositoryConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &std::path::Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, config_path: &std::path::Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fotodex")
            .join("config.toml")
    }

    /// Lowercase extension check against the configured format list.
    pub fn is_supported_format(&self, ext: &str) -> bool {
        let lower = ext.to_lowercase();
        self.image_processing
            .supported_formats
            .iter()
            .any(|f| f == &lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_profiles() {
        let config = Config::default();
        for name in ["clip", "dinov2", "bioclip", "aesthetic", "technical", "llm_vision"] {
            assert!(config.image_optimization.profile(name).is_some(), "{name}");
        }
        assert_eq!(config.image_optimization.profile("dinov2").unwrap().target_size, 518);
        assert_eq!(
            config.image_optimization.profile("technical").unwrap().max_size,
            Some(1024)
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
            [embedding.models.llm_vision]
            enabled = true
            endpoint = "http://127.0.0.1:11434"

            [embedding.models.bioclip]
            threshold = 0.2
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.embedding.models.llm_vision.enabled);
        assert_eq!(config.embedding.models.llm_vision.timeout, 180);
        assert_eq!(config.embedding.models.bioclip.threshold, 0.2);
        assert_eq!(config.embedding.models.bioclip.max_tags, 5);
        assert!(config.embedding.models.clip.enabled);
    }

    #[test]
    fn test_supported_format_case_insensitive() {
        let config = Config::default();
        assert!(config.is_supported_format("NEF"));
        assert!(config.is_supported_format("jpg"));
        assert!(!config.is_supported_format("txt"));
    }
}
