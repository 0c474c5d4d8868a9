//! Client for the local vision-LLM server (Ollama generate protocol).
//!
//! One request per mode (title/description/tags), issued concurrently on a
//! bounded set of worker threads. The base64 payload is encoded once per
//! source and cached in a single slot keyed by source identity.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::LlmVisionConfig;
use crate::error::PipelineError;
use super::prompts::{self, LengthCaps, LlmMode, PromptContext};

const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
    think: bool,
    keep_alive: i64,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    min_p: f32,
    num_ctx: u32,
    num_batch: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Per-image generation results; a failed mode stays None while the others
/// proceed.
#[derive(Debug, Clone, Default)]
pub struct LlmOutcome {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl LlmOutcome {
    pub fn any_success(&self) -> bool {
        self.title.is_some() || self.description.is_some() || self.tags.is_some()
    }
}

struct CachedPayload {
    key: String,
    base64: String,
}

pub struct LlmClient {
    config: LlmVisionConfig,
    cache: Mutex<Option<CachedPayload>>,
}

impl LlmClient {
    pub fn new(config: LlmVisionConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(None),
        }
    }

    /// One-shot preload that keeps the model resident in server memory.
    pub fn warmup(&self) {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: String::new(),
            images: Vec::new(),
            stream: false,
            think: false,
            keep_alive: -1,
            options: self.options(1),
        };

        let url = format!("{}/api/generate", self.config.endpoint);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.config.timeout))
            .build();

        match agent.post(&url).set("Content-Type", "application/json").send_json(&request) {
            Ok(_) => tracing::info!(model = %self.config.model, "LLM warmed up"),
            Err(e) => tracing::warn!(error = %e, "LLM warmup failed"),
        }
    }

    /// Encode and cache the payload for a source. A new key replaces the
    /// previous slot.
    pub fn cache_image(&self, key: &str, img: &DynamicImage, max_dimension: u32) -> Result<()> {
        {
            let cache = self.cache.lock().map_err(|e| anyhow!("Cache poisoned: {}", e))?;
            if cache.as_ref().map(|c| c.key.as_str()) == Some(key) {
                return Ok(());
            }
        }

        let resized = crate::decode::shrink_to(
            img.clone(),
            max_dimension,
            image::imageops::FilterType::Lanczos3,
        );

        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
        resized
            .to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|e| anyhow!("Failed to encode LLM payload: {}", e))?;

        let payload = CachedPayload {
            key: key.to_string(),
            base64: BASE64.encode(buf.into_inner()),
        };

        let mut cache = self.cache.lock().map_err(|e| anyhow!("Cache poisoned: {}", e))?;
        *cache = Some(payload);
        Ok(())
    }

    fn cached_payload(&self, key: &str) -> Option<String> {
        let cache = self.cache.lock().ok()?;
        cache
            .as_ref()
            .filter(|c| c.key == key)
            .map(|c| c.base64.clone())
    }

    /// Issue the requested modes concurrently (at most three in flight) and
    /// gather whatever succeeded. A failed mode never aborts the others.
    pub fn generate_fields(
        &self,
        key: &str,
        modes: &[LlmMode],
        context: &PromptContext,
        caps: LengthCaps,
    ) -> LlmOutcome {
        let Some(payload) = self.cached_payload(key) else {
            tracing::error!(key, "No cached LLM payload for source");
            return LlmOutcome::default();
        };

        let mut outcome = LlmOutcome::default();

        std::thread::scope(|scope| {
            let handles: Vec<_> = modes
                .iter()
                .map(|&mode| {
                    let payload = payload.as_str();
                    scope.spawn(move || (mode, self.generate_one(payload, mode, context, caps)))
                })
                .collect();

            for handle in handles {
                let Ok((mode, result)) = handle.join() else {
                    continue;
                };
                match result {
                    Ok(text) => match mode {
                        LlmMode::Title => {
                            let title = prompts::clean_title(&text);
                            if !title.is_empty() {
                                outcome.title = Some(title);
                            }
                        }
                        LlmMode::Description => {
                            let description = text.trim().to_string();
                            if !description.is_empty() {
                                outcome.description = Some(description);
                            }
                        }
                        LlmMode::Tags => {
                            let tags = prompts::parse_tags(&text, caps.max_tags);
                            if !tags.is_empty() {
                                outcome.tags = Some(tags);
                            }
                        }
                    },
                    Err(e) => {
                        tracing::error!(mode = mode.as_str(), category = e.category(), error = %e, "LLM call failed");
                    }
                }
            }
        });

        outcome
    }

    fn generate_one(
        &self,
        payload: &str,
        mode: LlmMode,
        context: &PromptContext,
        caps: LengthCaps,
    ) -> Result<String, PipelineError> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: prompts::build_prompt(mode, context, caps),
            images: vec![payload.to_string()],
            stream: false,
            think: false,
            keep_alive: self.config.generation.keep_alive,
            options: self.options(prompts::num_predict(mode, caps)),
        };

        let url = format!("{}/api/generate", self.config.endpoint);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.config.timeout))
            .build();

        let response = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(&request)
            .map_err(|e| self.classify_error(e))?;

        let parsed: GenerateResponse = response
            .into_json()
            .map_err(|e| PipelineError::LlmServer(format!("Unparseable response: {e}")))?;

        Ok(prompts::strip_think_blocks(&parsed.response))
    }

    fn classify_error(&self, error: ureq::Error) -> PipelineError {
        match error {
            ureq::Error::Status(code, _) => {
                PipelineError::LlmServer(format!("HTTP {code} from {}", self.config.endpoint))
            }
            ureq::Error::Transport(transport) => {
                let text = transport.to_string();
                if text.contains("timed out") || text.contains("timeout") {
                    PipelineError::LlmTimeout {
                        seconds: self.config.timeout,
                    }
                } else {
                    PipelineError::LlmServer(text)
                }
            }
        }
    }

    fn options(&self, num_predict: u32) -> GenerateOptions {
        let g = &self.config.generation;
        GenerateOptions {
            num_predict,
            temperature: g.temperature,
            top_p: g.top_p,
            top_k: g.top_k,
            min_p: g.min_p,
            num_ctx: g.num_ctx,
            num_batch: g.num_batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn client() -> LlmClient {
        LlmClient::new(LlmVisionConfig {
            enabled: true,
            // Unroutable endpoint so every call fails fast.
            endpoint: "http://127.0.0.1:1".to_string(),
            timeout: 1,
            ..Default::default()
        })
    }

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, image::Rgb([90, 120, 60])))
    }

    fn caps() -> LengthCaps {
        LengthCaps {
            max_words: 30,
            max_tags: 5,
            max_title_words: 6,
        }
    }

    #[test]
    fn test_cache_image_single_slot() {
        let client = client();
        client.cache_image("/a.jpg", &sample(), 512).unwrap();
        assert!(client.cached_payload("/a.jpg").is_some());

        client.cache_image("/b.jpg", &sample(), 512).unwrap();
        assert!(client.cached_payload("/a.jpg").is_none());
        assert!(client.cached_payload("/b.jpg").is_some());
    }

    #[test]
    fn test_cache_image_idempotent_for_same_key() {
        let client = client();
        client.cache_image("/a.jpg", &sample(), 512).unwrap();
        let first = client.cached_payload("/a.jpg").unwrap();
        client.cache_image("/a.jpg", &sample(), 512).unwrap();
        assert_eq!(client.cached_payload("/a.jpg").unwrap(), first);
    }

    #[test]
    fn test_unreachable_server_yields_empty_outcome() {
        let client = client();
        client.cache_image("/a.jpg", &sample(), 512).unwrap();

        let outcome = client.generate_fields(
            "/a.jpg",
            &[LlmMode::Title, LlmMode::Description, LlmMode::Tags],
            &PromptContext::default(),
            caps(),
        );
        assert!(!outcome.any_success());
    }

    #[test]
    fn test_missing_payload_yields_empty_outcome() {
        let client = client();
        let outcome = client.generate_fields(
            "/never-cached.jpg",
            &[LlmMode::Title],
            &PromptContext::default(),
            caps(),
        );
        assert!(!outcome.any_success());
    }
}
