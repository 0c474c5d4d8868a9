//! Error taxonomy for the enrichment pipeline.
//!
//! Every variant is recovered locally: the offending field stays null, an
//! error line is logged, and the worker advances to the next image. Only
//! init-time failures (missing config, database directory that cannot be
//! created) abort the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("metadata extraction failed for {path}: {source}")]
    Metadata {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{model} inference failed: {source}")]
    Inference {
        model: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("LLM request timed out after {seconds}s")]
    LlmTimeout { seconds: u64 },

    #[error("LLM server error: {0}")]
    LlmServer(String),

    #[error("no geographic cell for ({lat}, {lon})")]
    GeoUnavailable { lat: f64, lon: f64 },

    #[error("failed to hash {path}: {source}")]
    Hash {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog write failed: {source}")]
    Persist {
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Short category name used in log lines and run summaries.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Decode { .. } => "decode",
            PipelineError::Metadata { .. } => "metadata",
            PipelineError::Inference { .. } => "inference",
            PipelineError::LlmTimeout { .. } => "llm_timeout",
            PipelineError::LlmServer(_) => "llm_server",
            PipelineError::GeoUnavailable { .. } => "geo",
            PipelineError::Hash { .. } => "hash",
            PipelineError::Persist { .. } => "persist",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let e = PipelineError::LlmTimeout { seconds: 180 };
        assert_eq!(e.category(), "llm_timeout");

        let e = PipelineError::GeoUnavailable { lat: 0.0, lon: -30.0 };
        assert_eq!(e.category(), "geo");
    }
}
