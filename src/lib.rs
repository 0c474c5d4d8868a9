//! Offline photo-catalog enrichment pipeline.
//!
//! Given image files (standard formats and camera RAW), extracts technical
//! metadata, computes multi-model AI signals (semantic and visual
//! embeddings, aesthetic and technical quality scores, biological
//! taxonomy), optionally generates Italian titles/descriptions/tags via a
//! local vision LLM, enriches with reverse-geocoded location hierarchy and
//! persists everything to a local catalog database.

pub mod catalog;
pub mod config;
pub mod db;
pub mod decode;
pub mod discovery;
pub mod error;
pub mod geo;
pub mod hashing;
pub mod llm;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod record;

pub use config::Config;
pub use db::Database;
pub use error::PipelineError;
pub use pipeline::{Pipeline, ProcessingMode, RunStats, WorkerEvent};
pub use record::{ImageRecord, SyncState};
