//! Per-image enrichment orchestration.
//!
//! A single background worker iterates inputs sequentially; within one
//! image the three LLM sub-requests fan out on a small thread pool. All
//! inference shares one decoded thumbnail sized to the maximum enabled
//! target. Every failure is recovered locally: the offending field stays
//! null and the worker advances.

pub mod context;
pub mod merge;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::db::Database;
use crate::decode;
use crate::discovery;
use crate::error::PipelineError;
use crate::geo::GeoEnricher;
use crate::hashing;
use crate::llm::{LengthCaps, LlmClient, LlmMode};
use crate::metadata;
use crate::models::{InitializationMode, ModelBank};
use crate::record::{ImageRecord, SyncState};

/// Pause poll granularity for the cooperative worker.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Which inputs to (re)process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Skip records whose filename already exists in the catalog.
    #[default]
    NewOnly,
    /// Also re-run records whose prior attempt errored.
    NewPlusErrors,
    /// Process every input.
    ReprocessAll,
}

impl ProcessingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new_only" => Some(Self::NewOnly),
            "new_plus_errors" => Some(Self::NewPlusErrors),
            "reprocess_all" => Some(Self::ReprocessAll),
            _ => None,
        }
    }
}

/// Counters surfaced to the caller at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub errors: usize,
    pub with_embedding: usize,
    pub with_tags: usize,
    pub skipped_existing: usize,
    /// Wall-clock seconds for the whole run.
    pub processing_time: f64,
}

/// Progress events sent from the worker to the caller.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started { total: usize },
    Progress { current: usize, total: usize, filename: String },
    Completed(RunStats),
    Cancelled(RunStats),
}

pub struct Pipeline {
    config: Config,
    bank: ModelBank,
    llm: Option<LlmClient>,
    geo: Option<GeoEnricher>,
}

impl Pipeline {
    /// Load backends and auxiliary tables once, at worker startup.
    pub fn new(config: Config, init_mode: InitializationMode) -> Result<Self> {
        let bank = ModelBank::init(&config, init_mode)?;

        let llm = if bank.llm_enabled() {
            Some(LlmClient::new(config.embedding.models.llm_vision.clone()))
        } else {
            None
        };

        let geo = match GeoEnricher::new(&config) {
            Ok(enricher) => Some(enricher),
            Err(e) => {
                tracing::error!(error = %e, "Geo enricher unavailable");
                None
            }
        };

        Ok(Self { config, bank, llm, geo })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Enumerate supported inputs under a directory.
    pub fn discover(&self, directory: &Path) -> Result<Vec<PathBuf>> {
        discovery::discover_images(directory, &self.config.image_processing.supported_formats)
    }

    /// Drive the sequential worker over `inputs`. Returns final counters;
    /// emits progress on `events` when provided. `cancel` stops between
    /// records, `pause` suspends with 100 ms polling.
    pub fn run(
        &self,
        db: &Database,
        inputs: &[PathBuf],
        mode: ProcessingMode,
        events: Option<mpsc::Sender<WorkerEvent>>,
        cancel: Arc<AtomicBool>,
        pause: Arc<AtomicBool>,
    ) -> RunStats {
        let started = Instant::now();
        let mut stats = RunStats {
            total: inputs.len(),
            ..Default::default()
        };

        if let Some(ref tx) = events {
            let _ = tx.send(WorkerEvent::Started { total: inputs.len() });
        }

        if let Some(llm) = &self.llm {
            llm.warmup();
        }

        for (index, path) in inputs.iter().enumerate() {
            while pause.load(Ordering::SeqCst) && !cancel.load(Ordering::SeqCst) {
                std::thread::sleep(PAUSE_POLL);
            }
            if cancel.load(Ordering::SeqCst) {
                stats.processing_time = started.elapsed().as_secs_f64();
                if let Some(ref tx) = events {
                    let _ = tx.send(WorkerEvent::Cancelled(stats.clone()));
                }
                return stats;
            }

            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string());

            if let Some(ref tx) = events {
                let _ = tx.send(WorkerEvent::Progress {
                    current: index + 1,
                    total: inputs.len(),
                    filename: filename.clone(),
                });
            }

            match self.should_skip(db, &filename, mode) {
                Ok(true) => {
                    stats.skipped_existing += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(filename = %filename, error = %e, "Catalog lookup failed");
                    stats.errors += 1;
                    continue;
                }
            }

            let existing = db.get_record(&filename).ok().flatten();
            let record = self.process_image(path, existing.as_ref());
            stats.processed += 1;

            if record.any_embedding() {
                stats.with_embedding += 1;
            }
            if !record.tags.is_empty() {
                stats.with_tags += 1;
            }

            match db.upsert_record(&record) {
                Ok(()) => {
                    if record.sync_state == SyncState::Error {
                        stats.errors += 1;
                    } else {
                        stats.success += 1;
                    }
                }
                Err(e) => {
                    let err = PipelineError::Persist { source: e };
                    tracing::error!(filename = %record.filename, category = err.category(), "{err}");
                    stats.errors += 1;
                }
            }
        }

        stats.processing_time = started.elapsed().as_secs_f64();

        tracing::info!(
            total = stats.total,
            processed = stats.processed,
            success = stats.success,
            errors = stats.errors,
            with_embedding = stats.with_embedding,
            with_tags = stats.with_tags,
            skipped_existing = stats.skipped_existing,
            seconds = stats.processing_time,
            "Run complete"
        );

        if let Some(ref tx) = events {
            let _ = tx.send(WorkerEvent::Completed(stats.clone()));
        }

        stats
    }

    fn should_skip(&self, db: &Database, filename: &str, mode: ProcessingMode) -> Result<bool> {
        match mode {
            ProcessingMode::ReprocessAll => Ok(false),
            ProcessingMode::NewOnly => db.record_exists(filename),
            ProcessingMode::NewPlusErrors => {
                Ok(db.record_exists(filename)? && !db.record_errored(filename)?)
            }
        }
    }

    /// The per-image state machine. Always yields a record; every failure
    /// is downgraded to a null field.
    pub fn process_image(&self, path: &Path, existing: Option<&ImageRecord>) -> ImageRecord {
        let started = Instant::now();
        let path_str = path.to_string_lossy();
        let mut record = ImageRecord::new(&path_str);

        // 1. Format class by extension
        record.is_raw = decode::is_raw_extension(path);

        // 2. Technical / geo / authorship / editorial from the file
        metadata::extract_into(path, &mut record);
        self.carry_editorial(existing, &mut record);

        // 3-5. Size and perform the single shared decode
        let max_target = self.bank.max_target_size();
        let thumbnail = if max_target > 0 {
            decode::decode(path, max_target)
        } else {
            None
        };

        let decode_failed = max_target > 0 && thumbnail.is_none();
        if decode_failed {
            tracing::warn!(path = %path_str, "No decodable pixels, emitting metadata-only record");
        }

        // 6. Inference bank on the cached thumbnail
        let inference = self
            .bank
            .infer(thumbnail.as_ref(), path, record.is_raw);

        record.clip_embedding = inference.clip_embedding;
        record.dinov2_embedding = inference.dinov2_embedding;
        record.aesthetic_score = inference.aesthetic_score;
        record.technical_score = inference.technical_score;
        record.embedding_generated = record.any_embedding();

        let bioclip = inference.bioclip;
        if let Some(prediction) = &bioclip {
            record.bioclip_taxonomy = Some(prediction.best.entry.levels.clone());
        }

        // 7. Context propagation
        let geo = record
            .gps_latitude
            .zip(record.gps_longitude)
            .and_then(|(lat, lon)| {
                let location = self.geo.as_ref()?.lookup(lat, lon);
                if location.is_none() {
                    let err = PipelineError::GeoUnavailable { lat, lon };
                    tracing::debug!(category = err.category(), "{err}");
                }
                location
            });
        if let Some(location) = &geo {
            record.geo_hierarchy = Some(location.hierarchy.clone());
        }

        // 8. LLM generation under the per-field preserve/overwrite flags
        if !decode_failed {
            self.generate_llm_fields(&mut record, thumbnail.as_ref(), &bioclip, geo.as_ref());
        }

        // 9. Geographic leaf tag
        if let Some(location) = &geo {
            context::append_geo_leaf(&mut record, &location.leaf);
        }

        // 10. Identity and provenance
        match hashing::calculate_hashes(path) {
            Ok(hashes) => record.file_hash = Some(hashes.md5),
            Err(e) => tracing::error!(path = %path_str, error = %e, "Hashing failed"),
        }
        record.processed_date = Some(chrono::Utc::now().to_rfc3339());
        record.processing_time = Some(started.elapsed().as_secs_f64());
        record.sync_state = self.final_state(&record, thumbnail.is_some());

        record
    }

    /// On reprocess, the prior record's editorial fields are the baseline
    /// the preserve flags protect.
    fn carry_editorial(&self, existing: Option<&ImageRecord>, record: &mut ImageRecord) {
        let Some(prior) = existing else {
            return;
        };
        if record.title.is_none() {
            record.title = prior.title.clone();
        }
        if record.description.is_none() {
            record.description = prior.description.clone();
        }
        if record.rating.is_none() {
            record.rating = prior.rating;
        }
        if record.color_label.is_none() {
            if let Some(label) = &prior.color_label {
                record.set_color_label(label);
            }
        }
        if record.tags.is_empty() {
            record.tags = prior.tags.clone();
        }
    }

    fn generate_llm_fields(
        &self,
        record: &mut ImageRecord,
        thumbnail: Option<&image::DynamicImage>,
        bioclip: &Option<crate::models::bioclip::TaxonomyPrediction>,
        geo: Option<&crate::geo::GeoLocation>,
    ) {
        let Some(llm) = &self.llm else {
            return;
        };
        let Some(img) = thumbnail else {
            return;
        };

        let auto = &self.config.embedding.models.llm_vision.auto_import;
        let caps = LengthCaps {
            max_words: auto.description.max_words,
            max_tags: auto.tags.max_tags,
            max_title_words: auto.title.max_title_words,
        };

        // Snapshot before the concurrent section so the merge stays
        // deterministic.
        let existing_tags = record.tags.clone();

        let mut modes = Vec::with_capacity(3);
        if merge::should_generate(auto.title.enabled, auto.title.overwrite, record.title.as_deref()) {
            modes.push(LlmMode::Title);
        }
        if merge::should_generate(
            auto.description.enabled,
            auto.description.overwrite,
            record.description.as_deref(),
        ) {
            modes.push(LlmMode::Description);
        }
        let tags_existing = if existing_tags.is_empty() { None } else { Some("present") };
        if merge::should_generate(auto.tags.enabled, auto.tags.overwrite, tags_existing) {
            modes.push(LlmMode::Tags);
        }

        if modes.is_empty() {
            return;
        }

        if let Err(e) = llm.cache_image(&record.filepath, img, self.bank.llm_target_size()) {
            tracing::error!(error = %e, "LLM payload encoding failed");
            return;
        }

        let bioclip_context = bioclip.as_ref().and_then(context::derive_bioclip_context);
        let category_hint = bioclip.as_ref().and_then(context::derive_category_hint);
        let location_hint = geo.map(|g| g.location_hint.clone());
        let prompt_context = context::build_prompt_context(category_hint, location_hint);

        let mut outcome = llm.generate_fields(&record.filepath, &modes, &prompt_context, caps);
        record.llm_generated = outcome.any_success();

        if let Some(ctx) = &bioclip_context {
            context::apply_prepend_rules(&mut outcome, ctx);
        }

        if let Some(title) = outcome.title {
            record.title = Some(title);
        }
        if let Some(description) = outcome.description {
            record.description = Some(description);
        }
        if let Some(tags) = outcome.tags {
            record.tags = merge::merge_tags(&existing_tags, &tags, auto.tags.overwrite);
        }
    }

    /// Fresh records leave as UNSYNCED; a record whose every attempted
    /// inference backend failed is marked ERROR.
    fn final_state(&self, record: &ImageRecord, had_thumbnail: bool) -> SyncState {
        if !had_thumbnail {
            return SyncState::Unsynced; // metadata-only path is non-fatal
        }

        let attempted = [
            self.bank.clip_enabled,
            self.bank.dinov2_enabled,
            self.bank.aesthetic_enabled,
            self.bank.bioclip_enabled,
        ]
        .iter()
        .filter(|&&e| e)
        .count();

        let produced = [
            record.clip_embedding.is_some(),
            record.dinov2_embedding.is_some(),
            record.aesthetic_score.is_some(),
            record.bioclip_taxonomy.is_some(),
        ]
        .iter()
        .filter(|&&p| p)
        .count();

        // BioCLIP legitimately yields nothing below threshold, so a lone
        // missing taxonomy is not a failure.
        if attempted > 1 && produced == 0 {
            SyncState::Error
        } else {
            SyncState::Unsynced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use image::RgbImage;

    fn offline_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.paths.database = dir.join("catalog.db");
        // No model weights in the test environment: disable the bank.
        config.embedding.enabled = false;
        config.embedding.models.llm_vision.enabled = false;
        config
    }

    fn pipeline(dir: &Path) -> Pipeline {
        Pipeline::new(offline_config(dir), InitializationMode::Full).unwrap()
    }

    fn write_sample(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_fn(320, 240, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        })
        .save(&path)
        .unwrap();
        path
    }

    fn flags() -> (Arc<AtomicBool>, Arc<AtomicBool>) {
        (Arc::new(AtomicBool::new(false)), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_process_image_metadata_only_config() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let path = write_sample(dir.path(), "sample.png");

        let record = p.process_image(&path, None);
        assert_eq!(record.filename, "sample.png");
        assert!(!record.is_raw);
        assert_eq!(record.width, Some(320));
        assert!(record.file_hash.is_some());
        assert!(!record.embedding_generated);
        assert!(!record.llm_generated);
        assert_eq!(record.sync_state, SyncState::Unsynced);
    }

    #[test]
    fn test_unreadable_raw_yields_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let path = dir.path().join("broken.nef");
        std::fs::write(&path, b"definitely not a nikon raw").unwrap();

        let record = p.process_image(&path, None);
        assert!(record.is_raw);
        assert!(record.technical_score.is_none());
        assert!(!record.embedding_generated);
        assert!(!record.llm_generated);
        assert_eq!(record.sync_state, SyncState::Unsynced);
    }

    #[test]
    fn test_run_new_only_skips_second_pass() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let db = Database::open_in_memory().unwrap();

        let inputs = vec![
            write_sample(dir.path(), "a.png"),
            write_sample(dir.path(), "b.png"),
        ];

        let (cancel, pause) = flags();
        let first = p.run(&db, &inputs, ProcessingMode::NewOnly, None, cancel.clone(), pause.clone());
        assert_eq!(first.processed, 2);
        assert_eq!(first.success, 2);
        assert_eq!(first.skipped_existing, 0);

        let second = p.run(&db, &inputs, ProcessingMode::NewOnly, None, cancel, pause);
        assert_eq!(second.skipped_existing, inputs.len());
        assert_eq!(second.processed, 0);
    }

    #[test]
    fn test_run_reprocess_all_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let db = Database::open_in_memory().unwrap();
        let inputs = vec![write_sample(dir.path(), "a.png")];

        let (cancel, pause) = flags();
        p.run(&db, &inputs, ProcessingMode::ReprocessAll, None, cancel.clone(), pause.clone());
        let first = db.get_record("a.png").unwrap().unwrap();

        p.run(&db, &inputs, ProcessingMode::ReprocessAll, None, cancel, pause);
        let second = db.get_record("a.png").unwrap().unwrap();

        assert_eq!(db.count_images().unwrap(), 1);
        // Deterministic fields are bit-stable across runs.
        assert_eq!(first.file_hash, second.file_hash);
        assert_eq!(first.width, second.width);
        assert_eq!(first.aspect_ratio, second.aspect_ratio);
        assert_eq!(first.clip_embedding, second.clip_embedding);
    }

    #[test]
    fn test_cancel_before_start_processes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let db = Database::open_in_memory().unwrap();
        let inputs = vec![write_sample(dir.path(), "a.png")];

        let cancel = Arc::new(AtomicBool::new(true));
        let pause = Arc::new(AtomicBool::new(false));
        let stats = p.run(&db, &inputs, ProcessingMode::NewOnly, None, cancel, pause);
        assert_eq!(stats.processed, 0);
        assert_eq!(db.count_images().unwrap(), 0);
    }

    #[test]
    fn test_preserve_flag_keeps_existing_description() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let path = write_sample(dir.path(), "lake.png");

        let mut prior = ImageRecord::new(path.to_str().unwrap());
        prior.description = Some("Vista del lago".to_string());

        // The prior description survives the reprocess untouched.
        let record = p.process_image(&path, Some(&prior));
        assert_eq!(record.description.as_deref(), Some("Vista del lago"));
    }

    #[test]
    fn test_processing_mode_parse() {
        assert_eq!(ProcessingMode::parse("new_only"), Some(ProcessingMode::NewOnly));
        assert_eq!(
            ProcessingMode::parse("new_plus_errors"),
            Some(ProcessingMode::NewPlusErrors)
        );
        assert_eq!(
            ProcessingMode::parse("reprocess_all"),
            Some(ProcessingMode::ReprocessAll)
        );
        assert_eq!(ProcessingMode::parse("other"), None);
    }
}
