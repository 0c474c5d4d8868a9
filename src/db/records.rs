//! Record persistence: upsert keyed by filename, lookups driving the
//! processing-mode selector, and sync-state transitions.

use anyhow::Result;
use rusqlite::params;

use super::Database;
use crate::record::{ImageRecord, SyncState};

impl Database {
    /// Insert or fully update a record, keyed by filename.
    pub fn upsert_record(&self, record: &ImageRecord) -> Result<()> {
        let tags_json = serde_json::to_string(&record.tags)?;
        let taxonomy_json = match &record.bioclip_taxonomy {
            Some(levels) => Some(serde_json::to_string(&levels.to_vec())?),
            None => None,
        };

        self.conn.execute(
            r#"
            INSERT INTO images (
                filename, filepath, file_hash, file_size, format, is_raw,
                width, height, aspect_ratio, megapixels,
                camera_make, camera_model, lens_model,
                focal_length, focal_length_35mm, aperture, shutter_speed, iso,
                exposure_mode, exposure_bias, metering_mode, white_balance,
                flash_used, flash_mode, color_space, orientation,
                datetime_original, datetime_digitized, datetime_modified,
                gps_latitude, gps_longitude, gps_altitude, gps_direction, geo_hierarchy,
                artist, copyright, software,
                title, description, rating, color_label, tags,
                clip_embedding, dinov2_embedding, aesthetic_score, technical_score,
                bioclip_taxonomy, embedding_generated, llm_generated,
                processed_date, processing_time, app_version, sync_state
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10,
                ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18,
                ?19, ?20, ?21, ?22,
                ?23, ?24, ?25, ?26,
                ?27, ?28, ?29,
                ?30, ?31, ?32, ?33, ?34,
                ?35, ?36, ?37,
                ?38, ?39, ?40, ?41, ?42,
                ?43, ?44, ?45, ?46,
                ?47, ?48, ?49,
                ?50, ?51, ?52, ?53
            )
            ON CONFLICT(filename) DO UPDATE SET
                filepath = excluded.filepath,
                file_hash = excluded.file_hash,
                file_size = excluded.file_size,
                format = excluded.format,
                is_raw = excluded.is_raw,
                width = excluded.width,
                height = excluded.height,
                aspect_ratio = excluded.aspect_ratio,
                megapixels = excluded.megapixels,
                camera_make = excluded.camera_make,
                camera_model = excluded.camera_model,
                lens_model = excluded.lens_model,
                focal_length = excluded.focal_length,
                focal_length_35mm = excluded.focal_length_35mm,
                aperture = excluded.aperture,
                shutter_speed = excluded.shutter_speed,
                iso = excluded.iso,
                exposure_mode = excluded.exposure_mode,
                exposure_bias = excluded.exposure_bias,
                metering_mode = excluded.metering_mode,
                white_balance = excluded.white_balance,
                flash_used = excluded.flash_used,
                flash_mode = excluded.flash_mode,
                color_space = excluded.color_space,
                orientation = excluded.orientation,
                datetime_original = excluded.datetime_original,
                datetime_digitized = excluded.datetime_digitized,
                datetime_modified = excluded.datetime_modified,
                gps_latitude = excluded.gps_latitude,
                gps_longitude = excluded.gps_longitude,
                gps_altitude = excluded.gps_altitude,
                gps_direction = excluded.gps_direction,
                geo_hierarchy = excluded.geo_hierarchy,
                artist = excluded.artist,
                copyright = excluded.copyright,
                software = excluded.software,
                title = excluded.title,
                description = excluded.description,
                rating = excluded.rating,
                color_label = excluded.color_label,
                tags = excluded.tags,
                clip_embedding = excluded.clip_embedding,
                dinov2_embedding = excluded.dinov2_embedding,
                aesthetic_score = excluded.aesthetic_score,
                technical_score = excluded.technical_score,
                bioclip_taxonomy = excluded.bioclip_taxonomy,
                embedding_generated = excluded.embedding_generated,
                llm_generated = excluded.llm_generated,
                processed_date = excluded.processed_date,
                processing_time = excluded.processing_time,
                app_version = excluded.app_version,
                sync_state = excluded.sync_state
            "#,
            params![
                record.filename,
                record.filepath,
                record.file_hash,
                record.file_size.map(|v| v as i64),
                record.format,
                record.is_raw,
                record.width,
                record.height,
                record.aspect_ratio,
                record.megapixels,
                record.camera_make,
                record.camera_model,
                record.lens_model,
                record.focal_length,
                record.focal_length_35mm,
                record.aperture,
                record.shutter_speed,
                record.iso,
                record.exposure_mode,
                record.exposure_bias,
                record.metering_mode,
                record.white_balance,
                record.flash_used,
                record.flash_mode,
                record.color_space,
                record.orientation,
                record.datetime_original,
                record.datetime_digitized,
                record.datetime_modified,
                record.gps_latitude,
                record.gps_longitude,
                record.gps_altitude,
                record.gps_direction,
                record.geo_hierarchy,
                record.artist,
                record.copyright,
                record.software,
                record.title,
                record.description,
                record.rating,
                record.color_label,
                tags_json,
                record.clip_embedding.as_deref().map(embedding_to_bytes),
                record.dinov2_embedding.as_deref().map(embedding_to_bytes),
                record.aesthetic_score,
                record.technical_score,
                taxonomy_json,
                record.embedding_generated,
                record.llm_generated,
                record.processed_date,
                record.processing_time,
                record.app_version,
                record.sync_state.as_str(),
            ],
        )?;

        Ok(())
    }

    pub fn record_exists(&self, filename: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE filename = ?",
            [filename],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether the prior attempt for this filename ended in ERROR.
    pub fn record_errored(&self, filename: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE filename = ? AND sync_state = 'ERROR'",
            [filename],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_record(&self, filename: &str) -> Result<Option<ImageRecord>> {
        let result = self.conn.query_row(
            r#"
            SELECT filename, filepath, file_hash, file_size, format, is_raw,
                   width, height, aspect_ratio, megapixels,
                   camera_make, camera_model, lens_model,
                   focal_length, focal_length_35mm, aperture, shutter_speed, iso,
                   exposure_mode, exposure_bias, metering_mode, white_balance,
                   flash_used, flash_mode, color_space, orientation,
                   datetime_original, datetime_digitized, datetime_modified,
                   gps_latitude, gps_longitude, gps_altitude, gps_direction, geo_hierarchy,
                   artist, copyright, software,
                   title, description, rating, color_label, tags,
                   clip_embedding, dinov2_embedding, aesthetic_score, technical_score,
                   bioclip_taxonomy, embedding_generated, llm_generated,
                   processed_date, processing_time, app_version, sync_state
            FROM images WHERE filename = ?
            "#,
            [filename],
            |row| {
                let tags_json: Option<String> = row.get(41)?;
                let taxonomy_json: Option<String> = row.get(46)?;
                let clip_blob: Option<Vec<u8>> = row.get(42)?;
                let dinov2_blob: Option<Vec<u8>> = row.get(43)?;
                let sync_state: String = row.get(52)?;

                Ok(ImageRecord {
                    filename: row.get(0)?,
                    filepath: row.get(1)?,
                    file_hash: row.get(2)?,
                    file_size: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                    format: row.get(4)?,
                    is_raw: row.get(5)?,
                    width: row.get(6)?,
                    height: row.get(7)?,
                    aspect_ratio: row.get(8)?,
                    megapixels: row.get(9)?,
                    camera_make: row.get(10)?,
                    camera_model: row.get(11)?,
                    lens_model: row.get(12)?,
                    focal_length: row.get(13)?,
                    focal_length_35mm: row.get(14)?,
                    aperture: row.get(15)?,
                    shutter_speed: row.get(16)?,
                    iso: row.get(17)?,
                    exposure_mode: row.get(18)?,
                    exposure_bias: row.get(19)?,
                    metering_mode: row.get(20)?,
                    white_balance: row.get(21)?,
                    flash_used: row.get(22)?,
                    flash_mode: row.get(23)?,
                    color_space: row.get(24)?,
                    orientation: row.get(25)?,
                    datetime_original: row.get(26)?,
                    datetime_digitized: row.get(27)?,
                    datetime_modified: row.get(28)?,
                    gps_latitude: row.get(29)?,
                    gps_longitude: row.get(30)?,
                    gps_altitude: row.get(31)?,
                    gps_direction: row.get(32)?,
                    geo_hierarchy: row.get(33)?,
                    artist: row.get(34)?,
                    copyright: row.get(35)?,
                    software: row.get(36)?,
                    title: row.get(37)?,
                    description: row.get(38)?,
                    rating: row.get(39)?,
                    color_label: row.get(40)?,
                    tags: tags_json
                        .and_then(|json| serde_json::from_str(&json).ok())
                        .unwrap_or_default(),
                    clip_embedding: clip_blob.map(|b| bytes_to_embedding(&b)),
                    dinov2_embedding: dinov2_blob.map(|b| bytes_to_embedding(&b)),
                    aesthetic_score: row.get(44)?,
                    technical_score: row.get(45)?,
                    bioclip_taxonomy: taxonomy_json
                        .and_then(|json| serde_json::from_str::<Vec<String>>(&json).ok())
                        .and_then(|v| <[String; 7]>::try_from(v).ok()),
                    embedding_generated: row.get(47)?,
                    llm_generated: row.get(48)?,
                    processed_date: row.get(49)?,
                    processing_time: row.get(50)?,
                    app_version: row.get(51)?,
                    sync_state: SyncState::from_str(&sync_state),
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Sync-state transition, driven by the pipeline and the sidecar writer.
    pub fn set_sync_state(&self, filename: &str, state: SyncState) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET sync_state = ? WHERE filename = ?",
            params![state.as_str(), filename],
        )?;
        Ok(())
    }
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ImageRecord {
        let mut record = ImageRecord::new("/photos/DSC_0001.jpg");
        record.set_dimensions(6000, 4000);
        record.file_hash = Some("d41d8cd98f00b204e9800998ecf8427e".to_string());
        record.camera_make = Some("NIKON CORPORATION".to_string());
        record.tags = vec!["Passer domesticus".to_string(), "Firenze".to_string()];
        record.clip_embedding = Some(vec![0.6, 0.8]);
        record.bioclip_taxonomy = Some([
            "Animalia".into(),
            "Chordata".into(),
            "Aves".into(),
            "Passeriformes".into(),
            "Passeridae".into(),
            "Passer".into(),
            "domesticus".into(),
        ]);
        record.aesthetic_score = Some(6.42);
        record.embedding_generated = true;
        record
    }

    #[test]
    fn test_upsert_and_get_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let record = sample_record();
        db.upsert_record(&record).unwrap();

        let loaded = db.get_record("DSC_0001.jpg").unwrap().unwrap();
        assert_eq!(loaded.filepath, record.filepath);
        assert_eq!(loaded.tags, record.tags);
        assert_eq!(loaded.clip_embedding, record.clip_embedding);
        assert_eq!(loaded.bioclip_taxonomy, record.bioclip_taxonomy);
        assert_eq!(loaded.aesthetic_score, Some(6.42));
        assert_eq!(loaded.sync_state, SyncState::Unsynced);
        assert!(loaded.dinov2_embedding.is_none());
    }

    #[test]
    fn test_upsert_twice_keeps_single_row() {
        let db = Database::open_in_memory().unwrap();
        let mut record = sample_record();
        db.upsert_record(&record).unwrap();

        record.title = Some("Passero in giardino".to_string());
        db.upsert_record(&record).unwrap();

        assert_eq!(db.count_images().unwrap(), 1);
        let loaded = db.get_record("DSC_0001.jpg").unwrap().unwrap();
        assert_eq!(loaded.title.as_deref(), Some("Passero in giardino"));
    }

    #[test]
    fn test_exists_and_errored() {
        let db = Database::open_in_memory().unwrap();
        let record = sample_record();
        db.upsert_record(&record).unwrap();

        assert!(db.record_exists("DSC_0001.jpg").unwrap());
        assert!(!db.record_exists("other.jpg").unwrap());
        assert!(!db.record_errored("DSC_0001.jpg").unwrap());

        db.set_sync_state("DSC_0001.jpg", SyncState::Error).unwrap();
        assert!(db.record_errored("DSC_0001.jpg").unwrap());
    }

    #[test]
    fn test_embedding_bytes_round_trip() {
        let embedding = vec![0.1f32, -2.5, 1e-7, 4096.0];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes_to_embedding(&bytes), embedding);
    }
}
