pub const SCHEMA: &str = r#"
-- Images table: one row per processed file, keyed by filename
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL UNIQUE,
    filepath TEXT NOT NULL,
    file_hash TEXT,
    file_size INTEGER,
    format TEXT,
    is_raw INTEGER NOT NULL DEFAULT 0,

    -- Technical metadata
    width INTEGER,
    height INTEGER,
    aspect_ratio REAL,
    megapixels REAL,
    camera_make TEXT,
    camera_model TEXT,
    lens_model TEXT,
    focal_length REAL,
    focal_length_35mm REAL,
    aperture REAL,
    shutter_speed TEXT,
    iso INTEGER,
    exposure_mode TEXT,
    exposure_bias REAL,
    metering_mode TEXT,
    white_balance TEXT,
    flash_used INTEGER,
    flash_mode TEXT,
    color_space TEXT,
    orientation INTEGER,
    datetime_original TEXT,
    datetime_digitized TEXT,
    datetime_modified TEXT,

    -- Geo
    gps_latitude REAL,
    gps_longitude REAL,
    gps_altitude REAL,
    gps_direction REAL,
    geo_hierarchy TEXT,

    -- Authorship
    artist TEXT,
    copyright TEXT,
    software TEXT,

    -- Editorial
    title TEXT,
    description TEXT,
    rating INTEGER,
    color_label TEXT,
    tags TEXT,               -- JSON array

    -- AI signals
    clip_embedding BLOB,     -- little-endian f32
    dinov2_embedding BLOB,   -- little-endian f32
    aesthetic_score REAL,
    technical_score REAL,
    bioclip_taxonomy TEXT,   -- JSON array of 7 levels
    embedding_generated INTEGER NOT NULL DEFAULT 0,
    llm_generated INTEGER NOT NULL DEFAULT 0,

    -- Provenance
    processed_date TEXT,
    processing_time REAL,
    app_version TEXT,
    sync_state TEXT NOT NULL DEFAULT 'UNSYNCED'
);

CREATE INDEX IF NOT EXISTS idx_images_filepath ON images(filepath);
CREATE INDEX IF NOT EXISTS idx_images_hash ON images(file_hash);
CREATE INDEX IF NOT EXISTS idx_images_sync_state ON images(sync_state);
CREATE INDEX IF NOT EXISTS idx_images_datetime ON images(datetime_original);
"#;
