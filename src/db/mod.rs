//! Catalog database: the single writer lives on the pipeline's main thread.

mod schema;
pub mod records;

use anyhow::{Context, Result};
use std::path::Path;

pub use schema::SCHEMA;

pub struct Database {
    pub conn: rusqlite::Connection,
}

impl Database {
    /// Open (or create) the catalog at `path`. A missing parent directory
    /// that cannot be created is a fatal init error.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create database directory {}", parent.display()))?;
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Cannot open catalog database {}", path.display()))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { conn })
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn count_images(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");
        let db = Database::open(&path).unwrap();
        assert_eq!(db.count_images().unwrap(), 0);
        assert!(path.exists());
    }
}
