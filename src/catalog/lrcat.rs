//! Lightroom catalog reader.
//!
//! Opens the `.lrcat` SQLite read-only and recomposes absolute image paths
//! as `root.absolutePath + folder.pathFromRoot + file.idx_filename`,
//! filtered by supported extension and partitioned by on-disk existence.

use anyhow::{Context, Result};
use rusqlite::OpenFlags;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CatalogStats {
    pub total: usize,
    pub matched: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogScan {
    /// Supported files present on disk.
    pub files: Vec<PathBuf>,
    /// Supported files referenced by the catalog but absent on disk.
    pub missing: Vec<PathBuf>,
    pub stats: CatalogStats,
}

pub fn read_catalog(lrcat_path: &Path, supported_formats: &[String]) -> Result<CatalogScan> {
    let conn = rusqlite::Connection::open_with_flags(
        lrcat_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Cannot open catalog {}", lrcat_path.display()))?;

    let mut stmt = conn.prepare(
        r#"
        SELECT rf.absolutePath, f.pathFromRoot, fi.idx_filename
        FROM AgLibraryFile fi
        JOIN AgLibraryFolder f ON fi.folder = f.id_local
        JOIN AgLibraryRootFolder rf ON f.rootFolder = rf.id_local
        ORDER BY rf.absolutePath, f.pathFromRoot, fi.idx_filename
        "#,
    )?;

    let rows = stmt.query_map([], |row| {
        let root: String = row.get(0)?;
        let folder: String = row.get(1)?;
        let filename: String = row.get(2)?;
        Ok((root, folder, filename))
    })?;

    let mut scan = CatalogScan::default();

    for row in rows {
        let (root, folder, filename) = row?;
        scan.stats.total += 1;

        let extension = Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !supported_formats.iter().any(|f| f.to_lowercase() == extension) {
            continue;
        }

        let path = PathBuf::from(format!("{root}{folder}{filename}"));
        if path.exists() {
            scan.stats.matched += 1;
            scan.files.push(path);
        } else {
            scan.stats.missing += 1;
            scan.missing.push(path);
        }
    }

    tracing::info!(
        total = scan.stats.total,
        matched = scan.stats.matched,
        missing = scan.stats.missing,
        "Catalog scan complete"
    );

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal slice of the Lightroom schema, enough for the reader.
    fn fixture_catalog(dir: &Path, root_path: &str) -> PathBuf {
        let lrcat = dir.join("test.lrcat");
        let conn = rusqlite::Connection::open(&lrcat).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE AgLibraryRootFolder (id_local INTEGER PRIMARY KEY, absolutePath TEXT);
            CREATE TABLE AgLibraryFolder (id_local INTEGER PRIMARY KEY, rootFolder INTEGER, pathFromRoot TEXT);
            CREATE TABLE AgLibraryFile (id_local INTEGER PRIMARY KEY, folder INTEGER, idx_filename TEXT);
            "#,
        )
        .unwrap();
        conn.execute(
            "INSERT INTO AgLibraryRootFolder VALUES (1, ?)",
            [format!("{root_path}/")],
        )
        .unwrap();
        conn.execute("INSERT INTO AgLibraryFolder VALUES (10, 1, 'shoot/')", [])
            .unwrap();
        conn.execute("INSERT INTO AgLibraryFile VALUES (100, 10, 'present.jpg')", [])
            .unwrap();
        conn.execute("INSERT INTO AgLibraryFile VALUES (101, 10, 'gone.jpg')", [])
            .unwrap();
        conn.execute("INSERT INTO AgLibraryFile VALUES (102, 10, 'notes.txt')", [])
            .unwrap();
        lrcat
    }

    #[test]
    fn test_read_catalog_partitions_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();

        std::fs::create_dir_all(dir.path().join("shoot")).unwrap();
        std::fs::write(dir.path().join("shoot/present.jpg"), b"jpg").unwrap();

        let lrcat = fixture_catalog(dir.path(), &root);
        let formats = vec!["jpg".to_string()];
        let scan = read_catalog(&lrcat, &formats).unwrap();

        assert_eq!(scan.stats.total, 3);
        assert_eq!(scan.stats.matched, 1);
        assert_eq!(scan.stats.missing, 1);
        assert!(scan.files[0].ends_with("shoot/present.jpg"));
        assert!(scan.missing[0].ends_with("shoot/gone.jpg"));
    }

    #[test]
    fn test_read_catalog_missing_file_errors() {
        let formats = vec!["jpg".to_string()];
        assert!(read_catalog(Path::new("/nonexistent/x.lrcat"), &formats).is_err());
    }
}
