//! Content hashing for record identity and duplicate detection.

use md5::{Digest, Md5};
use sha2::Sha256;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct HashResult {
    /// Record identity hash.
    pub md5: String,
    /// Stored alongside for duplicate detection.
    pub sha256: String,
}

/// Stream the file through both digests in one pass.
pub fn calculate_hashes(path: &Path) -> Result<HashResult, PipelineError> {
    let map_err = |source: std::io::Error| PipelineError::Hash {
        path: path.display().to_string(),
        source,
    };

    let file = File::open(path).map_err(map_err)?;
    let mut reader = BufReader::new(file);

    let mut md5_hasher = Md5::new();
    let mut sha256_hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer).map_err(map_err)?;
        if bytes_read == 0 {
            break;
        }
        md5_hasher.update(&buffer[..bytes_read]);
        sha256_hasher.update(&buffer[..bytes_read]);
    }

    Ok(HashResult {
        md5: format!("{:x}", md5_hasher.finalize()),
        sha256: format!("{:x}", sha256_hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_known_digests() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"fotodex").unwrap();

        let hashes = calculate_hashes(tmp.path()).unwrap();
        assert_eq!(hashes.md5.len(), 32);
        assert_eq!(hashes.sha256.len(), 64);

        // Stable across calls
        let again = calculate_hashes(tmp.path()).unwrap();
        assert_eq!(hashes.md5, again.md5);
        assert_eq!(hashes.sha256, again.sha256);
    }

    #[test]
    fn test_missing_file_is_hash_error() {
        let err = calculate_hashes(Path::new("/nonexistent/file.bin")).unwrap_err();
        assert_eq!(err.category(), "hash");
    }
}
