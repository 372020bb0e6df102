//! Change detection: decide whether a scanned file needs re-ingesting.
//!
//! Three strategies, configured per source:
//!
//! - `mtime_size` — cheap metadata compare, no I/O beyond the scan.
//! - `sha256` — always rehash; catches touch-without-edit and edits that
//!   preserve size+mtime.
//! - `auto` — two-phase: metadata first, and only when metadata differs is
//!   the hash computed. A matching hash downgrades the verdict back to
//!   `Unchanged` (metadata-only drift, e.g. an editor re-save), avoiding
//!   the cost of re-chunking content that did not actually change.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::error::ClassificationError;
use crate::models::{ChangeDetection, FileRecord};
use crate::scanner::ScannedFile;

/// Classification of one scanned file against its persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Modified,
    Unchanged,
}

/// Verdict plus the hash computed along the way (persisted so the next run
/// can compare against it).
#[derive(Debug, Clone)]
pub struct Decision {
    pub change: Change,
    pub sha256: Option<String>,
}

pub fn classify(
    prev: Option<&FileRecord>,
    scanned: &ScannedFile,
    strategy: ChangeDetection,
    force_rehash: bool,
) -> Result<Decision, ClassificationError> {
    let prev = match prev {
        None => {
            // New file: hash now when the strategy will want it later.
            let sha256 = match strategy {
                ChangeDetection::MtimeSize if !force_rehash => None,
                _ => Some(hash_file(&scanned.abs_path)?),
            };
            return Ok(Decision {
                change: Change::New,
                sha256,
            });
        }
        Some(p) => p,
    };

    let metadata_match =
        prev.size_bytes == scanned.size_bytes && prev.mtime_epoch == scanned.mtime_epoch;

    match strategy {
        ChangeDetection::MtimeSize => Ok(Decision {
            change: if metadata_match {
                Change::Unchanged
            } else {
                Change::Modified
            },
            sha256: prev.sha256.clone(),
        }),
        ChangeDetection::Sha256 => {
            let hash = hash_file(&scanned.abs_path)?;
            let change = if prev.sha256.as_deref() == Some(hash.as_str()) {
                Change::Unchanged
            } else {
                Change::Modified
            };
            Ok(Decision {
                change,
                sha256: Some(hash),
            })
        }
        ChangeDetection::Auto => {
            if metadata_match && !force_rehash {
                return Ok(Decision {
                    change: Change::Unchanged,
                    sha256: prev.sha256.clone(),
                });
            }
            let hash = hash_file(&scanned.abs_path)?;
            let change = if prev.sha256.as_deref() == Some(hash.as_str()) {
                Change::Unchanged
            } else {
                Change::Modified
            };
            Ok(Decision {
                change,
                sha256: Some(hash),
            })
        }
    }
}

/// Streaming SHA-256 of a file's content.
pub fn hash_file(path: &Path) -> Result<String, ClassificationError> {
    let wrap = |e: std::io::Error| ClassificationError {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = std::fs::File::open(path).map_err(wrap)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(wrap)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scanned(path: PathBuf, size: i64, mtime: i64) -> ScannedFile {
        ScannedFile {
            rel_path: "a.md".to_string(),
            abs_path: path,
            folder_rel: String::new(),
            ext: Some("md".to_string()),
            size_bytes: size,
            mtime_epoch: mtime,
        }
    }

    fn record(size: i64, mtime: i64, sha256: Option<&str>) -> FileRecord {
        FileRecord {
            id: "f1".to_string(),
            rel_path: "a.md".to_string(),
            size_bytes: size,
            mtime_epoch: mtime,
            sha256: sha256.map(|s| s.to_string()),
            last_ingest_status: "ok".to_string(),
        }
    }

    fn write_temp(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn new_file_without_record() {
        let (_dir, path) = write_temp("hello");
        let d = classify(
            None,
            &scanned(path, 5, 100),
            ChangeDetection::MtimeSize,
            false,
        )
        .unwrap();
        assert_eq!(d.change, Change::New);
        assert!(d.sha256.is_none());
    }

    #[test]
    fn new_file_hashed_under_sha_strategy() {
        let (_dir, path) = write_temp("hello");
        let d = classify(None, &scanned(path, 5, 100), ChangeDetection::Sha256, false).unwrap();
        assert_eq!(d.change, Change::New);
        assert_eq!(d.sha256.as_deref(), Some(sha256_hex(b"hello").as_str()));
    }

    #[test]
    fn mtime_size_match_is_unchanged() {
        let (_dir, path) = write_temp("hello");
        let prev = record(5, 100, Some("abc"));
        let d = classify(
            Some(&prev),
            &scanned(path, 5, 100),
            ChangeDetection::MtimeSize,
            false,
        )
        .unwrap();
        assert_eq!(d.change, Change::Unchanged);
        // carried forward, not recomputed
        assert_eq!(d.sha256.as_deref(), Some("abc"));
    }

    #[test]
    fn mtime_size_mismatch_is_modified() {
        let (_dir, path) = write_temp("hello");
        let prev = record(5, 100, None);
        let d = classify(
            Some(&prev),
            &scanned(path, 5, 999),
            ChangeDetection::MtimeSize,
            false,
        )
        .unwrap();
        assert_eq!(d.change, Change::Modified);
    }

    #[test]
    fn sha256_detects_touch_without_edit() {
        let (_dir, path) = write_temp("hello");
        let prev = record(5, 100, Some(&sha256_hex(b"hello")));
        // mtime moved but content identical
        let d = classify(
            Some(&prev),
            &scanned(path, 5, 999),
            ChangeDetection::Sha256,
            false,
        )
        .unwrap();
        assert_eq!(d.change, Change::Unchanged);
    }

    #[test]
    fn auto_downgrades_metadata_drift_to_unchanged() {
        let (_dir, path) = write_temp("hello");
        let prev = record(5, 100, Some(&sha256_hex(b"hello")));
        let d = classify(
            Some(&prev),
            &scanned(path, 5, 999),
            ChangeDetection::Auto,
            false,
        )
        .unwrap();
        assert_eq!(d.change, Change::Unchanged);
        assert!(d.sha256.is_some());
    }

    #[test]
    fn auto_skips_hash_when_metadata_matches() {
        let dir = tempfile::tempdir().unwrap();
        // Path deliberately does not exist: if auto tried to hash it, the
        // classify call would fail instead of returning Unchanged.
        let path = dir.path().join("ghost.md");
        let prev = record(5, 100, Some("abc"));
        let d = classify(
            Some(&prev),
            &scanned(path, 5, 100),
            ChangeDetection::Auto,
            false,
        )
        .unwrap();
        assert_eq!(d.change, Change::Unchanged);
    }

    #[test]
    fn auto_detects_real_edit() {
        let (_dir, path) = write_temp("hello world");
        let prev = record(5, 100, Some(&sha256_hex(b"hello")));
        let d = classify(
            Some(&prev),
            &scanned(path, 11, 999),
            ChangeDetection::Auto,
            false,
        )
        .unwrap();
        assert_eq!(d.change, Change::Modified);
        assert_eq!(
            d.sha256.as_deref(),
            Some(sha256_hex(b"hello world").as_str())
        );
    }

    #[test]
    fn force_rehash_overrides_metadata_match() {
        let (_dir, path) = write_temp("hello");
        let prev = record(5, 100, Some("stale-hash"));
        let d = classify(
            Some(&prev),
            &scanned(path, 5, 100),
            ChangeDetection::Auto,
            true,
        )
        .unwrap();
        assert_eq!(d.change, Change::Modified);
    }

    #[test]
    fn hash_io_failure_is_classification_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.md");
        let prev = record(5, 100, None);
        let res = classify(
            Some(&prev),
            &scanned(path, 6, 200),
            ChangeDetection::Sha256,
            false,
        );
        assert!(res.is_err());
    }
}
