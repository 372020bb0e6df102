//! Source scanning: filesystem snapshot plus folder bookkeeping.
//!
//! A scan walks one source root and produces a [`Snapshot`]: every admitted
//! file keyed by relative path with size/mtime metadata, the folder tree
//! that was visited, and any branch-level errors (cycles, unreadable
//! directories). Branch errors never abort the scan; only an unreachable
//! root does.
//!
//! Folder rows are upserted with a fresh `last_seen_at`. Folders that were
//! not visited are pruned only by [`prune_unseen_folders`], and the
//! orchestrator calls that only after a scan that completed with zero
//! errors — a transiently unmounted subtree must not destroy folder rows.

use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::db;
use crate::error::ScanError;
use crate::filter::PathFilter;

/// One admitted file, as seen on disk during a scan.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub folder_rel: String,
    pub ext: Option<String>,
    pub size_bytes: i64,
    pub mtime_epoch: i64,
}

/// One visited directory, relative to the source root ("" is the root).
#[derive(Debug, Clone)]
pub struct ScannedFolder {
    pub rel_path: String,
    pub parent_rel: Option<String>,
    pub depth: i64,
}

#[derive(Debug, Default)]
pub struct Snapshot {
    /// Visited folders, parents before children.
    pub folders: Vec<ScannedFolder>,
    /// Admitted files keyed by relative path (deterministic order).
    pub files: BTreeMap<String, ScannedFile>,
    /// Branch-level failures; the branches themselves were skipped.
    pub errors: Vec<ScanError>,
}

pub fn scan_source(
    root: &Path,
    recursive: bool,
    follow_symlinks: bool,
    filter: &PathFilter,
) -> Result<Snapshot, ScanError> {
    if !root.exists() {
        return Err(ScanError::RootUnreachable {
            path: root.to_path_buf(),
            reason: "path does not exist".to_string(),
        });
    }

    let mut snapshot = Snapshot {
        folders: vec![ScannedFolder {
            rel_path: String::new(),
            parent_rel: None,
            depth: 0,
        }],
        ..Default::default()
    };

    let mut walker = WalkDir::new(root).follow_links(follow_symlinks);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut iter = walker.into_iter();
    while let Some(entry) = iter.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                snapshot.errors.push(walk_error(root, e));
                continue;
            }
        };

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            if rel_str.is_empty() {
                continue; // root already present
            }
            if filter.prunes_dir(&rel_str) {
                iter.skip_current_dir();
                continue;
            }
            // Folders are recorded even when file globs like **/*.md would
            // match nothing inside; only explicit excludes hide a branch.
            let parent_rel = match relative.parent() {
                Some(p) if p != Path::new("") => p.to_string_lossy().replace('\\', "/"),
                _ => String::new(),
            };
            snapshot.folders.push(ScannedFolder {
                rel_path: rel_str.clone(),
                parent_rel: Some(parent_rel),
                depth: relative.components().count() as i64,
            });
            continue;
        }

        if !entry.file_type().is_file() && !entry.path_is_symlink() {
            continue;
        }

        if !filter.admit(path, &rel_str) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                snapshot.errors.push(ScanError::Unreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let mtime_epoch = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let folder_rel = match relative.parent() {
            Some(p) if p != Path::new("") => p.to_string_lossy().replace('\\', "/"),
            _ => String::new(),
        };

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        snapshot.files.insert(
            rel_str.clone(),
            ScannedFile {
                rel_path: rel_str,
                abs_path: path.to_path_buf(),
                folder_rel,
                ext,
                size_bytes: metadata.len() as i64,
                mtime_epoch,
            },
        );
    }

    Ok(snapshot)
}

fn walk_error(root: &Path, e: walkdir::Error) -> ScanError {
    let path = e
        .path()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| root.to_path_buf());
    if e.loop_ancestor().is_some() {
        ScanError::SymlinkCycle { path }
    } else {
        ScanError::Unreadable {
            path,
            reason: e
                .io_error()
                .map(|io| io.to_string())
                .unwrap_or_else(|| e.to_string()),
        }
    }
}

/// Upsert every visited folder, touching `last_seen_at`, and return the
/// rel_path → folder id map. Folders arrive parents-first so the parent id
/// is always resolvable.
pub async fn upsert_folders(
    pool: &SqlitePool,
    source_id: &str,
    folders: &[ScannedFolder],
) -> Result<BTreeMap<String, String>, sqlx::Error> {
    let now = db::now_epoch();
    let mut ids: BTreeMap<String, String> = BTreeMap::new();

    for folder in folders {
        let parent_id = folder
            .parent_rel
            .as_ref()
            .and_then(|p| ids.get(p.as_str()).cloned());

        let id: String = sqlx::query_scalar(
            r#"
            INSERT INTO source_folders (id, source_id, rel_path, parent_id, depth, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, rel_path)
                DO UPDATE SET last_seen_at = excluded.last_seen_at
            RETURNING id
            "#,
        )
        .bind(db::new_id())
        .bind(source_id)
        .bind(&folder.rel_path)
        .bind(parent_id)
        .bind(folder.depth)
        .bind(now)
        .fetch_one(pool)
        .await?;

        ids.insert(folder.rel_path.clone(), id);
    }

    Ok(ids)
}

/// Delete folder rows not seen since `cutoff_epoch`. Only call after a scan
/// that completed without errors; this is the explicit prune policy.
pub async fn prune_unseen_folders(
    pool: &SqlitePool,
    source_id: &str,
    cutoff_epoch: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM source_folders
         WHERE source_id = ? AND last_seen_at < ? AND rel_path <> ''",
    )
    .bind(source_id)
    .bind(cutoff_epoch)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(root: &Path, include: &[&str]) -> PathFilter {
        PathFilter::new(
            root,
            &include.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &[],
            false,
        )
        .unwrap()
    }

    #[test]
    fn scan_collects_files_and_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lore/npcs")).unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("lore/npcs/b.md"), "beta").unwrap();
        std::fs::write(dir.path().join("lore/skip.txt"), "no").unwrap();

        let f = filter(dir.path(), &["**/*.md"]);
        let snap = scan_source(dir.path(), true, false, &f).unwrap();

        assert_eq!(snap.files.len(), 2);
        assert!(snap.files.contains_key("a.md"));
        assert!(snap.files.contains_key("lore/npcs/b.md"));
        assert!(snap.errors.is_empty());

        let rels: Vec<&str> = snap.folders.iter().map(|f| f.rel_path.as_str()).collect();
        assert!(rels.contains(&""));
        assert!(rels.contains(&"lore"));
        assert!(rels.contains(&"lore/npcs"));
        // parents before children
        let lore_pos = rels.iter().position(|r| *r == "lore").unwrap();
        let npcs_pos = rels.iter().position(|r| *r == "lore/npcs").unwrap();
        assert!(lore_pos < npcs_pos);
    }

    #[test]
    fn excluded_dirs_do_not_contribute_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        std::fs::write(dir.path().join("a.md"), "size 100ish").unwrap();
        std::fs::write(dir.path().join(".obsidian/x.md"), "hidden").unwrap();

        let f = filter(dir.path(), &["**/*.md"]);
        let snap = scan_source(dir.path(), true, false, &f).unwrap();

        assert_eq!(snap.files.len(), 1);
        assert!(snap.files.contains_key("a.md"));
    }

    #[test]
    fn non_recursive_stays_at_top_level() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("deep")).unwrap();
        std::fs::write(dir.path().join("top.md"), "t").unwrap();
        std::fs::write(dir.path().join("deep/below.md"), "b").unwrap();

        let f = filter(dir.path(), &["**/*.md"]);
        let snap = scan_source(dir.path(), false, false, &f).unwrap();

        assert_eq!(snap.files.len(), 1);
        assert!(snap.files.contains_key("top.md"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        let f = filter(dir.path(), &[]);
        let err = scan_source(&gone, true, false, &f).unwrap_err();
        assert!(matches!(err, ScanError::RootUnreachable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("ok.md"), "fine").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/loop")).unwrap();

        let f = PathFilter::new(dir.path(), &["**/*.md".to_string()], &[], true).unwrap();
        let snap = scan_source(dir.path(), true, true, &f).unwrap();

        assert!(snap.files.contains_key("ok.md"));
        assert!(snap
            .errors
            .iter()
            .any(|e| matches!(e, ScanError::SymlinkCycle { .. })));
    }
}
