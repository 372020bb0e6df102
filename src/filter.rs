//! Include/exclude path filtering with a containment boundary.
//!
//! Glob evaluation follows the usual precedence: exclude wins over include,
//! and an empty include set admits everything. Separately from the globs,
//! any path that resolves outside the source root is excluded. That check is
//! a security boundary, not a filter, and it fails closed: if the path
//! cannot be canonicalized, it is excluded.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

/// Exclusions applied to every source on top of its own patterns.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/.obsidian/**",
    "**/node_modules/**",
];

pub struct PathFilter {
    include: GlobSet,
    include_empty: bool,
    exclude: GlobSet,
    canonical_root: Option<PathBuf>,
    follow_symlinks: bool,
}

impl PathFilter {
    pub fn new(
        root: &Path,
        include_globs: &[String],
        exclude_globs: &[String],
        follow_symlinks: bool,
    ) -> Result<Self> {
        let include = build_globset(include_globs)?;

        let mut excludes: Vec<String> =
            DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        // Canonicalized once so per-path containment checks compare resolved
        // paths against a resolved root.
        let canonical_root = root.canonicalize().ok();

        Ok(Self {
            include,
            include_empty: include_globs.is_empty(),
            exclude,
            canonical_root,
            follow_symlinks,
        })
    }

    /// Glob-only decision on a root-relative path.
    pub fn matches(&self, rel_path: &str) -> bool {
        if self.exclude.is_match(rel_path) {
            return false;
        }
        self.include_empty || self.include.is_match(rel_path)
    }

    /// True when the exclude set swallows the whole subtree rooted at
    /// `rel_path`, so the scanner can skip descending into it.
    pub fn prunes_dir(&self, rel_path: &str) -> bool {
        self.exclude.is_match(rel_path) || self.exclude.is_match(format!("{}/\u{1}", rel_path))
    }

    /// Full admission check: globs plus the containment boundary.
    pub fn admit(&self, abs_path: &Path, rel_path: &str) -> bool {
        self.matches(rel_path) && self.contained(abs_path)
    }

    /// True iff `abs_path` resolves under the source root. Fails closed on
    /// any resolution error (dangling symlink, permission, missing root).
    pub fn contained(&self, abs_path: &Path) -> bool {
        let root = match &self.canonical_root {
            Some(r) => r,
            None => return false,
        };
        if !self.follow_symlinks {
            // Symlinks are not followed during the scan, so a lexically
            // in-root path cannot escape; only resolve the real path when
            // links are in play.
            if let Ok(meta) = abs_path.symlink_metadata() {
                if !meta.file_type().is_symlink() {
                    return true;
                }
            }
            return false;
        }
        match abs_path.canonicalize() {
            Ok(resolved) => resolved.starts_with(root),
            Err(_) => false,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_in(dir: &Path, include: &[&str], exclude: &[&str]) -> PathFilter {
        PathFilter::new(
            dir,
            &include.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &exclude.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            true,
        )
        .unwrap()
    }

    #[test]
    fn exclude_wins_over_include() {
        let dir = tempfile::tempdir().unwrap();
        let f = filter_in(dir.path(), &["**/*.md"], &["drafts/**"]);
        assert!(f.matches("notes/a.md"));
        assert!(!f.matches("drafts/a.md"));
    }

    #[test]
    fn empty_include_admits_everything_not_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let f = filter_in(dir.path(), &[], &[]);
        assert!(f.matches("anything.txt"));
        assert!(!f.matches(".obsidian/workspace.json"));
    }

    #[test]
    fn default_excludes_apply() {
        let dir = tempfile::tempdir().unwrap();
        let f = filter_in(dir.path(), &["**/*.md"], &[]);
        assert!(!f.matches(".obsidian/x.md"));
        assert!(!f.matches(".git/config.md"));
    }

    #[test]
    fn path_outside_root_is_excluded() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("escape.md");
        std::fs::write(&outside, "x").unwrap();

        let f = filter_in(root.path(), &["**/*.md"], &[]);
        assert!(!f.admit(&outside, "escape.md"));
    }

    #[test]
    fn unresolvable_path_fails_closed() {
        let root = tempfile::tempdir().unwrap();
        let f = filter_in(root.path(), &[], &[]);
        assert!(!f.contained(&root.path().join("does-not-exist.md")));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_root_is_excluded() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let target = other.path().join("secret.md");
        std::fs::write(&target, "x").unwrap();
        let link = root.path().join("link.md");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let f = filter_in(root.path(), &["**/*.md"], &[]);
        assert!(!f.admit(&link, "link.md"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_root_is_admitted_when_following() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("real.md");
        std::fs::write(&target, "x").unwrap();
        let link = root.path().join("link.md");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let f = filter_in(root.path(), &["**/*.md"], &[]);
        assert!(f.admit(&link, "link.md"));
    }
}
