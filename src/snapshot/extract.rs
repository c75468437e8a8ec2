//! Repository Snapshot Extractor.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use git2::Repository;
use tracing::{debug, info, warn};

use crate::config::ChangeDetection;
use crate::error::GitError;
use crate::git::{self, ChangeKind};
use crate::snapshot::{RepoSnapshot, build_folder_tree, count_tokens};

/// Window for [`RepoSnapshot::recent_commit_count`].
const RECENT_ACTIVITY_DAYS: i64 = 30;

/// Capture the repository state and the allow-listed set of changed files.
///
/// Changed paths outside the allow-list, deleted paths and paths missing on
/// disk are logged and excluded. An empty result is a normal outcome.
pub fn extract_snapshot(
    repo: &Repository,
    detection: &ChangeDetection,
) -> Result<RepoSnapshot, GitError> {
    let info = git::repo_info(repo)?;

    let mut changed_files = Vec::new();
    for change in git::changed_paths(repo, detection.include_untracked)? {
        if !detection.allows(&change.path) {
            debug!("Excluding {} (extension not in allow-list)", change.path);
            continue;
        }
        if change.kind == ChangeKind::Deleted || !info.root.join(&change.path).is_file() {
            info!("Excluding {} (not present on disk)", change.path);
            continue;
        }
        changed_files.push(change.path);
    }

    let tracked = git::tracked_files(repo)?;
    let all_files: BTreeSet<&str> = tracked
        .iter()
        .map(String::as_str)
        .chain(changed_files.iter().map(String::as_str))
        .collect();

    let diff_stat = match git::diff_stat(repo, &changed_files) {
        Ok(stat) => stat,
        Err(e) => {
            warn!("Could not compute diff stat: {}", e);
            String::new()
        }
    };

    let readme_path = find_readme(&info.root);
    let readme_tokens = readme_path.as_ref().map(|path| match fs::read_to_string(path) {
        Ok(text) => count_tokens(&text),
        Err(e) => {
            warn!("Could not read {}: {}", path.display(), e);
            0
        }
    });

    let since = Utc::now() - Duration::days(RECENT_ACTIVITY_DAYS);

    Ok(RepoSnapshot {
        name: info.name,
        default_branch: info.default_branch,
        current_branch: info.current_branch,
        branches: info.branches,
        contributor_count: git::contributor_count(repo)?,
        recent_commit_count: git::recent_commit_count(repo, since)?,
        extension_counts: extension_counts(all_files.iter().copied()),
        folder_tree: build_folder_tree(all_files.iter().copied(), detection),
        root: info.root,
        changed_files,
        diff_stat,
        readme_tokens,
        readme_path,
    })
}

/// `README.md` (any case) or plain `README` at the repository root.
fn find_readme(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                n.eq_ignore_ascii_case("readme.md") || n.eq_ignore_ascii_case("readme")
            })
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn extension_counts<'a>(paths: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for path in paths {
        let ext = Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "(none)".to_string());
        *counts.entry(ext).or_insert(0) += 1;
    }
    counts
}
